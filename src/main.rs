use objstore_http::{Config, HttpClient, Method, RequestBuilder, stats};
use anyhow::Context;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::resolve()?;
    let mut args = std::env::args().skip(1);
    let path = args.next().unwrap_or_else(|| "/".to_string());
    let method = match args.next() {
        Some(verb) => Method::from_str(&verb).with_context(|| format!("unknown method: {verb}"))?,
        None => Method::HEAD,
    };

    tokio::select! {
        res = probe(&cfg, method, &path) => {
            res?;
        }

        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
        }
    }

    if let Some(snapshot) = stats::snapshot() {
        info!("{}", snapshot);
    }

    Ok(())
}

async fn probe(cfg: &Config, method: Method, path: &str) -> anyhow::Result<()> {
    let mut client = HttpClient::from_config(cfg)?;

    let request = RequestBuilder::new()
        .method(method)
        .path(path)
        .header("Host", client.host())
        .header("User-Agent", concat!("objstore-probe/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(anyhow::Error::msg)?;

    let response = client.request(&request, true).await?;
    info!(
        status = response.status(),
        reason = response.reason(),
        keep_alive = response.keep_alive(),
        "{} {}{}", method.as_str(), cfg.endpoint, path
    );

    Ok(())
}
