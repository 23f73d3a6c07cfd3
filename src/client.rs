//! HTTP client bound to one object-storage endpoint.
//!
//! The client owns at most one session and lets one response use it at a
//! time. Each `request` call runs a retry loop under a single deadline:
//! I/O failures, malformed responses and 5xx statuses close the session and
//! try again after a growing pause. Once no pause fits before the deadline,
//! the error of the last attempt is returned as is.

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::deadline::{self, Deadline};
use crate::error::Error;
use crate::http::connection::{Disposition, Link};
use crate::http::request::Request;
use crate::http::response::{Response, is_server_error};
use crate::session::{Connector, PlainConnector, SessionProvider, TlsConnector, TlsOptions};
use crate::stats::Stats;

/// Default per-request deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Builder for clients with a custom session provider or statistics sink.
pub struct ClientBuilder {
    host: String,
    port: u16,
    timeout: Duration,
    retry_backoff: Option<Duration>,
    stats: Option<Arc<Stats>>,
}

impl ClientBuilder {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 443,
            timeout: DEFAULT_TIMEOUT,
            retry_backoff: None,
            stats: None,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Deadline shared by all attempts of one request.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// First pause between attempts; later pauses grow from it. Defaults to
    /// 100 ms or a tenth of the timeout, whichever is shorter.
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = Some(backoff);
        self
    }

    /// Report into `stats` instead of the process-wide sink.
    pub fn stats(mut self, stats: Arc<Stats>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn build<P: SessionProvider>(self, provider: P) -> Result<HttpClient<P>, Error> {
        if self.host.is_empty() {
            return Err(Error::InvalidHost);
        }

        let stats = self.stats.unwrap_or_else(Stats::global);
        stats.record_object();

        tracing::debug!(host = %self.host, port = self.port, timeout_ms = self.timeout.as_millis() as u64, "client created");

        Ok(HttpClient {
            host: self.host,
            port: self.port,
            timeout: self.timeout,
            retry_backoff: self
                .retry_backoff
                .unwrap_or_else(|| deadline::default_pause(self.timeout)),
            provider,
            link: Arc::new(Link::new(stats)),
            current: None,
        })
    }
}

/// Client for one host:port.
///
/// Not meant to be shared between tasks; every state change takes `&mut self`.
pub struct HttpClient<P: SessionProvider = TlsConnector> {
    host: String,
    port: u16,
    timeout: Duration,
    /// First pause between attempts
    retry_backoff: Duration,
    provider: P,
    link: Arc<Link>,
    /// Generation of the busy response handed out by the last request
    current: Option<u64>,
}

impl HttpClient<TlsConnector> {
    /// TLS client for `host:port`. Trust anchors are loaded now; the session
    /// itself is opened by the first request.
    pub fn new(host: &str, port: u16, timeout: Duration, tls: TlsOptions) -> Result<Self, Error> {
        if host.is_empty() {
            return Err(Error::InvalidHost);
        }
        let connector = TlsConnector::new(&tls)?;
        ClientBuilder::new(host).port(port).timeout(timeout).build(connector)
    }
}

impl HttpClient<Connector> {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let target = config.target()?;
        let connector = if target.secure {
            Connector::Tls(TlsConnector::new(&config.tls_options())?)
        } else {
            Connector::Plain(PlainConnector)
        };

        let mut builder = ClientBuilder::new(target.host)
            .port(target.port)
            .timeout(config.timeout());
        if let Some(backoff) = config.retry_backoff() {
            builder = builder.retry_backoff(backoff);
        }
        Ok(builder.build(connector)?)
    }
}

impl<P: SessionProvider> HttpClient<P> {
    pub fn builder(host: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(host)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether a response handed out earlier still has its body on the wire.
    pub fn is_busy(&self) -> bool {
        self.current
            .is_some_and(|generation| self.link.is_current(generation))
    }

    /// Sends `request` and returns the first non-5xx response.
    ///
    /// With `cache_content` the body is read into memory before returning;
    /// otherwise it stays on the wire and the client is busy until the body
    /// is drained or the response finalized.
    pub async fn request(&mut self, request: &Request, cache_content: bool) -> Result<Response, Error> {
        if self.is_busy() {
            tracing::error!(
                method = request.method.as_str(),
                path = %request.path,
                "request issued while previous response is still busy"
            );
            return Err(Error::ClientBusy);
        }
        self.current = None;

        let mut deadline = Deadline::start(self.timeout, self.retry_backoff);
        let mut attempt = 1u32;

        let response = loop {
            let result = match tokio::time::timeout(
                deadline.remaining(),
                self.attempt(request, cache_content),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(deadline.timeout())),
            };

            match result {
                Ok(response) => break response,

                Err(e) if e.is_transient() => {
                    self.link.release(Disposition::Close);

                    let Some(pause) = deadline.next_pause() else {
                        tracing::error!(
                            host = %self.host,
                            method = request.method.as_str(),
                            path = %request.path,
                            attempts = attempt,
                            error = %e,
                            "request failed, deadline exhausted"
                        );
                        return Err(e);
                    };

                    self.link.stats().record_retry();
                    tracing::warn!(
                        host = %self.host,
                        method = request.method.as_str(),
                        path = %request.path,
                        attempt,
                        pause_ms = pause.as_millis() as u64,
                        error = %e,
                        "attempt failed, retrying"
                    );

                    tokio::time::sleep(pause).await;
                    attempt += 1;
                }

                Err(e) => {
                    self.link.release(Disposition::Close);
                    return Err(e);
                }
            }
        };

        self.link.stats().record_request();
        self.current = response.generation();

        tracing::debug!(
            method = request.method.as_str(),
            path = %request.path,
            status = response.status(),
            attempts = attempt,
            busy = response.is_busy(),
            "request complete"
        );

        Ok(response)
    }

    /// One write/read exchange on the current session, opening it if needed.
    async fn attempt(&mut self, request: &Request, cache_content: bool) -> Result<Response, Error> {
        let mut conn = self.link.lock().await;

        if conn.is_open() {
            tracing::trace!(host = %self.host, "reusing session");
        } else {
            let session = self
                .provider
                .open(&self.host, self.port)
                .await
                .map_err(Error::Connect)?;
            self.link.stats().record_session();
            tracing::debug!(host = %self.host, port = self.port, "session opened");
            conn.attach(session);
        }

        conn.send(request).await?;
        let head = conn.read_head().await?;

        if is_server_error(head.status) {
            return Err(Error::Server {
                status: head.status,
                reason: head.reason,
            });
        }

        let mut response = Response::open(head, request.method, Arc::clone(&self.link), &mut conn)?;
        drop(conn);

        if cache_content {
            response.cache().await?;
        }
        Ok(response)
    }

    /// Ends the in-flight exchange. Closing with `Disposition::ServerClose`
    /// counts as a forced close. Safe to call when nothing is in flight.
    pub fn done(&mut self, disposition: Disposition) {
        self.link.release(disposition);
        self.current = None;
    }

    /// Flag form of `done`. `close_required` without `close` is rejected.
    pub fn done_with(&mut self, close: bool, close_required: bool) -> Result<(), Error> {
        let disposition = Disposition::from_flags(close, close_required).inspect_err(|e| {
            tracing::error!(error = %e, "invalid done() flags");
        })?;
        self.done(disposition);
        Ok(())
    }
}

impl<P: SessionProvider> Drop for HttpClient<P> {
    fn drop(&mut self) {
        if self.is_busy() {
            tracing::debug!(host = %self.host, "finalizing busy response on client teardown");
        }
        self.current = None;
        self.link.release(Disposition::Close);
    }
}
