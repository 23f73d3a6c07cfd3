use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;

use crate::session::TlsOptions;

/// Endpoint and policy for one client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the storage endpoint, e.g. "https://s3.example.com"
    pub endpoint: String,
    /// Deadline for one request, across all retry attempts
    pub timeout_ms: u64,
    /// Verify the server certificate
    pub verify_peer: bool,
    /// PEM file with trust anchors
    pub ca_file: Option<PathBuf>,
    /// Directory of PEM trust anchors
    pub ca_path: Option<PathBuf>,
    /// First pause between retry attempts; derived from the timeout when unset
    pub retry_backoff_ms: Option<u64>,
}

/// Host, port and scheme taken from `Config::endpoint`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub secure: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "https://localhost".to_string(),
            timeout_ms: 30_000,
            verify_peer: true,
            ca_file: None,
            ca_path: None,
            retry_backoff_ms: None,
        }
    }
}

impl Config {
    /// Reads the `OBJSTORE_*` environment variables, falling back to defaults.
    pub fn load() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like `load`, with variables supplied by `lookup`. Unparsable numbers
    /// and flags keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let flag = |value: String| match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        };

        Self {
            endpoint: lookup("OBJSTORE_ENDPOINT").unwrap_or(defaults.endpoint),
            timeout_ms: lookup("OBJSTORE_TIMEOUT_MS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.timeout_ms),
            verify_peer: lookup("OBJSTORE_VERIFY_PEER")
                .and_then(flag)
                .unwrap_or(defaults.verify_peer),
            ca_file: lookup("OBJSTORE_CA_FILE").map(PathBuf::from),
            ca_path: lookup("OBJSTORE_CA_PATH").map(PathBuf::from),
            retry_backoff_ms: lookup("OBJSTORE_RETRY_BACKOFF_MS")
                .and_then(|v| v.trim().parse().ok())
                .or(defaults.retry_backoff_ms),
        }
    }

    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(text).context("invalid client configuration")
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("in {}", path.display()))
    }

    /// The YAML file named by `OBJSTORE_CONFIG` if set, otherwise the environment.
    pub fn resolve() -> anyhow::Result<Self> {
        match std::env::var_os("OBJSTORE_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path)),
            None => Ok(Self::load()),
        }
    }

    pub fn target(&self) -> anyhow::Result<Target> {
        let url = url::Url::parse(&self.endpoint)
            .with_context(|| format!("invalid endpoint URL: {}", self.endpoint))?;

        let secure = match url.scheme() {
            "https" => true,
            "http" => false,
            other => bail!("unsupported endpoint scheme: {other}"),
        };
        let host = url.host_str().context("endpoint URL missing host")?;
        let port = url.port().unwrap_or(if secure { 443 } else { 80 });

        Ok(Target {
            host: host.to_string(),
            port,
            secure,
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_backoff(&self) -> Option<Duration> {
        self.retry_backoff_ms.map(Duration::from_millis)
    }

    pub fn tls_options(&self) -> TlsOptions {
        TlsOptions {
            verify_peer: self.verify_peer,
            ca_file: self.ca_file.clone(),
            ca_path: self.ca_path.clone(),
        }
    }
}
