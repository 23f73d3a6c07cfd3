//! Session providers: the byte streams the client talks HTTP over.
//!
//! A session is any `AsyncRead + AsyncWrite` stream. Closing a session is
//! dropping it. `TlsConnector` opens rustls sessions; `PlainConnector` opens
//! bare TCP for `http://` endpoints.

use std::fs::File;
use std::future::Future;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::crypto::{self, CryptoProvider};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::error::Error;

/// A live byte stream to the server.
pub trait Session: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Session for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

pub type BoxSession = Box<dyn Session>;

/// Opens sessions to a host.
pub trait SessionProvider: Send + Sync {
    fn open(&self, host: &str, port: u16) -> impl Future<Output = io::Result<BoxSession>> + Send;
}

/// TLS verification policy and trust anchors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsOptions {
    /// Verify the server certificate chain and host name
    pub verify_peer: bool,
    /// PEM file with trust anchors
    pub ca_file: Option<PathBuf>,
    /// Directory of PEM files with trust anchors
    pub ca_path: Option<PathBuf>,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            verify_peer: true,
            ca_file: None,
            ca_path: None,
        }
    }
}

/// Plain TCP sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainConnector;

impl SessionProvider for PlainConnector {
    async fn open(&self, host: &str, port: u16) -> io::Result<BoxSession> {
        let tcp = TcpStream::connect((host, port)).await?;
        tcp.set_nodelay(true)?;
        Ok(Box::new(tcp))
    }
}

/// rustls sessions over TCP.
#[derive(Clone)]
pub struct TlsConnector {
    inner: tokio_rustls::TlsConnector,
}

impl TlsConnector {
    /// Builds the rustls configuration. Trust anchors are read here, so a bad
    /// `ca_file` fails construction rather than the first request.
    pub fn new(options: &TlsOptions) -> Result<Self, Error> {
        let provider = Arc::new(crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Tls(e.to_string()))?;

        let mut config = if options.verify_peer {
            builder
                .with_root_certificates(build_root_store(options)?)
                .with_no_client_auth()
        } else {
            tracing::warn!("TLS peer verification disabled");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(provider)))
                .with_no_client_auth()
        };
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Ok(Self {
            inner: tokio_rustls::TlsConnector::from(Arc::new(config)),
        })
    }
}

impl SessionProvider for TlsConnector {
    async fn open(&self, host: &str, port: u16) -> io::Result<BoxSession> {
        let server_name = ServerName::try_from(host)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid host name"))?
            .to_owned();

        let tcp = TcpStream::connect((host, port)).await?;
        tcp.set_nodelay(true)?;

        let tls = self
            .inner
            .connect(server_name, tcp)
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::ConnectionRefused, e))?;
        Ok(Box::new(tls))
    }
}

/// Provider picked from the endpoint scheme.
#[derive(Clone)]
pub enum Connector {
    Plain(PlainConnector),
    Tls(TlsConnector),
}

impl SessionProvider for Connector {
    async fn open(&self, host: &str, port: u16) -> io::Result<BoxSession> {
        match self {
            Connector::Plain(c) => c.open(host, port).await,
            Connector::Tls(c) => c.open(host, port).await,
        }
    }
}

/// Configured anchors when given, otherwise platform certs with Mozilla roots as fallback.
fn build_root_store(options: &TlsOptions) -> Result<RootCertStore, Error> {
    let mut root_store = RootCertStore::empty();

    if options.ca_file.is_some() || options.ca_path.is_some() {
        if let Some(file) = &options.ca_file {
            add_pem_file(&mut root_store, file)?;
        }
        if let Some(dir) = &options.ca_path {
            let entries = std::fs::read_dir(dir)
                .map_err(|e| Error::Tls(format!("{}: {e}", dir.display())))?;
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_file() {
                    // hashed-directory layouts hold non-PEM files too
                    if let Err(e) = add_pem_file(&mut root_store, &path) {
                        tracing::debug!(path = %path.display(), error = %e, "skipping trust anchor");
                    }
                }
            }
        }
        if root_store.is_empty() {
            return Err(Error::Tls("no trust anchors found".into()));
        }
        return Ok(root_store);
    }

    match rustls_native_certs::load_native_certs() {
        Ok(certs) => {
            let (added, ignored) = root_store.add_parsable_certificates(certs);
            tracing::trace!(added, ignored, "loaded native trust anchors");
        }
        Err(e) => tracing::debug!(error = %e, "native trust anchors unavailable"),
    }
    if root_store.is_empty() {
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }
    Ok(root_store)
}

fn add_pem_file(root_store: &mut RootCertStore, path: &Path) -> Result<(), Error> {
    let file = File::open(path).map_err(|e| Error::Tls(format!("{}: {e}", path.display())))?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<_, _>>()
        .map_err(|e| Error::Tls(format!("{}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(Error::Tls(format!("{}: no certificates", path.display())));
    }
    root_store.add_parsable_certificates(certs);
    Ok(())
}

/// Accepts any server certificate but still checks handshake signatures.
#[derive(Debug)]
struct AcceptAnyCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        crypto::verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        crypto::verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
