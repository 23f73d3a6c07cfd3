//! Scripted in-memory sessions for client tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use objstore_http::session::BoxSession;
use objstore_http::{ClientBuilder, HttpClient, SessionProvider, Stats};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};

pub const OK_EMPTY: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length:0\r\n\r\n";
pub const UNAVAILABLE: &[u8] = b"HTTP/1.1 503 Service Unavailable\r\n\r\n";

/// What the next `open` call does.
pub enum Script {
    /// Session whose input is these bytes, then EOF
    Reply(Vec<u8>),
    /// Connection refused
    Refuse,
    /// Session that accepts the request and never answers
    Stall,
}

/// Hands out one scripted session per `open`; when the script runs out,
/// every further session replies with `fallback`.
#[derive(Clone)]
pub struct ScriptedProvider {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    fallback: Arc<Vec<u8>>,
    pub opened: Arc<AtomicUsize>,
    pub dropped: Arc<AtomicUsize>,
    pub written: Arc<Mutex<Vec<u8>>>,
    stalled: Arc<Mutex<Vec<DuplexStream>>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self::with_fallback(scripts, UNAVAILABLE)
    }

    pub fn replies(replies: &[&[u8]]) -> Self {
        Self::new(replies.iter().map(|r| Script::Reply(r.to_vec())).collect())
    }

    pub fn with_fallback(scripts: Vec<Script>, fallback: &[u8]) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts.into())),
            fallback: Arc::new(fallback.to_vec()),
            opened: Arc::new(AtomicUsize::new(0)),
            dropped: Arc::new(AtomicUsize::new(0)),
            written: Arc::new(Mutex::new(Vec::new())),
            stalled: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }

    pub fn written_text(&self) -> String {
        String::from_utf8_lossy(&self.written.lock().unwrap()).into_owned()
    }
}

impl SessionProvider for ScriptedProvider {
    async fn open(&self, _host: &str, _port: u16) -> io::Result<BoxSession> {
        let next = self.scripts.lock().unwrap().pop_front();
        let input = match next {
            Some(Script::Reply(bytes)) => bytes,
            Some(Script::Refuse) => {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
            }
            Some(Script::Stall) => {
                let (local, peer) = tokio::io::duplex(4096);
                self.stalled.lock().unwrap().push(peer);
                self.opened.fetch_add(1, Ordering::SeqCst);
                return Ok(Box::new(local));
            }
            None => self.fallback.as_ref().clone(),
        };

        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            input,
            pos: 0,
            written: self.written.clone(),
            dropped: self.dropped.clone(),
        }))
    }
}

pub struct MockSession {
    input: Vec<u8>,
    pos: usize,
    written: Arc<Mutex<Vec<u8>>>,
    dropped: Arc<AtomicUsize>,
}

impl AsyncRead for MockSession {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let rest = &this.input[this.pos..];
        let n = rest.len().min(buf.remaining());
        buf.put_slice(&rest[..n]);
        this.pos += n;
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockSession {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.written.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

/// Client for example.com:443 reporting into a private stats sink.
pub fn client(provider: ScriptedProvider, timeout: Duration) -> (HttpClient<ScriptedProvider>, Arc<Stats>) {
    let stats = Arc::new(Stats::new());
    let client = ClientBuilder::new("example.com")
        .port(443)
        .timeout(timeout)
        .stats(stats.clone())
        .build(provider)
        .unwrap();
    (client, stats)
}
