use bytes::{Buf, BytesMut};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::io::AsyncReadExt;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::Error;
use crate::http::parser::{ParseError, ResponseHead, find_line_end, parse_response_head};
use crate::http::request::Request;
use crate::http::writer::RequestWriter;
use crate::session::BoxSession;
use crate::stats::Stats;

const READ_CHUNK: usize = 8192;
const MAX_LINE: usize = 8 * 1024;

/// How a finished exchange leaves the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Session stays open for the next request.
    Keep,
    /// Session is closed by the client (local error or abandoned body).
    Close,
    /// Session is closed because the server required it.
    ServerClose,
}

impl Disposition {
    /// Maps the `close` / `close_required` flag pair. A close required by the
    /// server without closing is rejected.
    pub fn from_flags(close: bool, close_required: bool) -> Result<Self, Error> {
        match (close, close_required) {
            (false, false) => Ok(Disposition::Keep),
            (true, false) => Ok(Disposition::Close),
            (true, true) => Ok(Disposition::ServerClose),
            (false, true) => Err(Error::Contract("close required by server but close not requested")),
        }
    }

    /// Disposition at the natural end of a response.
    pub fn after_exchange(keep_alive: bool) -> Self {
        if keep_alive {
            Disposition::Keep
        } else {
            Disposition::ServerClose
        }
    }

    pub fn closes(self) -> bool {
        !matches!(self, Disposition::Keep)
    }

    pub fn server_required(self) -> bool {
        matches!(self, Disposition::ServerClose)
    }
}

/// The open session, if any, and bytes read past the last parsed boundary.
pub(crate) struct Conn {
    session: Option<BoxSession>,
    buffer: BytesMut,
}

impl Conn {
    fn new() -> Self {
        Self {
            session: None,
            buffer: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn attach(&mut self, session: BoxSession) {
        self.buffer.clear();
        self.session = Some(session);
    }

    /// Drops the session. Returns whether one was open.
    pub fn close(&mut self) -> bool {
        self.buffer.clear();
        self.session.take().is_some()
    }

    pub fn buffer(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    pub async fn send(&mut self, request: &Request) -> Result<(), Error> {
        let session = self.session.as_mut().ok_or_else(not_connected)?;
        let mut writer = RequestWriter::new(request);
        writer.write_to_stream(session).await?;
        tracing::trace!(bytes = writer.encoded_len(), method = request.method.as_str(), "request written");
        Ok(())
    }

    /// Reads more bytes into the buffer. Returns 0 at end of stream.
    pub async fn fill(&mut self) -> Result<usize, Error> {
        let session = self.session.as_mut().ok_or_else(not_connected)?;
        self.buffer.reserve(READ_CHUNK);
        Ok(session.read_buf(&mut self.buffer).await?)
    }

    /// Reads one CRLF-terminated line and returns it without the terminator.
    pub async fn read_line(&mut self) -> Result<BytesMut, Error> {
        loop {
            if let Some(end) = find_line_end(&self.buffer) {
                let mut line = self.buffer.split_to(end + 2);
                line.truncate(end);
                return Ok(line);
            }
            if self.buffer.len() > MAX_LINE {
                return Err(Error::Parse(ParseError::InvalidChunk));
            }
            if self.fill().await? == 0 {
                return Err(unexpected_eof("connection closed inside chunked body"));
            }
        }
    }

    /// Reads the next final response head, skipping interim 1xx responses.
    pub async fn read_head(&mut self) -> Result<ResponseHead, Error> {
        loop {
            match parse_response_head(&self.buffer) {
                Ok((head, consumed)) => {
                    self.buffer.advance(consumed);
                    if (100..200).contains(&head.status) && head.status != 101 {
                        tracing::trace!(status = head.status, "skipping interim response");
                        continue;
                    }
                    return Ok(head);
                }

                Err(ParseError::Incomplete) => {
                    // Need more data
                }

                Err(e) => return Err(Error::Parse(e)),
            }

            if self.fill().await? == 0 {
                return Err(unexpected_eof("connection closed before response head"));
            }
        }
    }
}

pub(crate) fn unexpected_eof(msg: &'static str) -> Error {
    Error::Io(io::Error::new(io::ErrorKind::UnexpectedEof, msg))
}

fn not_connected() -> Error {
    Error::Io(io::Error::new(io::ErrorKind::NotConnected, "no open session"))
}

/// Session slot shared by a client and the response currently reading from it.
///
/// `busy` is set while a response body is still on the wire; `generation`
/// identifies which response that is. Sync teardown paths cannot wait for the
/// lock, so when it is held they set `stale` and the next locker closes the
/// session before using it.
pub(crate) struct Link {
    conn: Mutex<Conn>,
    busy: AtomicBool,
    generation: AtomicU64,
    stale: AtomicBool,
    stats: Arc<Stats>,
}

impl Link {
    pub fn new(stats: Arc<Stats>) -> Self {
        Self {
            conn: Mutex::new(Conn::new()),
            busy: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            stale: AtomicBool::new(false),
            stats,
        }
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub async fn lock(&self) -> MutexGuard<'_, Conn> {
        let mut conn = self.conn.lock().await;
        if self.stale.swap(false, Ordering::AcqRel) && conn.close() {
            tracing::debug!("closed stale session");
        }
        conn
    }

    /// Marks the session busy for a new response and returns its generation.
    pub fn begin(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.busy.store(true, Ordering::Release);
        generation
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Whether `generation` is the response that still owns the busy session.
    pub fn is_current(&self, generation: u64) -> bool {
        self.is_busy() && self.generation.load(Ordering::Acquire) == generation
    }

    /// Clears the busy state unconditionally and applies `disposition`.
    pub fn release(&self, disposition: Disposition) {
        self.busy.store(false, Ordering::Release);
        self.apply_unlocked(disposition);
    }

    pub fn release_locked(&self, conn: &mut Conn, disposition: Disposition) {
        self.busy.store(false, Ordering::Release);
        self.apply(conn, disposition);
    }

    /// Ends the exchange of `generation` if it is still current. Repeated or
    /// late calls do nothing.
    pub fn finish(&self, generation: u64, disposition: Disposition) -> bool {
        if !self.claim(generation) {
            return false;
        }
        self.apply_unlocked(disposition);
        true
    }

    pub fn finish_locked(&self, conn: &mut Conn, generation: u64, disposition: Disposition) -> bool {
        if !self.claim(generation) {
            return false;
        }
        self.apply(conn, disposition);
        true
    }

    fn claim(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
            && self.busy.swap(false, Ordering::AcqRel)
    }

    fn apply(&self, conn: &mut Conn, disposition: Disposition) {
        if disposition.closes() && conn.close() {
            tracing::debug!(server_required = disposition.server_required(), "session closed");
        }
        if disposition.server_required() {
            self.stats.record_forced_close();
        }
    }

    fn apply_unlocked(&self, disposition: Disposition) {
        match self.conn.try_lock() {
            Ok(mut conn) => self.apply(&mut conn, disposition),
            Err(_) => {
                if disposition.closes() {
                    self.stale.store(true, Ordering::Release);
                }
                if disposition.server_required() {
                    self.stats.record_forced_close();
                }
            }
        }
    }
}
