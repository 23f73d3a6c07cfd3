use bytes::{Bytes, BytesMut};
use std::fmt;
use std::sync::Arc;

use crate::error::Error;
use crate::http::connection::{Conn, Disposition, Link, unexpected_eof};
use crate::http::headers::Headers;
use crate::http::parser::{ParseError, ResponseHead, Version, parse_chunk_size};
use crate::http::request::Method;

/// Returns true for the 5xx class the client retries on.
pub fn is_server_error(status: u16) -> bool {
    (500..600).contains(&status)
}

/// A response read from the client's session.
///
/// The head is always parsed. The body is either cached in memory (when the
/// request asked for it) or still on the wire. While a body is on the wire
/// the response is *busy*: the session belongs to it and the client refuses
/// to send another request until the body has been drained or the response
/// finalized.
///
/// Dropping a busy response finalizes it, which closes the session since
/// the unread body makes it unusable.
pub struct Response {
    /// Protocol version from the status line
    version: Version,
    /// The numeric status code
    status: u16,
    /// Reason phrase, possibly empty
    reason: String,
    /// Response headers in wire order
    headers: Headers,
    /// Whether the session may carry another request once the body is read
    keep_alive: bool,
    body: Body,
    link: Arc<Link>,
}

enum Body {
    Cached { data: Bytes, yielded: bool },
    Streaming { generation: u64, decoder: Decoder },
    Done,
    Finalized,
}

#[derive(Debug)]
enum Decoder {
    Length(u64),
    Chunked(ChunkState),
    UntilClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data(u64),
    DataEnd,
    Trailers,
    Done,
}

impl Response {
    /// Builds the response for `head`, which was just read off `conn`.
    ///
    /// Bodiless responses release the session immediately; the others mark
    /// it busy under a fresh generation.
    pub(crate) fn open(
        head: ResponseHead,
        method: Method,
        link: Arc<Link>,
        conn: &mut Conn,
    ) -> Result<Self, Error> {
        let decoder = body_framing(&head, method)?;

        let mut keep_alive = match head.version {
            Version::Http11 => !head.headers.has_token("Connection", "close"),
            Version::Http10 => head.headers.has_token("Connection", "keep-alive"),
        };
        if matches!(decoder, Some(Decoder::UntilClose)) {
            keep_alive = false;
        }

        let body = match decoder {
            None => {
                link.release_locked(conn, Disposition::after_exchange(keep_alive));
                Body::Done
            }
            Some(decoder) => Body::Streaming {
                generation: link.begin(),
                decoder,
            },
        };

        Ok(Self {
            version: head.version,
            status: head.status,
            reason: head.reason,
            headers: head.headers,
            keep_alive,
            body,
            link,
        })
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Retrieves a header value by name, ignoring case.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// Whether the session survives this response.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Whether the body is still on the wire.
    pub fn is_busy(&self) -> bool {
        match self.body {
            Body::Streaming { generation, .. } => self.link.is_current(generation),
            _ => false,
        }
    }

    pub(crate) fn generation(&self) -> Option<u64> {
        match self.body {
            Body::Streaming { generation, .. } => Some(generation),
            _ => None,
        }
    }

    /// The cached body, if the request asked for content to be cached.
    pub fn body(&self) -> Option<&Bytes> {
        match &self.body {
            Body::Cached { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Next piece of the body, or `None` once it has been fully read.
    ///
    /// Reaching the end hands the session back to the client, or closes it
    /// when the server asked for that.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, Error> {
        let generation = match &self.body {
            Body::Streaming { generation, .. } => *generation,
            _ => return self.settled_chunk(),
        };

        if !self.link.is_current(generation) {
            self.body = Body::Finalized;
            return Err(Error::Finalized);
        }

        let link = Arc::clone(&self.link);
        let mut conn = link.lock().await;
        let (result, finished) = match &mut self.body {
            Body::Streaming { decoder, .. } => {
                let result = decoder.next(&mut conn).await;
                (result, decoder.is_done())
            }
            _ => return self.settled_chunk(),
        };

        match result {
            Ok(Some(data)) => {
                if finished {
                    self.end_body(&link, &mut conn, generation);
                }
                Ok(Some(data))
            }
            Ok(None) => {
                self.end_body(&link, &mut conn, generation);
                Ok(None)
            }
            Err(e) => {
                link.finish_locked(&mut conn, generation, Disposition::Close);
                self.body = Body::Finalized;
                Err(e)
            }
        }
    }

    /// Reads the rest of the body.
    pub async fn bytes(&mut self) -> Result<Bytes, Error> {
        if let Body::Cached { data, yielded } = &mut self.body {
            let rest = if *yielded { Bytes::new() } else { data.clone() };
            *yielded = true;
            return Ok(rest);
        }

        let mut out = BytesMut::new();
        while let Some(chunk) = self.chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out.freeze())
    }

    /// Reads the whole body into memory so the response stops being busy.
    pub(crate) async fn cache(&mut self) -> Result<(), Error> {
        let data = match self.body {
            Body::Streaming { .. } => self.bytes().await?,
            Body::Done => Bytes::new(),
            _ => return Ok(()),
        };
        self.body = Body::Cached { data, yielded: false };
        Ok(())
    }

    /// Marks the response done. A body still on the wire is abandoned and
    /// the session closed. Calling it again does nothing.
    pub fn finalize(&mut self) {
        if let Body::Streaming { generation, .. } = self.body {
            if self.link.finish(generation, Disposition::Close) {
                tracing::debug!(status = self.status, "response finalized before end of body");
            }
            self.body = Body::Finalized;
        }
    }

    fn end_body(&mut self, link: &Link, conn: &mut Conn, generation: u64) {
        link.finish_locked(conn, generation, Disposition::after_exchange(self.keep_alive));
        tracing::debug!(status = self.status, keep_alive = self.keep_alive, "response body drained");
        self.body = Body::Done;
    }

    fn settled_chunk(&mut self) -> Result<Option<Bytes>, Error> {
        match &mut self.body {
            Body::Cached { data, yielded } => {
                if *yielded || data.is_empty() {
                    Ok(None)
                } else {
                    *yielded = true;
                    Ok(Some(data.clone()))
                }
            }
            Body::Finalized => Err(Error::Finalized),
            Body::Done | Body::Streaming { .. } => Ok(None),
        }
    }
}

impl Drop for Response {
    fn drop(&mut self) {
        self.finalize();
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("version", &self.version)
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("headers", &self.headers)
            .field("keep_alive", &self.keep_alive)
            .field("busy", &self.is_busy())
            .finish()
    }
}

/// Decides how the body is delimited, or `None` when there is no body.
fn body_framing(head: &ResponseHead, method: Method) -> Result<Option<Decoder>, ParseError> {
    if method == Method::HEAD
        || (100..200).contains(&head.status)
        || head.status == 204
        || head.status == 304
    {
        return Ok(None);
    }

    if head.headers.has_token("Transfer-Encoding", "chunked") {
        return Ok(Some(Decoder::Chunked(ChunkState::Size)));
    }

    let mut length = None;
    for value in head.headers.get_all("Content-Length") {
        let parsed: u64 = value
            .trim()
            .parse()
            .map_err(|_| ParseError::InvalidContentLength)?;
        if length.is_some_and(|l| l != parsed) {
            return Err(ParseError::InvalidContentLength);
        }
        length = Some(parsed);
    }

    Ok(match length {
        Some(0) => None,
        Some(n) => Some(Decoder::Length(n)),
        None => Some(Decoder::UntilClose),
    })
}

impl Decoder {
    fn is_done(&self) -> bool {
        matches!(self, Decoder::Length(0) | Decoder::Chunked(ChunkState::Done))
    }

    async fn next(&mut self, conn: &mut Conn) -> Result<Option<Bytes>, Error> {
        match self {
            Decoder::Length(remaining) => {
                if *remaining == 0 {
                    return Ok(None);
                }
                if conn.buffer().is_empty() && conn.fill().await? == 0 {
                    return Err(unexpected_eof("connection closed inside response body"));
                }
                let n = (*remaining).min(conn.buffer().len() as u64);
                *remaining -= n;
                Ok(Some(conn.buffer().split_to(n as usize).freeze()))
            }

            Decoder::UntilClose => {
                if conn.buffer().is_empty() && conn.fill().await? == 0 {
                    return Ok(None);
                }
                Ok(Some(conn.buffer().split().freeze()))
            }

            Decoder::Chunked(state) => loop {
                match *state {
                    ChunkState::Size => {
                        let line = conn.read_line().await?;
                        let size = parse_chunk_size(&line)?;
                        *state = if size == 0 {
                            ChunkState::Trailers
                        } else {
                            ChunkState::Data(size)
                        };
                    }

                    ChunkState::Data(remaining) => {
                        if conn.buffer().is_empty() && conn.fill().await? == 0 {
                            return Err(unexpected_eof("connection closed inside chunked body"));
                        }
                        let n = remaining.min(conn.buffer().len() as u64);
                        *state = if n == remaining {
                            ChunkState::DataEnd
                        } else {
                            ChunkState::Data(remaining - n)
                        };
                        return Ok(Some(conn.buffer().split_to(n as usize).freeze()));
                    }

                    ChunkState::DataEnd => {
                        let line = conn.read_line().await?;
                        if !line.is_empty() {
                            return Err(Error::Parse(ParseError::InvalidChunk));
                        }
                        *state = ChunkState::Size;
                    }

                    // Trailer fields are skipped
                    ChunkState::Trailers => {
                        let line = conn.read_line().await?;
                        if line.is_empty() {
                            *state = ChunkState::Done;
                            return Ok(None);
                        }
                    }

                    ChunkState::Done => return Ok(None),
                }
            },
        }
    }
}
