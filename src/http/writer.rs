use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::request::Request;

const HTTP_VERSION: &str = "HTTP/1.1";

/// Encodes the request line, headers and body exactly as they go on the wire.
pub fn serialize_request(req: &Request) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256 + req.body.as_ref().map_or(0, |b| b.len()));

    // Request line
    let request_line = format!("{} {} {}\r\n", req.method.as_str(), req.target(), HTTP_VERSION);
    buf.extend_from_slice(request_line.as_bytes());

    // Headers, no space after the colon
    for (k, v) in req.headers.iter() {
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(b":");
        buf.extend_from_slice(v.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    // Header/body separator
    buf.extend_from_slice(b"\r\n");

    if let Some(body) = &req.body {
        buf.extend_from_slice(body);
    }

    buf
}

pub struct RequestWriter {
    buffer: Vec<u8>,
    written: usize,
}

impl RequestWriter {
    pub fn new(request: &Request) -> Self {
        Self {
            buffer: serialize_request(request),
            written: 0,
        }
    }

    /// Size of the encoded request in bytes.
    pub fn encoded_len(&self) -> usize {
        self.buffer.len()
    }

    /// Writes the whole request and flushes the stream.
    pub async fn write_to_stream<W>(&mut self, stream: &mut W) -> io::Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        while self.written < self.buffer.len() {
            let n = stream.write(&self.buffer[self.written..]).await?;

            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "connection closed while writing",
                ));
            }

            self.written += n;
        }

        stream.flush().await
    }
}
