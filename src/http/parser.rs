use std::fmt;

use crate::http::headers::Headers;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    InvalidStatusLine,
    InvalidVersion,
    InvalidStatusCode,
    InvalidHeader,
    InvalidContentLength,
    InvalidChunk,
    HeadTooLarge,
    Incomplete,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ParseError::InvalidStatusLine => "malformed status line",
            ParseError::InvalidVersion => "unsupported HTTP version",
            ParseError::InvalidStatusCode => "malformed status code",
            ParseError::InvalidHeader => "malformed header line",
            ParseError::InvalidContentLength => "malformed Content-Length",
            ParseError::InvalidChunk => "malformed chunked body",
            ParseError::HeadTooLarge => "response head too large",
            ParseError::Incomplete => "incomplete response",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for ParseError {}

/// Protocol version from the status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

/// Status line and headers of a response; the body is still on the wire.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub version: Version,
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
}

/// Largest response head accepted before giving up.
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

pub fn parse_response_head(buf: &[u8]) -> Result<(ResponseHead, usize), ParseError> {
    let headers_end = match find_headers_end(buf) {
        Some(end) => end,
        None if buf.len() > MAX_HEAD_SIZE => return Err(ParseError::HeadTooLarge),
        None => return Err(ParseError::Incomplete),
    };

    let head_str =
        std::str::from_utf8(&buf[..headers_end]).map_err(|_| ParseError::InvalidStatusLine)?;
    let mut lines = head_str.split("\r\n");

    // Status line
    let status_line = lines.next().ok_or(ParseError::InvalidStatusLine)?;
    let (version, rest) = status_line
        .split_once(' ')
        .ok_or(ParseError::InvalidStatusLine)?;

    let version = match version {
        "HTTP/1.1" => Version::Http11,
        "HTTP/1.0" => Version::Http10,
        _ => return Err(ParseError::InvalidVersion),
    };

    let (code, reason) = rest.split_once(' ').unwrap_or((rest, ""));
    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::InvalidStatusCode);
    }
    let status: u16 = code.parse().map_err(|_| ParseError::InvalidStatusCode)?;

    // Headers
    let mut headers = Headers::new();

    for line in lines {
        if line.is_empty() {
            continue;
        }
        // obsolete line folding is not accepted
        if line.starts_with(' ') || line.starts_with('\t') {
            return Err(ParseError::InvalidHeader);
        }

        let (key, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;
        let key = key.trim_end();
        if key.is_empty() || key.contains(char::is_whitespace) {
            return Err(ParseError::InvalidHeader);
        }

        headers.append(key, value.trim());
    }

    let head = ResponseHead {
        version,
        status,
        reason: reason.trim().to_string(),
        headers,
    };

    Ok((head, headers_end + 4))
}

/// Parses the size line of a chunk, ignoring chunk extensions.
pub fn parse_chunk_size(line: &[u8]) -> Result<u64, ParseError> {
    let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidChunk)?;
    let size = line.split(';').next().unwrap_or("").trim();
    if size.is_empty() {
        return Err(ParseError::InvalidChunk);
    }
    u64::from_str_radix(size, 16).map_err(|_| ParseError::InvalidChunk)
}

pub fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

pub fn find_line_end(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}
