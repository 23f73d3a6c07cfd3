//! Error type for the object-storage HTTP client.
//!
//! Failures fall into two groups. Transient ones (connect, I/O, malformed
//! response, 5xx status, attempt timeout) are retried while the request
//! deadline has time left. Contract violations are returned immediately and
//! never retried.

use std::fmt;
use std::io;
use std::time::Duration;

use crate::http::parser::ParseError;

/// Errors returned by `HttpClient` and `Response`.
#[derive(Debug)]
pub enum Error {
    /// The client was constructed with an empty host.
    InvalidHost,

    /// TLS configuration could not be built (trust anchors, protocol setup).
    Tls(String),

    /// Opening a session failed (TCP connect or TLS handshake).
    Connect(io::Error),

    /// Reading from or writing to an open session failed.
    Io(io::Error),

    /// The server sent something that is not a valid HTTP/1.x response.
    Parse(ParseError),

    /// The server answered with a 5xx status.
    Server { status: u16, reason: String },

    /// The attempt did not finish before the request deadline.
    Timeout(Duration),

    /// A request was issued while the previous response was still busy.
    ClientBusy,

    /// An API contract was broken by the caller.
    Contract(&'static str),

    /// The response body was read after the response had been finalized.
    Finalized,
}

impl Error {
    /// Whether the retry loop may try again after this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Connect(_)
                | Error::Io(_)
                | Error::Parse(_)
                | Error::Server { .. }
                | Error::Timeout(_)
        )
    }

    /// The HTTP status for `Server` errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidHost => write!(f, "host must not be empty"),
            Error::Tls(msg) => write!(f, "TLS setup failed: {msg}"),
            Error::Connect(e) => write!(f, "failed to open session: {e}"),
            Error::Io(e) => write!(f, "session I/O failed: {e}"),
            Error::Parse(e) => write!(f, "invalid response: {e}"),
            Error::Server { status, reason } => write!(f, "server error: {status} {reason}"),
            Error::Timeout(d) => write!(f, "request timed out after {}ms", d.as_millis()),
            Error::ClientBusy => write!(f, "client busy: previous response not drained"),
            Error::Contract(msg) => write!(f, "contract violation: {msg}"),
            Error::Finalized => write!(f, "response already finalized"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connect(e) | Error::Io(e) => Some(e),
            Error::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Error::Parse(e)
    }
}
