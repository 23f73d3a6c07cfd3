//! objstore-http - HTTP/1.1 client for object-storage backends
//!
//! One persistent TLS session per endpoint, one response in flight at a
//! time, and deadline-bounded retries on transient failures.

pub mod client;
pub mod config;
pub mod deadline;
pub mod error;
pub mod http;
pub mod session;
pub mod stats;

pub use client::{ClientBuilder, HttpClient};
pub use config::Config;
pub use error::Error;
pub use http::connection::Disposition;
pub use http::request::{Method, Request, RequestBuilder};
pub use http::response::Response;
pub use session::{Connector, PlainConnector, SessionProvider, TlsConnector, TlsOptions};
pub use stats::{Stats, StatsSnapshot};
