//! HTTP/1.1 protocol pieces used by the client.
//!
//! # Architecture
//!
//! - **`request`**: request representation and builder
//! - **`headers`**: ordered, case-insensitive header list
//! - **`writer`**: serializes a request onto the session
//! - **`parser`**: parses response heads and chunk-size lines
//! - **`response`**: response head plus body framing and draining
//! - **`connection`**: the session slot shared by client and response, and
//!   the done handshake that decides whether the session survives
//!
//! # Session State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Closed    │ ← No session; next request opens one
//!        └──────┬──────┘
//!               │ open
//!               ▼
//!        ┌─────────────┐
//!        │    Idle     │ ← Session open, free for a request
//!        └──────┬──────┘
//!               │ write request, read head
//!               ▼
//!        ┌─────────────┐
//!        │    Busy     │ ← Body still on the wire, owned by one response
//!        └──────┬──────┘
//!               │ body drained / finalized
//!               ├─ Keep → Idle (same session)
//!               ├─ Close → Closed (local error, abandoned body)
//!               └─ ServerClose → Closed (counted as forced close)
//! ```
//!
//! Any transient error while writing or reading moves the session straight
//! to Closed.

pub mod connection;
pub mod headers;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
