//! duplex-http: full-duplex exchanges over hyper.
//!
//! Carries one exchange per connection, HTTP/1.1 with a chunked request
//! body or HTTP/2 with prior knowledge, both cleartext.
//!
//! ```text
//! BodySender ─▶ BodyReceiver ─▶ StreamBody ══ hyper ══▶ Incoming ─▶ pump ─▶ ServerExchange
//!                                                                              │
//! BodyReceiver ◀─ pump ◀─ Incoming ◀══ hyper ══ StreamBody ◀─ BodyReceiver ◀───┘
//! ```
//!
//! [`HyperTransport`] is the initiating side; it either dials a TCP address
//! or serves each call in-memory over a `tokio::io::duplex` pipe.
//! [`DuplexServer`] hosts a [`duplex_core::Handler`] on a TCP listener.

pub mod body;
mod client;
mod server;

pub use client::HyperTransport;
pub use server::{DuplexServer, serve_connection};

/// Request header signalling that the caller needs the response to overlap
/// the request body.
pub const FULL_DUPLEX_HEADER: &str = "x-full-duplex";

/// Response header carrying the reason of a call that failed before the
/// handler committed a response head.
pub const ERROR_HEADER: &str = "x-duplex-error";
