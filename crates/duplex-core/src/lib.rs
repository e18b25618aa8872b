//! Full-duplex streaming over a single request/response exchange.
//!
//! A caller writes a request body while concurrently reading the response
//! body of the same exchange, and the receiving endpoint reads request
//! data while it is already writing response data.
//!
//! # Building blocks
//!
//! - [`channel`]: zero-buffer streaming channels. A write completes only
//!   once the consumer has read it, so no body is ever materialized.
//! - [`Exchange`] / [`ServerExchange`]: the duplex mode controller. An
//!   exchange is phase-sequential until full duplex is enabled, and
//!   enabling it on an incapable protocol version fails fast.
//! - [`ExchangeProcessor`]: the receiving endpoint's read, transform and
//!   write loop.
//! - [`Transport`]: the seam between the caller and the receiving side;
//!   [`LoopbackTransport`] is the in-process implementation.
//! - [`events`]: sequence-stamped event logs used to assert ordering.

pub mod cancel;
pub mod channel;
mod error;
pub mod events;
mod exchange;
mod loopback;
pub mod processor;
mod protocol;
mod transport;

pub use cancel::{CancelHandle, CancelSignal};
pub use channel::{BodyReceiver, BodySender, ByteStream, MAX_CHUNK_SIZE};
pub use error::{DuplexError, DuplexResult};
pub use events::{Action, Actor, EventRecord, EventRecorder, SequenceCounter, Timeline};
pub use exchange::{Exchange, ExchangeStatus, ServerExchange};
pub use loopback::LoopbackTransport;
pub use processor::{
    ExchangeProcessor, ProcessorReport, ProcessorState, Transform, Uppercase, handler,
    uppercase_handler,
};
pub use protocol::ProtocolVersion;
pub use transport::{BoxFuture, CallResponse, Handler, RequestHead, ResponseHead, Transport};
