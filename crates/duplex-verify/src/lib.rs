//! Ordering verifier for full-duplex exchanges.
//!
//! [`Harness::run`] drives one exchange described by a [`ScenarioConfig`]
//! and returns an [`ExchangeOutcome`] carrying the merged event timeline.
//! [`OrderingReport`] then checks that the exchange genuinely overlapped:
//! the call returned, the processor read input and the initiator read
//! output, all before the final request write completed.

mod harness;
pub mod ordering;
mod scenario;

pub use harness::{ExchangeOutcome, Harness, ServerReports};
pub use ordering::{OrderingReport, OrderingViolation, Property, Verdict};
pub use scenario::ScenarioConfig;
