//! Streaming channel: a blocking, ordered, single-producer/single-consumer
//! byte stream.
//!
//! # Buffering
//!
//! The channel is a zero-buffer rendezvous. A write offers its whole chunk
//! and completes only once the consumer has read every byte of it, possibly
//! across several bounded reads. The producer therefore can never run ahead
//! of the consumer by more than one chunk, which makes back-pressure explicit
//! and the relative order of reads and writes observable.
//!
//! # Closure
//!
//! - [`BodySender::close`] marks end-of-stream. Reads return `Ok(None)`
//!   from then on, every time.
//! - [`BodySender::abort`] closes with an error; reads return that error,
//!   every time. Dropping an unclosed sender aborts with
//!   [`DuplexError::Reset`].
//! - Dropping the [`BodyReceiver`] fails pending and future writes with
//!   [`DuplexError::StreamClosed`].
//!
//! Every blocking operation also observes the [`CancelSignal`] given to
//! [`open`] and returns [`DuplexError::Cancelled`] once it fires.

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use futures_core::Stream;
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::cancel::CancelSignal;
use crate::error::{DuplexError, DuplexResult};

/// Per-call read size used by the exchange processor and the harness.
pub const MAX_CHUNK_SIZE: usize = 1000;

/// A type-erased, fallible stream of body chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = DuplexResult<Bytes>> + Send>>;

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    /// Signalled when a chunk is offered or the stream closes.
    readable: Notify,
    /// Signalled when the offered chunk is drained or the receiver is gone.
    writable: Notify,
    cancel: CancelSignal,
}

#[derive(Debug, Default)]
struct State {
    /// Unread remainder of the chunk currently offered by the writer.
    pending: Bytes,
    closed: Option<Closure>,
    receiver_gone: bool,
    transferred: u64,
}

#[derive(Debug, Clone)]
enum Closure {
    EndOfStream,
    Aborted(DuplexError),
}

impl Shared {
    // Lock hold time is a few field updates; no await happens under it.
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Create one linked producer/consumer pair.
pub fn open(cancel: CancelSignal) -> (BodySender, BodyReceiver) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State::default()),
        readable: Notify::new(),
        writable: Notify::new(),
        cancel,
    });
    (
        BodySender {
            shared: shared.clone(),
        },
        BodyReceiver { shared },
    )
}

/// Producer half of a streaming channel.
#[derive(Debug)]
pub struct BodySender {
    shared: Arc<Shared>,
}

impl BodySender {
    /// Offer `chunk` to the consumer and wait until it has been read.
    ///
    /// Returns the number of bytes delivered. Empty chunks complete
    /// immediately without a rendezvous.
    ///
    /// # Cancel safety
    ///
    /// Dropping the future before it completes withdraws whatever part of
    /// the chunk is still unread, so a later write never follows or
    /// replaces bytes from an abandoned one.
    pub async fn write(&mut self, chunk: impl Into<Bytes>) -> DuplexResult<usize> {
        let chunk = chunk.into();
        let len = chunk.len();

        if self.shared.cancel.is_cancelled() {
            return Err(DuplexError::Cancelled);
        }
        {
            let mut state = self.shared.state();
            if state.closed.is_some() || state.receiver_gone {
                return Err(DuplexError::StreamClosed);
            }
            if len == 0 {
                return Ok(0);
            }
            state.pending = chunk;
        }
        let _offer = Offer(&self.shared);
        self.shared.readable.notify_one();
        trace!(len, "chunk offered");

        loop {
            {
                let mut state = self.shared.state();
                if state.pending.is_empty() {
                    return Ok(len);
                }
                if state.receiver_gone {
                    state.pending.clear();
                    return Err(DuplexError::StreamClosed);
                }
            }
            tokio::select! {
                _ = self.shared.writable.notified() => {}
                _ = self.shared.cancel.cancelled() => {
                    let mut state = self.shared.state();
                    if state.pending.is_empty() {
                        return Ok(len);
                    }
                    state.pending.clear();
                    return Err(DuplexError::Cancelled);
                }
            }
        }
    }

    /// Mark end-of-stream. A second close is a no-op.
    pub fn close(&mut self) {
        if self.shut(Closure::EndOfStream) {
            debug!(bytes = self.bytes_transferred(), "stream closed");
        }
    }

    /// Close the stream with an error the consumer will observe instead of
    /// end-of-stream. No-op if the stream is already closed.
    pub fn abort(&mut self, err: DuplexError) {
        if self.shut(Closure::Aborted(err.clone())) {
            debug!(error = %err, "stream aborted");
        }
    }

    fn shut(&mut self, closure: Closure) -> bool {
        let changed = {
            let mut state = self.shared.state();
            if state.closed.is_some() {
                false
            } else {
                state.closed = Some(closure);
                true
            }
        };
        if changed {
            self.shared.readable.notify_one();
        }
        changed
    }

    /// Whether writes can no longer succeed.
    pub fn is_closed(&self) -> bool {
        let state = self.shared.state();
        state.closed.is_some() || state.receiver_gone
    }

    /// Bytes read by the consumer so far.
    pub fn bytes_transferred(&self) -> u64 {
        self.shared.state().transferred
    }
}

/// Withdraws the unread remainder of an offered chunk when its write ends.
struct Offer<'a>(&'a Shared);

impl Drop for Offer<'_> {
    fn drop(&mut self) {
        let mut state = self.0.state();
        if !state.pending.is_empty() {
            trace!(unread = state.pending.len(), "offered chunk withdrawn");
            state.pending.clear();
        }
    }
}

impl Drop for BodySender {
    fn drop(&mut self) {
        self.shut(Closure::Aborted(DuplexError::Reset(
            "producer dropped before close".into(),
        )));
    }
}

/// Consumer half of a streaming channel.
#[derive(Debug)]
pub struct BodyReceiver {
    shared: Arc<Shared>,
}

impl BodyReceiver {
    /// Read up to `max_len` bytes.
    ///
    /// Blocks until at least one byte is available or the stream is closed;
    /// never waits to fill `max_len`. Returns `Ok(None)` at end-of-stream.
    ///
    /// # Panics
    ///
    /// Panics if `max_len` is zero.
    pub async fn read(&mut self, max_len: usize) -> DuplexResult<Option<Bytes>> {
        assert!(max_len > 0, "max_len must be > 0");

        if self.shared.cancel.is_cancelled() {
            return Err(DuplexError::Cancelled);
        }
        loop {
            {
                let mut state = self.shared.state();
                if !state.pending.is_empty() {
                    let n = max_len.min(state.pending.len());
                    let chunk = state.pending.split_to(n);
                    state.transferred += n as u64;
                    let drained = state.pending.is_empty();
                    drop(state);

                    if drained {
                        self.shared.writable.notify_one();
                    }
                    return Ok(Some(chunk));
                }
                match &state.closed {
                    Some(Closure::EndOfStream) => return Ok(None),
                    Some(Closure::Aborted(err)) => return Err(err.clone()),
                    None => {}
                }
            }
            tokio::select! {
                _ = self.shared.readable.notified() => {}
                _ = self.shared.cancel.cancelled() => return Err(DuplexError::Cancelled),
            }
        }
    }

    /// Whether the producer has closed or aborted the stream.
    pub fn is_closed(&self) -> bool {
        self.shared.state().closed.is_some()
    }

    /// Bytes read from this stream so far.
    pub fn bytes_transferred(&self) -> u64 {
        self.shared.state().transferred
    }

    /// Adapt the receiver into a stream of chunks of at most `max_len` bytes.
    ///
    /// The stream ends after end-of-stream or after yielding the first error.
    pub fn into_stream(self, max_len: usize) -> ByteStream {
        Box::pin(futures_util::stream::unfold(
            Some(self),
            move |state| async move {
                let mut rx = state?;
                match rx.read(max_len).await {
                    Ok(Some(chunk)) => Some((Ok(chunk), Some(rx))),
                    Ok(None) => None,
                    Err(err) => Some((Err(err), None)),
                }
            },
        ))
    }
}

impl Drop for BodyReceiver {
    fn drop(&mut self) {
        self.shared.state().receiver_gone = true;
        self.shared.writable.notify_one();
    }
}
