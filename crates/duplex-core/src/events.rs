//! Event sequencing for ordering assertions.
//!
//! A [`SequenceCounter`] is the only state shared between concurrent tasks
//! of an exchange. Each task owns an [`EventRecorder`] that stamps its
//! actions with the next counter value; after the tasks join, their records
//! are merged into a [`Timeline`]. Sequence numbers are unique and follow
//! the real-time order in which actions *completed*.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Shared, monotonically increasing event counter.
#[derive(Debug, Clone, Default)]
pub struct SequenceCounter {
    next: Arc<AtomicU64>,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the next sequence number. The first claim returns `1`.
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// The most recently claimed sequence number (`0` if none).
    pub fn current(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }
}

/// Which endpoint performed an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Actor {
    Client,
    Server,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Client => f.write_str("client"),
            Actor::Server => f.write_str("server"),
        }
    }
}

/// A significant action on one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    WriteIssued,
    WriteDone,
    ReadIssued,
    ReadDone,
    CallReturned,
    EndOfStream,
    ReadFailed,
    WriteFailed,
    StreamClosed,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::WriteIssued => "write-issued",
            Action::WriteDone => "write-done",
            Action::ReadIssued => "read-issued",
            Action::ReadDone => "read-done",
            Action::CallReturned => "call-returned",
            Action::EndOfStream => "end-of-stream",
            Action::ReadFailed => "read-failed",
            Action::WriteFailed => "write-failed",
            Action::StreamClosed => "stream-closed",
        };
        f.write_str(name)
    }
}

/// One stamped action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub seq: u64,
    pub actor: Actor,
    pub action: Action,
    /// Bytes moved by the action, `0` where not applicable.
    pub bytes: usize,
}

/// Per-task event log backed by a shared [`SequenceCounter`].
#[derive(Debug)]
pub struct EventRecorder {
    counter: SequenceCounter,
    actor: Actor,
    events: Vec<EventRecord>,
}

impl EventRecorder {
    pub fn new(counter: SequenceCounter, actor: Actor) -> Self {
        Self {
            counter,
            actor,
            events: Vec::new(),
        }
    }

    pub fn actor(&self) -> Actor {
        self.actor
    }

    /// Stamp `action` with the next sequence number and return it.
    pub fn record(&mut self, action: Action, bytes: usize) -> u64 {
        let seq = self.counter.next();
        debug!(seq, actor = %self.actor, %action, bytes, "event");
        self.events.push(EventRecord {
            seq,
            actor: self.actor,
            action,
            bytes,
        });
        seq
    }

    pub fn events(&self) -> &[EventRecord] {
        &self.events
    }

    pub fn into_events(self) -> Vec<EventRecord> {
        self.events
    }
}

/// Merged, sequence-ordered view of every task's events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeline {
    events: Vec<EventRecord>,
}

impl Timeline {
    /// Merge per-task logs, ordering by sequence number.
    pub fn merge<I>(logs: I) -> Self
    where
        I: IntoIterator<Item = Vec<EventRecord>>,
    {
        let mut events: Vec<EventRecord> = logs.into_iter().flatten().collect();
        events.sort_by_key(|e| e.seq);
        Self { events }
    }

    pub fn events(&self) -> &[EventRecord] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Sequence number of the earliest matching event.
    pub fn first(&self, actor: Actor, action: Action) -> Option<u64> {
        self.matching(actor, action).next().map(|e| e.seq)
    }

    /// Sequence number of the latest matching event.
    pub fn last(&self, actor: Actor, action: Action) -> Option<u64> {
        self.matching(actor, action).last().map(|e| e.seq)
    }

    pub fn count(&self, actor: Actor, action: Action) -> usize {
        self.matching(actor, action).count()
    }

    /// Whether any events of `actor` were recorded at all.
    pub fn has_actor(&self, actor: Actor) -> bool {
        self.events.iter().any(|e| e.actor == actor)
    }

    /// Events of `actor` strictly after sequence number `seq`.
    pub fn after(&self, actor: Actor, seq: u64) -> impl Iterator<Item = &EventRecord> {
        self.events
            .iter()
            .filter(move |e| e.actor == actor && e.seq > seq)
    }

    /// No two events share a sequence number.
    pub fn has_unique_sequence(&self) -> bool {
        self.events.windows(2).all(|w| w[0].seq < w[1].seq)
    }

    fn matching(&self, actor: Actor, action: Action) -> impl Iterator<Item = &EventRecord> {
        self.events
            .iter()
            .filter(move |e| e.actor == actor && e.action == action)
    }
}
