//! Causality checks over a merged event timeline.
//!
//! Every property compares against the completion of the initiator's final
//! request write: the call must have returned, the processor must have read
//! input and the initiator must have read output *before* the request body
//! finished. A phase-sequential exchange fails all three.

use std::fmt;

use duplex_core::{Action, Actor, Timeline};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sequence numbers of the events the properties compare.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestones {
    pub call_returned: Option<u64>,
    pub last_client_write: Option<u64>,
    pub first_server_read: Option<u64>,
    pub first_client_read: Option<u64>,
}

impl Milestones {
    pub fn from_timeline(timeline: &Timeline) -> Self {
        Self {
            call_returned: timeline.first(Actor::Client, Action::CallReturned),
            last_client_write: timeline.last(Actor::Client, Action::WriteDone),
            first_server_read: timeline.first(Actor::Server, Action::ReadDone),
            first_client_read: timeline.first(Actor::Client, Action::ReadDone),
        }
    }

    /// `(earlier event, final write)` for `property`, when both were recorded.
    fn pair(&self, property: Property) -> Option<(u64, u64)> {
        let earlier = match property {
            Property::CallReturnedBeforeLastWrite => self.call_returned,
            Property::ServerReadBeforeLastWrite => self.first_server_read,
            Property::ClientReadBeforeLastWrite => self.first_client_read,
        }?;
        Some((earlier, self.last_client_write?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Property {
    /// The call returned before the final request write completed.
    CallReturnedBeforeLastWrite,
    /// The processor read input before the final request write completed.
    ServerReadBeforeLastWrite,
    /// The initiator read output before the final request write completed.
    ClientReadBeforeLastWrite,
}

impl Property {
    pub const ALL: [Property; 3] = [
        Property::CallReturnedBeforeLastWrite,
        Property::ServerReadBeforeLastWrite,
        Property::ClientReadBeforeLastWrite,
    ];
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Property::CallReturnedBeforeLastWrite => "call-returned-before-last-write",
            Property::ServerReadBeforeLastWrite => "server-read-before-last-write",
            Property::ClientReadBeforeLastWrite => "client-read-before-last-write",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    Holds,
    Violated,
    /// A needed event was never recorded, e.g. no server log for a remote
    /// endpoint, or the exchange failed before any write completed.
    NotEvaluated,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Holds => f.write_str("holds"),
            Verdict::Violated => f.write_str("VIOLATED"),
            Verdict::NotEvaluated => f.write_str("not evaluated"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyCheck {
    pub property: Property,
    pub verdict: Verdict,
}

/// A property that did not hold.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderingViolation {
    #[error("call returned at #{call_returned}, after the final request write at #{last_write}")]
    CallReturnedLate { call_returned: u64, last_write: u64 },

    #[error("processor first read input at #{first_read}, after the final request write at #{last_write}")]
    ServerReadLate { first_read: u64, last_write: u64 },

    #[error("initiator first read output at #{first_read}, after the final request write at #{last_write}")]
    ClientReadLate { first_read: u64, last_write: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderingReport {
    pub milestones: Milestones,
    pub checks: Vec<PropertyCheck>,
}

impl OrderingReport {
    pub fn evaluate(timeline: &Timeline) -> Self {
        let milestones = Milestones::from_timeline(timeline);
        let checks = Property::ALL
            .into_iter()
            .map(|property| PropertyCheck {
                property,
                verdict: match milestones.pair(property) {
                    Some((earlier, last_write)) if earlier <= last_write => Verdict::Holds,
                    Some(_) => Verdict::Violated,
                    None => Verdict::NotEvaluated,
                },
            })
            .collect();
        Self { milestones, checks }
    }

    pub fn verdict(&self, property: Property) -> Verdict {
        self.checks
            .iter()
            .find(|c| c.property == property)
            .map_or(Verdict::NotEvaluated, |c| c.verdict)
    }

    /// Every evaluated property holds.
    pub fn is_clean(&self) -> bool {
        self.checks.iter().all(|c| c.verdict != Verdict::Violated)
    }

    /// Every property was evaluated and holds.
    pub fn all_hold(&self) -> bool {
        self.checks.iter().all(|c| c.verdict == Verdict::Holds)
    }

    /// The first violation, if any.
    pub fn ensure(&self) -> Result<(), OrderingViolation> {
        for check in &self.checks {
            if check.verdict != Verdict::Violated {
                continue;
            }
            let Some((earlier, last_write)) = self.milestones.pair(check.property) else {
                continue;
            };
            return Err(match check.property {
                Property::CallReturnedBeforeLastWrite => OrderingViolation::CallReturnedLate {
                    call_returned: earlier,
                    last_write,
                },
                Property::ServerReadBeforeLastWrite => OrderingViolation::ServerReadLate {
                    first_read: earlier,
                    last_write,
                },
                Property::ClientReadBeforeLastWrite => OrderingViolation::ClientReadLate {
                    first_read: earlier,
                    last_write,
                },
            });
        }
        Ok(())
    }
}
