//! Calls, replies, and the per-node pending-call table.
//!
//! A [`Call`] is a request in flight: minted by a source or a fan-out
//! stage, delivered through a load balancer, and answered by exactly one
//! [`Reply`] (success or 503) or accounted under a failure counter. The
//! sender registers a [`PendingCall`] entry under the request id before
//! transmission; the reply-drain step looks the entry up and dispatches
//! its handler when the reply comes back.

use crate::clock::Milliseconds;
use crate::dists::Cdf;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Parameter map carried through calls transparently and consulted by
/// stage filters.
pub type Params = HashMap<String, String>;

/// Index of a node in the simulation's node table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Reply status for a successful call.
pub const STATUS_OK: u16 = 0;
/// Reply status for any resource or retry failure.
pub const STATUS_UNAVAILABLE: u16 = 503;

/// Default call timeout, relative to the call's start time.
pub const DEFAULT_TIMEOUT_MS: Milliseconds = 90.0;

/// Optional per-call resource-cost distributions that override the
/// receiving node's configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostOverrides {
    pub cpu: Option<Cdf>,
    pub memory: Option<Cdf>,
    pub network: Option<Cdf>,
}

impl CostOverrides {
    pub fn is_empty(&self) -> bool {
        self.cpu.is_none() && self.memory.is_none() && self.network.is_none()
    }
}

/// A request in flight.
#[derive(Debug, Clone)]
pub struct Call {
    /// Unique per run, allocated monotonically by the loop.
    pub req_id: u64,
    /// Logical target; resolved to a load balancer through the registry.
    pub endpoint: String,
    /// Node whose reply channel receives the answer.
    pub caller: NodeId,
    pub start_time: Milliseconds,
    /// Earliest time the receiver may process the call.
    pub wake_time: Milliseconds,
    /// Timeout relative to `start_time`, enforced by sender-side queues.
    pub timeout_ms: Milliseconds,
    pub params: Params,
    pub cost: CostOverrides,
}

/// The answer to a call. Carries the originating call back to the caller
/// so end-to-end latency can be computed at the reply-drain step.
#[derive(Debug, Clone)]
pub struct Reply {
    pub req_id: u64,
    /// Reply body length, sampled from the callee's reply-length CDF.
    pub length: u64,
    /// `0` for success, `503` for any local failure.
    pub status: u16,
    pub call: Call,
}

impl Reply {
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}

/// What to do with a reply once its pending entry is found.
#[derive(Debug, Clone)]
pub enum ReplyHandler {
    /// Source-side: record end-to-end latency for successful replies.
    RecordLatency,
    /// Load-balancer relay: forward the reply to the original caller,
    /// preserving the request id.
    Relay { to: NodeId },
    /// Worker fan-out: the reply is observational; count it and drop it.
    Observe,
}

/// Entry in a node's pending-call table.
#[derive(Debug, Clone)]
pub struct PendingCall {
    pub handler: ReplyHandler,
    pub issued_at: Milliseconds,
}
