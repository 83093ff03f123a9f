//! Core enums shared across the blackboard: proposal priority, proposal kind, and
//! event kind.

use serde::{Deserialize, Serialize};

/// Strength of a proposal, lower numeric value wins arbitration.
///
/// Ordering is derived directly from the explicit discriminants below, so
/// `Priority::Critical < Priority::Low` holds without hand-written comparison
/// operators: `CRITICAL` proposals (blocking actions such as escalation) always
/// outrank `LOW` ones (fallback/continue behavior).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    /// Always wins: blocking/safety actions (rejection handling, escalation).
    Critical = 0,
    /// Important actions: price questions, objection handling.
    High = 1,
    /// Standard processing: intent rules, data collection.
    Normal = 2,
    /// Fallback behavior: continue, default action.
    Low = 3,
}

impl Priority {
    /// Numeric rank used as the primary sort key during conflict resolution.
    pub fn value(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Priority::Critical => "CRITICAL",
            Priority::High => "HIGH",
            Priority::Normal => "NORMAL",
            Priority::Low => "LOW",
        };
        f.write_str(s)
    }
}

/// Sentinel `priority_rank` used by proposals that were never assigned one by the
/// priority assigner. Places unranked proposals last among same-`Priority` peers.
pub const UNRANKED: i64 = 10_000;

/// What a [`crate::proposal::Proposal`] is proposing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProposalKind {
    /// A named response directive (e.g. `answer_with_pricing`).
    Action,
    /// A state transition target.
    Transition,
    /// A single collected-data field write.
    DataUpdate,
    /// A single flag write.
    FlagSet,
}

/// Kinds of events the event bus can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Emitted once at the start of `Orchestrator::process_turn`.
    TurnStarted,
    /// Emitted once per source that ran (whether or not it skipped).
    SourceContributed,
    /// Emitted once after proposal validation.
    ProposalValidated,
    /// Emitted once after the conflict resolver runs.
    ConflictResolved,
    /// Emitted once the decision is committed to the blackboard.
    DecisionCommitted,
    /// Emitted when the committed decision changes `state`.
    StateTransitioned,
    /// Emitted whenever a source, or the orchestrator itself, fails.
    ErrorOccurred,
}
