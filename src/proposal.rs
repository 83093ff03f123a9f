//! [`Proposal`]: the immutable value object a knowledge source writes to the
//! blackboard and the conflict resolver consumes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::primitives::{Priority, ProposalKind, UNRANKED};

/// Opaque, serializable side-channel carried by a [`Proposal`].
///
/// Most entries are source-specific and read by nothing else; a handful of keys
/// are a de-facto cross-source contract (e.g. `GoBackGuard` writes
/// `pending_goback_increment`/`to_state`/`from_state`, the orchestrator's deferred
/// increment step reads them back). Typed accessors are provided for those.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata(pub serde_json::Map<String, Value>);

impl Metadata {
    /// An empty metadata map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, builder-style.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Read a string field.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Read a bool field, defaulting to `false` when absent or not a bool.
    pub fn get_bool(&self, key: &str) -> bool {
        self.0.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Raw access to the underlying map.
    pub fn inner(&self) -> &serde_json::Map<String, Value> {
        &self.0
    }
}

/// An immutable proposal contributed by exactly one knowledge source during
/// exactly one turn.
///
/// Invariants (enforced by [`crate::validator::ProposalValidator`], not by the
/// constructor, so that malformed proposals can still be surfaced as diagnostics
/// rather than panics): a `Transition` proposal must have `combinable = true`; an
/// `Action` proposal with `combinable = false` should not carry `Priority::Low`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    /// What kind of proposal this is.
    pub kind: ProposalKind,
    /// Target action name (`Action`) or target state name (`Transition`). Unused
    /// for `DataUpdate`/`FlagSet`, which instead use `field`/`value_json`.
    pub value: String,
    /// Arbitration strength.
    pub priority: Priority,
    /// Tie-break rank within `priority`, assigned by the priority assigner.
    /// `None` is equivalent to the sentinel [`UNRANKED`].
    pub priority_rank: Option<i64>,
    /// Whether a winning `Action` with `combinable = false` blocks all transitions.
    /// Always `true` for `Transition` proposals.
    pub combinable: bool,
    /// Short, stable identifier used for auditing and reason-code aggregation.
    pub reason_code: String,
    /// Name of the knowledge source that produced this proposal.
    pub source_name: String,
    /// Opaque side-channel (option indices, deferred-increment markers, ...).
    pub metadata: Metadata,
    /// For `DataUpdate`/`FlagSet`: the field/flag name being written.
    pub field: Option<String>,
    /// For `DataUpdate`/`FlagSet`: the value being written.
    pub value_json: Option<Value>,
}

impl Proposal {
    /// Construct an `Action` proposal.
    pub fn action(
        value: impl Into<String>,
        priority: Priority,
        source_name: impl Into<String>,
        reason_code: impl Into<String>,
        combinable: bool,
    ) -> Self {
        Self {
            kind: ProposalKind::Action,
            value: value.into(),
            priority,
            priority_rank: None,
            combinable,
            reason_code: reason_code.into(),
            source_name: source_name.into(),
            metadata: Metadata::new(),
            field: None,
            value_json: None,
        }
    }

    /// Construct a `Transition` proposal. `combinable` is always `true`, per the
    /// Transition invariant.
    pub fn transition(
        next_state: impl Into<String>,
        priority: Priority,
        source_name: impl Into<String>,
        reason_code: impl Into<String>,
    ) -> Self {
        Self {
            kind: ProposalKind::Transition,
            value: next_state.into(),
            priority,
            priority_rank: None,
            combinable: true,
            reason_code: reason_code.into(),
            source_name: source_name.into(),
            metadata: Metadata::new(),
            field: None,
            value_json: None,
        }
    }

    /// Construct a `DataUpdate` proposal.
    pub fn data_update(
        field: impl Into<String>,
        value: Value,
        source_name: impl Into<String>,
        reason_code: impl Into<String>,
    ) -> Self {
        Self {
            kind: ProposalKind::DataUpdate,
            value: String::new(),
            priority: Priority::Normal,
            priority_rank: None,
            combinable: true,
            reason_code: reason_code.into(),
            source_name: source_name.into(),
            metadata: Metadata::new(),
            field: Some(field.into()),
            value_json: Some(value),
        }
    }

    /// Construct a `FlagSet` proposal.
    pub fn flag_set(
        flag: impl Into<String>,
        value: Value,
        source_name: impl Into<String>,
        reason_code: impl Into<String>,
    ) -> Self {
        Self {
            kind: ProposalKind::FlagSet,
            value: String::new(),
            priority: Priority::Normal,
            priority_rank: None,
            combinable: true,
            reason_code: reason_code.into(),
            source_name: source_name.into(),
            metadata: Metadata::new(),
            field: Some(flag.into()),
            value_json: Some(value),
        }
    }

    /// Attach metadata, builder-style.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Effective tie-break rank: the assigned rank, or the sentinel if none was
    /// ever assigned by the priority assigner.
    pub fn effective_rank(&self) -> i64 {
        self.priority_rank.unwrap_or(UNRANKED)
    }

    /// Structural validation used by [`crate::validator::ProposalValidator`]:
    /// returns human-readable error messages for any violated invariant.
    pub fn validate_structure(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.source_name.trim().is_empty() {
            errors.push("proposal has no source_name".to_string());
        }
        match self.kind {
            ProposalKind::Action | ProposalKind::Transition => {
                if self.value.trim().is_empty() {
                    errors.push(format!("{:?} proposal has empty value", self.kind));
                }
            }
            ProposalKind::DataUpdate | ProposalKind::FlagSet => {
                if self.field.as_deref().unwrap_or("").trim().is_empty() {
                    errors.push(format!("{:?} proposal has no field", self.kind));
                }
            }
        }
        errors
    }
}

impl std::fmt::Display for Proposal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?}({}) priority={} source={}",
            self.kind, self.value, self.priority, self.source_name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_is_always_combinable() {
        let p = Proposal::transition("spin_problem", Priority::Normal, "DataCollector", "data_complete");
        assert!(p.combinable);
    }

    #[test]
    fn unranked_proposal_uses_sentinel() {
        let p = Proposal::action("continue", Priority::Low, "Orchestrator", "default", true);
        assert_eq!(p.effective_rank(), UNRANKED);
    }

    #[test]
    fn structure_validation_flags_empty_value() {
        let mut p = Proposal::action("x", Priority::Normal, "S", "r", true);
        p.value = "".into();
        assert!(!p.validate_structure().is_empty());
    }
}
