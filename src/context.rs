//! [`ContextSnapshot`]: the immutable, per-turn view every knowledge source reads.

use serde_json::Value;
use std::collections::HashMap;

use crate::ports::{ContextEnvelopePort, StateConfig};

/// Frozen snapshot of dialogue context, built exactly once by
/// `Blackboard::begin_turn` and read-only for the remainder of the turn.
///
/// Because every source reads the *same* snapshot, a `DataUpdate` proposal made
/// by one source in this turn is never visible to another source's
/// `should_contribute`/`contribute` in the same turn; this is the snapshot
/// isolation property `spec.md` §8 calls out explicitly (property 1).
pub struct ContextSnapshot {
    /// Current dialogue state name.
    pub state: String,
    /// The turn's (refined) intent.
    pub current_intent: String,
    /// Turn counter as of this snapshot.
    pub turn_number: u64,
    /// Persona detected from collected data (`collected_data["persona"]`, default
    /// `"default"`).
    pub persona: String,
    /// Active tenant identifier.
    pub tenant_id: String,
    /// View of collected data as of `begin_turn` (not a live reference).
    pub collected_data: HashMap<String, Value>,
    /// Current state's own configuration.
    pub state_config: StateConfig,
    /// Full state table, for sources that need to reason about other states
    /// (e.g. `StallGuard`'s eject-target search).
    pub state_to_phase: HashMap<String, String>,
    /// Behavioral-signal bundle for this turn.
    pub context_envelope: Box<dyn ContextEnvelopePort>,
    /// Raw user message text for this turn.
    pub user_message: String,
    /// Frustration signal carried alongside the envelope for quick access.
    pub frustration_level: f64,
    /// Saved return point for `handle_objection`, if one was set by a previous
    /// turn's side-effect application.
    pub state_before_objection: Option<String>,
}

impl ContextSnapshot {
    /// Data fields from `state_config.required_data` absent from `collected_data`,
    /// or present but empty (`null`, `""`, `[]`, `{}`).
    pub fn missing_required_data(&self) -> Vec<String> {
        self.state_config
            .required_data
            .iter()
            .filter(|field| Self::is_empty_value(self.collected_data.get(field.as_str())))
            .cloned()
            .collect()
    }

    fn is_empty_value(value: Option<&Value>) -> bool {
        match value {
            None => true,
            Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(Value::Array(a)) => a.is_empty(),
            Some(Value::Object(o)) => o.is_empty(),
            Some(_) => false,
        }
    }

    /// Whether every required field is present.
    pub fn has_all_required_data(&self) -> bool {
        self.missing_required_data().is_empty()
    }

    /// Resolve `trigger` (an intent name, `"data_complete"`, `"any"`, `"go_back"`,
    /// ...) against this state's transition map.
    pub fn get_transition(&self, trigger: &str) -> Option<&str> {
        self.state_config.transitions.get(trigger).map(String::as_str)
    }

    /// Phase name this state belongs to.
    pub fn phase_for(&self, state: &str) -> String {
        self.state_to_phase
            .get(state)
            .cloned()
            .unwrap_or_else(|| state.to_string())
    }
}

impl std::fmt::Debug for ContextSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextSnapshot")
            .field("state", &self.state)
            .field("current_intent", &self.current_intent)
            .field("turn_number", &self.turn_number)
            .field("persona", &self.persona)
            .field("tenant_id", &self.tenant_id)
            .finish_non_exhaustive()
    }
}
