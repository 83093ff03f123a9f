//! [`ResolvedDecision`] and [`ResolutionTrace`]: the committed outcome of a turn
//! and the audit trail behind it.

use serde_json::Value;
use std::collections::HashMap;

use crate::primitives::Priority;
use crate::proposal::{Metadata, Proposal};

/// Structured audit of how [`ResolvedDecision`] was reached by the conflict
/// resolver.
#[derive(Debug, Clone, Default)]
pub struct ResolutionTrace {
    /// All action proposals the resolver saw.
    pub action_proposals: Vec<Proposal>,
    /// All transition proposals the resolver saw.
    pub transition_proposals: Vec<Proposal>,
    /// Actions sorted by `(priority, priority_rank)`, as `(value, priority, source)`.
    pub action_ranking: Vec<(String, Priority, String)>,
    /// Transitions sorted the same way.
    pub transition_ranking: Vec<(String, Priority, String)>,
    /// The winning action, if any.
    pub winning_action: Option<Proposal>,
    /// The winning transition, if any.
    pub winning_transition: Option<Proposal>,
    /// `"BLOCKED" | "MERGED" | "TRANSITION_ONLY" | "ACTION_ONLY" | "NO_PROPOSALS"`.
    pub merge_decision: String,
    /// Why an action blocked transitions, when `merge_decision == "BLOCKED"`.
    pub blocking_reason: Option<String>,
    /// Metadata of the winning action, always populated alongside
    /// `winning_action` (see `SPEC_FULL.md` §3 for why this field is explicit
    /// rather than implied).
    pub winning_action_metadata: Option<Metadata>,
    /// Set by `resolve_with_fallback` when the "any" fallback transition fired.
    pub fallback_applied: bool,
    /// Set by the orchestrator's sanitizer step, when it rewrites `next_state`.
    pub sanitizer_diagnostic: Option<Value>,
}

impl ResolutionTrace {
    /// Serialize to a JSON-ish map for logging, matching the shape of the
    /// original `ResolutionTrace.to_dict()`.
    pub fn to_value(&self) -> Value {
        let rank_tuple = |r: &(String, Priority, String)| {
            Value::Array(vec![
                Value::String(r.0.clone()),
                Value::String(r.1.to_string()),
                Value::String(r.2.clone()),
            ])
        };
        serde_json::json!({
            "action_proposals_count": self.action_proposals.len(),
            "transition_proposals_count": self.transition_proposals.len(),
            "action_ranking": self.action_ranking.iter().map(rank_tuple).collect::<Vec<_>>(),
            "transition_ranking": self.transition_ranking.iter().map(rank_tuple).collect::<Vec<_>>(),
            "winning_action": self.winning_action.as_ref().map(|p| p.to_string()),
            "winning_transition": self.winning_transition.as_ref().map(|p| p.to_string()),
            "merge_decision": self.merge_decision,
            "blocking_reason": self.blocking_reason,
            "winning_action_metadata": self.winning_action_metadata.as_ref().map(|m| Value::Object(m.inner().clone())),
            "fallback_applied": self.fallback_applied,
            "sanitizer_diagnostic": self.sanitizer_diagnostic,
        })
    }
}

/// The single decision committed per turn: final action, state target, and the
/// data/flag mutations the orchestrator will apply as side effects.
#[derive(Debug, Clone)]
pub struct ResolvedDecision {
    /// Final chosen action name.
    pub action: String,
    /// Final chosen next state (may equal the current state).
    pub next_state: String,
    /// Reason codes of every proposal that contributed to the decision, in
    /// winning order (action, then transition, then any fallback marker).
    pub reason_codes: Vec<String>,
    /// Every proposal that was not selected.
    pub rejected_proposals: Vec<Proposal>,
    /// Audit trail of the resolution.
    pub resolution_trace: ResolutionTrace,
    /// Data field writes to apply on commit.
    pub data_updates: HashMap<String, Value>,
    /// Flag writes to apply on commit.
    pub flags_to_set: HashMap<String, Value>,

    // Compatibility fields, filled in by the orchestrator after commit
    // (`spec.md` §4.9 step 8); `None`/empty until then.
    /// State the dialog was in before this turn's transition.
    pub prev_state: Option<String>,
    /// Current state's declared goal, if any.
    pub goal: Option<String>,
    /// Post-commit copy of collected data.
    pub collected_data: HashMap<String, Value>,
    /// Required data still missing after commit.
    pub missing_data: Vec<String>,
    /// Optional data fields for the (possibly new) current state.
    pub optional_data: Vec<String>,
    /// Whether the (possibly new) current state is terminal, including the
    /// `_objection_limit_final` override.
    pub is_final: bool,
    /// Phase of the (possibly new) current state.
    pub spin_phase: Option<String>,
    /// Phase of the previous state.
    pub prev_phase: Option<String>,
    /// Circular-flow (go-back) stats after side effects.
    pub circular_flow_stats: HashMap<String, Value>,
    /// Objection stats after side effects.
    pub objection_stats: HashMap<String, Value>,
    /// Disambiguation options, populated when `action == "ask_clarification"`.
    pub disambiguation_options: Option<Vec<String>>,
    /// Disambiguation question, populated when `action == "ask_clarification"`.
    pub disambiguation_question: Option<String>,
}

impl ResolvedDecision {
    /// A minimal decision with no compatibility fields filled in yet; used by
    /// [`crate::resolver::ConflictResolver`] and then enriched by the
    /// orchestrator.
    pub fn new(
        action: String,
        next_state: String,
        reason_codes: Vec<String>,
        rejected_proposals: Vec<Proposal>,
        resolution_trace: ResolutionTrace,
        data_updates: HashMap<String, Value>,
        flags_to_set: HashMap<String, Value>,
    ) -> Self {
        Self {
            action,
            next_state,
            reason_codes,
            rejected_proposals,
            resolution_trace,
            data_updates,
            flags_to_set,
            prev_state: None,
            goal: None,
            collected_data: HashMap::new(),
            missing_data: Vec::new(),
            optional_data: Vec::new(),
            is_final: false,
            spin_phase: None,
            prev_phase: None,
            circular_flow_stats: HashMap::new(),
            objection_stats: HashMap::new(),
            disambiguation_options: None,
            disambiguation_question: None,
        }
    }

    /// A fallback decision: `action` is supplied by the caller
    /// (`"continue_current_goal"` for validation errors, the orchestrator's
    /// configured default for processing errors), `next_state` always equals
    /// `current_state`, and `reason_codes` is exactly `[reason]`. Constructing a
    /// fallback decision on the same `(current_state, action, reason)` twice
    /// yields equal values (`spec.md` §8 property 7).
    pub fn fallback(current_state: &str, action: &str, reason: &str) -> Self {
        Self::new(
            action.to_string(),
            current_state.to_string(),
            vec![reason.to_string()],
            Vec::new(),
            ResolutionTrace::default(),
            HashMap::new(),
            HashMap::new(),
        )
    }
}
