//! [`ObjectionReturnSource`]: returns the dialog to its pre-objection phase
//! once the objection has been addressed, instead of falling through to a
//! generic YAML `agreement -> close` transition.
//!
//! Ground-truthed against `original_source/src/blackboard/sources/objection_return.py`.

use std::collections::HashSet;

use crate::error::Result;
use crate::primitives::Priority;
use crate::proposal::{Metadata, Proposal};

use super::{EnabledFlag, KnowledgeSource, TurnInputs};

/// The state objections are always routed through.
pub const OBJECTION_STATE: &str = "handle_objection";

/// Question intents that, after refinement, also signal "objection handled,
/// continue the sales flow" and not just unambiguous agreement.
pub fn question_return_intents() -> HashSet<String> {
    [
        "question_features",
        "question_pricing",
        "question_implementation",
        "question_integration",
        "question_demo",
        "comparison",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Plain positive/agreement intents.
pub fn positive_intents() -> HashSet<String> {
    [
        "agreement",
        "interest_shown",
        "ready_to_proceed",
        "positive_response",
        "satisfied",
        "convinced",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// `positive_intents() | question_return_intents()`.
pub fn default_return_intents() -> HashSet<String> {
    positive_intents().union(&question_return_intents()).cloned().collect()
}

/// Proposes a transition back to `state_before_objection` (or, when that
/// saved state has no phase, to the flow's `entry_state`) once the user
/// signals the objection has been resolved.
pub struct ObjectionReturnSource {
    name: String,
    enabled: EnabledFlag,
    return_intents: HashSet<String>,
}

impl ObjectionReturnSource {
    /// Construct with the default return-intent set.
    pub fn new() -> Self {
        Self {
            name: "ObjectionReturnSource".to_string(),
            enabled: EnabledFlag::default(),
            return_intents: default_return_intents(),
        }
    }

    /// Construct with a caller-supplied return-intent set.
    pub fn with_intents(return_intents: HashSet<String>) -> Self {
        Self {
            return_intents,
            ..Self::new()
        }
    }
}

impl Default for ObjectionReturnSource {
    fn default() -> Self {
        Self::new()
    }
}

impl KnowledgeSource for ObjectionReturnSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority_order(&self) -> u32 {
        35
    }

    fn is_enabled(&self) -> bool {
        self.enabled.0
    }

    fn enable(&mut self) {
        self.enabled.0 = true;
    }

    fn disable(&mut self) {
        self.enabled.0 = false;
    }

    fn should_contribute(&self, turn: &TurnInputs<'_>) -> bool {
        if !self.is_enabled() || turn.ctx.state != OBJECTION_STATE {
            return false;
        }
        if turn.ctx.state_before_objection.as_deref().unwrap_or("").is_empty() {
            return false;
        }
        self.return_intents.contains(&turn.ctx.current_intent)
    }

    fn contribute(&self, turn: &TurnInputs<'_>) -> Result<Vec<Proposal>> {
        let Some(saved_state) = turn.ctx.state_before_objection.clone().filter(|s| !s.is_empty()) else {
            return Ok(Vec::new());
        };

        if !turn.flow_config.states().contains_key(&saved_state) {
            return Ok(Vec::new());
        }

        let phase = turn.flow_config.state(&saved_state).and_then(|sc| sc.phase.clone());

        if phase.is_none() {
            let Some(entry_state) = turn.flow_config.entry_points().get("entry_state").cloned() else {
                return Ok(Vec::new());
            };
            if !turn.flow_config.states().contains_key(&entry_state) {
                return Ok(Vec::new());
            }
            let proposal = Proposal::transition(entry_state.clone(), Priority::Normal, &self.name, "objection_return_to_entry_state")
                .with_metadata(
                    Metadata::new()
                        .with("from_state", OBJECTION_STATE)
                        .with("to_state", entry_state)
                        .with("trigger_intent", turn.ctx.current_intent.clone())
                        .with("original_saved_state", saved_state)
                        .with("reason", "saved_state_has_no_phase")
                        .with("mechanism", "objection_return_fallback"),
                );
            return Ok(vec![proposal]);
        }

        let proposal = Proposal::transition(saved_state.clone(), Priority::High, &self.name, "objection_return_to_phase")
            .with_metadata(
                Metadata::new()
                    .with("from_state", OBJECTION_STATE)
                    .with("to_state", saved_state)
                    .with("trigger_intent", turn.ctx.current_intent.clone())
                    .with("target_phase", phase.unwrap_or_default())
                    .with("mechanism", "objection_return"),
            );
        Ok(vec![proposal])
    }
}
