//! [`GoBackGuardSource`]: enforces go-back limits via [`CircularFlowPort`]
//! before `TransitionResolverSource` ever sees a go-back intent.
//!
//! Ground-truthed against `original_source/src/blackboard/sources/go_back_guard.py`.
//! The counter increment itself is deferred to the orchestrator's post-commit
//! side-effect step (`pending_goback_increment` metadata), so a higher-priority
//! source that blocks the transition never leaves the counter incremented for a
//! go-back that didn't actually happen.

use std::collections::HashSet;

use serde_json::json;

use crate::error::Result;
use crate::primitives::Priority;
use crate::proposal::Proposal;

use super::{EnabledFlag, KnowledgeSource, TurnInputs};

/// Intents treated as go-back triggers. Mirrors
/// [`crate::assigner::GO_BACK_INTENTS`], kept as a separate constant here
/// since the source owns its own (overridable) copy.
pub fn default_go_back_intents() -> HashSet<String> {
    ["go_back", "correct_info"].iter().map(|s| s.to_string()).collect()
}

/// Intercepts go-back intents and either acknowledges them (deferring the
/// counter increment) or blocks them once the limit is reached.
pub struct GoBackGuardSource {
    name: String,
    enabled: EnabledFlag,
    go_back_intents: HashSet<String>,
}

impl GoBackGuardSource {
    /// Construct with the default go-back intent set.
    pub fn new() -> Self {
        Self {
            name: "GoBackGuardSource".to_string(),
            enabled: EnabledFlag::default(),
            go_back_intents: default_go_back_intents(),
        }
    }

    /// Construct with a caller-supplied go-back intent set.
    pub fn with_intents(go_back_intents: HashSet<String>) -> Self {
        Self {
            go_back_intents,
            ..Self::new()
        }
    }
}

impl Default for GoBackGuardSource {
    fn default() -> Self {
        Self::new()
    }
}

impl KnowledgeSource for GoBackGuardSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority_order(&self) -> u32 {
        5
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
        self.is_enabled() && self.go_back_intents.contains(&turn.ctx.current_intent)
    }

    fn contribute(&self, turn: &TurnInputs<'_>) -> Result<Vec<Proposal>> {
        let Some(circular_flow) = turn.circular_flow else {
            return Ok(Vec::new());
        };

        let current_state = &turn.ctx.state;
        let Some(prev_state) = circular_flow.get_go_back_target(current_state) else {
            return Ok(Vec::new());
        };

        if !circular_flow.is_limit_reached() {
            let proposal = Proposal::action(
                "acknowledge_go_back",
                Priority::Normal,
                &self.name,
                "go_back_allowed",
                true,
            )
            .with_metadata(
                crate::proposal::Metadata::new()
                    .with("from_state", current_state.clone())
                    .with("to_state", prev_state.clone())
                    .with("pending_goback_increment", true)
                    .with("remaining_gobacks", circular_flow.get_remaining_go_backs())
                    .with("goback_count_before", circular_flow.go_back_count()),
            );
            Ok(vec![proposal])
        } else {
            let history = circular_flow
                .get_history()
                .into_iter()
                .map(|(from, to)| json!({ "from": from, "to": to }))
                .collect::<Vec<_>>();
            let proposal = Proposal::action(
                "go_back_limit_reached",
                Priority::High,
                &self.name,
                "go_back_limit_reached",
                false,
            )
            .with_metadata(
                crate::proposal::Metadata::new()
                    .with("current_state", current_state.clone())
                    .with("goback_count", circular_flow.go_back_count())
                    .with("max_gobacks", circular_flow.max_go_backs())
                    .with("history", history),
            );
            Ok(vec![proposal])
        }
    }
}
