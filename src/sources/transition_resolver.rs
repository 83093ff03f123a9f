//! [`TransitionResolverSource`]: intent-based state transitions declared
//! directly in a state's `transitions` map.
//!
//! Ground-truthed against
//! `original_source/src/blackboard/sources/transition_resolver.py`. The
//! original also resolves conditional `{when, then}` and chained transition
//! definitions via a condition registry; this crate keeps transition targets
//! as plain strings (see `ContextSnapshot::get_transition`), so the
//! conditional-chain branch of the original has no counterpart here; only
//! the direct-lookup path is ported.

use std::collections::HashSet;

use crate::error::Result;
use crate::primitives::Priority;
use crate::proposal::{Metadata, Proposal};

use super::{EnabledFlag, KnowledgeSource, TurnInputs};

/// Triggers owned by a dedicated source; never resolved here.
pub fn excluded_triggers() -> HashSet<&'static str> {
    ["data_complete", "any"].into_iter().collect()
}

/// Intents whose transition should win over a merely-`Normal` competing
/// proposal (e.g. `DataCollectorSource`'s same-turn `data_complete`).
pub fn high_priority_intents() -> HashSet<&'static str> {
    ["rejection", "hard_no", "end_conversation", "explicit_close_request"].into_iter().collect()
}

/// Proposes `state_config.transitions[intent]` whenever the current intent
/// names a transition trigger this state declares, except the triggers other
/// sources own exclusively.
pub struct TransitionResolverSource {
    name: String,
    enabled: EnabledFlag,
}

impl TransitionResolverSource {
    /// Construct the source.
    pub fn new() -> Self {
        Self {
            name: "TransitionResolverSource".to_string(),
            enabled: EnabledFlag::default(),
        }
    }
}

impl Default for TransitionResolverSource {
    fn default() -> Self {
        Self::new()
    }
}

impl KnowledgeSource for TransitionResolverSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority_order(&self) -> u32 {
        50
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
        self.is_enabled() && !turn.ctx.state_config.transitions.is_empty()
    }

    fn contribute(&self, turn: &TurnInputs<'_>) -> Result<Vec<Proposal>> {
        let intent = turn.ctx.current_intent.clone();
        if excluded_triggers().contains(intent.as_str()) {
            return Ok(Vec::new());
        }

        let Some(next_state) = turn.ctx.get_transition(&intent) else {
            return Ok(Vec::new());
        };

        let priority = if high_priority_intents().contains(intent.as_str()) {
            Priority::High
        } else {
            Priority::Normal
        };

        let proposal = Proposal::transition(next_state, priority, &self.name, format!("intent_transition_{intent}"))
            .with_metadata(Metadata::new().with("trigger_intent", intent).with("transition_type", "string"));
        Ok(vec![proposal])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::StateConfig;
    use crate::sources::testutil::*;

    fn turn<'a>(
        ctx: &'a crate::context::ContextSnapshot,
        flow: &'a NullFlow,
        tenant: &'a crate::config::TenantConfig,
        tracker: &'a FakeTracker,
    ) -> TurnInputs<'a> {
        TurnInputs {
            ctx,
            flow_config: flow,
            tenant,
            intent_tracker: tracker,
            circular_flow: None,
            llm: None,
            guard_analyser: None,
        }
    }

    #[test]
    fn rejection_transitions_at_high_priority() {
        let source = TransitionResolverSource::new();
        let mut sc = StateConfig::default();
        sc.transitions.insert("rejection".to_string(), "soft_close".to_string());
        let ctx = snapshot("bant_budget", "rejection", sc);
        let flow = NullFlow::default();
        let tenant = default_tenant();
        let tracker = FakeTracker::default();
        let proposals = source.contribute(&turn(&ctx, &flow, &tenant, &tracker)).unwrap();
        assert_eq!(proposals[0].value, "soft_close");
        assert_eq!(proposals[0].priority, Priority::High);
        assert_eq!(proposals[0].reason_code, "intent_transition_rejection");
    }

    #[test]
    fn ordinary_intent_transitions_at_normal_priority() {
        let source = TransitionResolverSource::new();
        let mut sc = StateConfig::default();
        sc.transitions.insert("agreement".to_string(), "close".to_string());
        let ctx = snapshot("bant_budget", "agreement", sc);
        let flow = NullFlow::default();
        let tenant = default_tenant();
        let tracker = FakeTracker::default();
        let proposals = source.contribute(&turn(&ctx, &flow, &tenant, &tracker)).unwrap();
        assert_eq!(proposals[0].priority, Priority::Normal);
    }

    #[test]
    fn data_complete_trigger_is_excluded() {
        let source = TransitionResolverSource::new();
        let mut sc = StateConfig::default();
        sc.transitions.insert("data_complete".to_string(), "bant_budget".to_string());
        let ctx = snapshot("spin_problem", "data_complete", sc);
        let flow = NullFlow::default();
        let tenant = default_tenant();
        let tracker = FakeTracker::default();
        assert!(source.contribute(&turn(&ctx, &flow, &tenant, &tracker)).unwrap().is_empty());
    }

    #[test]
    fn unmapped_intent_proposes_nothing() {
        let source = TransitionResolverSource::new();
        let mut sc = StateConfig::default();
        sc.transitions.insert("agreement".to_string(), "close".to_string());
        let ctx = snapshot("bant_budget", "unrelated_intent", sc);
        let flow = NullFlow::default();
        let tenant = default_tenant();
        let tracker = FakeTracker::default();
        assert!(source.contribute(&turn(&ctx, &flow, &tenant, &tracker)).unwrap().is_empty());
    }
}
