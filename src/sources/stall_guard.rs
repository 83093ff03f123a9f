//! [`StallGuardSource`]: universal safety net that forces a state transition
//! once the dialog has spent too long in any single state.
//!
//! Ground-truthed against `original_source/src/blackboard/sources/stall_guard.py`.
//! Two-tier: a hard ejection at `max_turns_in_state` (HIGH, unconditional
//! except for a progress-intent exemption), and a softer nudge at
//! `max(max_turns - 1, 3)` gated on "no progress this turn" (NORMAL).

use std::collections::HashSet;

use crate::error::Result;
use crate::primitives::Priority;
use crate::proposal::{Metadata, Proposal};

use super::{EnabledFlag, KnowledgeSource, TurnInputs};

/// Same detour state [`super::objection_return::ObjectionReturnSource`] returns from.
const OBJECTION_STATE: &str = "handle_objection";

/// Intents that count as genuine forward progress and are exempt from the
/// hard-tier eject even once `max_turns_in_state` is reached.
pub fn progress_exempt_intents() -> HashSet<String> {
    ["contact_provided", "demo_request", "callback_request", "payment_confirmation"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

enum Tier {
    Hard,
    Soft,
}

/// Forces a transition out of a stalled state, preferring the saved
/// pre-objection state (when stalled inside `handle_objection`), then a
/// declared terminal-state pool (`soft_close`), then the state's own
/// `max_turns_fallback`, then `"close"`.
pub struct StallGuardSource {
    name: String,
    enabled: EnabledFlag,
    exempt_intents: HashSet<String>,
}

impl StallGuardSource {
    /// Construct with the default progress-exempt intent set.
    pub fn new() -> Self {
        Self {
            name: "StallGuardSource".to_string(),
            enabled: EnabledFlag::default(),
            exempt_intents: progress_exempt_intents(),
        }
    }

    fn tier(&self, turn: &TurnInputs<'_>) -> Option<Tier> {
        let max_turns = turn.ctx.state_config.max_turns_in_state.unwrap_or(0);
        if max_turns == 0 {
            return None;
        }
        let consecutive = turn.ctx.context_envelope.consecutive_same_state();

        if consecutive >= max_turns {
            if self.exempt_intents.contains(&turn.ctx.current_intent) {
                return None;
            }
            return Some(Tier::Hard);
        }

        let soft_threshold = turn.ctx.state_config.stall_soft();
        if consecutive >= soft_threshold
            && !turn.ctx.context_envelope.is_progressing()
            && !turn.ctx.context_envelope.has_extracted_data()
        {
            return Some(Tier::Soft);
        }
        None
    }

    fn fallback_state(&self, turn: &TurnInputs<'_>) -> String {
        if turn.ctx.state == OBJECTION_STATE {
            if let Some(saved) = turn.ctx.state_before_objection.clone().filter(|s| !s.is_empty()) {
                return saved;
            }
        }
        if !turn.ctx.state_config.terminal_states.is_empty() {
            return "soft_close".to_string();
        }
        turn.ctx
            .state_config
            .max_turns_fallback
            .clone()
            .unwrap_or_else(|| "close".to_string())
    }
}

impl Default for StallGuardSource {
    fn default() -> Self {
        Self::new()
    }
}

impl KnowledgeSource for StallGuardSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority_order(&self) -> u32 {
        45
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
        self.is_enabled() && self.tier(turn).is_some()
    }

    fn contribute(&self, turn: &TurnInputs<'_>) -> Result<Vec<Proposal>> {
        let Some(tier) = self.tier(turn) else {
            return Ok(Vec::new());
        };

        let fallback = self.fallback_state(turn);
        let consecutive = turn.ctx.context_envelope.consecutive_same_state();
        let max_turns = turn.ctx.state_config.max_turns_in_state.unwrap_or(0);

        let (priority, reason_code, mechanism, action_name) = match tier {
            Tier::Hard => (Priority::High, "max_turns_in_state_exceeded", "stall_guard_hard", "stall_guard_eject"),
            Tier::Soft => (Priority::Normal, "stall_soft_progression", "stall_guard_soft", "stall_guard_nudge"),
        };

        let metadata = || {
            Metadata::new()
                .with("from_state", turn.ctx.state.clone())
                .with("to_state", fallback.clone())
                .with("consecutive_turns", consecutive)
                .with("max_turns_in_state", max_turns)
                .with("mechanism", mechanism)
        };

        let action = Proposal::action(action_name, priority, &self.name, reason_code, true).with_metadata(metadata());
        let transition = Proposal::transition(fallback, priority, &self.name, reason_code).with_metadata(metadata());

        Ok(vec![action, transition])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{ContextEnvelopePort, StateConfig};
    use crate::sources::testutil::*;

    #[derive(Debug, Default)]
    struct StuckEnvelope {
        consecutive: u32,
        progressing: bool,
        has_data: bool,
    }
    impl ContextEnvelopePort for StuckEnvelope {
        fn consecutive_same_state(&self) -> u32 {
            self.consecutive
        }
        fn is_progressing(&self) -> bool {
            self.progressing
        }
        fn has_extracted_data(&self) -> bool {
            self.has_data
        }
    }

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
    fn hard_tier_ejects_at_max_turns() {
        let source = StallGuardSource::new();
        let mut sc = StateConfig::default();
        sc.max_turns_in_state = Some(6);
        sc.max_turns_fallback = Some("spin_situation".to_string());
        let mut ctx = snapshot("bant_budget", "unclear", sc);
        ctx.context_envelope = Box::new(StuckEnvelope {
            consecutive: 6,
            ..Default::default()
        });
        let flow = NullFlow::default();
        let tenant = default_tenant();
        let tracker = FakeTracker::default();
        let proposals = source.contribute(&turn(&ctx, &flow, &tenant, &tracker)).unwrap();
        assert_eq!(proposals[0].priority, Priority::High);
        assert_eq!(proposals[1].value, "spin_situation");
    }

    #[test]
    fn progress_intent_exempts_hard_tier() {
        let source = StallGuardSource::new();
        let mut sc = StateConfig::default();
        sc.max_turns_in_state = Some(6);
        let mut ctx = snapshot("bant_budget", "demo_request", sc);
        ctx.context_envelope = Box::new(StuckEnvelope {
            consecutive: 6,
            ..Default::default()
        });
        let flow = NullFlow::default();
        let tenant = default_tenant();
        let tracker = FakeTracker::default();
        assert!(!source.should_contribute(&turn(&ctx, &flow, &tenant, &tracker)));
    }

    #[test]
    fn objection_state_ejects_to_saved_state() {
        let source = StallGuardSource::new();
        let mut sc = StateConfig::default();
        sc.max_turns_in_state = Some(4);
        let mut ctx = snapshot(OBJECTION_STATE, "unclear", sc);
        ctx.state_before_objection = Some("bant_budget".to_string());
        ctx.context_envelope = Box::new(StuckEnvelope {
            consecutive: 4,
            ..Default::default()
        });
        let flow = NullFlow::default();
        let tenant = default_tenant();
        let tracker = FakeTracker::default();
        let proposals = source.contribute(&turn(&ctx, &flow, &tenant, &tracker)).unwrap();
        assert_eq!(proposals[1].value, "bant_budget");
    }

    #[test]
    fn terminal_states_present_ejects_to_soft_close() {
        let source = StallGuardSource::new();
        let mut sc = StateConfig::default();
        sc.max_turns_in_state = Some(4);
        sc.terminal_states = vec!["close".to_string()];
        let mut ctx = snapshot("autonomous_closing", "unclear", sc);
        ctx.context_envelope = Box::new(StuckEnvelope {
            consecutive: 4,
            ..Default::default()
        });
        let flow = NullFlow::default();
        let tenant = default_tenant();
        let tracker = FakeTracker::default();
        let proposals = source.contribute(&turn(&ctx, &flow, &tenant, &tracker)).unwrap();
        assert_eq!(proposals[1].value, "soft_close");
    }

    #[test]
    fn soft_tier_nudges_below_max_turns_without_progress() {
        let source = StallGuardSource::new();
        let mut sc = StateConfig::default();
        sc.max_turns_in_state = Some(6);
        sc.max_turns_fallback = Some("spin_situation".to_string());
        let mut ctx = snapshot("bant_budget", "unclear", sc);
        ctx.context_envelope = Box::new(StuckEnvelope {
            consecutive: 5,
            ..Default::default()
        });
        let flow = NullFlow::default();
        let tenant = default_tenant();
        let tracker = FakeTracker::default();
        let proposals = source.contribute(&turn(&ctx, &flow, &tenant, &tracker)).unwrap();
        assert_eq!(proposals[0].priority, Priority::Normal);
        assert_eq!(proposals[0].value, "stall_guard_nudge");
    }
}
