//! [`PhaseExhaustedSource`]: offers an options menu when the dialog is stuck
//! in a phase without progress, in the exclusive window below `StallGuard`'s
//! hard-ejection threshold.
//!
//! Ground-truthed against `original_source/src/blackboard/sources/phase_exhausted.py`.

use crate::error::Result;
use crate::primitives::Priority;
use crate::proposal::{Metadata, Proposal};

use super::{EnabledFlag, KnowledgeSource, TurnInputs};

/// Fires only in `[effective_threshold, stall_soft)`, and only when the turn
/// shows no progress. Above `stall_soft`, [`super::stall_guard::StallGuardSource`]
/// takes over.
pub struct PhaseExhaustedSource {
    name: String,
    enabled: EnabledFlag,
}

impl PhaseExhaustedSource {
    /// Construct the source.
    pub fn new() -> Self {
        Self {
            name: "PhaseExhaustedSource".to_string(),
            enabled: EnabledFlag::default(),
        }
    }

    fn effective_threshold(turn: &TurnInputs<'_>, stall_soft: u32) -> u32 {
        let phase_threshold = turn.ctx.state_config.phase_exhaust_threshold.unwrap_or(3);
        phase_threshold.min(stall_soft.saturating_sub(1))
    }
}

impl Default for PhaseExhaustedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl KnowledgeSource for PhaseExhaustedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority_order(&self) -> u32 {
        43
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
        if !self.is_enabled() {
            return false;
        }
        let max_turns = turn.ctx.state_config.max_turns_in_state.unwrap_or(0);
        if max_turns == 0 {
            return false;
        }
        let stall_soft = turn.ctx.state_config.stall_soft();
        let consecutive = turn.ctx.context_envelope.consecutive_same_state();
        let effective_threshold = Self::effective_threshold(turn, stall_soft);

        if consecutive < effective_threshold || consecutive >= stall_soft {
            return false;
        }

        !turn.ctx.context_envelope.is_progressing() && !turn.ctx.context_envelope.has_extracted_data()
    }

    fn contribute(&self, turn: &TurnInputs<'_>) -> Result<Vec<Proposal>> {
        let max_turns = turn.ctx.state_config.max_turns_in_state.unwrap_or(0);
        let phase_threshold = turn.ctx.state_config.phase_exhaust_threshold.unwrap_or(3);
        let consecutive = turn.ctx.context_envelope.consecutive_same_state();

        let proposal = Proposal::action("offer_options", Priority::Normal, &self.name, "phase_exhausted_options", true)
            .with_metadata(
                Metadata::new()
                    .with("options_type", "phase_exhausted")
                    .with("from_state", turn.ctx.state.clone())
                    .with("consecutive_turns", consecutive)
                    .with("phase_threshold", phase_threshold)
                    .with("max_turns_in_state", max_turns),
            );
        Ok(vec![proposal])
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
    fn fires_in_exclusive_window_without_progress() {
        let source = PhaseExhaustedSource::new();
        let mut sc = StateConfig::default();
        sc.max_turns_in_state = Some(6);
        sc.phase_exhaust_threshold = Some(3);
        let mut ctx = snapshot("bant_budget", "unclear", sc);
        ctx.context_envelope = Box::new(StuckEnvelope {
            consecutive: 3,
            ..Default::default()
        });
        let flow = NullFlow::default();
        let tenant = default_tenant();
        let tracker = FakeTracker::default();
        let t = turn(&ctx, &flow, &tenant, &tracker);
        assert!(source.should_contribute(&t));
        let proposals = source.contribute(&t).unwrap();
        assert_eq!(proposals[0].value, "offer_options");
        assert!(proposals[0].combinable);
    }

    #[test]
    fn does_not_fire_once_past_stall_soft_window() {
        let source = PhaseExhaustedSource::new();
        let mut sc = StateConfig::default();
        sc.max_turns_in_state = Some(6);
        sc.phase_exhaust_threshold = Some(3);
        let mut ctx = snapshot("bant_budget", "unclear", sc);
        ctx.context_envelope = Box::new(StuckEnvelope {
            consecutive: 5,
            ..Default::default()
        });
        let flow = NullFlow::default();
        let tenant = default_tenant();
        let tracker = FakeTracker::default();
        assert!(!source.should_contribute(&turn(&ctx, &flow, &tenant, &tracker)));
    }

    #[test]
    fn progress_suppresses_the_offer() {
        let source = PhaseExhaustedSource::new();
        let mut sc = StateConfig::default();
        sc.max_turns_in_state = Some(6);
        sc.phase_exhaust_threshold = Some(3);
        let mut ctx = snapshot("bant_budget", "info_provided", sc);
        ctx.context_envelope = Box::new(StuckEnvelope {
            consecutive: 4,
            progressing: true,
            ..Default::default()
        });
        let flow = NullFlow::default();
        let tenant = default_tenant();
        let tracker = FakeTracker::default();
        assert!(!source.should_contribute(&turn(&ctx, &flow, &tenant, &tracker)));
    }

    #[test]
    fn disabled_state_never_fires() {
        let source = PhaseExhaustedSource::new();
        let ctx = snapshot("bant_budget", "unclear", StateConfig::default());
        let flow = NullFlow::default();
        let tenant = default_tenant();
        let tracker = FakeTracker::default();
        assert!(!source.should_contribute(&turn(&ctx, &flow, &tenant, &tracker)));
    }
}
