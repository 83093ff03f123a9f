//! [`ConversationGuardSource`]: escalating friction response driven by the
//! external `GuardAnalyserPort`'s tier classification.
//!
//! Ground-truthed against
//! `original_source/src/blackboard/sources/conversation_guard_ks.py`'s `TIER_MAP`.

use crate::error::Result;
use crate::ports::GuardTier;
use crate::primitives::Priority;
use crate::proposal::{Metadata, Proposal};

use super::{EnabledFlag, KnowledgeSource, TurnInputs};

/// Fallback target used when a tier-3 skip has no valid phase to jump to;
/// degrades to the tier-2 "offer options" behavior rather than proposing a
/// dead transition.
const TIER3_SKIP_TRIGGER: &str = "guard_skip";

/// Reads `GuardTier` off the turn's envelope via `GuardAnalyserPort` and
/// proposes the matching intervention. `Tier3`'s skip-ahead degrades to
/// `Tier2`'s behavior when the state declares no `guard_skip` transition.
pub struct ConversationGuardSource {
    name: String,
    enabled: EnabledFlag,
}

impl ConversationGuardSource {
    /// Construct the source.
    pub fn new() -> Self {
        Self {
            name: "ConversationGuardSource".to_string(),
            enabled: EnabledFlag::default(),
        }
    }
}

impl Default for ConversationGuardSource {
    fn default() -> Self {
        Self::new()
    }
}

impl KnowledgeSource for ConversationGuardSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority_order(&self) -> u32 {
        7
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
        self.is_enabled() && turn.guard_analyser.is_some()
    }

    fn contribute(&self, turn: &TurnInputs<'_>) -> Result<Vec<Proposal>> {
        let Some(analyser) = turn.guard_analyser else {
            return Ok(Vec::new());
        };
        let tier = analyser.analyse(turn.ctx.context_envelope.as_ref())?;

        let proposals = match tier {
            GuardTier::None => Vec::new(),
            GuardTier::Tier1 => vec![Proposal::action(
                "guard_rephrase",
                Priority::Normal,
                &self.name,
                "conversation_guard_tier1",
                true,
            )
            .with_metadata(Metadata::new().with("tier", "fallback_tier_1"))],
            GuardTier::Tier2 => vec![Proposal::action(
                "guard_offer_options",
                Priority::High,
                &self.name,
                "conversation_guard_tier2",
                false,
            )
            .with_metadata(Metadata::new().with("tier", "fallback_tier_2"))],
            GuardTier::Tier3 => match turn.ctx.get_transition(TIER3_SKIP_TRIGGER) {
                Some(target) => vec![
                    Proposal::action("guard_skip_phase", Priority::High, &self.name, "conversation_guard_tier3", true)
                        .with_metadata(Metadata::new().with("tier", "fallback_tier_3")),
                    Proposal::transition(target, Priority::High, &self.name, "conversation_guard_tier3")
                        .with_metadata(Metadata::new().with("tier", "fallback_tier_3")),
                ],
                None => vec![Proposal::action(
                    "guard_offer_options",
                    Priority::High,
                    &self.name,
                    "conversation_guard_tier3_degraded",
                    false,
                )
                .with_metadata(Metadata::new().with("tier", "fallback_tier_3").with("degraded_to", "fallback_tier_2"))],
            },
            GuardTier::Tier4 => vec![
                Proposal::action("guard_soft_close", Priority::Critical, &self.name, "conversation_guard_tier4", true)
                    .with_metadata(Metadata::new().with("tier", "soft_close")),
                Proposal::transition("soft_close", Priority::Critical, &self.name, "conversation_guard_tier4")
                    .with_metadata(Metadata::new().with("tier", "soft_close")),
            ],
        };
        Ok(proposals)
    }
}
