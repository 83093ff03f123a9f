//! [`DisambiguationSource`]: blocks all transitions while the classifier is
//! unsure which intent the user meant.
//!
//! Ground-truthed against `original_source/src/blackboard/sources/disambiguation.py`.

use crate::error::Result;
use crate::primitives::Priority;
use crate::proposal::{Metadata, Proposal};

use super::{EnabledFlag, KnowledgeSource, TurnInputs};

/// Intent name the classifier emits when it cannot resolve ambiguity on its own.
pub const DISAMBIGUATION_INTENT: &str = "disambiguation_needed";

/// Proposes a blocking `ask_clarification` action, carrying the envelope's
/// disambiguation options/question through for the response layer.
pub struct DisambiguationSource {
    name: String,
    enabled: EnabledFlag,
}

impl DisambiguationSource {
    /// Construct the source.
    pub fn new() -> Self {
        Self {
            name: "DisambiguationSource".to_string(),
            enabled: EnabledFlag::default(),
        }
    }
}

impl Default for DisambiguationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl KnowledgeSource for DisambiguationSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority_order(&self) -> u32 {
        8
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
        self.is_enabled() && turn.ctx.current_intent == DISAMBIGUATION_INTENT
    }

    fn contribute(&self, turn: &TurnInputs<'_>) -> Result<Vec<Proposal>> {
        let envelope = &turn.ctx.context_envelope;
        let options = envelope.disambiguation_options();
        let question = envelope.disambiguation_question().unwrap_or_default();

        let proposal = Proposal::action("ask_clarification", Priority::High, &self.name, "disambiguation_needed", false)
            .with_metadata(
                Metadata::new()
                    .with("disambiguation_options", options)
                    .with("disambiguation_question", question),
            );
        Ok(vec![proposal])
    }
}
