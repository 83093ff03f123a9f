//! [`FactQuestionSource`]: answers informational/product-fact intents without
//! blocking `data_complete` transitions.
//!
//! No dedicated original source exists for this responsibility; it is
//! structurally grounded on the sibling
//! `original_source/src/blackboard/sources/price_question.py` (same
//! O(1)-intent-set gate, same always-`combinable` contract), generalized from
//! pricing intents to factual/product questions per the catalog entry this
//! crate adds alongside it.

use std::collections::HashSet;

use crate::error::Result;
use crate::primitives::Priority;
use crate::proposal::{Metadata, Proposal};

use super::{EnabledFlag, KnowledgeSource, TurnInputs};

/// Default fact/product-question intents.
pub fn default_fact_intents() -> HashSet<String> {
    [
        "fact_question",
        "feature_question",
        "product_question",
        "how_it_works_question",
        "integration_question",
        "security_question",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Proposes `answer_with_facts`, always `combinable = true`.
pub struct FactQuestionSource {
    name: String,
    enabled: EnabledFlag,
    fact_intents: HashSet<String>,
}

impl FactQuestionSource {
    /// Construct with the default fact-intent set.
    pub fn new() -> Self {
        Self {
            name: "FactQuestionSource".to_string(),
            enabled: EnabledFlag::default(),
            fact_intents: default_fact_intents(),
        }
    }

    /// Construct with a caller-supplied fact-intent set.
    pub fn with_intents(fact_intents: HashSet<String>) -> Self {
        Self {
            fact_intents,
            ..Self::new()
        }
    }
}

impl Default for FactQuestionSource {
    fn default() -> Self {
        Self::new()
    }
}

impl KnowledgeSource for FactQuestionSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority_order(&self) -> u32 {
        15
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
        self.is_enabled() && self.fact_intents.contains(&turn.ctx.current_intent)
    }

    fn contribute(&self, turn: &TurnInputs<'_>) -> Result<Vec<Proposal>> {
        let intent = &turn.ctx.current_intent;
        let proposal = Proposal::action("answer_with_facts", Priority::High, &self.name, "fact_question_priority", true)
            .with_metadata(Metadata::new().with("original_intent", intent.clone()));
        Ok(vec![proposal])
    }
}
