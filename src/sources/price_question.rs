//! [`PriceQuestionSource`]: answers price-related intents without blocking
//! `data_complete` transitions.
//!
//! Ground-truthed against `original_source/src/blackboard/sources/price_question.py`.

use std::collections::HashSet;

use crate::error::Result;
use crate::primitives::Priority;
use crate::proposal::{Metadata, Proposal};

use super::{EnabledFlag, KnowledgeSource, TurnInputs};

/// Default price-related intents, exactly as ground-truthed (not the looser
/// paraphrase used elsewhere in this crate's planning documents).
pub fn default_price_intents() -> HashSet<String> {
    [
        "price_question",
        "pricing_details",
        "cost_inquiry",
        "discount_request",
        "payment_terms",
        "pricing_comparison",
        "budget_question",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Proposes a pricing-related action, always `combinable = true` so the
/// answer coexists with a same-turn `data_complete` transition.
pub struct PriceQuestionSource {
    name: String,
    enabled: EnabledFlag,
    price_intents: HashSet<String>,
}

impl PriceQuestionSource {
    /// Construct with the default price-intent set.
    pub fn new() -> Self {
        Self {
            name: "PriceQuestionSource".to_string(),
            enabled: EnabledFlag::default(),
            price_intents: default_price_intents(),
        }
    }

    /// Construct with a caller-supplied price-intent set.
    pub fn with_intents(price_intents: HashSet<String>) -> Self {
        Self {
            price_intents,
            ..Self::new()
        }
    }

    fn action_for(intent: &str) -> &'static str {
        match intent {
            "discount_request" => "handle_discount_request",
            "payment_terms" => "explain_payment_terms",
            "pricing_comparison" => "compare_pricing",
            "budget_question" => "discuss_budget",
            _ => "answer_with_pricing",
        }
    }
}

impl Default for PriceQuestionSource {
    fn default() -> Self {
        Self::new()
    }
}

impl KnowledgeSource for PriceQuestionSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority_order(&self) -> u32 {
        10
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
        self.is_enabled() && self.price_intents.contains(&turn.ctx.current_intent)
    }

    fn contribute(&self, turn: &TurnInputs<'_>) -> Result<Vec<Proposal>> {
        let intent = &turn.ctx.current_intent;
        let action = Self::action_for(intent);
        let has_pricing = turn
            .ctx
            .collected_data
            .get("pricing_tier")
            .map(|v| !v.is_null())
            .unwrap_or(false);

        let proposal = Proposal::action(action, Priority::High, &self.name, "price_question_priority", true)
            .with_metadata(
                Metadata::new()
                    .with("original_intent", intent.clone())
                    .with("has_pricing_data", has_pricing),
            );
        Ok(vec![proposal])
    }
}
