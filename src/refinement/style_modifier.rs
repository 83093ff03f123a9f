//! [`StyleModifierDetectionLayer`]: separates a "style" intent (how the user
//! wants the answer delivered) from the semantic intent underneath it (what
//! they actually want).
//!
//! Ground-truthed against
//! `original_source/src/classifier/style_modifier_detection.py`, including its
//! six-strategy semantic-inference cascade and the "never re-emit a style
//! intent" safety check.

use std::collections::{HashMap, HashSet};

use serde_json::json;

use crate::config::TenantConfig;
use crate::error::Result;
use crate::proposal::Metadata;

use super::{LayerPriority, RefinementContext, RefinementLayer, RefinementResult};

/// Style intents carried when no config overrides them, matching the
/// original's hard-coded default (`spec.md` §9 leaves "config vs hard-coded"
/// an open question; this layer supports both by taking an override set while
/// defaulting to this one).
pub const DEFAULT_STYLE_INTENTS: [&str; 3] = ["request_brevity", "example_request", "summary_request"];

/// Fallback semantic intent when none of the six inference strategies apply.
pub const DEFAULT_SEMANTIC: &str = "unclear";

/// Detects a style intent and infers the semantic intent underneath it via an
/// ordered cascade: last-action implication, question/price alternatives,
/// extracted data, phase default, expected-data-type implication, fallback.
pub struct StyleModifierDetectionLayer {
    style_intents: HashSet<String>,
    action_expects_data: HashMap<String, String>,
    phase_defaults: HashMap<String, String>,
    intent_to_modifier: HashMap<String, String>,
    default_semantic: String,
}

impl StyleModifierDetectionLayer {
    /// Construct the layer with the default style-intent set and empty
    /// config-driven inference tables.
    pub fn new() -> Self {
        Self {
            style_intents: DEFAULT_STYLE_INTENTS.iter().map(|s| s.to_string()).collect(),
            action_expects_data: HashMap::new(),
            phase_defaults: HashMap::new(),
            intent_to_modifier: HashMap::new(),
            default_semantic: DEFAULT_SEMANTIC.to_string(),
        }
    }

    /// Override the style-intent set from host configuration.
    pub fn with_style_intents(mut self, intents: impl IntoIterator<Item = String>) -> Self {
        self.style_intents = intents.into_iter().collect();
        self
    }

    /// Configure strategy 1: `last_action -> semantic_intent`.
    pub fn with_action_expects_data(mut self, table: HashMap<String, String>) -> Self {
        self.action_expects_data = table;
        self
    }

    /// Configure strategy 4: `phase -> semantic_intent`.
    pub fn with_phase_defaults(mut self, table: HashMap<String, String>) -> Self {
        self.phase_defaults = table;
        self
    }

    /// Configure the style-intent -> modifier-name mapping used when emitting
    /// `style_modifiers` metadata. Identity (the intent name itself) when a
    /// given intent has no mapping.
    pub fn with_intent_to_modifier(mut self, table: HashMap<String, String>) -> Self {
        self.intent_to_modifier = table;
        self
    }

    fn infer_semantic_intent(&self, ctx: &RefinementContext) -> String {
        // Strategy 1: action-based.
        if let Some(action) = &ctx.last_action {
            if let Some(semantic) = self.action_expects_data.get(action) {
                return semantic.clone();
            }
        }

        // Strategy 2: alternatives-based (prefer question/price intents).
        for alt in &ctx.alternatives {
            if alt.intent.starts_with("question_") || alt.intent.starts_with("price_") {
                return alt.intent.clone();
            }
        }

        // Strategy 3: data-based.
        if !ctx.extracted_data.is_empty() {
            return "info_provided".to_string();
        }

        // Strategy 4: phase-based.
        if let Some(phase) = &ctx.phase {
            if let Some(semantic) = self.phase_defaults.get(phase) {
                return semantic.clone();
            }
        }

        // Strategy 5: expects-based.
        if ctx.expects_data_type.is_some() {
            return "info_provided".to_string();
        }

        // Strategy 6: fallback.
        self.default_semantic.clone()
    }

    fn map_modifier(&self, intent: &str) -> String {
        self.intent_to_modifier
            .get(intent)
            .cloned()
            .unwrap_or_else(|| intent.to_string())
    }
}

impl Default for StyleModifierDetectionLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl RefinementLayer for StyleModifierDetectionLayer {
    fn name(&self) -> &str {
        "style_modifier_detection"
    }

    fn priority(&self) -> LayerPriority {
        LayerPriority::Highest
    }

    fn should_apply(&self, ctx: &RefinementContext, tenant: &TenantConfig) -> bool {
        // Dynamic flag check (not a cached FEATURE_FLAG), exactly as the
        // original's `_should_apply` does it.
        tenant.is_feature_enabled("separate_style_modifiers") && self.style_intents.contains(&ctx.intent)
    }

    fn do_refine(
        &self,
        _message: &str,
        _working: &RefinementResult,
        ctx: &mut RefinementContext,
    ) -> Result<RefinementResult> {
        let original_intent = ctx.intent.clone();
        let mut semantic_intent = self.infer_semantic_intent(ctx);

        // Safety: inference must never return another style intent.
        if self.style_intents.contains(&semantic_intent) {
            tracing::warn!(
                inferred = %semantic_intent,
                original = %original_intent,
                "style inference returned a style intent, falling back to unclear"
            );
            semantic_intent = "unclear".to_string();
        }

        let style_modifier = self.map_modifier(&original_intent);
        let new_confidence = if ctx.confidence > 0.5 { ctx.confidence } else { 0.75 };

        let metadata = Metadata::new()
            .with("style_modifiers", json!([style_modifier]))
            .with("style_separation_applied", json!(true))
            .with("original_intent", json!(original_intent))
            .with("skip_secondary_detection", json!([original_intent.clone()]));

        Ok(RefinementResult::refined(
            self.name(),
            semantic_intent,
            new_confidence,
            original_intent,
            "style_intent_separated",
            metadata,
        ))
    }
}
