//! [`ComparisonRefinementLayer`]: refines a comparison-shaped intent to
//! `objection_competitor` when the message carries a competitive-objection
//! signal (e.g. "the competitor is cheaper").
//!
//! Ground-truthed against `original_source/src/classifier/comparison_refinement.py`.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::json;

use crate::config::TenantConfig;
use crate::error::Result;
use crate::proposal::Metadata;

use super::{LayerPriority, RefinementContext, RefinementLayer, RefinementResult};

/// Intents this layer is willing to re-classify.
pub const COMPARISON_INTENTS: [&str; 4] = [
    "comparison",
    "question_product_comparison",
    "question_tariff_comparison",
    "question_snr_comparison",
];

fn competitor_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)(cheaper|costs less|lower price|more affordable)",
            r"(?i)(competitor|alternative)\w*\s+(better|cheaper|faster|easier)",
            r"(?i)(they have|others have)\s+(better|cheaper|it)",
            r"(?i)(why (are )?you|how are you)\s+(better|different)",
            r"(?i)(salesforce|hubspot|pipedrive|zoho|bitrix)",
            r"(?i)(switch(ing)?|moving)\s+(from|away from)\s+\w+\s+(to|into)",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static competitor pattern is valid"))
        .collect()
    })
}

/// Promotes a comparison intent to `objection_competitor` when the message
/// text matches a competitive-objection pattern; feature-flagged off by
/// default, matching the original.
pub struct ComparisonRefinementLayer;

impl ComparisonRefinementLayer {
    /// Construct the layer.
    pub fn new() -> Self {
        Self
    }
}

impl Default for ComparisonRefinementLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl RefinementLayer for ComparisonRefinementLayer {
    fn name(&self) -> &str {
        "comparison"
    }

    fn priority(&self) -> LayerPriority {
        LayerPriority::Normal
    }

    fn feature_flag(&self) -> Option<&str> {
        Some("comparison_refinement")
    }

    fn should_apply(&self, ctx: &RefinementContext, _tenant: &TenantConfig) -> bool {
        COMPARISON_INTENTS.contains(&ctx.intent.as_str())
    }

    fn do_refine(
        &self,
        message: &str,
        _working: &RefinementResult,
        ctx: &mut RefinementContext,
    ) -> Result<RefinementResult> {
        let message_lower = message.to_lowercase();
        for pattern in competitor_patterns() {
            if pattern.is_match(&message_lower) {
                tracing::info!(
                    from = %ctx.intent,
                    to = "objection_competitor",
                    pattern = pattern.as_str(),
                    "comparison refined to competitor objection"
                );
                return Ok(RefinementResult::refined(
                    self.name(),
                    "objection_competitor",
                    ctx.confidence.max(0.75),
                    ctx.intent.clone(),
                    "competitor_objection_signal",
                    Metadata::new()
                        .with("matched_pattern", json!(pattern.as_str()))
                        .with("source_intent", json!(ctx.intent.clone())),
                ));
            }
        }
        Ok(RefinementResult::pass_through(self.name(), ctx.intent.clone(), ctx.confidence))
    }
}
