//! [`SecondaryIntentDetectionLayer`]: catches a question lost inside a
//! composite message without ever touching the primary intent.
//!
//! Ground-truthed against
//! `original_source/src/classifier/secondary_intent_detection.py`: the
//! "lost question" bug, where a message like "100 people. How much does it cost?"
//! classifies as `info_provided` and the price question disappears unless
//! something else notices it.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::json;

use crate::config::TenantConfig;
use crate::error::Result;
use crate::proposal::Metadata;

use super::{LayerPriority, RefinementContext, RefinementLayer, RefinementResult};

/// One secondary-intent pattern: a target intent plus the regexes that imply
/// its presence, and the confidence attached when one matches.
pub struct SecondaryIntentPattern {
    /// Target intent name (e.g. `price_question`).
    pub intent: &'static str,
    /// Regex patterns; any match is sufficient.
    pub patterns: &'static [&'static str],
    /// Confidence recorded for this detection.
    pub confidence: f64,
}

fn default_patterns() -> &'static [SecondaryIntentPattern] {
    static PATTERNS: OnceLock<Vec<SecondaryIntentPattern>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            vec![
                SecondaryIntentPattern {
                    intent: "price_question",
                    patterns: &[r"(?i)how much (does it|would it|will it)? ?cost", r"(?i)\bpric(e|ing)\b", r"\$|€|£"],
                    confidence: 0.9,
                },
                SecondaryIntentPattern {
                    intent: "fact_question",
                    patterns: &[r"(?i)^(what|how|when|where|why|can you|does it)\b.*\?$"],
                    confidence: 0.7,
                },
            ]
        })
        .as_slice()
}

fn compiled(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static secondary-intent pattern is valid")
}

/// Non-destructively detects secondary intents (most commonly: a question
/// buried in an otherwise data-bearing message) and records them in metadata
/// without ever overwriting the primary intent.
pub struct SecondaryIntentDetectionLayer;

impl SecondaryIntentDetectionLayer {
    /// Construct the layer.
    pub fn new() -> Self {
        Self
    }

    fn detect(&self, message: &str, primary_intent: &str) -> Vec<(&'static str, f64)> {
        let mut found = Vec::new();
        for candidate in default_patterns() {
            if candidate.intent == primary_intent {
                continue;
            }
            if candidate.patterns.iter().any(|p| compiled(p).is_match(message)) {
                found.push((candidate.intent, candidate.confidence));
            }
        }
        found
    }
}

impl Default for SecondaryIntentDetectionLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl RefinementLayer for SecondaryIntentDetectionLayer {
    fn name(&self) -> &str {
        "secondary_intent_detection"
    }

    fn priority(&self) -> LayerPriority {
        LayerPriority::High
    }

    fn should_apply(&self, ctx: &RefinementContext, _tenant: &TenantConfig) -> bool {
        !ctx.secondary_detection_skipped_for(&ctx.intent)
    }

    fn do_refine(
        &self,
        message: &str,
        working: &RefinementResult,
        _ctx: &mut RefinementContext,
    ) -> Result<RefinementResult> {
        let detected = self.detect(message, &working.intent);
        if detected.is_empty() {
            return Ok(RefinementResult::pass_through(self.name(), working.intent.clone(), working.confidence));
        }

        let secondary_intents: Vec<&str> = detected.iter().map(|(i, _)| *i).collect();
        let confidences: serde_json::Map<String, serde_json::Value> = detected
            .iter()
            .map(|(i, c)| (i.to_string(), json!(c)))
            .collect();

        let mut result = RefinementResult::pass_through(self.name(), working.intent.clone(), working.confidence);
        result.secondary_signals = Metadata::new()
            .with("secondary_intents", json!(secondary_intents))
            .with("secondary_intent_confidence", serde_json::Value::Object(confidences));
        Ok(result)
    }
}
