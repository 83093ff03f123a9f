//! [`DisambiguationResolutionLayer`]: resolves a disambiguation answer inside
//! the refinement chain instead of a parallel ad-hoc pipeline.
//!
//! Ground-truthed against
//! `original_source/src/classifier/disambiguation_resolution_layer.py` (the
//! three resolution paths) and `original_source/src/disambiguation_ui.py`'s
//! `DisambiguationUI.parse_answer` (numeric/ordinal option matching plus the
//! "custom input" marker).

use std::collections::HashSet;

use serde_json::json;

use crate::config::TenantConfig;
use crate::error::Result;
use crate::proposal::Metadata;

use super::{LayerPriority, RefinementContext, RefinementLayer, RefinementResult};

/// Sentinel returned by [`parse_answer`] when the user typed free text rather
/// than selecting one of the offered options.
pub const CUSTOM_INPUT_MARKER: &str = "_custom_input";

/// Intents that interrupt disambiguation outright: the classifier is
/// confident enough about something that matters more than finishing the
/// clarification flow.
fn critical_intents() -> &'static HashSet<&'static str> {
    static INTENTS: std::sync::OnceLock<HashSet<&'static str>> = std::sync::OnceLock::new();
    INTENTS.get_or_init(|| ["contact_provided", "rejection", "demo_request"].into_iter().collect())
}

fn ordinal_index(word: &str) -> Option<usize> {
    match word {
        "1" | "first" | "one" => Some(0),
        "2" | "second" | "two" => Some(1),
        "3" | "third" | "three" => Some(2),
        "4" | "fourth" | "four" => Some(3),
        _ => None,
    }
}

/// Match a free-text `answer` against `options` (by position) exactly as
/// `DisambiguationUI.parse_answer` does: a numeric/ordinal answer selects by
/// index, one past the last option selects [`CUSTOM_INPUT_MARKER`], and
/// anything else that fails to match returns `None`.
pub fn parse_answer(answer: &str, options: &[String]) -> Option<String> {
    let trimmed = answer.trim();
    if trimmed.is_empty() || options.is_empty() {
        return None;
    }
    let lower = trimmed.to_lowercase();
    let custom_index = options.len();

    if let Some(index) = ordinal_index(&lower) {
        if index == custom_index {
            return Some(CUSTOM_INPUT_MARKER.to_string());
        }
        if index < options.len() {
            return Some(options[index].clone());
        }
    }

    if lower.starts_with("other") || lower.starts_with("something else") || lower == "custom" {
        return Some(CUSTOM_INPUT_MARKER.to_string());
    }

    None
}

/// Resolves a pending disambiguation answer via three paths: a critical
/// intent overriding disambiguation outright, an offered option being
/// selected, or free text being taken as the classifier's own answer.
pub struct DisambiguationResolutionLayer;

impl DisambiguationResolutionLayer {
    /// Construct the layer.
    pub fn new() -> Self {
        Self
    }
}

impl Default for DisambiguationResolutionLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl RefinementLayer for DisambiguationResolutionLayer {
    fn name(&self) -> &str {
        "disambiguation_resolution"
    }

    fn priority(&self) -> LayerPriority {
        LayerPriority::Critical
    }

    fn feature_flag(&self) -> Option<&str> {
        Some("unified_disambiguation")
    }

    fn should_apply(&self, ctx: &RefinementContext, _tenant: &TenantConfig) -> bool {
        ctx.in_disambiguation
    }

    fn do_refine(
        &self,
        message: &str,
        working: &RefinementResult,
        ctx: &mut RefinementContext,
    ) -> Result<RefinementResult> {
        let intent = working.intent.clone();

        // Path A: a critical intent interrupts disambiguation outright.
        if critical_intents().contains(intent.as_str()) {
            ctx.metadata.0.insert("exit_disambiguation".to_string(), json!(true));
            return Ok(RefinementResult::pass_through(self.name(), intent, working.confidence));
        }

        // Path B: the user picked one of the offered options.
        if !ctx.disambiguation_options.is_empty() {
            if let Some(resolved) = parse_answer(message, &ctx.disambiguation_options) {
                if resolved != CUSTOM_INPUT_MARKER {
                    ctx.metadata.0.insert("exit_disambiguation".to_string(), json!(true));
                    ctx.metadata.0.insert("disambiguation_resolved_intent".to_string(), json!(resolved.clone()));
                    return Ok(RefinementResult::refined(
                        self.name(),
                        resolved.clone(),
                        0.9,
                        intent,
                        "disambiguation_resolved",
                        Metadata::new()
                            .with("method", json!("disambiguation_resolved"))
                            .with("selected_option", json!(resolved)),
                    ));
                }
            }
        }

        // Path C: custom input, the classifier's own intent is the answer.
        ctx.metadata.0.insert("exit_disambiguation".to_string(), json!(true));
        Ok(RefinementResult::pass_through(self.name(), intent, working.confidence))
    }
}
