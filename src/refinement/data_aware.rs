//! [`DataAwareRefinementLayer`]: promotes `unclear` to `info_provided` when
//! the extractor already found meaningful business data in the same message.
//!
//! Ground-truthed against `original_source/src/classifier/data_aware_refinement.py`.
//! A defense-in-depth layer against stalls: a message the classifier couldn't
//! place should not block progress if it plainly contains usable data.

use std::collections::HashSet;
use std::sync::OnceLock;

use serde_json::Value;

use crate::config::TenantConfig;
use crate::error::Result;

use super::{LayerPriority, RefinementContext, RefinementLayer, RefinementResult};

/// Extracted-data fields that indicate real business information, as opposed
/// to incidental bookkeeping fields (`option_index`, `value_acknowledged`, ...)
/// that don't by themselves imply the user just answered a question.
fn meaningful_fields() -> &'static HashSet<&'static str> {
    static FIELDS: OnceLock<HashSet<&'static str>> = OnceLock::new();
    FIELDS.get_or_init(|| {
        [
            "company_size",
            "pain_point",
            "pain_category",
            "role",
            "timeline",
            "contact_info",
            "budget_range",
            "current_tools",
            "business_type",
            "users_count",
            "pain_impact",
            "financial_impact",
            "desired_outcome",
            "urgency",
            "client_name",
        ]
        .into_iter()
        .collect()
    })
}

/// Promotes `unclear` to `info_provided` when extracted data contains at
/// least one non-empty meaningful field.
pub struct DataAwareRefinementLayer;

impl DataAwareRefinementLayer {
    /// Construct the layer.
    pub fn new() -> Self {
        Self
    }

    fn meaningful(&self, ctx: &RefinementContext) -> Vec<String> {
        let mut keys: Vec<String> = ctx
            .extracted_data
            .iter()
            .filter(|(k, v)| meaningful_fields().contains(k.as_str()) && !is_empty(v))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}

fn is_empty(value: &Value) -> bool {
    matches!(value, Value::Null) || matches!(value, Value::String(s) if s.is_empty())
}

impl Default for DataAwareRefinementLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl RefinementLayer for DataAwareRefinementLayer {
    fn name(&self) -> &str {
        "data_aware"
    }

    fn priority(&self) -> LayerPriority {
        LayerPriority::Normal
    }

    fn feature_flag(&self) -> Option<&str> {
        Some("data_aware_refinement")
    }

    fn should_apply(&self, ctx: &RefinementContext, _tenant: &TenantConfig) -> bool {
        ctx.intent == "unclear" && !ctx.extracted_data.is_empty()
    }

    fn do_refine(
        &self,
        _message: &str,
        _working: &RefinementResult,
        ctx: &mut RefinementContext,
    ) -> Result<RefinementResult> {
        let meaningful = self.meaningful(ctx);
        if meaningful.is_empty() {
            return Ok(RefinementResult::pass_through(self.name(), ctx.intent.clone(), ctx.confidence));
        }

        Ok(RefinementResult::refined(
            self.name(),
            "info_provided",
            0.75,
            ctx.intent.clone(),
            format!("data_aware: extracted {:?}", meaningful),
            crate::proposal::Metadata::new(),
        ))
    }
}
