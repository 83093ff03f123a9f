//! [`ConfidenceCalibrationLayer`]: corrects systematic LLM overconfidence by
//! combining an entropy estimate over alternatives, a gap penalty between the
//! top two candidates, and a small set of heuristic penalties.
//!
//! Ground-truthed against
//! `original_source/src/classifier/confidence_calibration.py`'s three-strategy
//! design (`EntropyCalibrationStrategy`, `GapCalibrationStrategy`,
//! `HeuristicCalibrationStrategy`) described in its module docstring; the
//! original's strategy bodies were not retrieved intact, so the combination
//! formula below is this crate's own faithful-to-docstring reconstruction,
//! recorded as an Open Question resolution in `DESIGN.md`.

use crate::config::TenantConfig;
use crate::error::Result;

use super::{Alternative, LayerPriority, RefinementContext, RefinementLayer, RefinementResult};

/// Below this many alternatives, entropy/gap calibration has nothing to work
/// with and only the heuristic pass applies.
const MIN_ALTERNATIVES_FOR_ENTROPY: usize = 2;

/// Intents the original calls out as habitually overconfident even alone.
const OVERCONFIDENT_INTENTS: [&str; 2] = ["unclear", "info_provided"];

fn shannon_entropy(probabilities: &[f64]) -> f64 {
    probabilities
        .iter()
        .filter(|p| **p > 0.0)
        .map(|p| -p * p.log2())
        .sum()
}

fn normalize(values: &[f64]) -> Vec<f64> {
    let sum: f64 = values.iter().sum();
    if sum <= 0.0 {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| v / sum).collect()
}

/// Penalizes overconfident classifications using entropy over the
/// alternatives distribution, the confidence gap between the top two
/// candidates, and a small heuristic table, never pushing confidence
/// negative.
pub struct ConfidenceCalibrationLayer;

impl ConfidenceCalibrationLayer {
    /// Construct the layer.
    pub fn new() -> Self {
        Self
    }

    fn entropy_penalty(&self, primary_confidence: f64, alternatives: &[Alternative]) -> f64 {
        if alternatives.len() + 1 < MIN_ALTERNATIVES_FOR_ENTROPY {
            return 0.0;
        }
        let mut raw: Vec<f64> = vec![primary_confidence];
        raw.extend(alternatives.iter().map(|a| a.confidence));
        let probs = normalize(&raw);
        let max_entropy = (probs.len() as f64).log2();
        if max_entropy <= 0.0 {
            return 0.0;
        }
        let entropy = shannon_entropy(&probs) / max_entropy;
        // High relative entropy (distribution close to uniform) means the
        // classifier was really guessing; scale the penalty accordingly.
        entropy * 0.15
    }

    fn gap_penalty(&self, primary_confidence: f64, alternatives: &[Alternative]) -> f64 {
        let Some(runner_up) = alternatives.iter().map(|a| a.confidence).fold(None, |acc: Option<f64>, c| {
            Some(acc.map_or(c, |a| a.max(c)))
        }) else {
            return 0.0;
        };
        let gap = (primary_confidence - runner_up).max(0.0);
        // A close runner-up (small gap) means the top pick wasn't clearly
        // ahead; penalize inversely to the gap.
        (0.2 - gap).max(0.0) * 0.5
    }

    fn heuristic_penalty(&self, ctx: &RefinementContext) -> f64 {
        if OVERCONFIDENT_INTENTS.contains(&ctx.intent.as_str()) && ctx.confidence > 0.9 {
            0.1
        } else {
            0.0
        }
    }
}

impl Default for ConfidenceCalibrationLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl RefinementLayer for ConfidenceCalibrationLayer {
    fn name(&self) -> &str {
        "confidence_calibration"
    }

    fn priority(&self) -> LayerPriority {
        LayerPriority::Critical
    }

    fn should_apply(&self, ctx: &RefinementContext, _tenant: &TenantConfig) -> bool {
        ctx.confidence > 0.0
    }

    fn do_refine(
        &self,
        _message: &str,
        working: &RefinementResult,
        ctx: &mut RefinementContext,
    ) -> Result<RefinementResult> {
        let penalty = self.entropy_penalty(working.confidence, &ctx.alternatives)
            + self.gap_penalty(working.confidence, &ctx.alternatives)
            + self.heuristic_penalty(ctx);

        if penalty <= 0.0 {
            return Ok(RefinementResult::pass_through(self.name(), working.intent.clone(), working.confidence));
        }

        let calibrated = (working.confidence - penalty).max(0.0);
        Ok(RefinementResult::refined(
            self.name(),
            working.intent.clone(),
            calibrated,
            working.intent.clone(),
            "confidence_calibrated",
            crate::proposal::Metadata::new().with("calibration_penalty", serde_json::json!(penalty)),
        ))
    }
}
