//! [`RefinementPipeline`] (C14): the priority-ordered chain of layers that
//! post-processes a raw classification into the refined intent/confidence/
//! metadata triple the blackboard's knowledge sources consume.
//!
//! Ground-truthed against `original_source/src/classifier/refinement_pipeline.py`
//! (the abstract `BaseRefinementLayer`/`RefinementContext`/`RefinementResult`
//! shapes and the registry pattern its docstring describes) plus one module
//! per concrete layer file under `original_source/src/classifier/`.

use std::collections::HashMap;
use std::sync::OnceLock;

use parking_lot::Mutex;
use serde_json::Value;

use crate::config::TenantConfig;
use crate::error::Result;
use crate::proposal::Metadata;

pub mod comparison;
pub mod confidence_calibration;
pub mod data_aware;
pub mod disambiguation_resolution;
pub mod secondary_intent;
pub mod style_modifier;

/// A classifier alternative, as surfaced in the raw LLM classification payload
/// (`result["alternatives"]` in the original). Consulted by
/// [`style_modifier::StyleModifierDetectionLayer`]'s second inference strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct Alternative {
    /// Candidate intent name.
    pub intent: String,
    /// Classifier confidence for this alternative.
    pub confidence: f64,
}

/// Execution priority of a [`RefinementLayer`]. Higher runs earlier; mirrors
/// the original's `LayerPriority` IntEnum exactly, including the numeric gap
/// between `High` and `Normal` the original leaves for host-defined layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LayerPriority {
    /// Runs before everything else. `StyleModifierDetection`'s slot: semantic
    /// intent must be resolved before any other layer sees it.
    Highest,
    /// `ConfidenceCalibration`/`DisambiguationResolution`'s slot.
    Critical,
    /// `SecondaryIntentDetection`/`OptionSelectionRefinement`'s slot.
    High,
    /// `DataAwareRefinement`/`ComparisonRefinement`'s slot.
    Normal,
    /// Reserved for host-defined cosmetic layers; no built-in uses it.
    Low,
}

impl LayerPriority {
    /// Numeric value, matching the original IntEnum's literal values exactly
    /// (110/100/75/50/25) so a host's own layers can be interleaved by number.
    pub fn value(self) -> u32 {
        match self {
            LayerPriority::Highest => 110,
            LayerPriority::Critical => 100,
            LayerPriority::High => 75,
            LayerPriority::Normal => 50,
            LayerPriority::Low => 25,
        }
    }
}

impl std::fmt::Display for LayerPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// Per-message, mutable metadata bag threaded through the whole chain
/// (`spec.md` §3's `RefinementContext`). Each layer reads the accumulated
/// state of prior layers and, on `Refined`, the pipeline writes its
/// `intent`/`confidence` back here before the next layer runs.
#[derive(Debug, Clone)]
pub struct RefinementContext {
    /// The raw user message this turn.
    pub message: String,
    /// Working intent, updated in place by each `Refined` layer.
    pub intent: String,
    /// Working confidence, updated in place by each `Refined` layer.
    pub confidence: f64,
    /// Current dialog state, if known.
    pub state: Option<String>,
    /// Current phase, if known.
    pub phase: Option<String>,
    /// Action committed on the previous turn.
    pub last_action: Option<String>,
    /// The bot's previous message, for layers that compare against it.
    pub last_bot_message: Option<String>,
    /// Data fields the extractor pulled from this message.
    pub extracted_data: HashMap<String, Value>,
    /// Whether the dialog is waiting on a disambiguation answer.
    pub in_disambiguation: bool,
    /// Options offered to the user, when `in_disambiguation`.
    pub disambiguation_options: Vec<String>,
    /// Data type the dialog is currently expecting, if any.
    pub expects_data_type: Option<String>,
    /// Classifier alternatives for this message, if supplied.
    pub alternatives: Vec<Alternative>,
    /// Free-form side-channel; layers both read and write keys here
    /// (`skip_secondary_detection`, `exit_disambiguation`, `style_modifiers`, ...).
    pub metadata: Metadata,
}

impl RefinementContext {
    /// Construct a context for `message` classified as `(intent, confidence)`,
    /// with every optional field empty/default.
    pub fn new(message: impl Into<String>, intent: impl Into<String>, confidence: f64) -> Self {
        Self {
            message: message.into(),
            intent: intent.into(),
            confidence,
            state: None,
            phase: None,
            last_action: None,
            last_bot_message: None,
            extracted_data: HashMap::new(),
            in_disambiguation: false,
            disambiguation_options: Vec::new(),
            expects_data_type: None,
            alternatives: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    /// Whether `intent` appears in the `skip_secondary_detection` list a prior
    /// layer (typically `StyleModifierDetection`) wrote into metadata.
    pub fn secondary_detection_skipped_for(&self, intent: &str) -> bool {
        self.metadata
            .inner()
            .get("skip_secondary_detection")
            .and_then(Value::as_array)
            .map(|list| list.iter().any(|v| v.as_str() == Some(intent)))
            .unwrap_or(false)
    }
}

/// Tri-state outcome of a single layer's `_do_refine`, matching `spec.md` §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefinementDecision {
    /// The layer changed the working intent and/or confidence.
    Refined,
    /// The layer ran but left the working intent/confidence unchanged.
    PassThrough,
    /// The layer did not run at all (gated out before `_do_refine`).
    Skipped,
}

/// What one layer produced this turn (`spec.md` §3's `RefinementResult`).
///
/// Invariant (testable property #9): a `PassThrough`/`Skipped` result's
/// `intent`/`confidence` are bit-for-bit equal to the input it was given.
#[derive(Debug, Clone)]
pub struct RefinementResult {
    /// What this layer did.
    pub decision: RefinementDecision,
    /// Intent after this layer (unchanged unless `decision == Refined`).
    pub intent: String,
    /// Confidence after this layer (unchanged unless `decision == Refined`).
    pub confidence: f64,
    /// Intent as it stood before this layer ran, when `decision == Refined`.
    pub original_intent: Option<String>,
    /// Short stable reason this layer refined the classification.
    pub refinement_reason: Option<String>,
    /// Non-destructive secondary signals this layer detected (composite
    /// messages, competing intents) without touching the primary intent.
    pub secondary_signals: Metadata,
    /// Layer-specific metadata merged into [`RefinementContext::metadata`].
    pub metadata: Metadata,
    /// Name of the layer that produced this result.
    pub layer_name: String,
}

impl RefinementResult {
    /// A `PassThrough` result carrying the untouched working intent/confidence.
    pub fn pass_through(layer_name: impl Into<String>, intent: impl Into<String>, confidence: f64) -> Self {
        Self {
            decision: RefinementDecision::PassThrough,
            intent: intent.into(),
            confidence,
            original_intent: None,
            refinement_reason: None,
            secondary_signals: Metadata::new(),
            metadata: Metadata::new(),
            layer_name: layer_name.into(),
        }
    }

    /// A `Skipped` result: the layer was gated out before `_do_refine` ran.
    pub fn skipped(layer_name: impl Into<String>, intent: impl Into<String>, confidence: f64) -> Self {
        Self {
            decision: RefinementDecision::Skipped,
            intent: intent.into(),
            confidence,
            original_intent: None,
            refinement_reason: None,
            secondary_signals: Metadata::new(),
            metadata: Metadata::new(),
            layer_name: layer_name.into(),
        }
    }

    /// A `Refined` result changing the working intent/confidence.
    #[allow(clippy::too_many_arguments)]
    pub fn refined(
        layer_name: impl Into<String>,
        new_intent: impl Into<String>,
        new_confidence: f64,
        original_intent: impl Into<String>,
        reason: impl Into<String>,
        metadata: Metadata,
    ) -> Self {
        Self {
            decision: RefinementDecision::Refined,
            intent: new_intent.into(),
            confidence: new_confidence.max(0.0),
            original_intent: Some(original_intent.into()),
            refinement_reason: Some(reason.into()),
            secondary_signals: Metadata::new(),
            metadata,
            layer_name: layer_name.into(),
        }
    }

    /// Attach non-destructive secondary signals, builder-style.
    pub fn with_secondary_signals(mut self, signals: Metadata) -> Self {
        self.secondary_signals = signals;
        self
    }
}

/// One stage of the classification post-processing chain.
///
/// Mirrors the original's `BaseRefinementLayer`: a layer declares its own
/// name and [`LayerPriority`], optionally a statically-checked feature flag,
/// and implements `should_apply`/`do_refine`. The pipeline never calls
/// `do_refine` unless `should_apply` returned `true` for the gates that
/// apply (feature flag first, then the layer's own interest-set check).
pub trait RefinementLayer {
    /// Stable layer name, reported on every [`RefinementResult`].
    fn name(&self) -> &str;
    /// Fixed execution priority.
    fn priority(&self) -> LayerPriority;
    /// A feature flag checked once, statically, before `should_apply` runs.
    /// `None` means either "always on" or "checked dynamically inside
    /// `should_apply`" (`StyleModifierDetection` does the latter).
    fn feature_flag(&self) -> Option<&str> {
        None
    }
    /// Whether this layer is interested in the current context (interest-set
    /// membership, dynamic flag checks, upstream `skip_*` markers). Called
    /// only after the static feature-flag gate, if any, already passed.
    fn should_apply(&self, ctx: &RefinementContext, tenant: &TenantConfig) -> bool;
    /// Produce this layer's [`RefinementResult`]. Only called when
    /// `should_apply` returned `true`. Errors are caught by the pipeline and
    /// converted to a `PassThrough` of the pre-layer state, never propagated.
    fn do_refine(
        &self,
        message: &str,
        working: &RefinementResult,
        ctx: &mut RefinementContext,
    ) -> Result<RefinementResult>;
}

/// Priority-ordered chain of [`RefinementLayer`]s driving one message's
/// refinement from a raw classification to the triple the blackboard consumes.
pub struct RefinementPipeline {
    layers: Vec<Box<dyn RefinementLayer + Send + Sync>>,
}

impl RefinementPipeline {
    /// Build a pipeline from `layers`, sorted by [`LayerPriority`] descending
    /// (ties broken by insertion order, matching the resolver's stable-sort
    /// convention elsewhere in this crate).
    pub fn new(layers: Vec<Box<dyn RefinementLayer + Send + Sync>>) -> Self {
        let mut indexed: Vec<(usize, Box<dyn RefinementLayer + Send + Sync>)> =
            layers.into_iter().enumerate().collect();
        indexed.sort_by(|a, b| b.1.priority().value().cmp(&a.1.priority().value()).then(a.0.cmp(&b.0)));
        Self {
            layers: indexed.into_iter().map(|(_, l)| l).collect(),
        }
    }

    /// Layer names in execution order, for diagnostics/tests.
    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.name()).collect()
    }

    /// Run `message`'s raw `(intent, confidence)` classification through every
    /// layer in priority order, threading `ctx` between them.
    ///
    /// `ctx.message`/`ctx.intent`/`ctx.confidence` are overwritten with the
    /// supplied raw classification before the first layer runs.
    pub fn refine(
        &self,
        message: &str,
        raw_intent: &str,
        raw_confidence: f64,
        ctx: &mut RefinementContext,
        tenant: &TenantConfig,
    ) -> RefinementResult {
        ctx.message = message.to_string();
        ctx.intent = raw_intent.to_string();
        ctx.confidence = raw_confidence;

        let mut working = RefinementResult::pass_through("raw_classification", raw_intent, raw_confidence);

        for layer in &self.layers {
            if let Some(flag) = layer.feature_flag() {
                if !tenant.is_feature_enabled(flag) {
                    continue;
                }
            }
            if !layer.should_apply(ctx, tenant) {
                continue;
            }

            let pre_intent = ctx.intent.clone();
            let pre_confidence = ctx.confidence;
            match layer.do_refine(message, &working, ctx) {
                Ok(mut result) => {
                    if result.decision == RefinementDecision::Refined {
                        if is_style_intent(&result.intent, ctx) {
                            tracing::warn!(
                                layer = layer.name(),
                                inferred = %result.intent,
                                "refinement layer attempted to output a style intent, forcing unclear"
                            );
                            result.intent = "unclear".to_string();
                        }
                        ctx.intent = result.intent.clone();
                        ctx.confidence = result.confidence.max(0.0);
                        for (k, v) in result.metadata.inner().clone() {
                            ctx.metadata.0.insert(k, v);
                        }
                    } else {
                        // PassThrough must preserve the pre-layer state bit-for-bit.
                        result.intent = pre_intent;
                        result.confidence = pre_confidence;
                    }
                    working = result;
                }
                Err(error) => {
                    tracing::warn!(layer = layer.name(), %error, "refinement layer failed, passing through");
                    working = RefinementResult::pass_through(layer.name(), &pre_intent, pre_confidence);
                }
            }
        }

        working
    }
}

fn is_style_intent(intent: &str, ctx: &RefinementContext) -> bool {
    style_modifier::DEFAULT_STYLE_INTENTS.contains(&intent)
        || ctx
            .metadata
            .inner()
            .get("style_intents")
            .and_then(Value::as_array)
            .map(|list| list.iter().any(|v| v.as_str() == Some(intent)))
            .unwrap_or(false)
}

#[derive(Default)]
struct RegistryState {
    layers: HashMap<String, LayerPriority>,
    frozen: bool,
}

fn state() -> &'static Mutex<RegistryState> {
    static STATE: OnceLock<Mutex<RegistryState>> = OnceLock::new();
    STATE.get_or_init(|| Mutex::new(RegistryState::default()))
}

/// Process-wide registry of refinement-layer names and their declared
/// priorities, mirroring `refinement_pipeline.py`'s `@register_refinement_layer`
/// decorator. Unlike [`crate::registry::SourceRegistry`] this registry does not
/// itself instantiate layers (layers here are stateless value types a host
/// constructs directly and hands to [`RefinementPipeline::new`]); it exists so
/// a host can ask "what layers, at what priority, does this build ship" without
/// constructing a pipeline first.
pub struct RefinementLayerRegistry;

impl RefinementLayerRegistry {
    /// Record that `name` runs at `priority`. Rejects a name collision once
    /// the registry is frozen; a new name is always accepted.
    pub fn register(name: impl Into<String>, priority: LayerPriority) -> Result<()> {
        let name = name.into();
        let mut guard = state().lock();
        if guard.frozen && guard.layers.contains_key(&name) {
            return Err(crate::error::Error::RegistryFrozen);
        }
        guard.layers.insert(name, priority);
        Ok(())
    }

    /// Registered layer names, sorted by priority descending then name.
    pub fn list_registered() -> Vec<(String, LayerPriority)> {
        let guard = state().lock();
        let mut entries: Vec<(String, LayerPriority)> =
            guard.layers.iter().map(|(k, v)| (k.clone(), *v)).collect();
        entries.sort_by(|a, b| b.1.value().cmp(&a.1.value()).then(a.0.cmp(&b.0)));
        entries
    }

    /// Freeze the registry against further name collisions.
    pub fn freeze() {
        state().lock().frozen = true;
    }

    /// Clear every registration and unfreeze. Test isolation only.
    pub fn reset() {
        let mut guard = state().lock();
        guard.layers.clear();
        guard.frozen = false;
    }
}

/// Construct this crate's six built-in layers in their documented priority
/// order and register their names with [`RefinementLayerRegistry`].
///
/// `spec.md` §9 leaves the relative order of the two `Critical` layers
/// (`DisambiguationResolution` vs `ConfidenceCalibration`) an open question;
/// `DESIGN.md` resolves it by registering `DisambiguationResolution` first, so
/// an in-disambiguation answer is resolved before calibration ever sees it.
pub fn register_builtin_layers() -> Result<Vec<Box<dyn RefinementLayer + Send + Sync>>> {
    let layers: Vec<Box<dyn RefinementLayer + Send + Sync>> = vec![
        Box::new(style_modifier::StyleModifierDetectionLayer::new()),
        Box::new(disambiguation_resolution::DisambiguationResolutionLayer::new()),
        Box::new(confidence_calibration::ConfidenceCalibrationLayer::new()),
        Box::new(secondary_intent::SecondaryIntentDetectionLayer::new()),
        Box::new(data_aware::DataAwareRefinementLayer::new()),
        Box::new(comparison::ComparisonRefinementLayer::new()),
    ];
    for layer in &layers {
        RefinementLayerRegistry::register(layer.name(), layer.priority())?;
    }
    Ok(layers)
}
