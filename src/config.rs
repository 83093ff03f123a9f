//! Serde-deserializable configuration schema: tenant configuration and the
//! declarative priority-assigner definitions of `spec.md` §4.4.
//!
//! This module owns the *shape* of flow/tenant/priority configuration so a host
//! can load it with `serde_yml`/`serde_json`; it deliberately does not own file
//! discovery, environment overlay, or hot-reloading; those remain host concerns
//! per `spec.md` §1's non-goals.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-persona objection limits, overridable per tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaObjectionLimits {
    /// Maximum consecutive objection-intent turns before the limit fires.
    pub consecutive: u32,
    /// Maximum total objection-intent turns over the dialog's lifetime.
    pub total: u32,
}

impl Default for PersonaObjectionLimits {
    fn default() -> Self {
        Self {
            consecutive: 3,
            total: 5,
        }
    }
}

/// Per-tenant configuration: identity, feature flags, and persona limit overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Stable tenant identifier.
    pub tenant_id: String,
    /// Display name for the bot persona.
    pub bot_name: String,
    /// Requested conversational tone.
    pub tone: String,
    /// Feature-flag overrides for this tenant.
    #[serde(default)]
    pub features: HashMap<String, bool>,
    /// Per-persona objection-limit overrides.
    #[serde(default)]
    pub persona_limits_override: Option<HashMap<String, PersonaObjectionLimits>>,
}

impl TenantConfig {
    /// A reasonable default tenant for single-tenant deployments and tests.
    pub fn default_tenant() -> Self {
        Self {
            tenant_id: "default".to_string(),
            bot_name: "Assistant".to_string(),
            tone: "friendly".to_string(),
            features: HashMap::new(),
            persona_limits_override: None,
        }
    }

    /// Whether `feature` is enabled for this tenant.
    pub fn is_feature_enabled(&self, feature: &str) -> bool {
        self.features.get(feature).copied().unwrap_or(false)
    }

    /// Resolve objection limits for `persona`: tenant override, else the default
    /// table entry for `persona`, else the global default.
    pub fn objection_limits(
        &self,
        persona: &str,
        defaults: &HashMap<String, PersonaObjectionLimits>,
    ) -> PersonaObjectionLimits {
        if let Some(overrides) = &self.persona_limits_override {
            if let Some(limits) = overrides.get(persona) {
                return *limits;
            }
        }
        defaults
            .get(persona)
            .copied()
            .unwrap_or_default()
    }
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self::default_tenant()
    }
}

/// `trigger` gate of a [`PriorityDefinition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Matches only `DataCollector`'s `data_complete` transition proposals.
    DataComplete,
    /// Matches only the resolver's `any`-fallback transition.
    Any,
}

/// `handler` gate of a [`PriorityDefinition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Handler {
    /// Matches `PhaseExhausted`/progress-tracking proposals.
    PhaseProgressHandler,
    /// Matches `StallGuard`/go-back proposals.
    CircularFlowHandler,
}

/// `source` gate of a [`PriorityDefinition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceGate {
    /// Matches proposals whose `reason_code` starts with `rule_`.
    Rules,
}

/// `else` rescue clause of a [`PriorityDefinition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElseClause {
    /// Rescue transition proposals whose `reason_code` starts with
    /// `intent_transition_`, when `condition` fails to hold, but never inside an
    /// autonomous state (`StateConfig::autonomous`).
    UseTransitions,
}

/// One declarative priority-assigner row (`spec.md` §4.4): a tie-break rank
/// applied to proposals whose gates all hold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityDefinition {
    /// Definition name, recorded into `metadata["priority_name"]` when it matches.
    pub name: String,
    /// The numeric `priority_rank` written into a matching proposal's metadata.
    pub priority: i64,
    /// Matches only when the current intent is in this set.
    #[serde(default)]
    pub intents: Option<Vec<String>>,
    /// Matches only when the current intent belongs to this category.
    #[serde(default)]
    pub intent_category: Option<String>,
    /// Name of a condition in the condition registry, evaluated against a
    /// snapshot-derived evaluator context.
    #[serde(default)]
    pub condition: Option<String>,
    /// Feature flag gating this definition (checked tenant-then-global).
    #[serde(default)]
    pub feature_flag: Option<String>,
    /// Proposal-shape gate.
    #[serde(default)]
    pub trigger: Option<Trigger>,
    /// Matches only `Action` proposals with this `value`.
    #[serde(default)]
    pub action: Option<String>,
    /// Named handler gate.
    #[serde(default)]
    pub handler: Option<Handler>,
    /// Matches `Transition` proposals (optionally narrowed further by
    /// `intents`/`intent_category`/`trigger`).
    #[serde(default)]
    pub use_transitions: bool,
    /// Matches `Action` proposals only.
    #[serde(default)]
    pub use_resolver: bool,
    /// Reason-code-prefix gate.
    #[serde(default)]
    pub source: Option<SourceGate>,
    /// Rescue clause applied when `condition` is present but evaluates false.
    #[serde(default)]
    pub else_clause: Option<ElseClause>,
}
