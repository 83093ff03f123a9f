//! [`ObjectionGuardSource`]: enforces per-persona consecutive/total objection
//! limits, closing the dialog once exceeded.
//!
//! Ground-truthed against `original_source/src/blackboard/sources/objection_guard.py`.
//! Layer 1 of the "no infinite soft_close loop" defense described there: this
//! source also writes `_objection_limit_final = true`, which
//! `StateMachinePort::is_final` is expected to treat as an override on
//! `soft_close` regardless of that state's declared `is_final`. Layer 2 is
//! `Blackboard::begin_turn`'s `_should_skip_objection_recording` gate.

use std::collections::HashMap;

use crate::config::PersonaObjectionLimits;
use crate::error::Result;
use crate::primitives::Priority;
use crate::proposal::{Metadata, Proposal};

use super::{EnabledFlag, KnowledgeSource, TurnInputs};

/// Default per-persona limit table, ground-truthed against
/// `ObjectionGuardSource.DEFAULT_PERSONA_LIMITS`. Shares
/// [`crate::config::PersonaObjectionLimits`] with `Blackboard`'s own default
/// table (`default_persona_objection_limits`) and with
/// `TenantConfig::objection_limits`'s override lookup, so both the recording
/// gate and this source resolve the same persona's limits the same way.
pub fn default_persona_limits() -> HashMap<String, PersonaObjectionLimits> {
    [
        ("aggressive", 5, 8),
        ("price_sensitive", 4, 7),
        ("skeptical", 4, 6),
        ("busy", 2, 4),
        ("analytical", 4, 6),
        ("friendly", 4, 7),
        ("default", 3, 5),
    ]
    .into_iter()
    .map(|(persona, consecutive, total)| (persona.to_string(), PersonaObjectionLimits { consecutive, total }))
    .collect()
}

/// Intents counted as objections. Overridable; the ground truth sources this
/// set from a shared `OBJECTION_INTENTS` flow constant.
pub fn default_objection_intents() -> std::collections::HashSet<String> {
    [
        "objection_price",
        "too_expensive",
        "not_interested",
        "need_to_think",
        "competitor_comparison",
        "objection_trust",
        "objection_timing",
        "objection_features",
        "objection_think",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Tracks objection counts per persona and forces a close once the persona's
/// limit is exceeded.
pub struct ObjectionGuardSource {
    name: String,
    enabled: EnabledFlag,
    persona_limits: HashMap<String, PersonaObjectionLimits>,
    objection_intents: std::collections::HashSet<String>,
}

impl ObjectionGuardSource {
    /// Construct with default limits and intent set.
    pub fn new() -> Self {
        Self {
            name: "ObjectionGuardSource".to_string(),
            enabled: EnabledFlag::default(),
            persona_limits: default_persona_limits(),
            objection_intents: default_objection_intents(),
        }
    }

    /// Construct with caller-supplied limits and intent set.
    pub fn with_config(
        persona_limits: HashMap<String, PersonaObjectionLimits>,
        objection_intents: std::collections::HashSet<String>,
    ) -> Self {
        Self {
            persona_limits,
            objection_intents,
            ..Self::new()
        }
    }
}

impl Default for ObjectionGuardSource {
    fn default() -> Self {
        Self::new()
    }
}

impl KnowledgeSource for ObjectionGuardSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority_order(&self) -> u32 {
        30
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
        self.is_enabled() && self.objection_intents.contains(&turn.ctx.current_intent)
    }

    fn contribute(&self, turn: &TurnInputs<'_>) -> Result<Vec<Proposal>> {
        let persona = if self.persona_limits.contains_key(&turn.ctx.persona) {
            turn.ctx.persona.clone()
        } else {
            "default".to_string()
        };
        let limits = turn.tenant.objection_limits(&persona, &self.persona_limits);

        let consecutive = turn.intent_tracker.objection_consecutive();
        let total = turn.intent_tracker.objection_total();

        let consecutive_exceeded = consecutive >= limits.consecutive;
        let total_exceeded = total >= limits.total;

        if !consecutive_exceeded && !total_exceeded {
            return Ok(Vec::new());
        }

        let mut exceeded = Vec::new();
        if consecutive_exceeded {
            exceeded.push(format!("consecutive={}>={}", consecutive, limits.consecutive));
        }
        if total_exceeded {
            exceeded.push(format!("total={}>={}", total, limits.total));
        }

        let action = Proposal::action(
            "objection_limit_reached",
            Priority::Critical,
            &self.name,
            "objection_limit_exceeded",
            true,
        )
        .with_metadata(
            Metadata::new()
                .with("persona", persona.clone())
                .with("consecutive", consecutive)
                .with("total", total)
                .with("max_consecutive", limits.consecutive)
                .with("max_total", limits.total)
                .with("exceeded", exceeded.clone()),
        );

        let transition = Proposal::transition("soft_close", Priority::Critical, &self.name, "objection_limit_exceeded")
            .with_metadata(Metadata::new().with("persona", persona).with("trigger", exceeded.join(", ")));

        let flag = Proposal::flag_set(
            "_objection_limit_final",
            serde_json::Value::Bool(true),
            &self.name,
            "objection_limit_exceeded",
        );

        Ok(vec![action, transition, flag])
    }
}
