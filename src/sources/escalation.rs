//! [`EscalationSource`]: detects situations needing a human and proposes a
//! blocking `escalate_to_human` action.
//!
//! Ground-truthed against `original_source/src/blackboard/sources/escalation.py`.
//! Intent categories (`escalation`, `frustration`, `sensitive`) are read from
//! `FlowConfigPort::constants()["intent_categories"]`, falling back to the
//! hardcoded sets below when a category is absent, mirroring the original's
//! `_ensure_intents_loaded` backwards-compatibility shim.

use std::collections::HashSet;

use serde_json::Value;

use crate::error::Result;
use crate::primitives::Priority;
use crate::proposal::{Metadata, Proposal};

use super::{EnabledFlag, KnowledgeSource, TurnInputs};

fn fallback_escalation() -> HashSet<&'static str> {
    ["request_human", "speak_to_manager", "talk_to_person", "need_help", "not_a_bot", "real_person", "human_please", "escalate"]
        .into_iter()
        .collect()
}

fn fallback_frustration() -> HashSet<&'static str> {
    ["frustrated", "angry", "complaint", "this_is_useless", "not_helpful", "waste_of_time"].into_iter().collect()
}

fn fallback_sensitive() -> HashSet<&'static str> {
    ["legal_question", "compliance_question", "formal_complaint", "refund_request", "contract_dispute", "data_deletion", "gdpr_request"]
        .into_iter()
        .collect()
}

fn category_intents(flow_config: &dyn crate::ports::FlowConfigPort, category: &str, fallback: HashSet<&'static str>) -> HashSet<String> {
    let from_config: HashSet<String> = flow_config
        .constants()
        .get("intent_categories")
        .and_then(|v| v.get(category))
        .and_then(Value::as_array)
        .map(|members| members.iter().filter_map(|m| m.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    if from_config.is_empty() {
        fallback.into_iter().map(str::to_string).collect()
    } else {
        from_config
    }
}

/// Intents considered complex enough, combined with a high-value lead, to
/// warrant an optional escalation.
fn complex_intents() -> HashSet<&'static str> {
    ["custom_integration", "enterprise_features", "sla_question"].into_iter().collect()
}

/// Detects explicit requests for a human, sensitive topics, frustration and
/// misunderstanding thresholds, and high-value-lead complex questions;
/// proposes a blocking escalation action plus a transition to the flow's
/// escalation state (`entry_points.escalation`, else `soft_close`).
pub struct EscalationSource {
    name: String,
    enabled: EnabledFlag,
    frustration_threshold: u32,
    misunderstanding_threshold: u32,
    high_value_threshold: i64,
}

impl EscalationSource {
    /// Construct with the ground-truthed default thresholds.
    pub fn new() -> Self {
        Self {
            name: "EscalationSource".to_string(),
            enabled: EnabledFlag::default(),
            frustration_threshold: 3,
            misunderstanding_threshold: 4,
            high_value_threshold: 100,
        }
    }

    /// Construct with caller-supplied thresholds.
    pub fn with_thresholds(frustration_threshold: u32, misunderstanding_threshold: u32, high_value_threshold: i64) -> Self {
        Self {
            frustration_threshold,
            misunderstanding_threshold,
            high_value_threshold,
            ..Self::new()
        }
    }

    fn escalation_state(&self, turn: &TurnInputs<'_>) -> String {
        if let Some(state) = turn.flow_config.entry_points().get("escalation") {
            if turn.flow_config.states().contains_key(state) {
                return state.clone();
            }
        }
        "soft_close".to_string()
    }
}

impl Default for EscalationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl KnowledgeSource for EscalationSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority_order(&self) -> u32 {
        60
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
        if !self.is_enabled() {
            return false;
        }
        let intent = &turn.ctx.current_intent;
        let explicit = category_intents(turn.flow_config, "escalation", fallback_escalation());
        let sensitive = category_intents(turn.flow_config, "sensitive", fallback_sensitive());
        let frustration = category_intents(turn.flow_config, "frustration", fallback_frustration());

        if explicit.contains(intent) || sensitive.contains(intent) || frustration.contains(intent) {
            return true;
        }

        turn.intent_tracker.total_count("unclear") >= self.misunderstanding_threshold.saturating_sub(1)
    }

    fn contribute(&self, turn: &TurnInputs<'_>) -> Result<Vec<Proposal>> {
        let intent = turn.ctx.current_intent.clone();
        let explicit = category_intents(turn.flow_config, "escalation", fallback_escalation());
        let sensitive = category_intents(turn.flow_config, "sensitive", fallback_sensitive());
        let frustration = category_intents(turn.flow_config, "frustration", fallback_frustration());

        let mut reason = None;
        let mut priority = Priority::High;

        if explicit.contains(&intent) {
            reason = Some("explicit_request");
            priority = Priority::Critical;
        } else if sensitive.contains(&intent) {
            reason = Some("sensitive_topic");
            priority = Priority::Critical;
        } else if frustration.contains(&intent) {
            if turn.intent_tracker.category_total("frustration") >= self.frustration_threshold {
                reason = Some("frustration_threshold");
            }
        }

        if reason.is_none() && turn.intent_tracker.total_count("unclear") >= self.misunderstanding_threshold {
            reason = Some("misunderstanding_threshold");
        }

        if reason.is_none() {
            if let Some(size) = turn.ctx.collected_data.get("company_size").and_then(Value::as_i64) {
                if size >= self.high_value_threshold && complex_intents().contains(intent.as_str()) {
                    reason = Some("high_value_complex");
                }
            }
        }

        let Some(reason) = reason else {
            return Ok(Vec::new());
        };

        let reason_code = format!("escalation_{reason}");
        let action = Proposal::action("escalate_to_human", priority, &self.name, reason_code.clone(), false).with_metadata(
            Metadata::new()
                .with("trigger", reason)
                .with("intent", intent)
                .with("turn_number", turn.ctx.turn_number),
        );

        let escalation_state = self.escalation_state(turn);
        let transition = Proposal::transition(escalation_state.clone(), priority, &self.name, reason_code)
            .with_metadata(Metadata::new().with("trigger", reason).with("resolved_state", escalation_state));

        Ok(vec![action, transition])
    }
}
