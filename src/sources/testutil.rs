//! Shared `#[cfg(test)]` doubles for knowledge-source unit tests.

#![cfg(test)]

use std::collections::HashMap;

use serde_json::Value;

use crate::config::{PriorityDefinition, TenantConfig};
use crate::context::ContextSnapshot;
use crate::ports::{
    CircularFlowPort, ContextEnvelopePort, FlowConfigPort, IntentTrackerPort, StateConfig,
};

#[derive(Debug, Default)]
pub struct NullEnvelope;
impl ContextEnvelopePort for NullEnvelope {}

pub struct NullFlow {
    pub states: HashMap<String, StateConfig>,
    pub state_to_phase: HashMap<String, String>,
    pub entry_points: HashMap<String, String>,
    pub priorities: Vec<PriorityDefinition>,
    pub constants: HashMap<String, Value>,
    pub progress_intents: Vec<String>,
}

impl Default for NullFlow {
    fn default() -> Self {
        Self {
            states: HashMap::new(),
            state_to_phase: HashMap::new(),
            entry_points: HashMap::new(),
            priorities: Vec::new(),
            constants: HashMap::new(),
            progress_intents: Vec::new(),
        }
    }
}

impl FlowConfigPort for NullFlow {
    fn states(&self) -> &HashMap<String, StateConfig> {
        &self.states
    }
    fn state_to_phase(&self) -> &HashMap<String, String> {
        &self.state_to_phase
    }
    fn entry_points(&self) -> &HashMap<String, String> {
        &self.entry_points
    }
    fn priorities(&self) -> &[PriorityDefinition] {
        &self.priorities
    }
    fn constants(&self) -> &HashMap<String, Value> {
        &self.constants
    }
    fn progress_intents(&self) -> &[String] {
        &self.progress_intents
    }
}

#[derive(Default)]
pub struct FakeTracker {
    pub turn_number: u64,
    pub prev_intent: Option<String>,
    pub objection_consecutive: u32,
    pub objection_total: u32,
    pub total_counts: HashMap<String, u32>,
    pub category_totals: HashMap<String, u32>,
    pub category_streaks: HashMap<String, u32>,
    pub recent_intents: Vec<String>,
}

impl IntentTrackerPort for FakeTracker {
    fn turn_number(&self) -> u64 {
        self.turn_number
    }
    fn prev_intent(&self) -> Option<String> {
        self.prev_intent.clone()
    }
    fn record(&mut self, _intent: &str, _state: &str) {}
    fn advance_turn(&mut self) {}
    fn objection_consecutive(&self) -> u32 {
        self.objection_consecutive
    }
    fn objection_total(&self) -> u32 {
        self.objection_total
    }
    fn total_count(&self, intent: &str) -> u32 {
        self.total_counts.get(intent).copied().unwrap_or(0)
    }
    fn category_total(&self, category: &str) -> u32 {
        self.category_totals.get(category).copied().unwrap_or(0)
    }
    fn category_streak(&self, category: &str) -> u32 {
        self.category_streaks.get(category).copied().unwrap_or(0)
    }
    fn get_intents_by_category(&self, _category: &str) -> Vec<String> {
        Vec::new()
    }
    fn get_recent_intents(&self, limit: usize) -> Vec<String> {
        let len = self.recent_intents.len();
        self.recent_intents[len.saturating_sub(limit)..].to_vec()
    }
}

#[derive(Default)]
pub struct FakeCircularFlow {
    pub count: u32,
    pub max: u32,
    pub target: Option<String>,
    pub history: Vec<(String, String)>,
}

impl CircularFlowPort for FakeCircularFlow {
    fn go_back_count(&self) -> u32 {
        self.count
    }
    fn max_go_backs(&self) -> u32 {
        self.max
    }
    fn get_go_back_target(&self, _from_state: &str) -> Option<String> {
        self.target.clone()
    }
    fn get_stats(&self) -> HashMap<String, Value> {
        HashMap::new()
    }
    fn get_history(&self) -> Vec<(String, String)> {
        self.history.clone()
    }
    fn record_go_back(&mut self, from: &str, to: &str) {
        self.history.push((from.to_string(), to.to_string()));
        self.count += 1;
    }
}

pub fn snapshot(state: &str, intent: &str, state_config: StateConfig) -> ContextSnapshot {
    ContextSnapshot {
        state: state.into(),
        current_intent: intent.into(),
        turn_number: 1,
        persona: "default".into(),
        tenant_id: "default".into(),
        collected_data: HashMap::new(),
        state_config,
        state_to_phase: HashMap::new(),
        context_envelope: Box::new(NullEnvelope),
        user_message: "".into(),
        frustration_level: 0.0,
        state_before_objection: None,
    }
}

pub fn default_tenant() -> TenantConfig {
    TenantConfig::default_tenant()
}
