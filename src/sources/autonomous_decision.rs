//! [`AutonomousDecisionSource`]: LLM-driven state transition for the
//! autonomous flow, with a hard-override safety net that bypasses the LLM
//! after too many consecutive stay-decisions.
//!
//! Ground-truthed against
//! `original_source/src/blackboard/sources/autonomous_decision.py`. The
//! original's natural-language prompt construction (`_build_decision_prompt`)
//! is out of scope here (response generation and prompt templating are
//! explicitly excluded by `spec.md` §1), so this source instead populates
//! [`crate::ports::LlmDecisionRequest::prompt_context`] with the same
//! structured data the prompt would have been built from, leaving prompt
//! text itself to the host's `LlmPort` implementation.
//!
//! **(GENERALIZED)** the original gates on `flow_config.name == "autonomous"`
//! plus a `state.startswith("autonomous_")` string check; this crate instead
//! uses [`crate::ports::StateConfig::autonomous`], the typed flag this port
//! already exposes for exactly this purpose, for both the top-level gate and
//! the phase-chain membership test below.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};

use serde_json::json;

use crate::error::Result;
use crate::ports::{LlmDecisionRequest, StateConfig};
use crate::primitives::Priority;
use crate::proposal::Proposal;

use super::objection_guard::default_objection_intents;
use super::{EnabledFlag, KnowledgeSource, TurnInputs};

/// Bound on the in-memory decision history, so a very long-running dialog
/// cannot grow this unboundedly. Never persisted across sessions.
pub const DEFAULT_MAX_HISTORY: usize = 64;

/// One immutable past decision, used both to inform the LLM (soft signal) and
/// to drive the hard-override streak count.
#[derive(Debug, Clone)]
pub struct AutonomousDecisionRecord {
    /// Turn-in-state counter at the time of this decision.
    pub turn_in_state: u32,
    /// Intent classified on that turn.
    pub intent: String,
    /// State the decision was made in.
    pub state: String,
    /// Whether a transition was actually taken.
    pub should_transition: bool,
    /// Target state, meaningful only when `should_transition`.
    pub next_state: String,
    /// Free-form rationale, truncated, logged but not otherwise interpreted.
    pub reasoning: String,
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// Drives autonomous-flow transitions via an [`crate::ports::LlmPort`] call,
/// with a per-instance decision history and a hard override that forces a
/// transition once too many consecutive turns stayed in the same state.
pub struct AutonomousDecisionSource {
    name: String,
    enabled: EnabledFlag,
    history: RefCell<VecDeque<AutonomousDecisionRecord>>,
    max_history: usize,
}

impl AutonomousDecisionSource {
    /// Construct with the default history bound.
    pub fn new() -> Self {
        Self {
            name: "AutonomousDecisionSource".to_string(),
            enabled: EnabledFlag::default(),
            history: RefCell::new(VecDeque::new()),
            max_history: DEFAULT_MAX_HISTORY,
        }
    }

    /// Construct with a caller-supplied history bound.
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            max_history,
            ..Self::new()
        }
    }

    /// Build `{state_name: order_index}` by walking the `next_phase_state`
    /// chain from whichever autonomous state has no autonomous predecessor.
    /// States outside the chain (or with no discoverable start) fall back to
    /// sorted-name order, so the result is always deterministic even though
    /// `states` is an unordered map.
    fn phase_order(states: &HashMap<String, StateConfig>) -> HashMap<String, u32> {
        let mut autonomous_names: Vec<String> = Vec::new();
        for (name, cfg) in states.iter() {
            if cfg.autonomous {
                autonomous_names.push(name.clone());
            }
        }
        autonomous_names.sort();

        let mut start: Option<String> = None;
        for name in &autonomous_names {
            let prev_is_autonomous = match &states[name].prev_phase_state {
                Some(prev) => states.get(prev).map(|c| c.autonomous).unwrap_or(false),
                None => false,
            };
            if !prev_is_autonomous {
                start = Some(name.clone());
                break;
            }
        }

        let mut result: HashMap<String, u32> = HashMap::new();
        if let Some(start) = start {
            let mut current = Some(start);
            let mut idx = 0u32;
            while let Some(state) = current {
                if result.contains_key(&state) {
                    break;
                }
                result.insert(state.clone(), idx);
                idx += 1;
                current = states
                    .get(&state)
                    .and_then(|c| c.next_phase_state.clone())
                    .filter(|n| states.get(n).map(|c| c.autonomous).unwrap_or(false));
            }
        } else {
            for (idx, name) in autonomous_names.iter().enumerate() {
                result.insert(name.clone(), idx as u32);
            }
        }

        let mut max_idx = result.values().copied().max().map(|v| v as i64).unwrap_or(-1);
        for name in &autonomous_names {
            if !result.contains_key(name) {
                max_idx += 1;
                result.insert(name.clone(), max_idx as u32);
            }
        }
        result
    }

    fn push_history(&self, record: AutonomousDecisionRecord) {
        let mut history = self.history.borrow_mut();
        history.push_back(record);
        while history.len() > self.max_history {
            history.pop_front();
        }
    }
}

impl Default for AutonomousDecisionSource {
    fn default() -> Self {
        Self::new()
    }
}

impl KnowledgeSource for AutonomousDecisionSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority_order(&self) -> u32 {
        42
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
        if !self.is_enabled() || turn.llm.is_none() {
            return false;
        }
        if !turn.tenant.is_feature_enabled("autonomous_flow") {
            return false;
        }
        turn.ctx.state_config.autonomous
    }

    fn contribute(&self, turn: &TurnInputs<'_>) -> Result<Vec<Proposal>> {
        let ctx = turn.ctx;
        let state = ctx.state.clone();
        let state_config = &ctx.state_config;
        let intent = ctx.current_intent.clone();

        let all_states = turn.flow_config.states();
        let phase_order = Self::phase_order(all_states);
        let current_idx = phase_order.get(&state).copied().map(|v| v as i64).unwrap_or(-1);
        let prev_phase = state_config.prev_phase_state.clone().unwrap_or_default();

        let visited: HashSet<String> = ctx.context_envelope.state_history().into_iter().collect();
        let mut available_states: Vec<String> = Vec::new();
        for (name, cfg) in all_states.iter() {
            if !cfg.autonomous || name == &state {
                continue;
            }
            let idx = phase_order.get(name).copied().map(|v| v as i64).unwrap_or(-1);
            let reachable_forward = idx > current_idx;
            let returns_to_unvisited_prev = name == &prev_phase && !visited.contains(name);
            if reachable_forward || returns_to_unvisited_prev {
                available_states.push(name.clone());
            }
        }
        available_states.sort();

        let terminal_names = &state_config.terminal_states;
        for t in terminal_names {
            if !available_states.contains(t) {
                available_states.push(t.clone());
            }
        }

        let turn_in_state = ctx.context_envelope.consecutive_same_state();
        let collected_data = &ctx.collected_data;
        let terminal_requirements = &state_config.terminal_state_requirements;
        let stay_override_threshold = state_config.phase_exhaust_threshold.unwrap_or(3);

        let history = self.history.borrow();
        let mut stay_streak = 0u32;
        let mut stay_streak_records: Vec<AutonomousDecisionRecord> = Vec::new();
        for record in history.iter().rev() {
            if record.state != state {
                break;
            }
            if !record.should_transition {
                stay_streak += 1;
                stay_streak_records.push(record.clone());
            } else {
                break;
            }
        }
        drop(history);

        if stay_streak >= stay_override_threshold {
            let objection_intents = default_objection_intents();
            let all_objection_driven = !stay_streak_records.is_empty()
                && stay_streak_records.iter().all(|d| objection_intents.contains(&d.intent));

            let (target, override_type) = if all_objection_driven {
                ("soft_close".to_string(), "objection_driven")
            } else if !terminal_names.is_empty() {
                let found = terminal_names.iter().rev().find(|t| {
                    terminal_requirements
                        .get(*t)
                        .map(|reqs| reqs.iter().all(|f| collected_data.contains_key(f)))
                        .unwrap_or(true)
                });
                match found {
                    Some(t) => (t.clone(), "phase_exhausted_terminal"),
                    None => ("soft_close".to_string(), "phase_exhausted_no_data"),
                }
            } else {
                let fallback = state_config
                    .next_phase_state
                    .clone()
                    .or_else(|| state_config.max_turns_fallback.clone())
                    .unwrap_or_else(|| "soft_close".to_string());
                (fallback, "phase_exhausted")
            };

            let target = if !all_states.contains_key(&target)
                && !matches!(target.as_str(), "close" | "soft_close" | "success")
            {
                "soft_close".to_string()
            } else {
                target
            };

            self.push_history(AutonomousDecisionRecord {
                turn_in_state,
                intent: intent.clone(),
                state: state.clone(),
                should_transition: true,
                next_state: target.clone(),
                reasoning: format!("hard_override_{override_type}_{stay_streak}_stays"),
            });

            let reason = format!("autonomous_hard_override_{stay_streak}_stays");
            let action = Proposal::action("autonomous_respond", Priority::High, &self.name, reason.clone(), true);
            let transition = Proposal::transition(target, Priority::High, &self.name, reason);
            return Ok(vec![action, transition]);
        }

        let request = LlmDecisionRequest {
            allowed_states: available_states.clone(),
            prompt_context: json!({
                "state": state,
                "phase": state_config.phase,
                "goal": state_config.goal,
                "intent": intent,
                "user_message": ctx.user_message,
                "collected_data": collected_data,
                "turn_in_state": turn_in_state,
                "max_turns": state_config.max_turns_in_state,
                "optional_data": state_config.optional_data,
                "terminal_names": terminal_names,
                "terminal_requirements": terminal_requirements,
            }),
        };

        let decision = match turn.llm.expect("checked by should_contribute").decide(&request) {
            Ok(decision) => decision,
            Err(cause) => {
                tracing::warn!(source = %self.name, %cause, "LLM call failed, falling back to stay-in-state");
                let action = Proposal::action("autonomous_respond", Priority::Normal, &self.name, "autonomous_llm_fallback", true);
                let transition = Proposal::transition(state, Priority::Normal, &self.name, "autonomous_stay_llm_fallback");
                return Ok(vec![action, transition]);
            }
        };

        let action_reason = if decision.reasoning.is_empty() {
            "autonomous_action".to_string()
        } else {
            format!("autonomous_action_{}", truncate(&decision.reasoning, 50))
        };
        let action = Proposal::action("autonomous_respond", Priority::Normal, &self.name, action_reason, true);

        let mut target = decision.next_state.clone();
        if target == "close" && state_config.autonomous {
            target = if available_states.iter().any(|s| s == "autonomous_closing") {
                "autonomous_closing".to_string()
            } else {
                "soft_close".to_string()
            };
        }

        let mut terminal_gate_blocked = false;
        if decision.should_transition {
            if let Some(reqs) = terminal_requirements.get(&target) {
                if !reqs.is_empty() && reqs.iter().any(|f| !collected_data.contains_key(f)) {
                    terminal_gate_blocked = true;
                }
            }
        }

        let transition = if terminal_gate_blocked {
            Proposal::transition(state.clone(), Priority::Normal, &self.name, "autonomous_stay_terminal_gate")
        } else if decision.should_transition {
            let valid = available_states.iter().any(|s| s == &target) || target == "soft_close";
            if valid {
                let reason = if decision.reasoning.is_empty() {
                    "autonomous_transition".to_string()
                } else {
                    format!("autonomous_transition_{}", truncate(&decision.reasoning, 50))
                };
                Proposal::transition(target.clone(), Priority::Normal, &self.name, reason)
            } else {
                Proposal::transition(state.clone(), Priority::Normal, &self.name, "autonomous_stay_invalid_target")
            }
        } else {
            Proposal::transition(state.clone(), Priority::Normal, &self.name, "autonomous_stay_in_state")
        };

        let actual_transitioned = decision.should_transition && !terminal_gate_blocked;
        self.push_history(AutonomousDecisionRecord {
            turn_in_state,
            intent,
            state: state.clone(),
            should_transition: actual_transitioned,
            next_state: if actual_transitioned { target } else { state },
            reasoning: if terminal_gate_blocked {
                format!("gate_blocked:{}", truncate(&decision.reasoning, 80))
            } else {
                truncate(&decision.reasoning, 100)
            },
        });

        Ok(vec![action, transition])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextSnapshot;
    use crate::ports::{ContextEnvelopePort, LlmDecision, LlmPort};
    use crate::sources::testutil::*;
    use std::collections::HashMap as Map;

    #[derive(Debug, Default)]
    struct TurnEnvelope {
        consecutive_same_state: u32,
        state_history: Vec<String>,
    }
    impl ContextEnvelopePort for TurnEnvelope {
        fn consecutive_same_state(&self) -> u32 {
            self.consecutive_same_state
        }
        fn state_history(&self) -> Vec<String> {
            self.state_history.clone()
        }
    }

    struct StubLlm {
        decision: crate::ports::LlmDecision,
    }
    impl LlmPort for StubLlm {
        fn decide(&self, _request: &LlmDecisionRequest) -> Result<LlmDecision> {
            Ok(self.decision.clone())
        }
    }

    fn autonomous_states() -> Map<String, StateConfig> {
        let mut states = Map::new();
        states.insert(
            "autonomous_discovery".to_string(),
            StateConfig {
                autonomous: true,
                next_phase_state: Some("autonomous_qualification".to_string()),
                max_turns_in_state: Some(6),
                phase_exhaust_threshold: Some(3),
                ..Default::default()
            },
        );
        states.insert(
            "autonomous_qualification".to_string(),
            StateConfig {
                autonomous: true,
                prev_phase_state: Some("autonomous_discovery".to_string()),
                max_turns_in_state: Some(6),
                phase_exhaust_threshold: Some(3),
                ..Default::default()
            },
        );
        states
    }

    fn flow_with(states: Map<String, StateConfig>) -> NullFlow {
        NullFlow { states, ..Default::default() }
    }

    fn turn_with<'a>(
        ctx: &'a ContextSnapshot,
        flow: &'a NullFlow,
        tenant: &'a crate::config::TenantConfig,
        tracker: &'a FakeTracker,
        llm: &'a dyn LlmPort,
    ) -> TurnInputs<'a> {
        TurnInputs {
            ctx,
            flow_config: flow,
            tenant,
            intent_tracker: tracker,
            circular_flow: None,
            llm: Some(llm),
            guard_analyser: None,
        }
    }

    fn enabled_tenant() -> crate::config::TenantConfig {
        let mut tenant = default_tenant();
        tenant.features.insert("autonomous_flow".to_string(), true);
        tenant
    }

    #[test]
    fn gated_on_feature_flag_and_autonomous_state() {
        let source = AutonomousDecisionSource::new();
        let sc = StateConfig { autonomous: true, ..Default::default() };
        let ctx = snapshot("autonomous_discovery", "info_provided", sc);
        let flow = flow_with(autonomous_states());
        let tenant = default_tenant();
        let tracker = FakeTracker::default();
        let llm = StubLlm {
            decision: LlmDecision { next_state: "autonomous_discovery".into(), action: "autonomous_respond".into(), reasoning: "".into(), should_transition: false },
        };
        assert!(!source.should_contribute(&turn_with(&ctx, &flow, &tenant, &tracker, &llm)));
    }

    #[test]
    fn llm_stay_decision_proposes_stay_transition() {
        let source = AutonomousDecisionSource::new();
        let sc = StateConfig {
            autonomous: true,
            next_phase_state: Some("autonomous_qualification".to_string()),
            max_turns_in_state: Some(6),
            phase_exhaust_threshold: Some(3),
            ..Default::default()
        };
        let mut ctx = snapshot("autonomous_discovery", "info_provided", sc);
        ctx.context_envelope = Box::new(TurnEnvelope::default());
        let flow = flow_with(autonomous_states());
        let tenant = enabled_tenant();
        let tracker = FakeTracker::default();
        let llm = StubLlm {
            decision: LlmDecision { next_state: "autonomous_discovery".into(), action: "autonomous_respond".into(), reasoning: "not ready".into(), should_transition: false },
        };
        let t = turn_with(&ctx, &flow, &tenant, &tracker, &llm);
        assert!(source.should_contribute(&t));
        let proposals = source.contribute(&t).unwrap();
        assert_eq!(proposals[0].value, "autonomous_respond");
        assert_eq!(proposals[1].value, "autonomous_discovery");
        assert_eq!(proposals[1].reason_code, "autonomous_stay_in_state");
    }

    #[test]
    fn llm_transition_decision_to_available_state_is_honored() {
        let source = AutonomousDecisionSource::new();
        let sc = StateConfig {
            autonomous: true,
            next_phase_state: Some("autonomous_qualification".to_string()),
            max_turns_in_state: Some(6),
            phase_exhaust_threshold: Some(3),
            ..Default::default()
        };
        let ctx = snapshot("autonomous_discovery", "info_provided", sc);
        let flow = flow_with(autonomous_states());
        let tenant = enabled_tenant();
        let tracker = FakeTracker::default();
        let llm = StubLlm {
            decision: LlmDecision { next_state: "autonomous_qualification".into(), action: "autonomous_respond".into(), reasoning: "goal met".into(), should_transition: true },
        };
        let t = turn_with(&ctx, &flow, &tenant, &tracker, &llm);
        let proposals = source.contribute(&t).unwrap();
        assert_eq!(proposals[1].value, "autonomous_qualification");
        assert!(proposals[1].reason_code.starts_with("autonomous_transition_"));
    }

    #[test]
    fn llm_error_falls_back_to_stay_without_touching_history() {
        struct FailingLlm;
        impl LlmPort for FailingLlm {
            fn decide(&self, _request: &LlmDecisionRequest) -> Result<LlmDecision> {
                Err(crate::error::Error::Processing("boom".to_string()))
            }
        }
        let source = AutonomousDecisionSource::new();
        let sc = StateConfig { autonomous: true, max_turns_in_state: Some(6), phase_exhaust_threshold: Some(3), ..Default::default() };
        let ctx = snapshot("autonomous_discovery", "info_provided", sc);
        let flow = flow_with(autonomous_states());
        let tenant = enabled_tenant();
        let tracker = FakeTracker::default();
        let llm = FailingLlm;
        let t = turn_with(&ctx, &flow, &tenant, &tracker, &llm);
        let proposals = source.contribute(&t).unwrap();
        assert_eq!(proposals[0].reason_code, "autonomous_llm_fallback");
        assert_eq!(proposals[1].reason_code, "autonomous_stay_llm_fallback");
        assert!(source.history.borrow().is_empty());
    }

    #[test]
    fn hard_override_fires_after_enough_consecutive_stays() {
        let source = AutonomousDecisionSource::new();
        for _ in 0..3 {
            source.push_history(AutonomousDecisionRecord {
                turn_in_state: 1,
                intent: "info_provided".to_string(),
                state: "autonomous_discovery".to_string(),
                should_transition: false,
                next_state: "autonomous_discovery".to_string(),
                reasoning: "stay".to_string(),
            });
        }
        let sc = StateConfig {
            autonomous: true,
            next_phase_state: Some("autonomous_qualification".to_string()),
            max_turns_in_state: Some(6),
            phase_exhaust_threshold: Some(3),
            ..Default::default()
        };
        let ctx = snapshot("autonomous_discovery", "info_provided", sc);
        let flow = flow_with(autonomous_states());
        let tenant = enabled_tenant();
        let tracker = FakeTracker::default();
        let llm = StubLlm {
            decision: LlmDecision { next_state: "autonomous_discovery".into(), action: "autonomous_respond".into(), reasoning: "".into(), should_transition: false },
        };
        let t = turn_with(&ctx, &flow, &tenant, &tracker, &llm);
        let proposals = source.contribute(&t).unwrap();
        assert_eq!(proposals[0].priority, Priority::High);
        assert_eq!(proposals[1].value, "autonomous_qualification");
        assert!(proposals[1].reason_code.starts_with("autonomous_hard_override_"));
    }

    #[test]
    fn objection_driven_stay_streak_routes_to_soft_close() {
        let source = AutonomousDecisionSource::new();
        for _ in 0..3 {
            source.push_history(AutonomousDecisionRecord {
                turn_in_state: 1,
                intent: "objection_price".to_string(),
                state: "autonomous_discovery".to_string(),
                should_transition: false,
                next_state: "autonomous_discovery".to_string(),
                reasoning: "stay".to_string(),
            });
        }
        let sc = StateConfig {
            autonomous: true,
            next_phase_state: Some("autonomous_qualification".to_string()),
            max_turns_in_state: Some(6),
            phase_exhaust_threshold: Some(3),
            ..Default::default()
        };
        let ctx = snapshot("autonomous_discovery", "objection_price", sc);
        let flow = flow_with(autonomous_states());
        let tenant = enabled_tenant();
        let tracker = FakeTracker::default();
        let llm = StubLlm {
            decision: LlmDecision { next_state: "autonomous_discovery".into(), action: "autonomous_respond".into(), reasoning: "".into(), should_transition: false },
        };
        let t = turn_with(&ctx, &flow, &tenant, &tracker, &llm);
        let proposals = source.contribute(&t).unwrap();
        assert_eq!(proposals[1].value, "soft_close");
    }

    #[test]
    fn phase_order_walks_next_phase_chain_deterministically() {
        let order = AutonomousDecisionSource::phase_order(&autonomous_states());
        assert_eq!(order["autonomous_discovery"], 0);
        assert_eq!(order["autonomous_qualification"], 1);
    }
}
