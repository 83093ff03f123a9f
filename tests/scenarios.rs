//! End-to-end scenario tests exercising the literal S1-S6 examples from
//! `spec.md` §8 through the crate's public API only: a real
//! `DialogueOrchestrator`, real `KnowledgeSource`s, and small in-file port
//! implementations standing in for the host's state machine, intent tracker,
//! and flow config. Every test drives one full turn end to end rather than
//! poking at an internal stage in isolation (those live as `#[cfg(test)]`
//! unit tests colocated with each module).

use std::collections::HashMap;

use serde_json::{json, Value};

use dialogue_blackboard::{
    assigner::NullConditionRegistry,
    blackboard::DialogueBlackboard,
    config::TenantConfig,
    event::EventBus,
    orchestrator::DialogueOrchestrator,
    ports::{CircularFlowPort, ContextEnvelopePort, FlowConfigPort, IntentTrackerPort, StateConfig, StateMachinePort},
    sources::{data_collector::DataCollectorSource, objection_guard::ObjectionGuardSource, price_question::PriceQuestionSource, KnowledgeSource},
    validator::ProposalValidator,
};

#[derive(Debug, Default)]
struct NullEnvelope;
impl ContextEnvelopePort for NullEnvelope {}

#[derive(Default)]
struct TestFlow {
    states: HashMap<String, StateConfig>,
    state_to_phase: HashMap<String, String>,
    entry_points: HashMap<String, String>,
}

impl FlowConfigPort for TestFlow {
    fn states(&self) -> &HashMap<String, StateConfig> {
        &self.states
    }
    fn state_to_phase(&self) -> &HashMap<String, String> {
        &self.state_to_phase
    }
    fn entry_points(&self) -> &HashMap<String, String> {
        &self.entry_points
    }
    fn priorities(&self) -> &[dialogue_blackboard::config::PriorityDefinition] {
        &[]
    }
    fn constants(&self) -> &HashMap<String, Value> {
        static EMPTY: std::sync::OnceLock<HashMap<String, Value>> = std::sync::OnceLock::new();
        EMPTY.get_or_init(HashMap::new)
    }
    fn progress_intents(&self) -> &[String] {
        &[]
    }
}

#[derive(Default)]
struct NullCircularFlow;
impl CircularFlowPort for NullCircularFlow {
    fn go_back_count(&self) -> u32 {
        0
    }
    fn max_go_backs(&self) -> u32 {
        0
    }
    fn get_go_back_target(&self, _from_state: &str) -> Option<String> {
        None
    }
    fn get_stats(&self) -> HashMap<String, Value> {
        HashMap::new()
    }
    fn get_history(&self) -> Vec<(String, String)> {
        Vec::new()
    }
    fn record_go_back(&mut self, _from: &str, _to: &str) {}
}

#[derive(Default)]
struct TestStateMachine {
    state: String,
    collected: HashMap<String, Value>,
    state_before_objection: Option<String>,
    final_state: bool,
}

impl StateMachinePort for TestStateMachine {
    fn state(&self) -> String {
        self.state.clone()
    }
    fn current_phase(&self) -> Option<String> {
        None
    }
    fn last_action(&self) -> Option<String> {
        None
    }
    fn state_before_objection(&self) -> Option<String> {
        self.state_before_objection.clone()
    }
    fn set_state_before_objection(&mut self, state: Option<String>) {
        self.state_before_objection = state;
    }
    fn collected_data(&self) -> HashMap<String, Value> {
        self.collected.clone()
    }
    fn update_data(&mut self, updates: &HashMap<String, Value>) {
        for (k, v) in updates {
            self.collected.insert(k.clone(), v.clone());
        }
    }
    fn is_final(&self) -> bool {
        self.final_state
    }
    fn transition_to(&mut self, next_state: &str, _action: Option<&str>, _phase: Option<&str>, _source: &str, _validate: bool) -> bool {
        self.state = next_state.to_string();
        true
    }
    fn sync_phase_from_state(&mut self, _state_to_phase: &HashMap<String, String>) {}
    fn circular_flow(&mut self) -> Option<&mut dyn CircularFlowPort> {
        None
    }
    fn circular_flow_ref(&self) -> Option<&dyn CircularFlowPort> {
        None
    }
}

#[derive(Default)]
struct TestTracker {
    turn_number: u64,
    objection_consecutive: u32,
    objection_total: u32,
}

impl IntentTrackerPort for TestTracker {
    fn turn_number(&self) -> u64 {
        self.turn_number
    }
    fn prev_intent(&self) -> Option<String> {
        None
    }
    fn record(&mut self, _intent: &str, _state: &str) {}
    fn advance_turn(&mut self) {
        self.turn_number += 1;
    }
    fn objection_consecutive(&self) -> u32 {
        self.objection_consecutive
    }
    fn objection_total(&self) -> u32 {
        self.objection_total
    }
    fn total_count(&self, _intent: &str) -> u32 {
        0
    }
    fn category_total(&self, _category: &str) -> u32 {
        0
    }
    fn category_streak(&self, _category: &str) -> u32 {
        0
    }
    fn get_intents_by_category(&self, _category: &str) -> Vec<String> {
        Vec::new()
    }
    fn get_recent_intents(&self, _limit: usize) -> Vec<String> {
        Vec::new()
    }
}

fn permissive_validator() -> ProposalValidator {
    ProposalValidator::new(None, None, None, false)
}

#[allow(clippy::too_many_arguments)]
fn run_turn(
    orch: &DialogueOrchestrator,
    sources: &[Box<dyn KnowledgeSource>],
    bb: &mut DialogueBlackboard,
    sm: &mut TestStateMachine,
    tracker: &mut TestTracker,
    flow: &TestFlow,
    validator: &ProposalValidator,
    intent: &str,
) -> dialogue_blackboard::ResolvedDecision {
    orch.process_turn(
        bb,
        sources,
        intent,
        &HashMap::new(),
        Box::new(NullEnvelope),
        "hi",
        0.0,
        sm,
        tracker,
        flow,
        &TenantConfig::default_tenant(),
        &NullConditionRegistry,
        validator,
        None,
        None,
    )
}

/// S1 - Price question arriving in a state whose required data is already
/// fully collected must answer the price question *and* still complete the
/// `data_complete` transition; the price answer must never block it.
#[test]
fn s1_price_question_merges_with_data_complete_transition() {
    let orch = DialogueOrchestrator::new(EventBus::new_sync());
    let mut bb = DialogueBlackboard::new(TenantConfig::default_tenant());
    let mut sm = TestStateMachine {
        state: "spin_situation".to_string(),
        collected: HashMap::from([("company_size".to_string(), json!("50"))]),
        ..Default::default()
    };
    let mut tracker = TestTracker::default();
    let mut flow = TestFlow::default();
    let mut situation = StateConfig::default();
    situation.required_data = vec!["company_size".to_string()];
    situation.transitions.insert("data_complete".to_string(), "spin_problem".to_string());
    flow.states.insert("spin_situation".to_string(), situation);
    flow.states.insert("spin_problem".to_string(), StateConfig::default());

    let sources: Vec<Box<dyn KnowledgeSource>> = vec![Box::new(PriceQuestionSource::new()), Box::new(DataCollectorSource::new())];
    let validator = permissive_validator();

    let decision = run_turn(&orch, &sources, &mut bb, &mut sm, &mut tracker, &flow, &validator, "price_question");

    assert_eq!(decision.action, "answer_with_pricing");
    assert_eq!(decision.next_state, "spin_problem");
    assert!(decision.reason_codes.contains(&"price_question_priority".to_string()));
    assert!(decision.reason_codes.contains(&"data_complete".to_string()));
    assert!(decision.rejected_proposals.is_empty(), "combinable merge must not reject either winner");
    assert_eq!(sm.state, "spin_problem");
}

/// S2 - A blocking (non-combinable) action must win outright: the dialog
/// stays in its current state and the competing transition is rejected.
#[test]
fn s2_blocking_action_rejects_transition_and_holds_state() {
    use dialogue_blackboard::primitives::Priority;
    use dialogue_blackboard::proposal::Proposal;

    struct Stub(Vec<Proposal>);
    impl KnowledgeSource for Stub {
        fn name(&self) -> &str {
            "Stub"
        }
        fn priority_order(&self) -> u32 {
            1
        }
        fn is_enabled(&self) -> bool {
            true
        }
        fn enable(&mut self) {}
        fn disable(&mut self) {}
        fn contribute(&self, _turn: &dialogue_blackboard::sources::TurnInputs<'_>) -> dialogue_blackboard::Result<Vec<Proposal>> {
            Ok(self.0.clone())
        }
    }

    let orch = DialogueOrchestrator::new(EventBus::new_sync());
    let mut bb = DialogueBlackboard::new(TenantConfig::default_tenant());
    let mut sm = TestStateMachine { state: "spin_problem".to_string(), ..Default::default() };
    let mut tracker = TestTracker::default();
    let mut flow = TestFlow::default();
    flow.states.insert("spin_problem".to_string(), StateConfig::default());

    let sources: Vec<Box<dyn KnowledgeSource>> = vec![Box::new(Stub(vec![
        Proposal::action("handle_rejection", Priority::High, "Stub", "r1", false),
        Proposal::transition("spin_problem", Priority::Normal, "Stub", "r2"),
    ]))];
    let validator = permissive_validator();

    let decision = run_turn(&orch, &sources, &mut bb, &mut sm, &mut tracker, &flow, &validator, "hard_no");

    assert_eq!(decision.action, "handle_rejection");
    assert_eq!(decision.next_state, "spin_problem");
    assert_eq!(decision.resolution_trace.merge_decision, "BLOCKED");
    assert_eq!(decision.rejected_proposals.len(), 1);
}

/// S3 - Three consecutive objection intents against the default persona's
/// limit (2 consecutive) must produce `objection_limit_reached`, a
/// transition to `soft_close`, and set `_objection_limit_final`, which in
/// turn forces `isFinal()` true on commit.
#[test]
fn s3_objection_limit_forces_soft_close_and_is_final() {
    let orch = DialogueOrchestrator::new(EventBus::new_sync());
    let mut bb = DialogueBlackboard::new(TenantConfig::default_tenant());
    let mut sm = TestStateMachine { state: "handle_objection".to_string(), ..Default::default() };
    let mut tracker = TestTracker { objection_consecutive: 3, objection_total: 3, ..Default::default() };
    let mut flow = TestFlow::default();
    flow.states.insert("handle_objection".to_string(), StateConfig::default());
    flow.states.insert("soft_close".to_string(), StateConfig::default());

    let sources: Vec<Box<dyn KnowledgeSource>> = vec![Box::new(ObjectionGuardSource::new())];
    let validator = permissive_validator();

    let decision = run_turn(&orch, &sources, &mut bb, &mut sm, &mut tracker, &flow, &validator, "objection_price");

    assert_eq!(decision.action, "objection_limit_reached");
    assert_eq!(decision.next_state, "soft_close");
    assert!(decision.is_final);
    assert_eq!(sm.collected.get("_objection_limit_final"), Some(&Value::Bool(true)));
}

/// S6 - A proposal targeting a state outside the known set is sanitized back
/// to the current state, with the diagnostic reason code appended.
#[test]
fn s6_sanitizer_rewrites_unknown_transition_target() {
    use dialogue_blackboard::primitives::Priority;
    use dialogue_blackboard::proposal::Proposal;

    struct GhostStub;
    impl KnowledgeSource for GhostStub {
        fn name(&self) -> &str {
            "GhostStub"
        }
        fn priority_order(&self) -> u32 {
            1
        }
        fn is_enabled(&self) -> bool {
            true
        }
        fn enable(&mut self) {}
        fn disable(&mut self) {}
        fn contribute(&self, _turn: &dialogue_blackboard::sources::TurnInputs<'_>) -> dialogue_blackboard::Result<Vec<Proposal>> {
            Ok(vec![Proposal::transition("ghost_state", Priority::Normal, "GhostStub", "r1")])
        }
    }

    let orch = DialogueOrchestrator::new(EventBus::new_sync());
    let mut bb = DialogueBlackboard::new(TenantConfig::default_tenant());
    let mut sm = TestStateMachine { state: "spin_situation".to_string(), ..Default::default() };
    let mut tracker = TestTracker::default();
    let mut flow = TestFlow::default();
    flow.states.insert("spin_situation".to_string(), StateConfig::default());

    let sources: Vec<Box<dyn KnowledgeSource>> = vec![Box::new(GhostStub)];
    let validator = permissive_validator();

    let decision = run_turn(&orch, &sources, &mut bb, &mut sm, &mut tracker, &flow, &validator, "info_provided");

    assert_eq!(decision.next_state, "spin_situation");
    assert!(decision.reason_codes.contains(&"invalid_next_state_sanitized".to_string()));
    assert_eq!(sm.state, "spin_situation");
}
