//! [`DialogueOrchestrator`]: drives one turn through begin -> contribute ->
//! assign -> validate -> resolve -> sanitize -> commit -> side effects ->
//! compatibility fill, emitting a [`crate::event::DialogueEvent`] at each
//! milestone.
//!
//! Ground-truthed against `original_source/src/blackboard/orchestrator.py`'s
//! nine-step pipeline (`spec.md` §4.9), with the explicit sanitizer call
//! `SPEC_FULL.md` §4.9 adds on top of the original's validator-only rewrite
//! path.

use std::collections::{HashMap, HashSet};

use serde_json::{json, Value};

use crate::assigner::{ConditionRegistry, PriorityAssigner};
use crate::blackboard::DialogueBlackboard;
use crate::config::TenantConfig;
use crate::decision::ResolvedDecision;
use crate::error::{Error, Result};
use crate::event::{DialogueEvent, EventBus};
use crate::ports::{ContextEnvelopePort, FlowConfigPort, GuardAnalyserPort, IntentTrackerPort, LlmPort, StateMachinePort};
use crate::primitives::EventKind;
use crate::proposal::Proposal;
use crate::resolver::{self, ConflictResolver};
use crate::sanitizer::{DecisionSanitizer, INVALID_NEXT_STATE_REASON};
use crate::sources::objection_return::OBJECTION_STATE;
use crate::sources::{KnowledgeSource, TurnInputs};
use crate::validator::ProposalValidator;

/// Action reported when nothing else wins arbitration.
pub const DEFAULT_ACTION: &str = "continue_current_goal";

fn is_empty_value(value: Option<&Value>) -> bool {
    match value {
        None => true,
        Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
        Some(_) => false,
    }
}

/// Per-turn driver. Owns the [`EventBus`] (one orchestrator per dialog-system
/// instance); every other collaborator (blackboard, sources, ports) is
/// passed in per call, since they are either per-dialog or per-process state
/// the host already owns.
pub struct DialogueOrchestrator {
    event_bus: EventBus,
    default_action: String,
}

impl DialogueOrchestrator {
    /// Construct an orchestrator reporting [`DEFAULT_ACTION`] when nothing wins.
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            event_bus,
            default_action: DEFAULT_ACTION.to_string(),
        }
    }

    /// Construct an orchestrator with a caller-supplied default action.
    pub fn with_default_action(event_bus: EventBus, default_action: impl Into<String>) -> Self {
        Self {
            event_bus,
            default_action: default_action.into(),
        }
    }

    /// The event bus, for hosts that want to subscribe before the first turn.
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    fn emit(&self, turn_number: u64, kind: EventKind, data: Value) {
        self.event_bus.emit(DialogueEvent::new(kind, turn_number, data));
    }

    /// Run one turn to completion. `sources` must already be in priority order
    /// (as produced by [`crate::registry::SourceRegistry::create_sources`]);
    /// the orchestrator does not re-sort them. Never fails: any uncaught error
    /// anywhere in the pipeline is converted into a fallback decision
    /// (`fallback_processing_error`) and an `ERROR_OCCURRED` event instead of
    /// propagating.
    #[allow(clippy::too_many_arguments)]
    pub fn process_turn(
        &self,
        blackboard: &mut DialogueBlackboard,
        sources: &[Box<dyn KnowledgeSource>],
        intent: &str,
        extracted_data: &HashMap<String, Value>,
        envelope: Box<dyn ContextEnvelopePort>,
        user_message: &str,
        frustration_level: f64,
        state_machine: &mut dyn StateMachinePort,
        intent_tracker: &mut dyn IntentTrackerPort,
        flow_config: &dyn FlowConfigPort,
        tenant: &TenantConfig,
        conditions: &dyn ConditionRegistry,
        validator: &ProposalValidator,
        llm: Option<&dyn LlmPort>,
        guard_analyser: Option<&dyn GuardAnalyserPort>,
    ) -> ResolvedDecision {
        let state_before = state_machine.state();

        match self.run_pipeline(
            blackboard,
            sources,
            intent,
            extracted_data,
            envelope,
            user_message,
            frustration_level,
            state_machine,
            intent_tracker,
            flow_config,
            tenant,
            conditions,
            validator,
            llm,
            guard_analyser,
        ) {
            Ok(decision) => decision,
            Err(err) => {
                tracing::error!(error = %err, "turn processing failed");
                self.emit(
                    intent_tracker.turn_number(),
                    EventKind::ErrorOccurred,
                    json!({ "component": "DialogueOrchestrator", "error": err.to_string() }),
                );
                ResolvedDecision::fallback(&state_before, &self.default_action, "fallback_processing_error")
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run_pipeline(
        &self,
        blackboard: &mut DialogueBlackboard,
        sources: &[Box<dyn KnowledgeSource>],
        intent: &str,
        extracted_data: &HashMap<String, Value>,
        envelope: Box<dyn ContextEnvelopePort>,
        user_message: &str,
        frustration_level: f64,
        state_machine: &mut dyn StateMachinePort,
        intent_tracker: &mut dyn IntentTrackerPort,
        flow_config: &dyn FlowConfigPort,
        tenant: &TenantConfig,
        conditions: &dyn ConditionRegistry,
        validator: &ProposalValidator,
        llm: Option<&dyn LlmPort>,
        guard_analyser: Option<&dyn GuardAnalyserPort>,
    ) -> Result<ResolvedDecision> {
        // 1. Begin turn.
        blackboard.begin_turn(intent, extracted_data, envelope, user_message, frustration_level, state_machine, intent_tracker, flow_config);
        let turn_number = blackboard.get_context()?.turn_number;
        self.emit(turn_number, EventKind::TurnStarted, json!({ "intent": intent, "state": blackboard.get_context()?.state }));

        // 2. Source loop. Proposals are collected locally first so no
        // immutable borrow of `blackboard` (for `ctx`) overlaps the mutable
        // borrow `submit_proposal` needs; they are routed onto the blackboard
        // in one pass afterward, purely for the accessor methods' visibility.
        let mut proposals: Vec<Proposal> = Vec::new();
        for source in sources {
            let ctx = blackboard.get_context()?;
            let turn_inputs = TurnInputs {
                ctx,
                flow_config,
                tenant,
                intent_tracker: &*intent_tracker,
                circular_flow: state_machine.circular_flow_ref(),
                llm,
                guard_analyser,
            };

            if !turn_inputs.ctx.current_intent.is_empty() && !source.should_contribute(&turn_inputs) {
                tracing::debug!(source = %source.name(), "source skipped this turn");
                continue;
            }

            let started = std::time::Instant::now();
            match source.contribute(&turn_inputs) {
                Ok(found) => {
                    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                    self.emit(
                        turn_number,
                        EventKind::SourceContributed,
                        json!({ "source": source.name(), "proposal_count": found.len(), "elapsed_ms": elapsed_ms }),
                    );
                    proposals.extend(found);
                }
                Err(err) => {
                    tracing::warn!(source = %source.name(), error = %err, "knowledge source failed to contribute");
                    self.emit(
                        turn_number,
                        EventKind::ErrorOccurred,
                        json!({ "component": source.name(), "error": err.to_string() }),
                    );
                }
            }
        }
        for proposal in &proposals {
            blackboard.submit_proposal(proposal.clone());
        }

        // 3-5. Assign, validate, resolve.
        let ctx = blackboard.get_context()?;
        let current_state = ctx.state.clone();
        PriorityAssigner::assign(&mut proposals, ctx, flow_config, tenant, intent_tracker.prev_intent().as_deref(), conditions);

        let validation_errors = validator.validate(&proposals);
        self.emit(
            turn_number,
            EventKind::ProposalValidated,
            json!({
                "error_count": ProposalValidator::get_errors_only(&validation_errors).len(),
                "warning_count": ProposalValidator::get_warnings_only(&validation_errors).len(),
            }),
        );
        if ProposalValidator::has_blocking_errors(&validation_errors) {
            return Ok(ResolvedDecision::fallback(&current_state, "continue_current_goal", "fallback_validation_error"));
        }

        let mut decision = ConflictResolver::resolve_with_fallback(&proposals, ctx, &self.default_action);
        self.emit(turn_number, EventKind::ConflictResolved, resolver::decision_summary(&decision));

        // 6. Sanitize, then merge the blackboard's own FlagSet-proposal
        // accumulation into the decision before commit: `commit_decision`
        // overwrites (rather than merges) `flags_to_set` from the decision it
        // is handed, and flag proposals never flow through the resolver
        // (only actions/transitions do), so without this step a source's
        // `FlagSet` proposal (e.g. `_objection_limit_final`) would be silently
        // dropped on commit.
        let valid_states: HashSet<String> = flow_config.states().keys().cloned().collect();
        let sanitized = DecisionSanitizer::sanitize_decision(&decision.next_state, &current_state, &valid_states);
        if sanitized.sanitized {
            decision.next_state = sanitized.effective_state.clone();
            decision.reason_codes.push(INVALID_NEXT_STATE_REASON.to_string());
            decision.resolution_trace.sanitizer_diagnostic = Some(sanitized.diagnostic);
        }
        decision.flags_to_set.extend(blackboard.get_flags_to_set().iter().map(|(k, v)| (k.clone(), v.clone())));

        blackboard.commit_decision(decision, &mut *state_machine);
        let mut decision = blackboard.decision().cloned().ok_or_else(|| Error::Processing("decision missing after commit".to_string()))?;

        self.emit(turn_number, EventKind::DecisionCommitted, json!({ "action": decision.action, "next_state": decision.next_state }));
        if decision.next_state != current_state {
            self.emit(turn_number, EventKind::StateTransitioned, json!({ "from": current_state, "to": decision.next_state }));
        }

        // 7. Apply side effects. `transition_to` carries state, phase, and
        // action together so an external observer never sees one change
        // without the others.
        let new_phase = flow_config.get_phase_for_state(&decision.next_state);
        state_machine.transition_to(&decision.next_state, Some(&decision.action), Some(&new_phase), "DialogueOrchestrator", true);
        state_machine.sync_phase_from_state(flow_config.state_to_phase());

        let mut enter_flags: HashMap<String, Value> = blackboard.get_flags_to_set().clone();
        if decision.next_state != current_state {
            if let Some(state_config) = flow_config.state(&decision.next_state) {
                for (flag, value) in &state_config.on_enter_flags {
                    enter_flags.entry(flag.clone()).or_insert_with(|| value.clone());
                }
            }
        }
        if !enter_flags.is_empty() {
            state_machine.update_data(&enter_flags);
        }

        if decision.action == "acknowledge_go_back" {
            if let Some(metadata) = decision.resolution_trace.winning_action_metadata.clone() {
                if metadata.get_bool("pending_goback_increment") {
                    let to_state = metadata.get_str("to_state").unwrap_or_default().to_string();
                    let from_state = metadata.get_str("from_state").unwrap_or_default().to_string();
                    if decision.next_state == to_state {
                        if let Some(circular_flow) = state_machine.circular_flow() {
                            circular_flow.record_go_back(&from_state, &to_state);
                        }
                    }
                }
            }
        }

        if decision.next_state == OBJECTION_STATE && current_state != OBJECTION_STATE {
            state_machine.set_state_before_objection(Some(current_state.clone()));
        } else if current_state == OBJECTION_STATE && decision.next_state != OBJECTION_STATE {
            state_machine.set_state_before_objection(None);
        }

        // 8. Fill compatibility fields.
        let post_state = state_machine.state();
        decision.prev_state = Some(current_state.clone());

        let post_state_config = flow_config.state(&post_state).cloned().unwrap_or_default();
        decision.goal = post_state_config.goal.clone();

        let collected = state_machine.collected_data();
        decision.missing_data = post_state_config
            .required_data
            .iter()
            .filter(|field| is_empty_value(collected.get(field.as_str())))
            .cloned()
            .collect();
        decision.optional_data = post_state_config.optional_data.clone();

        let objection_limit_final = collected.get("_objection_limit_final").and_then(Value::as_bool).unwrap_or(false);
        decision.is_final = state_machine.is_final() || objection_limit_final;

        decision.spin_phase = Some(flow_config.get_phase_for_state(&post_state));
        decision.prev_phase = Some(flow_config.get_phase_for_state(&current_state));

        decision.circular_flow_stats = state_machine.circular_flow_ref().map(|cf| cf.get_stats()).unwrap_or_default();

        let mut objection_stats = HashMap::new();
        objection_stats.insert("consecutive".to_string(), Value::from(intent_tracker.objection_consecutive()));
        objection_stats.insert("total".to_string(), Value::from(intent_tracker.objection_total()));
        decision.objection_stats = objection_stats;

        if decision.action == "ask_clarification" {
            let turn_ctx = blackboard.get_context()?;
            let mut options = turn_ctx.context_envelope.disambiguation_options();
            if options.is_empty() {
                if let Some(metadata) = &decision.resolution_trace.winning_action_metadata {
                    options = metadata
                        .inner()
                        .get("disambiguation_options")
                        .and_then(Value::as_array)
                        .map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                        .unwrap_or_default();
                }
            }
            if !options.is_empty() {
                decision.disambiguation_options = Some(options);
            }

            let mut question = turn_ctx.context_envelope.disambiguation_question();
            if question.is_none() {
                if let Some(metadata) = &decision.resolution_trace.winning_action_metadata {
                    question = metadata.get_str("disambiguation_question").map(str::to_string);
                }
            }
            decision.disambiguation_question = question;
        }

        decision.collected_data = collected;

        // 9. Return.
        Ok(decision)
    }
}
