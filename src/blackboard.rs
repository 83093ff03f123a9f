//! [`DialogueBlackboard`]: the per-orchestrator-instance write surface every
//! turn reads from and appends to.
//!
//! Ground-truthed against `original_source/src/blackboard/blackboard.py`. Ports
//! (`StateMachinePort`, `IntentTrackerPort`, `FlowConfigPort`) are passed as
//! borrowed trait objects into `begin_turn`/`commit_decision` rather than
//! stored as fields, so the blackboard itself owns only the turn-scoped
//! proposal/decision regions plus the tenant-level objection-limit table
//! `should_skip_objection_recording` needs.

use std::collections::HashMap;

use serde_json::Value;

use crate::config::{PersonaObjectionLimits, TenantConfig};
use crate::context::ContextSnapshot;
use crate::error::{Error, Result};
use crate::ports::{ContextEnvelopePort, FlowConfigPort, IntentTrackerPort, StateMachinePort};
use crate::primitives::ProposalKind;
use crate::proposal::Proposal;
use crate::decision::ResolvedDecision;

fn persona_from(collected: &HashMap<String, Value>) -> String {
    collected
        .get("persona")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| "default".to_string())
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Default per-persona objection-limit table, matching
/// `ObjectionGuardSource`'s `DEFAULT_PERSONA_LIMITS` so the recording gate and
/// the guard source agree on when a persona's limit is exhausted.
pub fn default_persona_objection_limits() -> HashMap<String, PersonaObjectionLimits> {
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
    .map(|(persona, consecutive, total)| {
        (persona.to_string(), PersonaObjectionLimits { consecutive, total })
    })
    .collect()
}

/// A per-orchestrator-instance blackboard with three write regions: context
/// (set once by `begin_turn`), proposals (append-only during the turn), and
/// decision (written exactly once by `commit_decision`).
pub struct DialogueBlackboard {
    tenant: TenantConfig,
    objection_intents: std::collections::HashSet<String>,
    persona_limits: HashMap<String, PersonaObjectionLimits>,
    context: Option<ContextSnapshot>,
    action_proposals: Vec<Proposal>,
    transition_proposals: Vec<Proposal>,
    data_updates: HashMap<String, Value>,
    flags_to_set: HashMap<String, Value>,
    decision: Option<ResolvedDecision>,
}

impl DialogueBlackboard {
    /// Construct a blackboard for `tenant`, using the default objection-intent
    /// set and persona-limit table (both overridable via
    /// [`Self::with_objection_config`]).
    pub fn new(tenant: TenantConfig) -> Self {
        Self {
            tenant,
            objection_intents: crate::sources::objection_guard::default_objection_intents(),
            persona_limits: default_persona_objection_limits(),
            context: None,
            action_proposals: Vec::new(),
            transition_proposals: Vec::new(),
            data_updates: HashMap::new(),
            flags_to_set: HashMap::new(),
            decision: None,
        }
    }

    /// Construct with a caller-supplied objection-intent set and persona-limit
    /// table, for hosts that configure these outside the built-in defaults.
    pub fn with_objection_config(
        tenant: TenantConfig,
        objection_intents: std::collections::HashSet<String>,
        persona_limits: HashMap<String, PersonaObjectionLimits>,
    ) -> Self {
        Self {
            objection_intents,
            persona_limits,
            ..Self::new(tenant)
        }
    }

    /// `false` if `intent` is not an objection intent; otherwise `true` iff the
    /// persona's objection limits (tenant override, else the default table)
    /// are already exhausted on either the consecutive or the total counter.
    fn should_skip_objection_recording(
        &self,
        intent: &str,
        persona: &str,
        intent_tracker: &dyn IntentTrackerPort,
    ) -> bool {
        if !self.objection_intents.contains(intent) {
            return false;
        }
        let limits = self.tenant.objection_limits(persona, &self.persona_limits);
        intent_tracker.objection_consecutive() >= limits.consecutive
            || intent_tracker.objection_total() >= limits.total
    }

    /// Begin a turn: conditionally record the intent, unconditionally advance
    /// the turn counter, merge non-empty extracted data, build and freeze a
    /// new [`ContextSnapshot`], and clear the proposal/decision regions.
    #[allow(clippy::too_many_arguments)]
    pub fn begin_turn(
        &mut self,
        intent: &str,
        extracted_data: &HashMap<String, Value>,
        envelope: Box<dyn ContextEnvelopePort>,
        user_message: &str,
        frustration_level: f64,
        state_machine: &mut dyn StateMachinePort,
        intent_tracker: &mut dyn IntentTrackerPort,
        flow_config: &dyn FlowConfigPort,
    ) {
        let pre_merge_persona = persona_from(&state_machine.collected_data());
        if !self.should_skip_objection_recording(intent, &pre_merge_persona, intent_tracker) {
            intent_tracker.record(intent, &state_machine.state());
        }

        intent_tracker.advance_turn();

        let non_empty: HashMap<String, Value> = extracted_data
            .iter()
            .filter(|(_, v)| !is_empty_value(v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if !non_empty.is_empty() {
            state_machine.update_data(&non_empty);
        }

        let state = state_machine.state();
        let state_config = flow_config.state(&state).cloned().unwrap_or_default();
        let collected_data = state_machine.collected_data();
        let persona = persona_from(&collected_data);

        self.context = Some(ContextSnapshot {
            state,
            current_intent: intent.to_string(),
            turn_number: intent_tracker.turn_number(),
            persona,
            tenant_id: self.tenant.tenant_id.clone(),
            collected_data,
            state_config,
            state_to_phase: flow_config.state_to_phase().clone(),
            context_envelope: envelope,
            user_message: user_message.to_string(),
            frustration_level,
            state_before_objection: state_machine.state_before_objection(),
        });

        self.action_proposals.clear();
        self.transition_proposals.clear();
        self.data_updates.clear();
        self.flags_to_set.clear();
        self.decision = None;
    }

    /// Append an `Action` proposal to the proposal region.
    pub fn propose_action(&mut self, proposal: Proposal) {
        debug_assert_eq!(proposal.kind, ProposalKind::Action);
        self.action_proposals.push(proposal);
    }

    /// Append a `Transition` proposal to the proposal region.
    pub fn propose_transition(&mut self, proposal: Proposal) {
        debug_assert_eq!(proposal.kind, ProposalKind::Transition);
        self.transition_proposals.push(proposal);
    }

    /// Merge a `DataUpdate` proposal's field/value into the pending data-update map.
    pub fn propose_data_update(&mut self, proposal: Proposal) {
        debug_assert_eq!(proposal.kind, ProposalKind::DataUpdate);
        if let Some(field) = proposal.field {
            self.data_updates.insert(field, proposal.value_json.unwrap_or(Value::Null));
        }
    }

    /// Merge a `FlagSet` proposal's field/value into the pending flags-to-set map.
    pub fn propose_flag_set(&mut self, proposal: Proposal) {
        debug_assert_eq!(proposal.kind, ProposalKind::FlagSet);
        if let Some(field) = proposal.field {
            self.flags_to_set.insert(field, proposal.value_json.unwrap_or(Value::Null));
        }
    }

    /// Route a proposal to the matching region based on its own `kind`. The
    /// orchestrator's source loop calls this once per proposal a source
    /// returns, without needing to branch on kind itself.
    pub fn submit_proposal(&mut self, proposal: Proposal) {
        match proposal.kind {
            ProposalKind::Action => self.propose_action(proposal),
            ProposalKind::Transition => self.propose_transition(proposal),
            ProposalKind::DataUpdate => self.propose_data_update(proposal),
            ProposalKind::FlagSet => self.propose_flag_set(proposal),
        }
    }

    /// The frozen context snapshot. Fails with [`Error::PreTurnAccess`] if
    /// called before `begin_turn`.
    pub fn get_context(&self) -> Result<&ContextSnapshot> {
        self.context.as_ref().ok_or(Error::PreTurnAccess)
    }

    /// The current turn's intent. Fails with [`Error::PreTurnAccess`] if
    /// called before `begin_turn`.
    pub fn current_intent(&self) -> Result<&str> {
        self.get_context().map(|c| c.current_intent.as_str())
    }

    /// Every proposal in the proposal region, actions then transitions.
    pub fn get_proposals(&self) -> Vec<&Proposal> {
        self.action_proposals.iter().chain(self.transition_proposals.iter()).collect()
    }

    /// Action proposals only.
    pub fn get_action_proposals(&self) -> &[Proposal] {
        &self.action_proposals
    }

    /// Transition proposals only.
    pub fn get_transition_proposals(&self) -> &[Proposal] {
        &self.transition_proposals
    }

    /// Pending data-field writes accumulated this turn.
    pub fn get_data_updates(&self) -> &HashMap<String, Value> {
        &self.data_updates
    }

    /// Pending flag writes accumulated this turn.
    pub fn get_flags_to_set(&self) -> &HashMap<String, Value> {
        &self.flags_to_set
    }

    /// Commit the turn's decision: apply `decision.data_updates`, then the
    /// blackboard's own accumulated proposal-layer data updates, to the state
    /// machine's collected data, then store `decision.flags_to_set` for later
    /// on-enter-style application by the orchestrator. Never writes flags
    /// directly into the state machine.
    pub fn commit_decision(&mut self, decision: ResolvedDecision, state_machine: &mut dyn StateMachinePort) {
        if !decision.data_updates.is_empty() {
            state_machine.update_data(&decision.data_updates);
        }
        if !self.data_updates.is_empty() {
            state_machine.update_data(&self.data_updates);
        }
        self.flags_to_set = decision.flags_to_set.clone();
        self.decision = Some(decision);
    }

    /// The committed decision, if `commit_decision` has run this turn.
    pub fn decision(&self) -> Option<&ResolvedDecision> {
        self.decision.as_ref()
    }
}
