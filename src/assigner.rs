//! [`PriorityAssigner`]: declarative, config-driven tie-break rank assignment.
//!
//! Ground-truthed against `original_source/src/blackboard/priority_assigner.py`.
//! Consumes the [`crate::config::PriorityDefinition`] rows declared by flow
//! config and, for each proposal, writes the best-matching definition's
//! numeric `priority` into `proposal.priority_rank` (never touching the
//! [`crate::primitives::Priority`] enum itself).

use crate::config::{ElseClause, Handler, SourceGate, Trigger};
use crate::context::ContextSnapshot;
use crate::primitives::ProposalKind;
use crate::proposal::Proposal;
use crate::ports::FlowConfigPort;

/// Evaluates a named condition against a snapshot-derived context. The
/// orchestrator's host supplies the implementation (rule/condition engines
/// are explicitly out of this crate's scope per `spec.md` §1).
pub trait ConditionRegistry {
    /// Evaluate `condition` against `ctx`. An unknown condition name should
    /// return `false` rather than panicking (the original logs a warning and
    /// treats it as unmet).
    fn evaluate(&self, condition: &str, ctx: &EvaluatorContext) -> bool;
}

/// A registry that evaluates nothing, for hosts with no conditional
/// priority definitions.
#[derive(Debug, Default)]
pub struct NullConditionRegistry;

impl ConditionRegistry for NullConditionRegistry {
    fn evaluate(&self, _condition: &str, _ctx: &EvaluatorContext) -> bool {
        false
    }
}

/// Read-only view handed to [`ConditionRegistry::evaluate`], assembled from a
/// [`ContextSnapshot`] so conditions never need the full snapshot type.
#[derive(Debug, Clone)]
pub struct EvaluatorContext<'a> {
    /// Current state name.
    pub state: &'a str,
    /// Current (possibly refined) intent.
    pub current_intent: &'a str,
    /// Previous turn's intent, if tracked.
    pub prev_intent: Option<&'a str>,
    /// Turn counter.
    pub turn_number: u64,
    /// Whether the state is a phase boundary.
    pub is_phase_state: bool,
    /// Frustration signal.
    pub frustration_level: f64,
    /// Whether the dialog appears stuck.
    pub is_stuck: bool,
}

impl<'a> EvaluatorContext<'a> {
    /// Build an evaluator context from a frozen turn snapshot.
    pub fn from_snapshot(
        ctx: &'a ContextSnapshot,
        flow_config: &dyn FlowConfigPort,
        prev_intent: Option<&'a str>,
    ) -> Self {
        Self {
            state: &ctx.state,
            current_intent: &ctx.current_intent,
            prev_intent,
            turn_number: ctx.turn_number,
            is_phase_state: flow_config.is_phase_state(&ctx.state),
            frustration_level: ctx.frustration_level,
            is_stuck: ctx.context_envelope.is_stuck(),
        }
    }
}

/// Intents treated as go-back triggers by [`Handler::CircularFlowHandler`].
/// Ground-truthed against `original_source/src/blackboard/sources/go_back_guard.py`'s
/// `GO_BACK_INTENTS` constant (it includes `correct_info`, not just `go_back`).
pub const GO_BACK_INTENTS: &[&str] = &["go_back", "correct_info"];

/// Assigns `priority_rank` to proposals from declarative flow-config rows.
pub struct PriorityAssigner;

impl PriorityAssigner {
    /// Apply every matching [`crate::config::PriorityDefinition`] in
    /// `flow_config.priorities()` to each proposal in `proposals`, mutating
    /// them in place.
    pub fn assign(
        proposals: &mut [Proposal],
        ctx: &ContextSnapshot,
        flow_config: &dyn FlowConfigPort,
        tenant: &crate::config::TenantConfig,
        prev_intent: Option<&str>,
        conditions: &dyn ConditionRegistry,
    ) {
        let definitions = flow_config.priorities();
        for proposal in proposals.iter_mut() {
            let mut best: Option<&crate::config::PriorityDefinition> = None;
            for def in definitions {
                if Self::matches(def, proposal, ctx, flow_config, tenant, prev_intent, conditions) {
                    if best.map(|b| def.priority < b.priority).unwrap_or(true) {
                        best = Some(def);
                    }
                }
            }
            if let Some(def) = best {
                let should_write = proposal
                    .priority_rank
                    .map(|existing| def.priority < existing)
                    .unwrap_or(true);
                if should_write {
                    proposal.priority_rank = Some(def.priority);
                    proposal.metadata = std::mem::take(&mut proposal.metadata)
                        .with("priority_name", def.name.clone())
                        .with("priority_value", def.priority);
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn matches(
        def: &crate::config::PriorityDefinition,
        proposal: &Proposal,
        ctx: &ContextSnapshot,
        flow_config: &dyn FlowConfigPort,
        tenant: &crate::config::TenantConfig,
        prev_intent: Option<&str>,
        conditions: &dyn ConditionRegistry,
    ) -> bool {
        if let Some(flag) = &def.feature_flag {
            if !tenant.is_feature_enabled(flag) {
                return false;
            }
        }

        if let Some(intents) = &def.intents {
            if !intents.iter().any(|i| i == &ctx.current_intent) {
                return false;
            }
        }

        if let Some(category) = &def.intent_category {
            if !Self::intent_in_category(flow_config, category, &ctx.current_intent) {
                return false;
            }
        }

        if let Some(trigger) = def.trigger {
            if !Self::matches_trigger(trigger, proposal) {
                return false;
            }
        }

        if let Some(action) = &def.action {
            if proposal.kind != ProposalKind::Action || &proposal.value != action {
                return false;
            }
        }

        if let Some(handler) = def.handler {
            if !Self::matches_handler(handler, flow_config, &ctx.current_intent) {
                return false;
            }
        }

        if let Some(source) = def.source {
            if !Self::matches_source_gate(source, proposal) {
                return false;
            }
        }

        if def.use_resolver && proposal.kind != ProposalKind::Action {
            return false;
        }

        if def.use_transitions {
            if proposal.kind != ProposalKind::Transition {
                return false;
            }
            if def.intents.is_none() && def.intent_category.is_none() && def.trigger.is_none()
                && !proposal.reason_code.starts_with("intent_transition_")
            {
                return false;
            }
        }

        if let Some(condition) = &def.condition {
            let eval_ctx = EvaluatorContext::from_snapshot(ctx, flow_config, prev_intent);
            if conditions.evaluate(condition, &eval_ctx) {
                return true;
            }
            return matches!(def.else_clause, Some(ElseClause::UseTransitions))
                && proposal.kind == ProposalKind::Transition
                && proposal.reason_code.starts_with("intent_transition_")
                && !ctx.state_config.autonomous;
        }

        true
    }

    fn matches_trigger(trigger: Trigger, proposal: &Proposal) -> bool {
        match trigger {
            Trigger::DataComplete => proposal.reason_code == "data_complete",
            Trigger::Any => proposal.reason_code == "transition_any",
        }
    }

    fn matches_handler(handler: Handler, flow_config: &dyn FlowConfigPort, intent: &str) -> bool {
        match handler {
            Handler::PhaseProgressHandler => flow_config.progress_intents().iter().any(|i| i == intent),
            Handler::CircularFlowHandler => GO_BACK_INTENTS.contains(&intent),
        }
    }

    fn matches_source_gate(gate: SourceGate, proposal: &Proposal) -> bool {
        match gate {
            SourceGate::Rules => proposal.reason_code.starts_with("rule_"),
        }
    }

    fn intent_in_category(flow_config: &dyn FlowConfigPort, category: &str, intent: &str) -> bool {
        flow_config
            .constants()
            .get("intent_categories")
            .and_then(|v| v.get(category))
            .and_then(|v| v.as_array())
            .map(|members| members.iter().any(|m| m.as_str() == Some(intent)))
            .unwrap_or(false)
    }
}
