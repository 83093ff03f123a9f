//! [`ConflictResolver`]: partitions a turn's proposals by kind, ranks each
//! partition, and merges the winners into one [`ResolvedDecision`].
//!
//! Ground-truthed against `original_source/src/blackboard/conflict_resolver.py`.

use std::collections::HashMap;

use serde_json::Value;

use crate::context::ContextSnapshot;
use crate::decision::{ResolutionTrace, ResolvedDecision};
use crate::primitives::ProposalKind;
use crate::proposal::Proposal;

/// Reason code appended when `resolve_with_fallback` rewrites the outcome
/// using a state's `any` transition.
pub const FALLBACK_ANY_TRANSITION: &str = "fallback_any_transition";

/// Stateless resolver: one call per turn, no retained state between calls.
pub struct ConflictResolver;

impl ConflictResolver {
    /// Resolve `proposals` into one decision, given the state the turn began
    /// in and the action to report when nothing wins (`"continue_current_goal"`
    /// at the orchestrator layer, but callers may supply any default).
    pub fn resolve(proposals: &[Proposal], current_state: &str, default_action: &str) -> ResolvedDecision {
        // 1. Partition by kind.
        let mut actions: Vec<Proposal> = proposals
            .iter()
            .filter(|p| p.kind == ProposalKind::Action)
            .cloned()
            .collect();
        let mut transitions: Vec<Proposal> = proposals
            .iter()
            .filter(|p| p.kind == ProposalKind::Transition)
            .cloned()
            .collect();

        // 2. Stable sort by (priority value, priority rank) ascending; lower is
        // stronger for both.
        actions.sort_by_key(|p| (p.priority.value(), p.effective_rank()));
        transitions.sort_by_key(|p| (p.priority.value(), p.effective_rank()));

        let action_ranking = actions
            .iter()
            .map(|p| (p.value.clone(), p.priority, p.source_name.clone()))
            .collect();
        let transition_ranking = transitions
            .iter()
            .map(|p| (p.value.clone(), p.priority, p.source_name.clone()))
            .collect();

        // 3. Winning action is the head of the action ranking, if any.
        let winning_action = actions.first().cloned();
        let winning_transition = transitions.first().cloned();

        let mut rejected: Vec<Proposal> = actions.iter().skip(1).cloned().collect();
        rejected.extend(transitions.iter().skip(1).cloned());

        // 4-6. Merge decision.
        let (merge_decision, blocking_reason, action, next_state, mut reason_codes) =
            match (&winning_action, &winning_transition) {
                (Some(wa), _) if !wa.combinable => {
                    // A blocking action wins outright; any transition is rejected.
                    if let Some(wt) = &winning_transition {
                        rejected.insert(0, wt.clone());
                    }
                    (
                        "BLOCKED".to_string(),
                        Some(format!("action '{}' is not combinable with a transition", wa.value)),
                        wa.value.clone(),
                        current_state.to_string(),
                        vec![wa.reason_code.clone()],
                    )
                }
                (Some(wa), Some(wt)) => (
                    "MERGED".to_string(),
                    None,
                    wa.value.clone(),
                    wt.value.clone(),
                    vec![wa.reason_code.clone(), wt.reason_code.clone()],
                ),
                (None, Some(wt)) => (
                    "TRANSITION_ONLY".to_string(),
                    None,
                    default_action.to_string(),
                    wt.value.clone(),
                    vec![wt.reason_code.clone()],
                ),
                (Some(wa), None) => (
                    "ACTION_ONLY".to_string(),
                    None,
                    wa.value.clone(),
                    current_state.to_string(),
                    vec![wa.reason_code.clone()],
                ),
                (None, None) => (
                    "NO_PROPOSALS".to_string(),
                    None,
                    default_action.to_string(),
                    current_state.to_string(),
                    Vec::new(),
                ),
            };
        reason_codes.retain(|r| !r.is_empty());

        // 7. Data updates and flags apply unconditionally; they never compete.
        let mut data_updates = HashMap::new();
        for p in proposals.iter().filter(|p| p.kind == ProposalKind::DataUpdate) {
            if let (Some(field), Some(value)) = (&p.field, &p.value_json) {
                data_updates.insert(field.clone(), value.clone());
            }
        }
        let mut flags_to_set = HashMap::new();
        for p in proposals.iter().filter(|p| p.kind == ProposalKind::FlagSet) {
            if let (Some(field), Some(value)) = (&p.field, &p.value_json) {
                flags_to_set.insert(field.clone(), value.clone());
            }
        }

        let winning_action_metadata = winning_action.as_ref().map(|p| p.metadata.clone());

        let trace = ResolutionTrace {
            action_proposals: actions,
            transition_proposals: transitions,
            action_ranking,
            transition_ranking,
            winning_action,
            winning_transition,
            merge_decision,
            blocking_reason,
            winning_action_metadata,
            fallback_applied: false,
            sanitizer_diagnostic: None,
        };

        ResolvedDecision::new(action, next_state, reason_codes, rejected, trace, data_updates, flags_to_set)
    }

    /// [`Self::resolve`], then apply the state's `any` fallback transition when
    /// resolution produced no winning transition and no blocking action (the
    /// mechanism `TransitionResolverSource` deliberately excludes `any` from,
    /// leaving it to this rewrite instead).
    pub fn resolve_with_fallback(
        proposals: &[Proposal],
        ctx: &ContextSnapshot,
        default_action: &str,
    ) -> ResolvedDecision {
        let mut decision = Self::resolve(proposals, &ctx.state, default_action);

        let blocked = decision.resolution_trace.merge_decision == "BLOCKED";
        let has_transition = decision.resolution_trace.winning_transition.is_some();

        if !blocked && !has_transition {
            if let Some(any_target) = ctx.get_transition("any") {
                let any_target = any_target.to_string();
                decision.next_state = any_target;
                decision.reason_codes.push(FALLBACK_ANY_TRANSITION.to_string());
                decision.resolution_trace.fallback_applied = true;
                if decision.resolution_trace.merge_decision == "ACTION_ONLY" {
                    decision.resolution_trace.merge_decision = "MERGED".to_string();
                } else if decision.resolution_trace.merge_decision == "NO_PROPOSALS" {
                    decision.resolution_trace.merge_decision = "TRANSITION_ONLY".to_string();
                }
            }
        }

        decision
    }
}

/// Convenience used by orchestrator tests: build a `Value` summary of a
/// decision for assertions without depending on `Debug` formatting.
pub fn decision_summary(decision: &ResolvedDecision) -> Value {
    serde_json::json!({
        "action": decision.action,
        "next_state": decision.next_state,
        "reason_codes": decision.reason_codes,
        "merge_decision": decision.resolution_trace.merge_decision,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::Priority;
    use crate::ports::{ContextEnvelopePort, StateConfig};

    #[derive(Debug, Default)]
    struct NullEnvelope;
    impl ContextEnvelopePort for NullEnvelope {}

    fn snapshot(state_config: StateConfig) -> ContextSnapshot {
        ContextSnapshot {
            state: "spin_situation".into(),
            current_intent: "info_provided".into(),
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

    #[test]
    fn higher_priority_action_wins_regardless_of_arrival_order() {
        let low = Proposal::action("continue_current_goal", Priority::Low, "A", "r1", true);
        let high = Proposal::action("escalate_to_human", Priority::Critical, "B", "r2", false);
        let decision = ConflictResolver::resolve(&[low, high], "spin_situation", "continue_current_goal");
        assert_eq!(decision.action, "escalate_to_human");
        assert_eq!(decision.resolution_trace.merge_decision, "BLOCKED");
    }

    #[test]
    fn blocking_action_rejects_any_transition() {
        let action = Proposal::action("end_conversation", Priority::High, "A", "r1", false);
        let transition = Proposal::transition("soft_close", Priority::High, "B", "r2");
        let decision = ConflictResolver::resolve(&[action, transition], "handle_objection", "continue_current_goal");
        assert_eq!(decision.resolution_trace.merge_decision, "BLOCKED");
        assert_eq!(decision.next_state, "handle_objection");
        assert_eq!(decision.rejected_proposals.len(), 1);
    }

    #[test]
    fn action_and_transition_merge_when_action_is_combinable() {
        let action = Proposal::action("answer_with_pricing", Priority::Normal, "A", "r1", true);
        let transition = Proposal::transition("spin_problem", Priority::Normal, "B", "r2");
        let decision = ConflictResolver::resolve(&[action, transition], "spin_situation", "continue_current_goal");
        assert_eq!(decision.action, "answer_with_pricing");
        assert_eq!(decision.next_state, "spin_problem");
        assert_eq!(decision.resolution_trace.merge_decision, "MERGED");
    }

    #[test]
    fn no_proposals_falls_through_to_default_action_and_current_state() {
        let decision = ConflictResolver::resolve(&[], "spin_situation", "continue_current_goal");
        assert_eq!(decision.action, "continue_current_goal");
        assert_eq!(decision.next_state, "spin_situation");
        assert_eq!(decision.resolution_trace.merge_decision, "NO_PROPOSALS");
    }

    #[test]
    fn any_fallback_rewrites_target_only_when_nothing_else_transitions() {
        let mut sc = StateConfig::default();
        sc.transitions.insert("any".to_string(), "soft_close".to_string());
        let ctx = snapshot(sc);
        let action = Proposal::action("continue_current_goal", Priority::Normal, "Orchestrator", "default", true);
        let decision = ConflictResolver::resolve_with_fallback(&[action], &ctx, "continue_current_goal");
        assert_eq!(decision.next_state, "soft_close");
        assert!(decision.resolution_trace.fallback_applied);
        assert!(decision.reason_codes.contains(&FALLBACK_ANY_TRANSITION.to_string()));
    }

    #[test]
    fn any_fallback_does_not_override_a_real_transition() {
        let mut sc = StateConfig::default();
        sc.transitions.insert("any".to_string(), "soft_close".to_string());
        let ctx = snapshot(sc);
        let transition = Proposal::transition("spin_problem", Priority::Normal, "TransitionResolver", "intent_transition_info_provided");
        let decision = ConflictResolver::resolve_with_fallback(&[transition], &ctx, "continue_current_goal");
        assert_eq!(decision.next_state, "spin_problem");
        assert!(!decision.resolution_trace.fallback_applied);
    }
}
