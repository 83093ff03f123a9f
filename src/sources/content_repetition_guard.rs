//! [`ContentRepetitionGuardSource`]: cross-state, window-based guard against the
//! bot repeating its own content.
//!
//! Ground-truthed against
//! `original_source/src/blackboard/sources/content_repetition_guard.py`. Unlike
//! [`super::stall_guard::StallGuardSource`], which watches turns spent in one
//! *state*, this guard watches a rolling window of recent bot *responses*
//! (`ContextEnvelopePort::content_repeat_count`) so it catches direct loops
//! (A-A-A), oscillation (A-B-A-B), and meta-loops (KB -> redirect -> KB) alike.

use crate::error::Result;
use crate::primitives::Priority;
use crate::proposal::{Metadata, Proposal};

use super::{EnabledFlag, KnowledgeSource, TurnInputs};

/// Count at or above which a redirect nudge fires.
pub const SOFT_THRESHOLD: u32 = 2;
/// Count at or above which the dialog is escalated and closed.
pub const HARD_THRESHOLD: u32 = 3;

/// Own-intervention actions, excluded from re-triggering the guard the very
/// next turn so the count has a chance to recompute off a fresh response.
const INTERVENTION_ACTIONS: &[&str] = &["redirect_after_repetition", "escalate_repeated_content"];

/// Detects repeated bot content and escalates once a hard threshold is crossed.
pub struct ContentRepetitionGuardSource {
    name: String,
    enabled: EnabledFlag,
}

impl ContentRepetitionGuardSource {
    /// Construct the source.
    pub fn new() -> Self {
        Self {
            name: "ContentRepetitionGuardSource".to_string(),
            enabled: EnabledFlag::default(),
        }
    }
}

impl Default for ContentRepetitionGuardSource {
    fn default() -> Self {
        Self::new()
    }
}

impl KnowledgeSource for ContentRepetitionGuardSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority_order(&self) -> u32 {
        37
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

        let state_config = &turn.ctx.state_config;
        if state_config.max_turns_in_state == Some(0) {
            return false;
        }

        let collected = &turn.ctx.collected_data;
        let terminal_satisfied = state_config.terminal_state_requirements.values().any(|reqs| {
            !reqs.is_empty() && reqs.iter().all(|f| collected.get(f).is_some())
        });
        if terminal_satisfied {
            return false;
        }

        let envelope = &turn.ctx.context_envelope;
        let count = envelope.content_repeat_count();
        if count < SOFT_THRESHOLD {
            return false;
        }

        if let Some(last_action) = envelope.last_action() {
            if INTERVENTION_ACTIONS.contains(&last_action.as_str()) {
                return false;
            }
        }

        if envelope.repeated_question() {
            return true;
        }

        match envelope.last_intent() {
            Some(last) => last == turn.ctx.current_intent,
            None => false,
        }
    }

    fn contribute(&self, turn: &TurnInputs<'_>) -> Result<Vec<Proposal>> {
        let count = turn.ctx.context_envelope.content_repeat_count();

        if count >= HARD_THRESHOLD {
            let action = Proposal::action(
                "escalate_repeated_content",
                Priority::Critical,
                &self.name,
                "content_repetition_escalate",
                true,
            )
            .with_metadata(Metadata::new().with("repeat_count", count));
            let transition = Proposal::transition(
                "soft_close",
                Priority::Critical,
                &self.name,
                "content_repetition_escalate",
            )
            .with_metadata(Metadata::new().with("repeat_count", count));
            Ok(vec![action, transition])
        } else {
            let action = Proposal::action(
                "redirect_after_repetition",
                Priority::High,
                &self.name,
                "content_repetition_redirect",
                true,
            )
            .with_metadata(Metadata::new().with("repeat_count", count));
            Ok(vec![action])
        }
    }
}
