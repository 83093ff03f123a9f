//! External collaborator interfaces ("ports") the host process implements.
//!
//! `spec.md` §9 calls out the original system's duck-typed `Protocol` classes
//! (`StateMachine`, `IntentTracker`, `FlowConfig`, `ContextEnvelope`, `TenantConfig`)
//! as needing explicit interfaces in a systems language. These traits are those
//! interfaces; the orchestrator and knowledge sources hold only non-owning
//! references (`&dyn Trait` / `&mut dyn Trait`) to them, never ownership, so there
//! are no cycles between the orchestrator, the state machine, and the intent
//! tracker.

use serde_json::Value;
use std::collections::HashMap;

use crate::error::Result;

/// Aggregate go-back (circular-flow) counters and history, owned by the state
/// machine.
pub trait CircularFlowPort {
    /// Current go-back count.
    fn go_back_count(&self) -> u32;
    /// Configured maximum go-backs before the limit is considered reached.
    fn max_go_backs(&self) -> u32;
    /// Whether the limit has been reached.
    fn is_limit_reached(&self) -> bool {
        self.go_back_count() >= self.max_go_backs()
    }
    /// Remaining go-backs before the limit.
    fn get_remaining_go_backs(&self) -> u32 {
        self.max_go_backs().saturating_sub(self.go_back_count())
    }
    /// Go-back target state for `from_state`, if the flow defines one.
    fn get_go_back_target(&self, from_state: &str) -> Option<String>;
    /// Free-form stats for diagnostics/compatibility fields.
    fn get_stats(&self) -> HashMap<String, Value>;
    /// History of prior go-backs, most recent last.
    fn get_history(&self) -> Vec<(String, String)>;
    /// Record a go-back from `from` to `to`. Called only by the orchestrator's
    /// deferred side-effect step, never by a knowledge source.
    fn record_go_back(&mut self, from: &str, to: &str);
}

/// The external dialog state machine: durable state, phase, and collected data.
///
/// `transition_to` is the single point through which state, phase, and last-action
/// are changed together, keeping the three consistent even under concurrent
/// observation from outside the turn.
pub trait StateMachinePort {
    /// Current state name.
    fn state(&self) -> String;
    /// Current phase, if the flow tracks phases independently of state.
    fn current_phase(&self) -> Option<String>;
    /// Last committed action, if any.
    fn last_action(&self) -> Option<String>;
    /// Saved return point for leaving/returning from `handle_objection`.
    fn state_before_objection(&self) -> Option<String>;
    /// Set the saved return point (or clear it with `None`).
    fn set_state_before_objection(&mut self, state: Option<String>);
    /// Read-only view of collected data.
    fn collected_data(&self) -> HashMap<String, Value>;
    /// Merge `updates` into collected data.
    fn update_data(&mut self, updates: &HashMap<String, Value>);
    /// Whether the current state is terminal for this dialog.
    fn is_final(&self) -> bool;
    /// Atomically update state, phase, and last action together. Returns whether
    /// the transition was accepted (it may be rejected by `validate` against the
    /// flow's declared transition graph).
    fn transition_to(
        &mut self,
        next_state: &str,
        action: Option<&str>,
        phase: Option<&str>,
        source: &str,
        validate: bool,
    ) -> bool;
    /// Recompute `current_phase` from `state` via the flow's `state_to_phase` map.
    fn sync_phase_from_state(&mut self, state_to_phase: &HashMap<String, String>);
    /// Access to the go-back counters, if the state machine tracks them.
    fn circular_flow(&mut self) -> Option<&mut dyn CircularFlowPort>;
    /// Read-only access to the go-back counters, for knowledge sources that
    /// only ever read them during `contribute`. Defaults to `None` so hosts
    /// without circular-flow tracking need not implement it.
    fn circular_flow_ref(&self) -> Option<&dyn CircularFlowPort> {
        None
    }
}

/// Per-dialog intent history, consumed by several knowledge sources and by
/// `Blackboard::begin_turn`'s objection-recording gate.
pub trait IntentTrackerPort {
    /// Monotonically increasing turn counter.
    fn turn_number(&self) -> u64;
    /// The intent recorded on the previous turn, if any.
    fn prev_intent(&self) -> Option<String>;
    /// Record `intent` as having occurred in `state`.
    fn record(&mut self, intent: &str, state: &str);
    /// Unconditionally advance the turn counter. Called once per turn regardless
    /// of whether the intent was recorded.
    fn advance_turn(&mut self);
    /// Consecutive objection-intent count ending at the most recent turn.
    fn objection_consecutive(&self) -> u32;
    /// Total objection-intent count over the dialog's lifetime.
    fn objection_total(&self) -> u32;
    /// Total occurrences of `intent` over the dialog's lifetime.
    fn total_count(&self, intent: &str) -> u32;
    /// Total occurrences of intents in category `category`.
    fn category_total(&self, category: &str) -> u32;
    /// Consecutive-turn streak of intents in category `category`.
    fn category_streak(&self, category: &str) -> u32;
    /// All recorded intents belonging to `category`, in recording order.
    fn get_intents_by_category(&self, category: &str) -> Vec<String>;
    /// The `limit` most recently recorded intents, most recent last.
    fn get_recent_intents(&self, limit: usize) -> Vec<String>;
}

/// Per-state configuration: required/optional data, transitions, phase, and the
/// stall/exhaustion thresholds several guards key off of.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct StateConfig {
    /// Human-readable goal of this state, for diagnostics.
    #[serde(default)]
    pub goal: Option<String>,
    /// Intent -> action/transition rules, keyed by intent name. Values are one of
    /// a bare action string, `{when, then}`, or a chain, represented here as raw
    /// JSON so `IntentProcessor` can interpret the shape itself.
    #[serde(default)]
    pub rules: HashMap<String, Value>,
    /// Trigger -> target-state map (`data_complete`, `any`, `go_back`, intent names).
    #[serde(default)]
    pub transitions: HashMap<String, String>,
    /// Data fields required before `DataCollector` proposes `data_complete`.
    #[serde(default)]
    pub required_data: Vec<String>,
    /// Data fields this state may optionally collect.
    #[serde(default)]
    pub optional_data: Vec<String>,
    /// Phase name, if distinct from state name.
    #[serde(default)]
    pub phase: Option<String>,
    /// Whether this state is terminal.
    #[serde(default)]
    pub is_final: bool,
    /// Whether this state is driven by `AutonomousDecision` rather than rules.
    #[serde(default)]
    pub autonomous: bool,
    /// Flags to set automatically on entering this state.
    #[serde(default)]
    pub on_enter_flags: HashMap<String, Value>,
    /// Turn budget before `StallGuard`'s hard tier fires.
    #[serde(default)]
    pub max_turns_in_state: Option<u32>,
    /// Turn count at which `PhaseExhausted` starts offering options.
    #[serde(default)]
    pub phase_exhaust_threshold: Option<u32>,
    /// Eject target when `max_turns_in_state` is hit and no terminal state applies.
    #[serde(default)]
    pub max_turns_fallback: Option<String>,
    /// Candidate terminal states reachable from here.
    #[serde(default)]
    pub terminal_states: Vec<String>,
    /// Per-terminal-state required data fields: `terminal_states[n] ->` the
    /// fields that must be present in `collected_data` before that terminal is
    /// considered reachable.
    #[serde(default)]
    pub terminal_state_requirements: HashMap<String, Vec<String>>,
    /// Next state in the autonomous phase chain, for `AutonomousDecision`'s
    /// `_get_phase_order` walk. `None` outside the autonomous flow.
    #[serde(default)]
    pub next_phase_state: Option<String>,
    /// Previous state in the autonomous phase chain, symmetric with
    /// `next_phase_state`.
    #[serde(default)]
    pub prev_phase_state: Option<String>,
}

impl StateConfig {
    /// `max(max_turns_in_state - 1, 3)`, the boundary between `PhaseExhausted`'s
    /// window and `StallGuard`'s soft tier.
    pub fn stall_soft(&self) -> u32 {
        self.max_turns_in_state
            .map(|m| m.saturating_sub(1).max(3))
            .unwrap_or(3)
    }
}

/// Flow-wide configuration: the full state table plus cross-cutting constants.
pub trait FlowConfigPort {
    /// All declared states, by name.
    fn states(&self) -> &HashMap<String, StateConfig>;
    /// Config for a single state, if declared.
    fn state(&self, name: &str) -> Option<&StateConfig> {
        self.states().get(name)
    }
    /// state -> phase map, for `sync_phase_from_state` and compatibility fields.
    fn state_to_phase(&self) -> &HashMap<String, String>;
    /// Canonical phase for `state`, falling back to `state` itself if unmapped.
    fn get_phase_for_state(&self, state: &str) -> String {
        self.state_to_phase()
            .get(state)
            .cloned()
            .unwrap_or_else(|| state.to_string())
    }
    /// Whether `state` is itself a phase boundary (its own phase name).
    fn is_phase_state(&self, state: &str) -> bool {
        self.state_to_phase().get(state).map(String::as_str) == Some(state)
    }
    /// Named entry points (`escalation`, `autonomous_discovery`, ...).
    fn entry_points(&self) -> &HashMap<String, String>;
    /// Priority-assigner definitions, in declaration order.
    fn priorities(&self) -> &[crate::config::PriorityDefinition];
    /// Free-form constants, e.g. `blackboard.sources.<name>.enabled` and feature
    /// flags that are not tenant-scoped.
    fn constants(&self) -> &HashMap<String, Value>;
    /// Intent names considered "progress" for `PhaseExhausted`'s no-progress check.
    fn progress_intents(&self) -> &[String];
}

/// Behavioral-signal bundle attached to a turn (engagement, momentum, stall
/// counters, secondary-classification artifacts). Produced upstream by the
/// classification/refinement layer; read-only from the blackboard's perspective.
pub trait ContextEnvelopePort: std::fmt::Debug {
    /// Current frustration signal, `0.0..=1.0`.
    fn frustration_level(&self) -> f64 {
        0.0
    }
    /// Whether the dialog appears stuck (no forward progress recently).
    fn is_stuck(&self) -> bool {
        false
    }
    /// Whether engagement is oscillating rather than trending.
    fn has_oscillation(&self) -> bool {
        false
    }
    /// Signed momentum direction, `-1.0..=1.0`.
    fn momentum(&self) -> f64 {
        0.0
    }
    /// Coarse engagement bucket (`"low" | "medium" | "high"`).
    fn engagement_level(&self) -> String {
        "medium".to_string()
    }
    /// Whether the user repeated a question.
    fn repeated_question(&self) -> bool {
        false
    }
    /// Trend of classifier confidence over recent turns.
    fn confidence_trend(&self) -> f64 {
        0.0
    }
    /// Total objections raised so far in the dialog.
    fn total_objections(&self) -> u32 {
        0
    }
    /// Whether a breakthrough (positive turning point) has occurred.
    fn has_breakthrough(&self) -> bool {
        false
    }
    /// Turns elapsed since the last breakthrough.
    fn turns_since_breakthrough(&self) -> u32 {
        0
    }
    /// Whether a guard intervened this turn.
    fn guard_intervention(&self) -> bool {
        false
    }
    /// Requested tone, if any.
    fn tone(&self) -> Option<String> {
        None
    }
    /// Consecutive "unclear" classification count.
    fn unclear_count(&self) -> u32 {
        0
    }
    /// Disambiguation option list, when `in_disambiguation`.
    fn disambiguation_options(&self) -> Vec<String> {
        Vec::new()
    }
    /// Disambiguation prompt text, when `in_disambiguation`.
    fn disambiguation_question(&self) -> Option<String> {
        None
    }
    /// Consecutive turns spent in the current state without a transition.
    fn consecutive_same_state(&self) -> u32 {
        0
    }
    /// Whether forward progress was detected this turn (new goal, data, or
    /// intent category change); read by `PhaseExhaustedSource` and
    /// `StallGuardSource`'s soft tier.
    fn is_progressing(&self) -> bool {
        false
    }
    /// Whether any data field was extracted from the user's message this turn.
    fn has_extracted_data(&self) -> bool {
        false
    }
    /// Window-based count of recent bot responses similar to the one about to be
    /// sent, computed upstream by `ContextWindow.compute_content_repeat_count()`.
    /// Read by `ContentRepetitionGuard`.
    fn content_repeat_count(&self) -> u32 {
        0
    }
    /// The action committed on the previous turn, if any. Read by
    /// `ContentRepetitionGuard`'s anti-meta-loop guard.
    fn last_action(&self) -> Option<String> {
        None
    }
    /// The intent classified on the previous turn, if any. Read by
    /// `ContentRepetitionGuard`'s same-topic fallback check.
    fn last_intent(&self) -> Option<String> {
        None
    }
    /// Autonomous states already visited this dialog, persisted across source
    /// re-instantiation. Read by `AutonomousDecision` to prevent looping back to
    /// a previously visited phase.
    fn state_history(&self) -> Vec<String> {
        Vec::new()
    }
    /// Serialize to a JSON map for logging/trace diagnostics.
    fn to_value(&self) -> Value {
        Value::Null
    }
}

/// Request passed to [`LlmPort::decide`] by `AutonomousDecision`.
#[derive(Debug, Clone)]
pub struct LlmDecisionRequest {
    /// Candidate next states the LLM may choose between.
    pub allowed_states: Vec<String>,
    /// Free-form prompt context (collected data, recent turns, ...).
    pub prompt_context: Value,
}

/// Structured response required from [`LlmPort::decide`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LlmDecision {
    /// Chosen next state.
    pub next_state: String,
    /// Always `"autonomous_respond"` by contract; kept explicit for auditability.
    pub action: String,
    /// Free-form rationale, logged but not otherwise interpreted.
    pub reasoning: String,
    /// Whether the LLM believes a transition should actually occur this turn.
    pub should_transition: bool,
}

/// The LLM client `AutonomousDecision` calls through. Modeled as a synchronous
/// port (see `SPEC_FULL.md` §5): the per-turn pipeline is single-threaded and
/// non-yielding, so an `async fn` here would force `contribute` itself to be
/// async for every source, not just this one.
pub trait LlmPort {
    /// Ask the LLM to choose the next autonomous step.
    fn decide(&self, request: &LlmDecisionRequest) -> Result<LlmDecision>;
}

/// Tiers reported by [`GuardAnalyserPort::analyse`], mapped onto
/// `ConversationGuard`'s four proposals by its `TIER_MAP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardTier {
    /// Mild friction: ask the user to rephrase.
    Tier1,
    /// Moderate friction: offer explicit options.
    Tier2,
    /// Severe friction: skip ahead to a designated phase.
    Tier3,
    /// Critical friction: end the dialog gracefully.
    Tier4,
    /// No intervention needed.
    None,
}

/// The external conversation-health analyser `ConversationGuard` calls through.
pub trait GuardAnalyserPort {
    /// Classify the current turn's friction tier.
    fn analyse(&self, envelope: &dyn ContextEnvelopePort) -> Result<GuardTier>;
}
