//! Knowledge sources: independent, priority-ordered contributors that read a
//! turn's [`ContextSnapshot`] and propose actions/transitions/data/flags.
//!
//! Ground-truthed against `original_source/src/blackboard/sources/`: the base
//! class (`knowledge_source.py`) plus one module per concrete source.

use crate::config::TenantConfig;
use crate::context::ContextSnapshot;
use crate::error::Result;
use crate::ports::{CircularFlowPort, FlowConfigPort, GuardAnalyserPort, IntentTrackerPort, LlmPort};
use crate::proposal::Proposal;

pub mod autonomous_decision;
pub mod content_repetition_guard;
pub mod conversation_guard;
pub mod data_collector;
pub mod disambiguation;
pub mod escalation;
pub mod fact_question;
pub mod go_back_guard;

pub mod intent_pattern_guard;
pub mod intent_processor;
pub mod objection_guard;
pub mod objection_return;
pub mod phase_exhausted;
pub mod price_question;
pub mod stall_guard;
pub mod transition_resolver;

#[cfg(test)]
pub(crate) mod testutil;

/// Everything a knowledge source may consult while contributing. Bundled so
/// that adding a new collaborator never changes every source's signature.
pub struct TurnInputs<'a> {
    /// The turn's frozen snapshot.
    pub ctx: &'a ContextSnapshot,
    /// Flow-wide configuration (states, transitions, priorities, constants).
    pub flow_config: &'a dyn FlowConfigPort,
    /// Active tenant configuration.
    pub tenant: &'a TenantConfig,
    /// Per-dialog intent history.
    pub intent_tracker: &'a dyn IntentTrackerPort,
    /// Go-back counters, if the state machine tracks them.
    pub circular_flow: Option<&'a dyn CircularFlowPort>,
    /// LLM client, for `AutonomousDecision`.
    pub llm: Option<&'a dyn LlmPort>,
    /// Conversation-health analyser, for `ConversationGuard`.
    pub guard_analyser: Option<&'a dyn GuardAnalyserPort>,
}

/// A single priority-ordered contributor to a turn's proposal set.
///
/// Mirrors `knowledge_source.py`'s base class: a source carries its own
/// enabled/disabled flag (independent of any per-tenant feature flag, which
/// individual sources additionally consult inside `should_contribute`), and
/// `contribute` is only ever called when `should_contribute` returned `true`.
pub trait KnowledgeSource {
    /// Stable source name, used in `reason_code`/`source_name` fields and in
    /// registry listings.
    fn name(&self) -> &str;
    /// Fixed ordering used by `SourceRegistry::create_sources` (lower runs
    /// earlier). Distinct from [`crate::primitives::Priority`], which ranks
    /// *proposals*, not sources.
    fn priority_order(&self) -> u32;
    /// Whether this source instance is currently enabled.
    fn is_enabled(&self) -> bool;
    /// Enable this source instance.
    fn enable(&mut self);
    /// Disable this source instance.
    fn disable(&mut self);
    /// Whether this source should run at all this turn. The default simply
    /// checks [`KnowledgeSource::is_enabled`]; most sources override this to
    /// add their own gating (feature flags, intent membership, thresholds).
    fn should_contribute(&self, turn: &TurnInputs<'_>) -> bool {
        let _ = turn;
        self.is_enabled()
    }
    /// Produce zero or more proposals. Only called when
    /// [`KnowledgeSource::should_contribute`] returned `true`.
    fn contribute(&self, turn: &TurnInputs<'_>) -> Result<Vec<Proposal>>;
}

/// Shared enabled/disabled flag storage, embedded by every concrete source so
/// only `name`/`priority_order`/`should_contribute`/`contribute` need writing
/// out per source.
#[derive(Debug, Clone, Copy)]
pub struct EnabledFlag(pub bool);

impl Default for EnabledFlag {
    fn default() -> Self {
        Self(true)
    }
}
