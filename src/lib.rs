//! `dialogue-blackboard`: a blackboard-style dialogue management orchestrator.
//!
//! Every turn, a priority-ordered set of independent [`sources::KnowledgeSource`]
//! contributors reads an immutable [`context::ContextSnapshot`] and writes
//! [`proposal::Proposal`]s onto a shared blackboard. A [`resolver::ConflictResolver`]
//! arbitrates the proposals into one [`decision::ResolvedDecision`], which the
//! [`sanitizer::DecisionSanitizer`] and [`validator::ProposalValidator`] guard
//! against invalid targets before [`orchestrator`] commits it through the host's
//! [`ports::StateMachinePort`].
//!
//! Ground-truthed throughout against `original_source/src/blackboard/` and
//! `original_source/src/classifier/`; see `DESIGN.md` for the per-module ledger.

pub mod assigner;
pub mod blackboard;
pub mod config;
pub mod context;
pub mod decision;
pub mod error;
pub mod event;
pub mod orchestrator;
pub mod ports;
pub mod primitives;
pub mod proposal;
pub mod refinement;
pub mod registry;
pub mod resolver;
pub mod sanitizer;
pub mod sources;
pub mod validator;

pub use blackboard::DialogueBlackboard;
pub use config::TenantConfig;
pub use context::ContextSnapshot;
pub use decision::{ResolutionTrace, ResolvedDecision};
pub use error::{Error, Result};
pub use orchestrator::DialogueOrchestrator;
pub use primitives::{Priority, ProposalKind};
pub use proposal::{Metadata, Proposal};
pub use refinement::{
    register_builtin_layers, LayerPriority, RefinementContext, RefinementDecision, RefinementLayer,
    RefinementLayerRegistry, RefinementPipeline, RefinementResult,
};
pub use registry::SourceRegistry;
pub use resolver::ConflictResolver;
pub use sanitizer::DecisionSanitizer;
pub use sources::KnowledgeSource;
pub use validator::ProposalValidator;
