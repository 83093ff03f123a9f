//! Crate-wide error type.

use thiserror::Error;

use crate::validator::ValidationError;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the blackboard orchestrator and its supporting components.
///
/// Variants map onto the error taxonomy of the turn pipeline: a source's own
/// `contribute` failing is non-fatal and is reported through the event bus rather
/// than unwinding the turn; validation and processing errors instead short-circuit
/// the turn into a fallback decision.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// A knowledge source's `contribute` raised. Caught by the orchestrator, which
    /// emits `ERROR_OCCURRED` and continues the turn; the source's proposals already
    /// appended before the failure remain visible.
    #[error("knowledge source '{source}' failed to contribute: {cause}")]
    SourceContribution {
        /// Name of the failing source.
        source: String,
        /// The underlying failure.
        cause: String,
    },

    /// A knowledge source's constructor raised during `SourceRegistry::create_sources`.
    /// Fatal: construction of the whole source list aborts.
    #[error("knowledge source '{source}' failed to construct: {cause}")]
    SourceConstruction {
        /// Name of the registration being instantiated.
        source: String,
        /// The underlying failure.
        cause: String,
    },

    /// One or more proposals failed validation with `severity = error`. Blocking:
    /// the orchestrator skips resolution and returns a fallback decision.
    #[error("{} blocking validation error(s)", .0.len())]
    Validation(Vec<ValidationError>),

    /// Any uncaught failure inside the orchestrator's own pipeline code, outside of
    /// a specific source's `contribute`.
    #[error("turn processing failed: {0}")]
    Processing(String),

    /// `Blackboard::get_context` or `Blackboard::current_intent` called before
    /// `begin_turn`. Programmer error; fails loudly rather than returning a default.
    #[error("blackboard accessed before begin_turn() was called")]
    PreTurnAccess,

    /// A registry mutation (`register`/`unregister`/`create_sources` with new
    /// registrations) was attempted after `freeze()`.
    #[error("source registry is frozen")]
    RegistryFrozen,

    /// `unregister`, `get_registration`, or a per-source config lookup referenced a
    /// name with no matching registration.
    #[error("no registration named '{0}'")]
    UnknownRegistration(String),

    /// An external port (`LlmPort`, `GuardAnalyserPort`, `StateMachinePort`, ...)
    /// returned an error.
    #[error("external port '{port}' failed: {cause}")]
    Port {
        /// Name of the port that failed.
        port: String,
        /// The underlying failure.
        cause: String,
    },
}
