//! [`ProposalValidator`]: structural and semantic checks run over the
//! accumulated proposal set before the conflict resolver sees it.
//!
//! Ground-truthed against `original_source/src/blackboard/proposal_validator.py`:
//! six checks in a fixed order, each with its own error code and severity.

use std::collections::HashSet;

use crate::proposal::Proposal;

/// Severity of a [`ValidationError`]. Only `Error` blocks the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Blocking: the orchestrator skips resolution and returns a fallback decision.
    Error,
    /// Non-blocking: recorded for diagnostics only.
    Warning,
}

/// One finding against a single [`Proposal`].
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The proposal the finding is about.
    pub proposal: Proposal,
    /// Stable error code (`INVALID_STRUCTURE`, `INVALID_ACTION`, ...).
    pub error_code: &'static str,
    /// Human-readable detail.
    pub message: String,
    /// Whether this finding blocks the turn.
    pub severity: Severity,
}

/// Validates proposals against the known action/state/reason-code vocabularies.
///
/// `valid_actions` and `valid_reason_codes` are optional allow-lists: when
/// `None`, the corresponding check is skipped entirely (the original treats an
/// absent set as "not configured", not as "nothing is valid"). `valid_states`
/// is effectively mandatory in practice (the orchestrator always supplies
/// `flow_config.states().keys()`) but is still `Option` here for symmetry and
/// for callers validating proposals outside a full orchestrator.
pub struct ProposalValidator {
    valid_actions: Option<HashSet<String>>,
    valid_states: Option<HashSet<String>>,
    valid_reason_codes: Option<HashSet<String>>,
    strict_mode: bool,
}

impl ProposalValidator {
    /// Construct a validator. `strict_mode` elevates the action-vocabulary
    /// check from warning to error.
    pub fn new(
        valid_actions: Option<HashSet<String>>,
        valid_states: Option<HashSet<String>>,
        valid_reason_codes: Option<HashSet<String>>,
        strict_mode: bool,
    ) -> Self {
        Self {
            valid_actions,
            valid_states,
            valid_reason_codes,
            strict_mode,
        }
    }

    /// Validate every proposal in `proposals`, returning every finding in
    /// proposal order.
    pub fn validate(&self, proposals: &[Proposal]) -> Vec<ValidationError> {
        proposals
            .iter()
            .flat_map(|p| self.validate_one(p))
            .collect()
    }

    /// Whether any finding in `errors` is blocking.
    pub fn has_blocking_errors(errors: &[ValidationError]) -> bool {
        errors.iter().any(|e| e.severity == Severity::Error)
    }

    /// Only the blocking findings.
    pub fn get_errors_only(errors: &[ValidationError]) -> Vec<&ValidationError> {
        errors.iter().filter(|e| e.severity == Severity::Error).collect()
    }

    /// Only the non-blocking findings.
    pub fn get_warnings_only(errors: &[ValidationError]) -> Vec<&ValidationError> {
        errors.iter().filter(|e| e.severity == Severity::Warning).collect()
    }

    fn validate_one(&self, proposal: &Proposal) -> Vec<ValidationError> {
        use crate::primitives::{Priority, ProposalKind};

        let mut findings = Vec::new();

        // 1. Structural.
        let structural = proposal.validate_structure();
        if !structural.is_empty() {
            findings.push(ValidationError {
                proposal: proposal.clone(),
                error_code: "INVALID_STRUCTURE",
                message: structural.join("; "),
                severity: Severity::Error,
            });
        }

        // 2. Action validity.
        if proposal.kind == ProposalKind::Action {
            if let Some(valid_actions) = &self.valid_actions {
                if !valid_actions.contains(&proposal.value) {
                    findings.push(ValidationError {
                        proposal: proposal.clone(),
                        error_code: "INVALID_ACTION",
                        message: format!("action '{}' is not a known action", proposal.value),
                        severity: if self.strict_mode {
                            Severity::Error
                        } else {
                            Severity::Warning
                        },
                    });
                }
            }
        }

        // 3. State validity.
        if proposal.kind == ProposalKind::Transition {
            if let Some(valid_states) = &self.valid_states {
                if !valid_states.contains(&proposal.value) {
                    findings.push(ValidationError {
                        proposal: proposal.clone(),
                        error_code: "INVALID_STATE",
                        message: format!("transition target '{}' is not a known state", proposal.value),
                        severity: Severity::Error,
                    });
                }
            }
        }

        // 4. Reason-code documentation.
        if let Some(valid_reason_codes) = &self.valid_reason_codes {
            if !valid_reason_codes.contains(&proposal.reason_code) {
                findings.push(ValidationError {
                    proposal: proposal.clone(),
                    error_code: "UNDOCUMENTED_REASON_CODE",
                    message: format!("reason_code '{}' is not documented", proposal.reason_code),
                    severity: Severity::Warning,
                });
            }
        }

        // 5. Combinable consistency: Transition must be combinable.
        if proposal.kind == ProposalKind::Transition && !proposal.combinable {
            findings.push(ValidationError {
                proposal: proposal.clone(),
                error_code: "INVALID_COMBINABLE",
                message: "transition proposals must be combinable".to_string(),
                severity: Severity::Error,
            });
        }

        // 6. Action with combinable=false and LOW priority is suspicious: a
        // blocking action that carries only fallback-level priority.
        if proposal.kind == ProposalKind::Action
            && !proposal.combinable
            && proposal.priority == Priority::Low
        {
            findings.push(ValidationError {
                proposal: proposal.clone(),
                error_code: "BLOCKING_LOW_PRIORITY",
                message: "a blocking (combinable=false) action should not carry LOW priority".to_string(),
                severity: Severity::Warning,
            });
        }

        findings
    }
}
