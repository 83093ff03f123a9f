//! [`DecisionSanitizer`]: a pure, side-effect-free check that a proposed
//! transition target is a state the flow actually knows about.
//!
//! Ground-truthed against `original_source/src/blackboard/decision_sanitizer.py`.

use std::collections::HashSet;

use serde_json::{json, Value};

/// Reason code the sanitizer appends when it rewrites an unknown target.
pub const INVALID_NEXT_STATE_REASON: &str = "invalid_next_state_sanitized";

/// Outcome of sanitizing one requested transition target.
#[derive(Debug, Clone)]
pub struct SanitizedTarget {
    /// The target as originally requested (possibly empty).
    pub requested_state: String,
    /// The state the orchestrator should actually use.
    pub effective_state: String,
    /// Whether `requested_state` was a member of the known-state set.
    pub is_valid: bool,
    /// Whether a rewrite occurred.
    pub sanitized: bool,
    /// Reason code, present only when `sanitized`.
    pub reason_code: Option<&'static str>,
    /// Free-form diagnostic payload for the resolution trace.
    pub diagnostic: Value,
}

/// Stateless sanitizer: rewrites an unrecognized transition target back to
/// the current state.
pub struct DecisionSanitizer;

impl DecisionSanitizer {
    /// Sanitize `requested_state` against `valid_states`, falling back to
    /// `current_state` when the target is empty or unknown.
    ///
    /// - Empty `requested_state` passes through as `current_state`, unsanitized.
    /// - Empty `valid_states` passes `requested_state` through unchanged
    ///   (nothing to check against).
    /// - A known `requested_state` passes through unchanged.
    /// - Otherwise, rewrites to `current_state` and records the diagnostic.
    pub fn sanitize_target(
        requested_state: &str,
        current_state: &str,
        valid_states: &HashSet<String>,
    ) -> SanitizedTarget {
        if requested_state.is_empty() {
            return SanitizedTarget {
                requested_state: requested_state.to_string(),
                effective_state: current_state.to_string(),
                is_valid: true,
                sanitized: false,
                reason_code: None,
                diagnostic: Value::Null,
            };
        }

        if valid_states.is_empty() || valid_states.contains(requested_state) {
            return SanitizedTarget {
                requested_state: requested_state.to_string(),
                effective_state: requested_state.to_string(),
                is_valid: true,
                sanitized: false,
                reason_code: None,
                diagnostic: Value::Null,
            };
        }

        SanitizedTarget {
            requested_state: requested_state.to_string(),
            effective_state: current_state.to_string(),
            is_valid: false,
            sanitized: true,
            reason_code: Some(INVALID_NEXT_STATE_REASON),
            diagnostic: json!({
                "requested_state": requested_state,
                "current_state": current_state,
                "reason": INVALID_NEXT_STATE_REASON,
            }),
        }
    }

    /// Convenience wrapper used by the orchestrator: sanitize a committed
    /// decision's `next_state` in place, returning the diagnostic so the
    /// caller can attach it to the resolution trace.
    pub fn sanitize_decision(
        next_state: &str,
        current_state: &str,
        valid_states: &HashSet<String>,
    ) -> SanitizedTarget {
        Self::sanitize_target(next_state, current_state, valid_states)
    }
}
