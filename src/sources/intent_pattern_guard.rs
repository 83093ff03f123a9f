//! [`IntentPatternGuardSource`]: configurable fatigue detection for any intent
//! category (today: comparison fatigue; tomorrow: any pattern, config-only).
//!
//! Ground-truthed against
//! `original_source/src/blackboard/sources/intent_pattern_guard.py`. Patterns
//! are supplied at construction time rather than loaded from a global config
//! module, consistent with this crate's host-owns-configuration boundary
//! (`spec.md` §1's non-goals).

use std::collections::HashMap;

use crate::error::Result;
use crate::primitives::Priority;
use crate::proposal::{Metadata, Proposal};

use super::{EnabledFlag, KnowledgeSource, TurnInputs};

/// Per-persona streak/total thresholds for one pattern.
#[derive(Debug, Clone, Copy)]
pub struct PatternLimits {
    /// Consecutive-turn streak threshold.
    pub streak: u32,
    /// Lifetime total threshold.
    pub total: u32,
}

impl Default for PatternLimits {
    fn default() -> Self {
        Self { streak: 3, total: 5 }
    }
}

/// One configured intent-fatigue pattern.
#[derive(Debug, Clone)]
pub struct PatternDefinition {
    /// Member intents, in no particular order.
    pub intents: Vec<String>,
    /// Per-persona limit overrides; `"default"` is the fallback entry.
    pub persona_limits: HashMap<String, PatternLimits>,
    /// Action proposed when the current state is `close`.
    pub close_action: String,
    /// Action proposed in every other state.
    pub default_action: String,
}

impl PatternDefinition {
    fn limits_for(&self, persona: &str) -> PatternLimits {
        self.persona_limits
            .get(persona)
            .or_else(|| self.persona_limits.get("default"))
            .copied()
            .unwrap_or_default()
    }
}

/// Detects a fatiguing intent pattern (the classic case: repeated comparison
/// requests) independent of `StallGuard`'s state-turn-count view, and proposes
/// a state-aware nudge or close action once a persona-specific threshold is
/// crossed.
pub struct IntentPatternGuardSource {
    name: String,
    enabled: EnabledFlag,
    patterns: HashMap<String, PatternDefinition>,
    intent_to_pattern: HashMap<String, String>,
}

impl IntentPatternGuardSource {
    /// Construct with no patterns configured (the source will never fire).
    pub fn new() -> Self {
        Self {
            name: "IntentPatternGuardSource".to_string(),
            enabled: EnabledFlag::default(),
            patterns: HashMap::new(),
            intent_to_pattern: HashMap::new(),
        }
    }

    /// Construct with a caller-supplied pattern table, building the O(1)
    /// intent -> pattern lookup once at construction.
    pub fn with_patterns(patterns: HashMap<String, PatternDefinition>) -> Self {
        let mut intent_to_pattern = HashMap::new();
        for (pattern_name, def) in &patterns {
            for intent in &def.intents {
                intent_to_pattern.insert(intent.clone(), pattern_name.clone());
            }
        }
        Self {
            patterns,
            intent_to_pattern,
            ..Self::new()
        }
    }

    fn pattern_streak(tracker: &dyn crate::ports::IntentTrackerPort, pattern_name: &str, def: &PatternDefinition) -> u32 {
        let streak = tracker.category_streak(pattern_name);
        if streak > 0 {
            return streak;
        }
        let intents: std::collections::HashSet<&str> = def.intents.iter().map(String::as_str).collect();
        let recent = tracker.get_recent_intents(10);
        let mut streak = 0;
        for intent in recent.iter().rev() {
            if intents.contains(intent.as_str()) {
                streak += 1;
            } else {
                break;
            }
        }
        streak
    }

    fn pattern_total(tracker: &dyn crate::ports::IntentTrackerPort, pattern_name: &str, def: &PatternDefinition) -> u32 {
        let total = tracker.category_total(pattern_name);
        if total > 0 {
            return total;
        }
        def.intents.iter().map(|i| tracker.total_count(i)).sum()
    }
}

impl Default for IntentPatternGuardSource {
    fn default() -> Self {
        Self::new()
    }
}

impl KnowledgeSource for IntentPatternGuardSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority_order(&self) -> u32 {
        38
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
        if !self.is_enabled() || self.patterns.is_empty() {
            return false;
        }
        if !turn.tenant.is_feature_enabled("intent_pattern_guard") {
            return false;
        }
        if turn.ctx.state_config.autonomous {
            return false;
        }

        let Some(pattern_name) = self.intent_to_pattern.get(&turn.ctx.current_intent) else {
            return false;
        };
        let def = &self.patterns[pattern_name];
        let limits = def.limits_for(&turn.ctx.persona);

        let streak = Self::pattern_streak(turn.intent_tracker, pattern_name, def);
        let total = Self::pattern_total(turn.intent_tracker, pattern_name, def);

        streak >= limits.streak || total >= limits.total
    }

    fn contribute(&self, turn: &TurnInputs<'_>) -> Result<Vec<Proposal>> {
        let Some(pattern_name) = self.intent_to_pattern.get(&turn.ctx.current_intent) else {
            return Ok(Vec::new());
        };
        let def = &self.patterns[pattern_name];
        let limits = def.limits_for(&turn.ctx.persona);
        let streak = Self::pattern_streak(turn.intent_tracker, pattern_name, def);

        let action = if turn.ctx.state == "close" {
            def.close_action.as_str()
        } else {
            def.default_action.as_str()
        };
        let priority = if streak >= limits.streak * 2 { Priority::High } else { Priority::Normal };

        let proposal = Proposal::action(
            action,
            priority,
            &self.name,
            format!("intent_pattern_{pattern_name}"),
            true,
        )
        .with_metadata(
            Metadata::new()
                .with("pattern", pattern_name.clone())
                .with("streak", streak)
                .with("threshold", limits.streak)
                .with("persona", turn.ctx.persona.clone())
                .with("state", turn.ctx.state.clone()),
        );
        Ok(vec![proposal])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::StateConfig;
    use crate::sources::testutil::*;

    fn comparison_pattern() -> HashMap<String, PatternDefinition> {
        let mut persona_limits = HashMap::new();
        persona_limits.insert("default".to_string(), PatternLimits { streak: 3, total: 5 });
        let mut patterns = HashMap::new();
        patterns.insert(
            "comparison_like".to_string(),
            PatternDefinition {
                intents: vec!["comparison".to_string(), "question_product_comparison".to_string()],
                persona_limits,
                close_action: "close_answer_and_collect".to_string(),
                default_action: "nudge_progress".to_string(),
            },
        );
        patterns
    }

    fn turn<'a>(
        ctx: &'a crate::context::ContextSnapshot,
        flow: &'a NullFlow,
        tenant: &'a crate::config::TenantConfig,
        tracker: &'a FakeTracker,
    ) -> TurnInputs<'a> {
        TurnInputs {
            ctx,
            flow_config: flow,
            tenant,
            intent_tracker: tracker,
            circular_flow: None,
            llm: None,
            guard_analyser: None,
        }
    }

    fn enabled_tenant() -> crate::config::TenantConfig {
        let mut tenant = default_tenant();
        tenant.features.insert("intent_pattern_guard".to_string(), true);
        tenant
    }

    #[test]
    fn feature_disabled_by_default_never_fires() {
        let source = IntentPatternGuardSource::with_patterns(comparison_pattern());
        let ctx = snapshot("spin_problem", "comparison", StateConfig::default());
        let flow = NullFlow::default();
        let tenant = default_tenant();
        let tracker = FakeTracker { category_streaks: [("comparison_like".to_string(), 3)].into(), ..Default::default() };
        assert!(!source.should_contribute(&turn(&ctx, &flow, &tenant, &tracker)));
    }

    #[test]
    fn below_threshold_does_not_fire() {
        let source = IntentPatternGuardSource::with_patterns(comparison_pattern());
        let ctx = snapshot("spin_problem", "comparison", StateConfig::default());
        let flow = NullFlow::default();
        let tenant = enabled_tenant();
        let tracker = FakeTracker { category_streaks: [("comparison_like".to_string(), 1)].into(), ..Default::default() };
        assert!(!source.should_contribute(&turn(&ctx, &flow, &tenant, &tracker)));
    }

    #[test]
    fn streak_at_threshold_proposes_default_action_at_normal_priority() {
        let source = IntentPatternGuardSource::with_patterns(comparison_pattern());
        let ctx = snapshot("spin_problem", "comparison", StateConfig::default());
        let flow = NullFlow::default();
        let tenant = enabled_tenant();
        let tracker = FakeTracker { category_streaks: [("comparison_like".to_string(), 3)].into(), ..Default::default() };
        let t = turn(&ctx, &flow, &tenant, &tracker);
        assert!(source.should_contribute(&t));
        let proposals = source.contribute(&t).unwrap();
        assert_eq!(proposals[0].value, "nudge_progress");
        assert_eq!(proposals[0].priority, Priority::Normal);
    }

    #[test]
    fn double_threshold_streak_escalates_to_high() {
        let source = IntentPatternGuardSource::with_patterns(comparison_pattern());
        let ctx = snapshot("close", "comparison", StateConfig::default());
        let flow = NullFlow::default();
        let tenant = enabled_tenant();
        let tracker = FakeTracker { category_streaks: [("comparison_like".to_string(), 6)].into(), ..Default::default() };
        let t = turn(&ctx, &flow, &tenant, &tracker);
        let proposals = source.contribute(&t).unwrap();
        assert_eq!(proposals[0].value, "close_answer_and_collect");
        assert_eq!(proposals[0].priority, Priority::High);
    }

    #[test]
    fn autonomous_state_delegates_to_llm_and_never_fires() {
        let source = IntentPatternGuardSource::with_patterns(comparison_pattern());
        let mut sc = StateConfig::default();
        sc.autonomous = true;
        let ctx = snapshot("autonomous_discovery", "comparison", sc);
        let flow = NullFlow::default();
        let tenant = enabled_tenant();
        let tracker = FakeTracker { category_streaks: [("comparison_like".to_string(), 5)].into(), ..Default::default() };
        assert!(!source.should_contribute(&turn(&ctx, &flow, &tenant, &tracker)));
    }

    #[test]
    fn unrelated_intent_is_rejected_in_o1_lookup() {
        let source = IntentPatternGuardSource::with_patterns(comparison_pattern());
        let ctx = snapshot("spin_problem", "price_question", StateConfig::default());
        let flow = NullFlow::default();
        let tenant = enabled_tenant();
        let tracker = FakeTracker::default();
        assert!(!source.should_contribute(&turn(&ctx, &flow, &tenant, &tracker)));
    }
}
