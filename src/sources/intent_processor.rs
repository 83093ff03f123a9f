//! [`IntentProcessorSource`]: general intent-to-action mapping driven by a
//! state's declarative `rules` table.
//!
//! Ground-truthed against `original_source/src/blackboard/sources/intent_processor.py`.
//! Rule formats, evaluated in this order: a bare action string; a conditional
//! `{"when": <condition>, "then": <action>}` object; or a chain, a JSON array
//! of such objects terminated by a bare string default.

use std::collections::HashSet;

use serde_json::Value;

use crate::assigner::{ConditionRegistry, EvaluatorContext, NullConditionRegistry};
use crate::error::Result;
use crate::primitives::Priority;
use crate::proposal::{Metadata, Proposal};

use super::{EnabledFlag, KnowledgeSource, TurnInputs};

/// Intents owned exclusively by `PriceQuestionSource`; never processed here.
pub fn dedicated_source_intents() -> HashSet<&'static str> {
    ["price_question", "pricing_details", "cost_inquiry", "discount_request", "payment_terms", "pricing_comparison", "budget_question"]
        .into_iter()
        .collect()
}

/// Actions that should block further transitions this turn.
pub fn blocking_actions() -> HashSet<&'static str> {
    ["handle_rejection", "emergency_escalate", "end_conversation"].into_iter().collect()
}

fn resolve_rule(rule: &Value, eval_ctx: &EvaluatorContext<'_>, conditions: &dyn ConditionRegistry) -> Option<String> {
    match rule {
        Value::String(action) => Some(action.clone()),
        Value::Object(map) => {
            let condition = map.get("when").and_then(Value::as_str)?;
            let action = map.get("then").and_then(Value::as_str)?;
            conditions.evaluate(condition, eval_ctx).then(|| action.to_string())
        }
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::String(default_action) => return Some(default_action.clone()),
                    Value::Object(map) => {
                        let (Some(condition), Some(action)) = (map.get("when").and_then(Value::as_str), map.get("then").and_then(Value::as_str)) else {
                            continue;
                        };
                        if conditions.evaluate(condition, eval_ctx) {
                            return Some(action.to_string());
                        }
                    }
                    _ => continue,
                }
            }
            None
        }
        _ => None,
    }
}

/// Maps `state_config.rules[intent]` to a proposed action, for intents not
/// owned by a dedicated source.
pub struct IntentProcessorSource {
    name: String,
    enabled: EnabledFlag,
    conditions: Box<dyn ConditionRegistry + Send + Sync>,
}

impl IntentProcessorSource {
    /// Construct with a no-op condition registry (only bare-string rules resolve).
    pub fn new() -> Self {
        Self {
            name: "IntentProcessorSource".to_string(),
            enabled: EnabledFlag::default(),
            conditions: Box::new(NullConditionRegistry),
        }
    }

    /// Construct with a caller-supplied condition registry for conditional rules.
    pub fn with_conditions(conditions: Box<dyn ConditionRegistry + Send + Sync>) -> Self {
        Self {
            conditions,
            ..Self::new()
        }
    }
}

impl Default for IntentProcessorSource {
    fn default() -> Self {
        Self::new()
    }
}

impl KnowledgeSource for IntentProcessorSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority_order(&self) -> u32 {
        40
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
        self.is_enabled() && !dedicated_source_intents().contains(turn.ctx.current_intent.as_str())
    }

    fn contribute(&self, turn: &TurnInputs<'_>) -> Result<Vec<Proposal>> {
        let intent = &turn.ctx.current_intent;
        let Some(rule) = turn.ctx.state_config.rules.get(intent) else {
            return Ok(Vec::new());
        };

        let eval_ctx = EvaluatorContext::from_snapshot(turn.ctx, turn.flow_config, turn.intent_tracker.prev_intent().as_deref());
        let Some(action) = resolve_rule(rule, &eval_ctx, self.conditions.as_ref()) else {
            return Ok(Vec::new());
        };

        let combinable = !blocking_actions().contains(action.as_str());
        let rule_type = match rule {
            Value::String(_) => "string",
            Value::Object(_) => "conditional",
            Value::Array(_) => "chain",
            _ => "unknown",
        };

        let proposal = Proposal::action(action, Priority::Normal, &self.name, format!("rule_{intent}"), combinable)
            .with_metadata(Metadata::new().with("intent", intent.clone()).with("rule_type", rule_type));
        Ok(vec![proposal])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::StateConfig;
    use crate::sources::testutil::*;
    use serde_json::json;

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

    #[test]
    fn bare_string_rule_proposes_action() {
        let source = IntentProcessorSource::new();
        let mut sc = StateConfig::default();
        sc.rules.insert("unclear".to_string(), json!("probe_situation"));
        let ctx = snapshot("spin_problem", "unclear", sc);
        let flow = NullFlow::default();
        let tenant = default_tenant();
        let tracker = FakeTracker::default();
        let proposals = source.contribute(&turn(&ctx, &flow, &tenant, &tracker)).unwrap();
        assert_eq!(proposals[0].value, "probe_situation");
        assert!(proposals[0].combinable);
    }

    #[test]
    fn blocking_action_is_not_combinable() {
        let source = IntentProcessorSource::new();
        let mut sc = StateConfig::default();
        sc.rules.insert("hard_no".to_string(), json!("handle_rejection"));
        let ctx = snapshot("spin_problem", "hard_no", sc);
        let flow = NullFlow::default();
        let tenant = default_tenant();
        let tracker = FakeTracker::default();
        let proposals = source.contribute(&turn(&ctx, &flow, &tenant, &tracker)).unwrap();
        assert!(!proposals[0].combinable);
    }

    #[test]
    fn chain_falls_through_to_default_string() {
        let source = IntentProcessorSource::new();
        let mut sc = StateConfig::default();
        sc.rules.insert(
            "unclear".to_string(),
            json!([{"when": "never_true_condition", "then": "special"}, "probe_situation"]),
        );
        let ctx = snapshot("spin_problem", "unclear", sc);
        let flow = NullFlow::default();
        let tenant = default_tenant();
        let tracker = FakeTracker::default();
        let proposals = source.contribute(&turn(&ctx, &flow, &tenant, &tracker)).unwrap();
        assert_eq!(proposals[0].value, "probe_situation");
    }

    #[test]
    fn dedicated_source_intent_is_skipped() {
        let source = IntentProcessorSource::new();
        let mut sc = StateConfig::default();
        sc.rules.insert("price_question".to_string(), json!("answer_pricing"));
        let ctx = snapshot("spin_problem", "price_question", sc);
        let flow = NullFlow::default();
        let tenant = default_tenant();
        let tracker = FakeTracker::default();
        assert!(!source.should_contribute(&turn(&ctx, &flow, &tenant, &tracker)));
    }

    #[test]
    fn no_rule_for_intent_proposes_nothing() {
        let source = IntentProcessorSource::new();
        let ctx = snapshot("spin_problem", "small_talk", StateConfig::default());
        let flow = NullFlow::default();
        let tenant = default_tenant();
        let tracker = FakeTracker::default();
        assert!(source.contribute(&turn(&ctx, &flow, &tenant, &tracker)).unwrap().is_empty());
    }
}
