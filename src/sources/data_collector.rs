//! [`DataCollectorSource`]: proposes the `data_complete` transition once every
//! required field for the current state has been collected.
//!
//! Ground-truthed against `original_source/src/blackboard/sources/data_collector.py`.
//! Reads the turn's frozen snapshot only; a `DataUpdate` proposed by another
//! source this same turn is invisible here by design (snapshot isolation);
//! completeness becomes visible on the *next* turn's snapshot.

use crate::error::Result;
use crate::primitives::Priority;
use crate::proposal::{Metadata, Proposal};

use super::{EnabledFlag, KnowledgeSource, TurnInputs};

/// Proposes a same-named `data_complete` transition when `required_data` is
/// fully satisfied and the state declares a `data_complete` transition target.
/// Never proposes intent-based transitions; that is `TransitionResolverSource`'s
/// exclusive responsibility.
pub struct DataCollectorSource {
    name: String,
    enabled: EnabledFlag,
}

impl DataCollectorSource {
    /// Construct the source.
    pub fn new() -> Self {
        Self {
            name: "DataCollectorSource".to_string(),
            enabled: EnabledFlag::default(),
        }
    }
}

impl Default for DataCollectorSource {
    fn default() -> Self {
        Self::new()
    }
}

impl KnowledgeSource for DataCollectorSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority_order(&self) -> u32 {
        20
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
        self.is_enabled() && !turn.ctx.state_config.is_final && !turn.ctx.state_config.required_data.is_empty()
    }

    fn contribute(&self, turn: &TurnInputs<'_>) -> Result<Vec<Proposal>> {
        if !turn.ctx.has_all_required_data() {
            return Ok(Vec::new());
        }

        let Some(target) = turn.ctx.get_transition("data_complete") else {
            return Ok(Vec::new());
        };

        let proposal = Proposal::transition(target, Priority::Normal, &self.name, "data_complete").with_metadata(
            Metadata::new()
                .with(
                    "required_fields",
                    turn.ctx.state_config.required_data.clone(),
                )
                .with(
                    "collected_fields",
                    turn.ctx.collected_data.keys().cloned().collect::<Vec<_>>(),
                ),
        );
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
    fn proposes_data_complete_when_all_fields_present() {
        let mut sc = StateConfig::default();
        sc.required_data = vec!["company_size".into()];
        sc.transitions.insert("data_complete".into(), "bant_budget".into());
        let mut ctx = snapshot("spin_problem", "info_provided", sc);
        ctx.collected_data.insert("company_size".into(), json!("50"));

        let source = DataCollectorSource::new();
        let flow = NullFlow::default();
        let tenant = default_tenant();
        let tracker = FakeTracker::default();
        let t = turn(&ctx, &flow, &tenant, &tracker);
        assert!(source.should_contribute(&t));
        let proposals = source.contribute(&t).unwrap();
        assert_eq!(proposals[0].value, "bant_budget");
        assert!(proposals[0].combinable);
    }

    #[test]
    fn missing_field_skips() {
        let mut sc = StateConfig::default();
        sc.required_data = vec!["company_size".into()];
        sc.transitions.insert("data_complete".into(), "bant_budget".into());
        let ctx = snapshot("spin_problem", "info_provided", sc);

        let source = DataCollectorSource::new();
        let flow = NullFlow::default();
        let tenant = default_tenant();
        let tracker = FakeTracker::default();
        assert!(source.contribute(&turn(&ctx, &flow, &tenant, &tracker)).unwrap().is_empty());
    }

    #[test]
    fn complete_without_transition_definition_proposes_nothing() {
        let mut sc = StateConfig::default();
        sc.required_data = vec!["company_size".into()];
        let mut ctx = snapshot("spin_problem", "info_provided", sc);
        ctx.collected_data.insert("company_size".into(), json!("50"));

        let source = DataCollectorSource::new();
        let flow = NullFlow::default();
        let tenant = default_tenant();
        let tracker = FakeTracker::default();
        assert!(source.contribute(&turn(&ctx, &flow, &tenant, &tracker)).unwrap().is_empty());
    }

    #[test]
    fn final_state_is_never_a_candidate() {
        let mut sc = StateConfig::default();
        sc.required_data = vec!["company_size".into()];
        sc.is_final = true;
        let ctx = snapshot("close", "info_provided", sc);

        let source = DataCollectorSource::new();
        let flow = NullFlow::default();
        let tenant = default_tenant();
        let tracker = FakeTracker::default();
        assert!(!source.should_contribute(&turn(&ctx, &flow, &tenant, &tracker)));
    }
}
