//! [`SourceRegistry`]: process-wide, priority-ordered plugin table for
//! [`crate::sources::KnowledgeSource`] implementations.
//!
//! Ground-truthed against `original_source/src/blackboard/source_registry.py`.
//! Rust has no runtime subclass check, so the `TypeError` branch of the
//! original's `register` has no counterpart here: the type system already
//! guarantees every registration's factory produces a `Box<dyn KnowledgeSource>`.
//! Everything else is carried: registering a *new* name is allowed even on a
//! frozen registry; only a name collision on a frozen registry is rejected,
//! and `unregister` is rejected unconditionally while frozen.

use std::collections::HashMap;
use std::sync::OnceLock;

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::sources::KnowledgeSource;

/// Per-source construction input: the registration's own name (so a single
/// factory function can be shared/parameterized) plus whatever free-form
/// config the host supplied for this source via `create_sources`.
#[derive(Debug, Clone, Default)]
pub struct SourceOptions {
    /// The registration name this instance is being built for.
    pub name: String,
    /// Source-specific config, looked up by `config_key` (or `name` if
    /// `config_key` is unset) in the `source_configs` map passed to
    /// `create_sources`.
    pub config: Value,
}

/// Factory closure a registration stores instead of a bare class reference,
/// per `spec.md` §9's redesign note ("one constructor per source taking a
/// typed options struct").
pub type SourceFactory = Box<dyn Fn(&SourceOptions) -> Result<Box<dyn KnowledgeSource>> + Send + Sync>;

/// One registered knowledge source: its instantiation recipe plus the
/// metadata `create_sources`/`list_registered` need.
pub struct SourceRegistration {
    /// Unique registration name.
    pub name: String,
    /// Execution order; lower runs earlier.
    pub priority_order: u32,
    /// Whether this source is enabled when `sources.<name>.enabled` is absent
    /// from the global config.
    pub enabled_by_default: bool,
    /// Key to look up this source's config under, in `source_configs`.
    /// Defaults to `name` when `None`.
    pub config_key: Option<String>,
    /// Human-readable description, for diagnostics/listings.
    pub description: String,
    factory: SourceFactory,
}

impl std::fmt::Debug for SourceRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistration")
            .field("name", &self.name)
            .field("priority_order", &self.priority_order)
            .field("enabled_by_default", &self.enabled_by_default)
            .field("config_key", &self.config_key)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl SourceRegistration {
    /// Build a registration. `priority_order` defaults to 100 and
    /// `enabled_by_default` to `true` when following the original's
    /// `SourceRegistration` dataclass field defaults is desired; callers here
    /// set every field explicitly, matching this crate's built-in table.
    pub fn new(
        name: impl Into<String>,
        priority_order: u32,
        enabled_by_default: bool,
        config_key: Option<String>,
        description: impl Into<String>,
        factory: SourceFactory,
    ) -> Self {
        Self {
            name: name.into(),
            priority_order,
            enabled_by_default,
            config_key,
            description: description.into(),
            factory,
        }
    }

    fn config_lookup_key(&self) -> &str {
        self.config_key.as_deref().unwrap_or(&self.name)
    }
}

/// Read-only snapshot of a [`SourceRegistration`]'s metadata, without its factory.
#[derive(Debug, Clone)]
pub struct RegistrationInfo {
    /// Unique registration name.
    pub name: String,
    /// Execution order; lower runs earlier.
    pub priority_order: u32,
    /// Whether this source is enabled absent an explicit override.
    pub enabled_by_default: bool,
    /// Key this registration's config is looked up under.
    pub config_key: Option<String>,
    /// Human-readable description.
    pub description: String,
}

impl From<&SourceRegistration> for RegistrationInfo {
    fn from(reg: &SourceRegistration) -> Self {
        Self {
            name: reg.name.clone(),
            priority_order: reg.priority_order,
            enabled_by_default: reg.enabled_by_default,
            config_key: reg.config_key.clone(),
            description: reg.description.clone(),
        }
    }
}

#[derive(Default)]
struct RegistryState {
    registrations: HashMap<String, SourceRegistration>,
    frozen: bool,
}

fn state() -> &'static Mutex<RegistryState> {
    static STATE: OnceLock<Mutex<RegistryState>> = OnceLock::new();
    STATE.get_or_init(|| Mutex::new(RegistryState::default()))
}

/// Process-wide registry of knowledge-source plugins.
///
/// Every method is an associated function over the single shared table
/// (mirroring the original's classmethod-based `SourceRegistry`), not a value
/// type you construct; there is exactly one registry per process.
pub struct SourceRegistry;

impl SourceRegistry {
    /// Register a knowledge source. Overwrites an existing registration of
    /// the same name unless the registry is frozen, in which case a name
    /// collision is rejected; registering a genuinely new name succeeds even
    /// while frozen.
    pub fn register(registration: SourceRegistration) -> Result<()> {
        let mut guard = state().lock();
        if guard.frozen && guard.registrations.contains_key(&registration.name) {
            return Err(Error::RegistryFrozen);
        }
        tracing::debug!(source = %registration.name, order = registration.priority_order, "registered knowledge source");
        guard.registrations.insert(registration.name.clone(), registration);
        Ok(())
    }

    /// Remove a registration. Unconditionally rejected while frozen.
    pub fn unregister(name: &str) -> Result<bool> {
        let mut guard = state().lock();
        if guard.frozen {
            return Err(Error::RegistryFrozen);
        }
        let removed = guard.registrations.remove(name).is_some();
        if removed {
            tracing::debug!(source = %name, "unregistered knowledge source");
        }
        Ok(removed)
    }

    /// Snapshot the metadata of a single registration, without its factory.
    pub fn get_registration(name: &str) -> Result<RegistrationInfo> {
        let guard = state().lock();
        guard
            .registrations
            .get(name)
            .map(RegistrationInfo::from)
            .ok_or_else(|| Error::UnknownRegistration(name.to_string()))
    }

    /// Registered names in `priority_order` ascending order.
    pub fn list_registered() -> Vec<String> {
        let guard = state().lock();
        let mut regs: Vec<&SourceRegistration> = guard.registrations.values().collect();
        regs.sort_by_key(|r| r.priority_order);
        regs.iter().map(|r| r.name.clone()).collect()
    }

    /// Instantiate every enabled registration, in `priority_order` ascending
    /// order. `global_enabled` overrides (by name) whether a source is
    /// enabled, falling back to `enabled_by_default` when a name is absent.
    /// `source_configs` is looked up by each registration's `config_key`
    /// (or its name). Any constructor error aborts the whole call.
    pub fn create_sources(
        global_enabled: &HashMap<String, bool>,
        source_configs: &HashMap<String, Value>,
    ) -> Result<Vec<Box<dyn KnowledgeSource>>> {
        let guard = state().lock();
        let mut regs: Vec<&SourceRegistration> = guard.registrations.values().collect();
        regs.sort_by_key(|r| r.priority_order);

        let mut sources = Vec::with_capacity(regs.len());
        for reg in regs {
            let is_enabled = global_enabled.get(&reg.name).copied().unwrap_or(reg.enabled_by_default);
            if !is_enabled {
                tracing::debug!(source = %reg.name, "source disabled by config");
                continue;
            }
            let config = source_configs.get(reg.config_lookup_key()).cloned().unwrap_or(Value::Null);
            let options = SourceOptions {
                name: reg.name.clone(),
                config,
            };
            let source = (reg.factory)(&options).map_err(|cause| Error::SourceConstruction {
                source: reg.name.clone(),
                cause: cause.to_string(),
            })?;
            tracing::debug!(source = %reg.name, "created source instance");
            sources.push(source);
        }
        tracing::info!(count = sources.len(), "created knowledge sources");
        Ok(sources)
    }

    /// Whether a registration of `name` currently exists.
    pub fn is_registered(name: &str) -> bool {
        state().lock().registrations.contains_key(name)
    }

    /// Freeze the registry: further `register`/`unregister` calls are
    /// restricted (collisions/unregisters rejected) until [`Self::reset`].
    pub fn freeze() {
        state().lock().frozen = true;
        tracing::info!("source registry frozen");
    }

    /// Clear every registration and unfreeze. Intended for test isolation.
    pub fn reset() {
        let mut guard = state().lock();
        guard.registrations.clear();
        guard.frozen = false;
    }
}

/// Register this crate's sixteen built-in knowledge sources at their
/// documented `priority_order` values (`SPEC_FULL.md` §4.8). Idempotent:
/// calling it more than once simply re-registers the same names.
pub fn register_builtin_sources() -> Result<()> {
    use crate::sources::*;

    macro_rules! builtin {
        ($name:literal, $order:expr, $config_key:literal, $desc:literal, $ty:ty) => {
            SourceRegistry::register(SourceRegistration::new(
                $name,
                $order,
                true,
                Some($config_key.to_string()),
                $desc,
                Box::new(|_opts: &SourceOptions| Ok(Box::new(<$ty>::new()) as Box<dyn KnowledgeSource>)),
            ))?;
        };
    }

    builtin!(
        "GoBackGuardSource",
        5,
        "go_back_guard",
        "Acknowledges and bounds go-back/correct-info requests against the circular-flow limit.",
        go_back_guard::GoBackGuardSource
    );
    builtin!(
        "ConversationGuardSource",
        7,
        "conversation_guard",
        "Maps the external guard analyser's friction tier onto a rephrase/options/skip/close proposal.",
        conversation_guard::ConversationGuardSource
    );
    builtin!(
        "DisambiguationSource",
        8,
        "disambiguation",
        "Asks a clarifying question when the envelope reports disambiguation_needed.",
        disambiguation::DisambiguationSource
    );
    builtin!(
        "PriceQuestionSource",
        10,
        "price_question",
        "Answers the closed set of price-related intents without blocking a data_complete transition.",
        price_question::PriceQuestionSource
    );
    builtin!(
        "FactQuestionSource",
        15,
        "fact_question",
        "Answers general informational questions, mirroring PriceQuestionSource's contract.",
        fact_question::FactQuestionSource
    );
    builtin!(
        "DataCollectorSource",
        20,
        "data_collector",
        "Proposes the data_complete transition once a state's required_data is fully collected.",
        data_collector::DataCollectorSource
    );
    builtin!(
        "ObjectionGuardSource",
        30,
        "objection_guard",
        "Enforces per-persona consecutive/total objection limits and sets _objection_limit_final.",
        objection_guard::ObjectionGuardSource
    );
    builtin!(
        "ObjectionReturnSource",
        35,
        "objection_return",
        "Routes a resolved objection back to the saved pre-objection state or the flow's entry_state.",
        objection_return::ObjectionReturnSource
    );
    builtin!(
        "ContentRepetitionGuardSource",
        37,
        "content_repetition_guard",
        "Detects the bot about to repeat recent content and redirects or escalates.",
        content_repetition_guard::ContentRepetitionGuardSource
    );
    builtin!(
        "IntentPatternGuardSource",
        38,
        "intent_pattern_guard",
        "Detects a fatiguing intent pattern independent of StallGuardSource's turn-count view.",
        intent_pattern_guard::IntentPatternGuardSource
    );
    builtin!(
        "IntentProcessorSource",
        40,
        "intent_processor",
        "Resolves the current state's intent -> action/transition rules map.",
        intent_processor::IntentProcessorSource
    );
    builtin!(
        "AutonomousDecisionSource",
        42,
        "autonomous_decision",
        "Delegates next-state choice to an LLM inside autonomous-flow states, with a hard-override safety net.",
        autonomous_decision::AutonomousDecisionSource
    );
    builtin!(
        "PhaseExhaustedSource",
        43,
        "phase_exhausted",
        "Offers an options menu in the window below StallGuardSource's hard-ejection threshold.",
        phase_exhausted::PhaseExhaustedSource
    );
    builtin!(
        "StallGuardSource",
        45,
        "stall_guard",
        "Two-tier safety net ejecting the dialog from a state that has stopped making progress.",
        stall_guard::StallGuardSource
    );
    builtin!(
        "TransitionResolverSource",
        50,
        "transition_resolver",
        "Maps the current intent to a transition target via the state's transitions map.",
        transition_resolver::TransitionResolverSource
    );
    builtin!(
        "EscalationSource",
        60,
        "escalation",
        "Routes explicit, sensitive-topic, frustration-driven, or high-value escalation triggers to a human.",
        escalation::EscalationSource
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result as CrateResult;
    use crate::sources::TurnInputs;
    use crate::proposal::Proposal;

    struct StubSource(&'static str, u32);
    impl KnowledgeSource for StubSource {
        fn name(&self) -> &str {
            self.0
        }
        fn priority_order(&self) -> u32 {
            self.1
        }
        fn is_enabled(&self) -> bool {
            true
        }
        fn enable(&mut self) {}
        fn disable(&mut self) {}
        fn contribute(&self, _turn: &TurnInputs<'_>) -> CrateResult<Vec<Proposal>> {
            Ok(Vec::new())
        }
    }

    fn stub_registration(name: &'static str, order: u32) -> SourceRegistration {
        SourceRegistration::new(
            name,
            order,
            true,
            None,
            "test stub",
            Box::new(move |_opts| Ok(Box::new(StubSource(name, order)) as Box<dyn KnowledgeSource>)),
        )
    }

    #[test]
    fn create_sources_respects_priority_order() {
        SourceRegistry::reset();
        SourceRegistry::register(stub_registration("Z", 50)).unwrap();
        SourceRegistry::register(stub_registration("A", 5)).unwrap();
        let sources = SourceRegistry::create_sources(&HashMap::new(), &HashMap::new()).unwrap();
        let names: Vec<&str> = sources.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["A", "Z"]);
        SourceRegistry::reset();
    }

    #[test]
    fn disabled_source_is_skipped() {
        SourceRegistry::reset();
        SourceRegistry::register(stub_registration("Disabled", 10)).unwrap();
        let mut enabled = HashMap::new();
        enabled.insert("Disabled".to_string(), false);
        let sources = SourceRegistry::create_sources(&enabled, &HashMap::new()).unwrap();
        assert!(sources.is_empty());
        SourceRegistry::reset();
    }

    #[test]
    fn frozen_registry_rejects_name_collision_but_allows_new_names() {
        SourceRegistry::reset();
        SourceRegistry::register(stub_registration("Existing", 10)).unwrap();
        SourceRegistry::freeze();
        assert!(SourceRegistry::register(stub_registration("Existing", 10)).is_err());
        assert!(SourceRegistry::register(stub_registration("NewOne", 20)).is_ok());
        SourceRegistry::reset();
    }

    #[test]
    fn unregister_is_rejected_while_frozen() {
        SourceRegistry::reset();
        SourceRegistry::register(stub_registration("Existing", 10)).unwrap();
        SourceRegistry::freeze();
        assert!(SourceRegistry::unregister("Existing").is_err());
        SourceRegistry::reset();
    }

    #[test]
    fn builtin_sources_register_all_sixteen_in_order() {
        SourceRegistry::reset();
        register_builtin_sources().unwrap();
        let names = SourceRegistry::list_registered();
        assert_eq!(names.len(), 16);
        assert_eq!(names.first(), Some(&"GoBackGuardSource".to_string()));
        assert_eq!(names.last(), Some(&"EscalationSource".to_string()));
        SourceRegistry::reset();
    }
}
