//! Capability surface of a running engine instance.
//!
//! The engine is an external runtime; this node only ever talks to it
//! through explicit capability queries. A query returns either the
//! capability object or a typed not-supported error, never a blind
//! downcast.

use std::sync::Arc;

use serde_json::Value;

use crate::account::EngineUser;
use crate::error::EngineError;

/// Per-inbound user registry: add/remove engine-visible accounts by label.
pub trait UserRegistry: Send + Sync {
    /// Add an account. Re-adding an existing label follows the engine's own
    /// replacement semantics and is not guaranteed idempotent.
    fn add_user(&self, user: EngineUser) -> Result<(), EngineError>;

    /// Remove an account by its identity label. Returns
    /// [`EngineError::UserNotFound`] when absent; bulk callers treat that as
    /// tolerable.
    fn remove_user(&self, label: &str) -> Result<(), EngineError>;

    /// Labels currently registered, unordered.
    fn users(&self) -> Vec<String>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A dynamic routing rule keyed by tag, matching one source address to a
/// target outbound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingRule {
    pub rule_tag: String,
    pub source_ip: std::net::IpAddr,
    pub outbound_tag: String,
}

/// Dynamic routing-rule registry.
pub trait RuleRouter: Send + Sync {
    /// Install a rule. `append` places it after existing rules, otherwise it
    /// is prepended and matched first.
    fn add_rule(&self, rule: RoutingRule, append: bool) -> Result<(), EngineError>;

    /// Remove a rule by tag. Removing a rule that does not exist is success.
    fn remove_rule(&self, rule_tag: &str) -> Result<(), EngineError>;

    fn rules(&self) -> Vec<RoutingRule>;
}

/// Monotonic traffic counters, named in the engine's
/// `scope>>>name>>>traffic>>>direction` convention.
pub trait StatsRegistry: Send + Sync {
    /// Current value of a counter, `None` if it was never touched.
    fn get_counter(&self, name: &str) -> Option<i64>;

    /// All counters whose name contains `pattern` (empty pattern matches
    /// everything). Optionally resets matched counters to zero.
    fn query(&self, pattern: &str, reset: bool) -> Vec<(String, i64)>;

    fn add(&self, name: &str, value: i64);
}

/// One running engine instance.
///
/// Capability getters return ordinary errors, not panics: an inbound may
/// not exist, and an existing inbound may not expose a given capability.
pub trait EngineInstance: Send + Sync {
    /// User registry of the inbound with `tag`.
    fn user_registry(&self, tag: &str) -> Result<Arc<dyn UserRegistry>, EngineError>;

    /// The dynamic routing-rule registry, if the router supports mutation.
    fn router(&self) -> Result<Arc<dyn RuleRouter>, EngineError>;

    /// The statistics registry.
    fn stats(&self) -> Result<Arc<dyn StatsRegistry>, EngineError>;

    /// Release the instance and everything it owns.
    fn close(&self) -> Result<(), EngineError>;
}

/// Factory for engine instances.
pub trait EngineBackend: Send + Sync {
    /// Validate `config` and construct a started instance from it.
    ///
    /// Malformed payloads fail with [`EngineError::InvalidConfig`];
    /// well-formed configurations that cannot be brought up fail with
    /// [`EngineError::StartFailed`].
    fn load(&self, config: &Value) -> Result<Arc<dyn EngineInstance>, EngineError>;

    /// Engine build identifier, available without a running instance.
    fn version(&self) -> String;
}
