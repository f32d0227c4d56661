//! In-process engine backend.
//!
//! The default [`EngineBackend`]: it realizes the control-plane surfaces of
//! the embedded engine — per-inbound user registries, a dynamic routing-rule
//! table and a stats registry — pre-populated from the configuration's
//! client lists. Protocol termination and byte forwarding are the data
//! plane's business and live outside this crate.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::account::{build_user_for_inbound, CipherType, EngineUser, InboundProfile, UserData};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::features::{
    EngineBackend, EngineInstance, RoutingRule, RuleRouter, StatsRegistry, UserRegistry,
};

const VERSION: &str = concat!("xnode-inproc/", env!("CARGO_PKG_VERSION"));

/// User registry of one inbound.
pub struct MemoryUserRegistry {
    tag: String,
    users: RwLock<HashMap<String, EngineUser>>,
}

impl MemoryUserRegistry {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            users: RwLock::new(HashMap::new()),
        }
    }
}

impl UserRegistry for MemoryUserRegistry {
    fn add_user(&self, user: EngineUser) -> Result<(), EngineError> {
        // Same-label re-add replaces the stored account, mirroring the
        // engine's own replacement semantics.
        self.users.write().insert(user.label.clone(), user);
        Ok(())
    }

    fn remove_user(&self, label: &str) -> Result<(), EngineError> {
        match self.users.write().remove(label) {
            Some(_) => Ok(()),
            None => Err(EngineError::UserNotFound {
                tag: self.tag.clone(),
                user: label.to_owned(),
            }),
        }
    }

    fn users(&self) -> Vec<String> {
        self.users.read().keys().cloned().collect()
    }

    fn len(&self) -> usize {
        self.users.read().len()
    }
}

/// Ordered dynamic rule table.
#[derive(Default)]
pub struct MemoryRouter {
    rules: RwLock<Vec<RoutingRule>>,
}

impl RuleRouter for MemoryRouter {
    fn add_rule(&self, rule: RoutingRule, append: bool) -> Result<(), EngineError> {
        if rule.rule_tag.is_empty() {
            return Err(EngineError::Rule("empty rule tag".into()));
        }
        let mut rules = self.rules.write();
        if rules.iter().any(|r| r.rule_tag == rule.rule_tag) {
            return Err(EngineError::Rule(format!(
                "rule '{}' already exists",
                rule.rule_tag
            )));
        }
        if append {
            rules.push(rule);
        } else {
            rules.insert(0, rule);
        }
        Ok(())
    }

    fn remove_rule(&self, rule_tag: &str) -> Result<(), EngineError> {
        // Absent rules are fine; unblock must be idempotent.
        self.rules.write().retain(|r| r.rule_tag != rule_tag);
        Ok(())
    }

    fn rules(&self) -> Vec<RoutingRule> {
        self.rules.read().clone()
    }
}

/// Named monotonic counters.
#[derive(Default)]
pub struct MemoryStats {
    counters: RwLock<HashMap<String, i64>>,
}

impl StatsRegistry for MemoryStats {
    fn get_counter(&self, name: &str) -> Option<i64> {
        self.counters.read().get(name).copied()
    }

    fn query(&self, pattern: &str, reset: bool) -> Vec<(String, i64)> {
        let mut counters = self.counters.write();
        let mut matched: Vec<(String, i64)> = counters
            .iter()
            .filter(|(name, _)| pattern.is_empty() || name.contains(pattern))
            .map(|(name, value)| (name.clone(), *value))
            .collect();
        if reset {
            for (name, _) in &matched {
                counters.insert(name.clone(), 0);
            }
        }
        matched.sort_by(|a, b| a.0.cmp(&b.0));
        matched
    }

    fn add(&self, name: &str, value: i64) {
        *self.counters.write().entry(name.to_owned()).or_insert(0) += value;
    }
}

struct Instance {
    registries: HashMap<String, Arc<MemoryUserRegistry>>,
    /// Inbounds that exist but whose protocol has no per-user management.
    unmanaged: std::collections::HashSet<String>,
    router: Arc<MemoryRouter>,
    stats: Arc<MemoryStats>,
}

impl EngineInstance for Instance {
    fn user_registry(&self, tag: &str) -> Result<Arc<dyn UserRegistry>, EngineError> {
        if let Some(registry) = self.registries.get(tag) {
            return Ok(registry.clone() as Arc<dyn UserRegistry>);
        }
        if self.unmanaged.contains(tag) {
            return Err(EngineError::CapabilityUnsupported {
                tag: tag.to_owned(),
                capability: "per-user management",
            });
        }
        Err(EngineError::NoSuchInbound(tag.to_owned()))
    }

    fn router(&self) -> Result<Arc<dyn RuleRouter>, EngineError> {
        Ok(self.router.clone() as Arc<dyn RuleRouter>)
    }

    fn stats(&self) -> Result<Arc<dyn StatsRegistry>, EngineError> {
        Ok(self.stats.clone() as Arc<dyn StatsRegistry>)
    }

    fn close(&self) -> Result<(), EngineError> {
        debug!("closing in-process engine instance");
        Ok(())
    }
}

/// Default backend building registry-backed instances straight from the
/// configuration.
#[derive(Default)]
pub struct InProcessEngine;

impl InProcessEngine {
    pub fn new() -> Self {
        Self
    }
}

/// Protocols with per-user account management.
fn is_managed_protocol(protocol: &str) -> bool {
    matches!(protocol, "vless" | "trojan" | "shadowsocks")
}

impl EngineBackend for InProcessEngine {
    fn load(&self, config: &Value) -> Result<Arc<dyn EngineInstance>, EngineError> {
        let typed = EngineConfig::from_value(config)?;
        typed.validate()?;

        // A well-formed configuration can still be unstartable: two
        // inbounds racing for the same listen endpoint.
        let mut endpoints = std::collections::HashSet::new();
        for inbound in &typed.inbounds {
            if let Some(port) = inbound.port {
                let listen = inbound.listen.clone().unwrap_or_else(|| "0.0.0.0".into());
                if !endpoints.insert((listen.clone(), port)) {
                    return Err(EngineError::StartFailed(format!(
                        "inbound '{}' listen endpoint {}:{} already taken",
                        inbound.tag, listen, port
                    )));
                }
            }
        }

        let mut registries = HashMap::new();
        let mut unmanaged = std::collections::HashSet::new();

        for inbound in &typed.inbounds {
            if !is_managed_protocol(&inbound.protocol) {
                unmanaged.insert(inbound.tag.clone());
                continue;
            }

            let registry = Arc::new(MemoryUserRegistry::new(&inbound.tag));
            let profile = InboundProfile {
                protocol: inbound.protocol.clone(),
                tag: inbound.tag.clone(),
                flow: String::new(),
                cipher: None,
                iv_check: false,
            };

            for client in &inbound.settings.clients {
                let label = if client.email.is_empty() { &client.id } else { &client.email };
                let user = UserData {
                    user_id: label.clone(),
                    vless_uuid: client.id.clone(),
                    trojan_password: client.password.clone(),
                    ss_password: client.password.clone(),
                    ..Default::default()
                };
                let profile = InboundProfile {
                    flow: client.flow.clone(),
                    cipher: if client.method.is_empty() {
                        None
                    } else {
                        Some(CipherType::parse(&client.method))
                    },
                    ..profile.clone()
                };
                if let Some(user) = build_user_for_inbound(&profile, &user) {
                    registry.add_user(user)?;
                }
            }

            debug!(inbound = %inbound.tag, users = registry.len(), "inbound registry built");
            registries.insert(inbound.tag.clone(), registry);
        }

        Ok(Arc::new(Instance {
            registries,
            unmanaged,
            router: Arc::new(MemoryRouter::default()),
            stats: Arc::new(MemoryStats::default()),
        }))
    }

    fn version(&self) -> String {
        VERSION.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_config() -> Value {
        json!({
            "inbounds": [
                {
                    "tag": "vless-in",
                    "protocol": "vless",
                    "port": 443,
                    "settings": { "clients": [
                        { "id": "uuid-1", "email": "alice" },
                        { "id": "uuid-2", "email": "bob" },
                    ]}
                },
                { "tag": "metrics-in", "protocol": "dokodemo-door", "port": 8080 },
            ]
        })
    }

    #[test]
    fn load_builds_registries_from_clients() {
        let instance = InProcessEngine::new().load(&sample_config()).unwrap();
        let registry = instance.user_registry("vless-in").unwrap();
        assert_eq!(registry.len(), 2);
        let mut users = registry.users();
        users.sort();
        assert_eq!(users, ["alice", "bob"]);
    }

    #[test]
    fn unknown_tag_and_unmanaged_inbound_are_distinct_errors() {
        let instance = InProcessEngine::new().load(&sample_config()).unwrap();
        assert!(matches!(
            instance.user_registry("ghost"),
            Err(EngineError::NoSuchInbound(_))
        ));
        assert!(matches!(
            instance.user_registry("metrics-in"),
            Err(EngineError::CapabilityUnsupported { .. })
        ));
    }

    #[test]
    fn malformed_config_is_invalid_not_unstartable() {
        let err = InProcessEngine::new().load(&json!(17)).err().unwrap();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }

    #[test]
    fn endpoint_collision_is_a_start_failure() {
        let config = json!({
            "inbounds": [
                { "tag": "a", "protocol": "vless", "port": 443 },
                { "tag": "b", "protocol": "trojan", "port": 443 },
            ]
        });
        let err = InProcessEngine::new().load(&config).err().unwrap();
        assert!(matches!(err, EngineError::StartFailed(_)));
    }

    #[test]
    fn router_rules_are_ordered_and_idempotent_on_remove() {
        let instance = InProcessEngine::new().load(&json!({})).unwrap();
        let router = instance.router().unwrap();

        let rule = |tag: &str| RoutingRule {
            rule_tag: tag.to_owned(),
            source_ip: "203.0.113.7".parse().unwrap(),
            outbound_tag: "BLOCK".to_owned(),
        };

        router.add_rule(rule("r1"), true).unwrap();
        router.add_rule(rule("r0"), false).unwrap();
        assert_eq!(
            router.rules().iter().map(|r| r.rule_tag.as_str()).collect::<Vec<_>>(),
            ["r0", "r1"]
        );

        assert!(router.add_rule(rule("r1"), true).is_err());
        router.remove_rule("r1").unwrap();
        router.remove_rule("r1").unwrap();
        assert_eq!(router.rules().len(), 1);
    }

    #[test]
    fn stats_query_and_reset() {
        let instance = InProcessEngine::new().load(&json!({})).unwrap();
        let stats = instance.stats().unwrap();

        stats.add("user>>>alice>>>traffic>>>uplink", 100);
        stats.add("user>>>alice>>>traffic>>>uplink", 50);
        stats.add("inbound>>>vless-in>>>traffic>>>downlink", 7);

        assert_eq!(stats.get_counter("user>>>alice>>>traffic>>>uplink"), Some(150));
        let users = stats.query("user>>>", true);
        assert_eq!(users, [("user>>>alice>>>traffic>>>uplink".to_owned(), 150)]);
        assert_eq!(stats.get_counter("user>>>alice>>>traffic>>>uplink"), Some(0));
        assert_eq!(stats.get_counter("inbound>>>vless-in>>>traffic>>>downlink"), Some(7));
    }
}
