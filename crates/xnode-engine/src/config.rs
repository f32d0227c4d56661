//! Typed partial view of the opaque engine configuration.
//!
//! The full configuration is panel-owned JSON and stays a
//! [`serde_json::Value`] end to end; only the fields this node needs are
//! deserialized into types.

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::error::EngineError;

/// Loopback port of the injected engine management inbound.
pub const API_PORT: u16 = 61012;

/// Tag of the injected management inbound and its routing rule.
pub const API_TAG: &str = "api";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub flow: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub method: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboundSettings {
    #[serde(default)]
    pub clients: Vec<ClientEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboundConfig {
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub listen: Option<String>,
    #[serde(default)]
    pub port: Option<u32>,
    #[serde(default)]
    pub settings: InboundSettings,
}

/// The subset of the engine configuration this node inspects.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub inbounds: Vec<InboundConfig>,
}

impl EngineConfig {
    /// Deserialize the typed view out of the opaque configuration.
    pub fn from_value(config: &Value) -> Result<Self, EngineError> {
        if !config.is_object() {
            return Err(EngineError::InvalidConfig(
                "configuration root must be a JSON object".into(),
            ));
        }
        serde_json::from_value(config.clone())
            .map_err(|e| EngineError::InvalidConfig(e.to_string()))
    }

    /// Structural validation beyond what deserialization enforces.
    pub fn validate(&self) -> Result<(), EngineError> {
        let mut seen = std::collections::HashSet::new();
        for inbound in &self.inbounds {
            if inbound.tag.is_empty() {
                return Err(EngineError::InvalidConfig("inbound with empty tag".into()));
            }
            if !seen.insert(inbound.tag.as_str()) {
                return Err(EngineError::InvalidConfig(format!(
                    "duplicate inbound tag '{}'",
                    inbound.tag
                )));
            }
            if let Some(port) = inbound.port {
                if port == 0 || port > 65535 {
                    return Err(EngineError::InvalidConfig(format!(
                        "inbound '{}' has invalid port {}",
                        inbound.tag, port
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Inject the management scaffolding the panel does not send: the loopback
/// api inbound, a routing rule steering it to the api outbound, and the
/// `api`/`stats` sections. Idempotent; caller-provided sections win.
pub fn prepare_config(config: &Value) -> Value {
    let mut root = match config.as_object() {
        Some(obj) => obj.clone(),
        None => Map::new(),
    };

    let mut inbounds = root
        .get("inbounds")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let has_api_inbound = inbounds
        .iter()
        .any(|i| i.get("tag").and_then(Value::as_str) == Some(API_TAG));
    if !has_api_inbound {
        inbounds.push(json!({
            "tag": API_TAG,
            "port": API_PORT,
            "listen": "127.0.0.1",
            "protocol": "dokodemo-door",
            "settings": { "address": "127.0.0.1" },
        }));
    }
    root.insert("inbounds".into(), Value::Array(inbounds));

    let mut routing = root
        .get("routing")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let mut rules = routing
        .get("rules")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let has_api_rule = rules
        .iter()
        .any(|r| r.get("outboundTag").and_then(Value::as_str) == Some(API_TAG));
    if !has_api_rule {
        rules.insert(
            0,
            json!({
                "type": "field",
                "outboundTag": API_TAG,
                "inboundTag": [API_TAG],
            }),
        );
    }
    routing.insert("rules".into(), Value::Array(rules));
    root.insert("routing".into(), Value::Object(routing));

    if !root.contains_key("api") {
        root.insert(
            "api".into(),
            json!({
                "services": ["HandlerService", "LoggerService", "StatsService"],
                "tag": API_TAG,
            }),
        );
    }
    if !root.contains_key("stats") {
        root.insert("stats".into(), json!({}));
    }

    Value::Object(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_view_reads_clients() {
        let cfg = EngineConfig::from_value(&json!({
            "inbounds": [{
                "tag": "vless-in",
                "protocol": "vless",
                "port": 443,
                "settings": { "clients": [{ "id": "u1", "email": "a@x", "flow": "" }] }
            }],
            "outbounds": [{ "protocol": "freedom" }]
        }))
        .unwrap();

        assert_eq!(cfg.inbounds.len(), 1);
        assert_eq!(cfg.inbounds[0].settings.clients[0].id, "u1");
        cfg.validate().unwrap();
    }

    #[test]
    fn rejects_non_object_root() {
        assert!(matches!(
            EngineConfig::from_value(&json!("nope")),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn validation_rejects_duplicate_tags() {
        let cfg = EngineConfig::from_value(&json!({
            "inbounds": [{ "tag": "x", "protocol": "vless" }, { "tag": "x", "protocol": "trojan" }]
        }))
        .unwrap();
        assert!(matches!(cfg.validate(), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn validation_rejects_bad_port() {
        let cfg = EngineConfig::from_value(&json!({
            "inbounds": [{ "tag": "x", "protocol": "vless", "port": 700000 }]
        }))
        .unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn prepare_config_injects_api_scaffolding() {
        let prepared = prepare_config(&json!({ "inbounds": [{ "tag": "vless-in" }] }));

        let inbounds = prepared["inbounds"].as_array().unwrap();
        assert_eq!(inbounds.len(), 2);
        assert_eq!(inbounds[1]["tag"], API_TAG);

        let rules = prepared["routing"]["rules"].as_array().unwrap();
        assert_eq!(rules[0]["outboundTag"], API_TAG);
        assert!(prepared.get("api").is_some());
        assert!(prepared.get("stats").is_some());
    }

    #[test]
    fn prepare_config_is_idempotent() {
        let once = prepare_config(&json!({}));
        let twice = prepare_config(&once);
        assert_eq!(once, twice);
    }
}
