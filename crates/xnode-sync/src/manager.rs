//! Configuration mirror and restart decisions.
//!
//! [`ConfigManager`] keeps the node's belief about the live engine state:
//! the base-config fingerprint last accepted, one [`HashedSet`] per inbound
//! tag, and the full configuration most recently handed to the engine. The
//! whole mirror sits behind one lock so a restart decision never observes a
//! half-applied mutation.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::hashset::HashedSet;

/// Caller-supplied fingerprint for a single inbound.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundHash {
    pub tag: String,
    pub hash: String,
    /// Informational only; never consulted by the restart decision.
    #[serde(default)]
    pub users_count: usize,
}

/// Fingerprint payload of a configuration push.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hashes {
    /// Fingerprint of the non-user parts of the configuration.
    pub empty_config: String,
    /// One entry per inbound; tags are assumed unique within a push.
    #[serde(default)]
    pub inbounds: Vec<InboundHash>,
}

/// Internal section of the start payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Internals {
    #[serde(default)]
    pub force_restart: bool,
    pub hashes: Hashes,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("engine configuration root must be a JSON object")]
    NotAnObject,
}

#[derive(Default)]
struct Mirror {
    /// Empty string means the engine never successfully started.
    empty_config_hash: String,
    inbounds: HashMap<String, HashedSet>,
    /// Kept in lockstep with the keys of `inbounds`; an inbound with zero
    /// tracked members is absent from both.
    active_tags: HashSet<String>,
    engine_config: Option<Value>,
}

impl Mirror {
    fn reset(&mut self) {
        self.inbounds.clear();
        self.active_tags.clear();
        self.engine_config = None;
        self.empty_config_hash.clear();
    }
}

/// Tracks per-inbound user fingerprints to decide whether an incoming
/// configuration push needs an engine restart or can be ignored.
#[derive(Default)]
pub struct ConfigManager {
    mirror: RwLock<Mirror>,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last full configuration handed to the engine, or an empty object if
    /// the engine never started.
    pub fn engine_config(&self) -> Value {
        let mirror = self.mirror.read();
        mirror
            .engine_config
            .clone()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()))
    }

    pub fn set_engine_config(&self, config: Value) {
        self.mirror.write().engine_config = Some(config);
    }

    /// Decide whether the engine must restart for the given push.
    ///
    /// Checks run in fixed order, first hit wins:
    /// 1. never started, 2. base config changed, 3. inbound count changed,
    /// 4. a tracked inbound disappeared, 5. a tracked inbound's user
    /// fingerprint changed. Otherwise no restart.
    ///
    /// Only mirror-tracked tags are walked; combined with the cardinality
    /// check this means an equal-count tag rename with unchanged per-tag
    /// fingerprints goes undetected. Known edge case, kept as-is.
    pub fn is_restart_needed(&self, incoming: &Hashes) -> bool {
        let mirror = self.mirror.read();

        if mirror.empty_config_hash.is_empty() {
            return true;
        }

        if incoming.empty_config != mirror.empty_config_hash {
            warn!("base engine configuration changed");
            return true;
        }

        if incoming.inbounds.len() != mirror.inbounds.len() {
            warn!(
                incoming = incoming.inbounds.len(),
                tracked = mirror.inbounds.len(),
                "number of inbounds changed"
            );
            return true;
        }

        for (tag, users) in &mirror.inbounds {
            let Some(entry) = incoming.inbounds.iter().find(|h| &h.tag == tag) else {
                warn!(inbound = %tag, "inbound no longer exists in configuration");
                return true;
            };

            let current = users.hash64();
            if current != entry.hash {
                warn!(
                    inbound = %tag,
                    current = %current,
                    incoming = %entry.hash,
                    "user membership changed for inbound"
                );
                return true;
            }
        }

        info!("engine configuration is up to date, no restart required");
        false
    }

    /// Wholesale mirror rebuild. Call only after the engine successfully
    /// (re)started with `config`.
    ///
    /// For every inbound object in `config` whose tag also appears in
    /// `hashes`, a fresh set is built from `settings.clients[].id`. Inbounds
    /// absent from `hashes` are not tracked for restart avoidance.
    pub fn extract_users(&self, hashes: &Hashes, config: &Value) -> Result<(), SyncError> {
        if !config.is_object() {
            return Err(SyncError::NotAnObject);
        }

        let mut mirror = self.mirror.write();
        mirror.reset();
        mirror.empty_config_hash = hashes.empty_config.clone();
        mirror.engine_config = Some(config.clone());

        info!(inbounds = hashes.inbounds.len(), "extracting users from inbounds");

        let valid_tags: HashSet<&str> = hashes.inbounds.iter().map(|h| h.tag.as_str()).collect();

        let inbounds = config
            .get("inbounds")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        for inbound in inbounds {
            let Some(tag) = inbound.get("tag").and_then(Value::as_str).filter(|t| !t.is_empty())
            else {
                continue;
            };
            if !valid_tags.contains(tag) {
                continue;
            }

            let mut users = HashedSet::new();
            if let Some(clients) = inbound
                .get("settings")
                .and_then(|s| s.get("clients"))
                .and_then(Value::as_array)
            {
                for client in clients {
                    if let Some(id) = client.get("id").and_then(Value::as_str) {
                        if !id.is_empty() {
                            users.add(id);
                        }
                    }
                }
            }

            info!(inbound = %tag, users = users.len(), "inbound tracked");
            mirror.active_tags.insert(tag.to_owned());
            mirror.inbounds.insert(tag.to_owned(), users);
        }

        Ok(())
    }

    /// Record a user added to an inbound without a restart. Mirror only;
    /// the live engine mutation is the caller's job. Adding to an unknown
    /// tag starts tracking that tag with a single-member set.
    pub fn add_user_to_inbound(&self, tag: &str, member: &str) {
        let mut mirror = self.mirror.write();
        match mirror.inbounds.get_mut(tag) {
            Some(users) => users.add(member),
            None => {
                warn!(inbound = %tag, "inbound not tracked yet, creating entry");
                let mut users = HashedSet::new();
                users.add(member);
                mirror.inbounds.insert(tag.to_owned(), users);
                mirror.active_tags.insert(tag.to_owned());
            }
        }
    }

    /// Record a user removed from an inbound without a restart. Removing the
    /// last member stops tracking the tag entirely, so a later push that
    /// still expects the inbound flags a restart through the missing-tag
    /// check.
    pub fn remove_user_from_inbound(&self, tag: &str, member: &str) {
        let mut mirror = self.mirror.write();
        let Some(users) = mirror.inbounds.get_mut(tag) else {
            return;
        };

        users.delete(member);
        if users.is_empty() {
            mirror.inbounds.remove(tag);
            mirror.active_tags.remove(tag);
            warn!(inbound = %tag, "inbound has no users left, dropping from mirror");
        }
    }

    /// Current fingerprint for `tag`, or `None` when the tag is untracked.
    pub fn inbound_hash(&self, tag: &str) -> Option<String> {
        self.mirror.read().inbounds.get(tag).map(HashedSet::hash64)
    }

    /// Tags currently believed present in the live engine, unordered.
    pub fn tracked_tags(&self) -> Vec<String> {
        self.mirror.read().active_tags.iter().cloned().collect()
    }

    /// Reset the mirror to its never-started state.
    pub fn cleanup(&self) {
        info!("cleaning up config mirror");
        self.mirror.write().reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ZERO: &str = "0000000000000000";

    fn hashes(empty_config: &str, inbounds: &[(&str, &str)]) -> Hashes {
        Hashes {
            empty_config: empty_config.to_owned(),
            inbounds: inbounds
                .iter()
                .map(|(tag, hash)| InboundHash {
                    tag: (*tag).to_owned(),
                    hash: (*hash).to_owned(),
                    users_count: 0,
                })
                .collect(),
        }
    }

    fn config_with_clients(tag: &str, ids: &[&str]) -> Value {
        json!({
            "inbounds": [{
                "tag": tag,
                "settings": { "clients": ids.iter().map(|id| json!({ "id": id })).collect::<Vec<_>>() }
            }]
        })
    }

    fn fingerprint(ids: &[&str]) -> String {
        let mut set = HashedSet::new();
        for id in ids {
            set.add(id);
        }
        set.hash64()
    }

    #[test]
    fn restart_needed_on_first_call() {
        let mgr = ConfigManager::new();
        assert!(mgr.is_restart_needed(&hashes("anything", &[])));
    }

    #[test]
    fn no_restart_for_identical_signal() {
        let mgr = ConfigManager::new();
        let fp = fingerprint(&["u1", "u2"]);
        let signal = hashes("base-1", &[("vless-in", fp.as_str())]);
        mgr.extract_users(&signal, &config_with_clients("vless-in", &["u1", "u2"]))
            .unwrap();

        assert!(!mgr.is_restart_needed(&signal));
    }

    #[test]
    fn restart_when_base_config_changes() {
        let mgr = ConfigManager::new();
        let fp = fingerprint(&["u1"]);
        let signal = hashes("base-1", &[("vless-in", fp.as_str())]);
        mgr.extract_users(&signal, &config_with_clients("vless-in", &["u1"]))
            .unwrap();

        assert!(mgr.is_restart_needed(&hashes("base-2", &[("vless-in", fp.as_str())])));
    }

    #[test]
    fn restart_when_inbound_count_changes() {
        let mgr = ConfigManager::new();
        let fp = fingerprint(&["u1"]);
        let signal = hashes("base", &[("vless-in", fp.as_str())]);
        mgr.extract_users(&signal, &config_with_clients("vless-in", &["u1"]))
            .unwrap();

        let two = hashes("base", &[("vless-in", fp.as_str()), ("trojan-in", ZERO)]);
        assert!(mgr.is_restart_needed(&two));
    }

    #[test]
    fn restart_when_tracked_inbound_disappears() {
        let mgr = ConfigManager::new();
        let fp = fingerprint(&["u1"]);
        let signal = hashes("base", &[("vless-in", fp.as_str())]);
        mgr.extract_users(&signal, &config_with_clients("vless-in", &["u1"]))
            .unwrap();

        // Same cardinality, different tag.
        assert!(mgr.is_restart_needed(&hashes("base", &[("other-in", fp.as_str())])));
    }

    #[test]
    fn restart_when_inbound_fingerprint_changes() {
        let mgr = ConfigManager::new();
        let fp = fingerprint(&["u1"]);
        let signal = hashes("base", &[("vless-in", fp.as_str())]);
        mgr.extract_users(&signal, &config_with_clients("vless-in", &["u1"]))
            .unwrap();

        let changed = fingerprint(&["u1", "u2"]);
        assert!(mgr.is_restart_needed(&hashes("base", &[("vless-in", changed.as_str())])));
    }

    #[test]
    fn extract_users_skips_inbounds_missing_from_signal() {
        let mgr = ConfigManager::new();
        let config = json!({
            "inbounds": [
                { "tag": "tracked", "settings": { "clients": [{ "id": "u1" }] } },
                { "tag": "untracked", "settings": { "clients": [{ "id": "u2" }] } },
            ]
        });
        let signal = hashes("base", &[("tracked", "irrelevant")]);
        mgr.extract_users(&signal, &config).unwrap();

        assert_eq!(mgr.inbound_hash("tracked"), Some(fingerprint(&["u1"])));
        assert_eq!(mgr.inbound_hash("untracked"), None);
        assert_eq!(mgr.tracked_tags(), ["tracked"]);
    }

    #[test]
    fn extract_users_tolerates_malformed_entries() {
        let mgr = ConfigManager::new();
        let config = json!({
            "inbounds": [
                42,
                { "settings": {} },
                { "tag": "" },
                { "tag": "ok", "settings": { "clients": [{ "id": "" }, { "id": "u1" }, {}] } },
            ]
        });
        let signal = hashes("base", &[("ok", "x")]);
        mgr.extract_users(&signal, &config).unwrap();
        assert_eq!(mgr.inbound_hash("ok"), Some(fingerprint(&["u1"])));
    }

    #[test]
    fn extract_users_rejects_non_object_root() {
        let mgr = ConfigManager::new();
        assert!(mgr.extract_users(&Hashes::default(), &json!([])).is_err());
    }

    #[test]
    fn add_and_remove_user_keeps_mirror_consistent() {
        let mgr = ConfigManager::new();
        let signal = hashes("base", &[("vless-in", ZERO)]);
        mgr.extract_users(&signal, &config_with_clients("vless-in", &[]))
            .unwrap();
        assert_eq!(mgr.inbound_hash("vless-in").as_deref(), Some(ZERO));

        mgr.add_user_to_inbound("vless-in", "uuid-A");
        let with_user = mgr.inbound_hash("vless-in").unwrap();
        assert_ne!(with_user, ZERO);
        assert_eq!(with_user.len(), 16);

        mgr.remove_user_from_inbound("vless-in", "uuid-A");
        assert_eq!(mgr.inbound_hash("vless-in"), None);
        assert!(mgr.tracked_tags().is_empty());
    }

    #[test]
    fn add_user_to_unknown_tag_creates_entry() {
        let mgr = ConfigManager::new();
        mgr.add_user_to_inbound("fresh", "uuid-A");
        assert_eq!(mgr.inbound_hash("fresh"), Some(fingerprint(&["uuid-A"])));
        assert_eq!(mgr.tracked_tags(), ["fresh"]);
    }

    #[test]
    fn remove_user_from_unknown_tag_is_a_noop() {
        let mgr = ConfigManager::new();
        mgr.remove_user_from_inbound("ghost", "uuid-A");
        assert!(mgr.tracked_tags().is_empty());
    }

    #[test]
    fn cleanup_forces_restart_again() {
        let mgr = ConfigManager::new();
        let signal = hashes("base", &[]);
        mgr.extract_users(&signal, &json!({})).unwrap();
        assert!(!mgr.is_restart_needed(&signal));

        mgr.cleanup();
        assert!(mgr.is_restart_needed(&signal));
        assert_eq!(mgr.engine_config(), json!({}));
    }

    #[test]
    fn engine_config_defaults_to_empty_object() {
        let mgr = ConfigManager::new();
        assert_eq!(mgr.engine_config(), json!({}));

        mgr.set_engine_config(json!({ "inbounds": [] }));
        assert_eq!(mgr.engine_config(), json!({ "inbounds": [] }));
    }

    #[test]
    fn wire_records_use_camel_case() {
        let parsed: Internals = serde_json::from_value(json!({
            "forceRestart": true,
            "hashes": {
                "emptyConfig": "abc",
                "inbounds": [{ "tag": "t", "hash": "h", "usersCount": 3 }]
            }
        }))
        .unwrap();

        assert!(parsed.force_restart);
        assert_eq!(parsed.hashes.empty_config, "abc");
        assert_eq!(parsed.hashes.inbounds[0].users_count, 3);
    }

    #[test]
    fn end_to_end_empty_inbound_scenario() {
        let mgr = ConfigManager::new();
        let signal = hashes("h1", &[("vless-in", ZERO)]);
        mgr.extract_users(&signal, &config_with_clients("vless-in", &[]))
            .unwrap();
        assert_eq!(mgr.inbound_hash("vless-in").as_deref(), Some(ZERO));
        assert!(!mgr.is_restart_needed(&signal));

        mgr.add_user_to_inbound("vless-in", "uuid-A");
        assert!(mgr.is_restart_needed(&signal));

        mgr.remove_user_from_inbound("vless-in", "uuid-A");
        assert_eq!(mgr.inbound_hash("vless-in"), None);
        assert!(!mgr.tracked_tags().contains(&"vless-in".to_owned()));
    }
}
