//! Live-engine user synchronization.
//!
//! Applies add/remove of protocol accounts to the per-inbound user
//! registries of a running instance. A single lock serializes bulk
//! sequences so two concurrent batches cannot interleave registry lookups
//! and leave an inbound half-updated.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::account::EngineUser;
use crate::error::EngineError;
use crate::features::{EngineInstance, UserRegistry};

pub struct UserSync {
    instance: Arc<dyn EngineInstance>,
    op_lock: Mutex<()>,
}

impl UserSync {
    pub fn new(instance: Arc<dyn EngineInstance>) -> Self {
        Self {
            instance,
            op_lock: Mutex::new(()),
        }
    }

    fn registry(&self, tag: &str) -> Result<Arc<dyn UserRegistry>, EngineError> {
        self.instance.user_registry(tag)
    }

    /// Add one account to the inbound with `tag`. Unknown tags and inbounds
    /// without per-user management surface as errors for the caller to
    /// decide on.
    pub fn add_user(&self, tag: &str, user: EngineUser) -> Result<(), EngineError> {
        let _guard = self.op_lock.lock();
        let label = user.label.clone();
        self.registry(tag)?.add_user(user)?;
        debug!(inbound = %tag, user = %label, "user added to inbound");
        Ok(())
    }

    /// Add several accounts, aborting on the first failure. A partial batch
    /// leaves the inbound inconsistent; the caller reconciles, typically by
    /// forcing a restart on the next push.
    pub fn add_users(&self, tag: &str, users: Vec<EngineUser>) -> Result<(), EngineError> {
        let _guard = self.op_lock.lock();
        let registry = self.registry(tag)?;
        let count = users.len();
        for user in users {
            registry.add_user(user)?;
        }
        debug!(inbound = %tag, count, "users added to inbound");
        Ok(())
    }

    /// Remove one account by label.
    pub fn remove_user(&self, tag: &str, label: &str) -> Result<(), EngineError> {
        let _guard = self.op_lock.lock();
        self.registry(tag)?.remove_user(label)?;
        debug!(inbound = %tag, user = %label, "user removed from inbound");
        Ok(())
    }

    /// Remove several accounts, best-effort: removal targets may already be
    /// gone, so individual failures are logged and skipped.
    pub fn remove_users(&self, tag: &str, labels: &[String]) -> Result<(), EngineError> {
        let _guard = self.op_lock.lock();
        let registry = self.registry(tag)?;
        for label in labels {
            if let Err(e) = registry.remove_user(label) {
                warn!(inbound = %tag, user = %label, error = %e, "failed to remove user");
            }
        }
        debug!(inbound = %tag, count = labels.len(), "user removal completed");
        Ok(())
    }

    /// Remove one identity from every given inbound, best-effort. The user
    /// legitimately may not exist in some (or any) of them.
    pub fn remove_user_from_all_inbounds(&self, tags: &[String], label: &str) {
        for tag in tags {
            if let Err(e) = self.remove_user(tag, label) {
                debug!(inbound = %tag, user = %label, error = %e, "could not remove user from inbound");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::build_trojan_user;
    use crate::features::EngineBackend;
    use crate::memory::InProcessEngine;
    use serde_json::json;

    fn sync_with_inbounds() -> UserSync {
        let instance = InProcessEngine::new()
            .load(&json!({
                "inbounds": [
                    { "tag": "trojan-in", "protocol": "trojan", "port": 443 },
                    { "tag": "trojan-alt", "protocol": "trojan", "port": 8443 },
                ]
            }))
            .unwrap();
        UserSync::new(instance)
    }

    fn count(sync: &UserSync, tag: &str) -> usize {
        sync.instance.user_registry(tag).unwrap().len()
    }

    #[test]
    fn add_and_remove_single_user() {
        let sync = sync_with_inbounds();
        sync.add_user("trojan-in", build_trojan_user("alice", "pw")).unwrap();
        assert_eq!(count(&sync, "trojan-in"), 1);

        sync.remove_user("trojan-in", "alice").unwrap();
        assert_eq!(count(&sync, "trojan-in"), 0);
    }

    #[test]
    fn add_to_unknown_inbound_fails() {
        let sync = sync_with_inbounds();
        assert!(matches!(
            sync.add_user("ghost", build_trojan_user("alice", "pw")),
            Err(EngineError::NoSuchInbound(_))
        ));
    }

    #[test]
    fn bulk_add_applies_all() {
        let sync = sync_with_inbounds();
        sync.add_users(
            "trojan-in",
            vec![build_trojan_user("a", "1"), build_trojan_user("b", "2")],
        )
        .unwrap();
        assert_eq!(count(&sync, "trojan-in"), 2);
    }

    #[test]
    fn remove_missing_user_is_an_error_for_single_remove() {
        let sync = sync_with_inbounds();
        assert!(matches!(
            sync.remove_user("trojan-in", "nobody"),
            Err(EngineError::UserNotFound { .. })
        ));
    }

    #[test]
    fn bulk_remove_continues_past_missing_users() {
        let sync = sync_with_inbounds();
        sync.add_user("trojan-in", build_trojan_user("kept", "pw")).unwrap();
        sync.add_user("trojan-in", build_trojan_user("gone", "pw")).unwrap();

        sync.remove_users(
            "trojan-in",
            &["missing".to_owned(), "gone".to_owned(), "also-missing".to_owned()],
        )
        .unwrap();
        assert_eq!(count(&sync, "trojan-in"), 1);
    }

    #[test]
    fn sweep_tolerates_absent_identity() {
        let sync = sync_with_inbounds();
        sync.add_user("trojan-alt", build_trojan_user("roamer", "pw")).unwrap();

        let tags = ["trojan-in".to_owned(), "trojan-alt".to_owned(), "ghost".to_owned()];
        sync.remove_user_from_all_inbounds(&tags, "roamer");
        assert_eq!(count(&sync, "trojan-alt"), 0);
    }
}
