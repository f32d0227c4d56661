//! Engine lifecycle owner.

use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::features::{EngineBackend, EngineInstance, RoutingRule};

struct State {
    instance: Option<Arc<dyn EngineInstance>>,
    running: bool,
}

/// Owns zero-or-one running engine instance.
///
/// Lifecycle mutations hold the write lock for their full duration, so a
/// start in progress blocks a concurrent stop and vice versa. Status reads
/// take the read lock and never block each other.
pub struct EngineHandle {
    backend: Arc<dyn EngineBackend>,
    state: RwLock<State>,
}

impl EngineHandle {
    pub fn new(backend: Arc<dyn EngineBackend>) -> Self {
        Self {
            backend,
            state: RwLock::new(State {
                instance: None,
                running: false,
            }),
        }
    }

    /// Start the engine with `config`, stopping any running instance first.
    /// A stop failure aborts the attempt; a start failure closes the
    /// partially-created instance. Either way the handle is left not-running
    /// and a retry is safe.
    pub fn start(&self, config: &Value) -> Result<(), EngineError> {
        let mut state = self.state.write();

        if state.running {
            Self::stop_locked(&mut state)?;
        }

        let instance = self.backend.load(config)?;
        state.instance = Some(instance);
        state.running = true;
        info!("engine started");
        Ok(())
    }

    /// Stop the running instance. Stopping a non-running handle is a no-op.
    pub fn stop(&self) -> Result<(), EngineError> {
        let mut state = self.state.write();
        Self::stop_locked(&mut state)
    }

    fn stop_locked(state: &mut State) -> Result<(), EngineError> {
        let Some(instance) = state.instance.take() else {
            return Ok(());
        };

        if let Err(e) = instance.close() {
            // Leave the handle not-running; the instance is already detached.
            state.running = false;
            return Err(EngineError::StopFailed(e.to_string()));
        }

        state.running = false;
        info!("engine stopped");
        Ok(())
    }

    /// Restart with a new configuration. `start` already performs the
    /// implicit stop.
    pub fn restart(&self, config: &Value) -> Result<(), EngineError> {
        self.start(config)
    }

    pub fn is_running(&self) -> bool {
        self.state.read().running
    }

    /// Engine build identifier; available even when not running.
    pub fn version(&self) -> String {
        self.backend.version()
    }

    /// The running instance, if any.
    pub fn instance(&self) -> Option<Arc<dyn EngineInstance>> {
        self.state.read().instance.clone()
    }

    fn running_instance(&self) -> Result<Arc<dyn EngineInstance>, EngineError> {
        self.instance().ok_or(EngineError::NotRunning)
    }

    /// Install a dynamic routing rule steering `source_ip` to
    /// `outbound_tag`. Requires a running instance with a mutable router.
    pub fn add_routing_rule(
        &self,
        rule_tag: &str,
        source_ip: &str,
        outbound_tag: &str,
    ) -> Result<(), EngineError> {
        let ip: IpAddr = source_ip
            .parse()
            .map_err(|_| EngineError::InvalidAddress(source_ip.to_owned()))?;

        let router = self.running_instance()?.router()?;
        router.add_rule(
            RoutingRule {
                rule_tag: rule_tag.to_owned(),
                source_ip: ip,
                outbound_tag: outbound_tag.to_owned(),
            },
            true,
        )?;

        info!(rule = %rule_tag, source = %ip, outbound = %outbound_tag, "routing rule added");
        Ok(())
    }

    /// Remove a dynamic routing rule. A rule that is already gone counts as
    /// removed.
    pub fn remove_routing_rule(&self, rule_tag: &str) -> Result<(), EngineError> {
        let router = self.running_instance()?.router()?;
        match router.remove_rule(rule_tag) {
            Ok(()) => {
                info!(rule = %rule_tag, "routing rule removed");
                Ok(())
            }
            Err(e) => {
                warn!(rule = %rule_tag, error = %e, "failed to remove routing rule");
                Err(e)
            }
        }
    }
}
