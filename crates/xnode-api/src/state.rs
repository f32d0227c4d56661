//! Shared state handed to every controller.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use xnode_engine::EngineHandle;
use xnode_sync::ConfigManager;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<EngineHandle>,
    pub config: Arc<ConfigManager>,
    /// Single-flight guard for start requests: a push that arrives while
    /// another is being applied is rejected with 409 instead of queueing.
    pub is_processing: Arc<AtomicBool>,
    /// Serializes the bodies of start and stop so a stop cannot interleave
    /// with the extract-then-start sequence.
    pub start_lock: Arc<Mutex<()>>,
    /// rule tag -> blocked source IP.
    pub blocked_ips: Arc<RwLock<HashMap<String, String>>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(engine: Arc<EngineHandle>, config: Arc<ConfigManager>) -> Self {
        Self {
            engine,
            config,
            is_processing: Arc::new(AtomicBool::new(false)),
            start_lock: Arc::new(Mutex::new(())),
            blocked_ips: Arc::new(RwLock::new(HashMap::new())),
            started_at: Instant::now(),
        }
    }
}
