use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::Config;
use crate::receiver::registry::ReceiverRegistry;
use crate::store::memory::InMemoryStore;
use crate::store::Store;

/// Shared controller state. Only `config` is replaced wholesale on
/// SIGHUP, so it alone sits behind a lock; `store` and `registry` are
/// internally synchronized already and are shared as plain `Arc`s so
/// reconcile loops never block on each other through this struct.
pub struct ServerState {
    pub config: RwLock<Config>,
    pub store: Arc<dyn Store>,
    pub registry: Arc<ReceiverRegistry>,
    pub mac: [u8; 6],
}

impl ServerState {
    pub fn new(config: Config, mac: [u8; 6]) -> Self {
        Self {
            config: RwLock::new(config),
            store: Arc::new(InMemoryStore::new()),
            registry: Arc::new(ReceiverRegistry::new()),
            mac,
        }
    }
}

pub type SharedState = Arc<ServerState>;
