//! Process-wide receiver registry keyed by resource name (spec §4.C step 4,
//! §5's concurrency model).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::ReceiverError;
use crate::receiver::Receiver;

struct Entry {
    receiver: Arc<Receiver>,
    cancel: CancellationToken,
}

/// Holds one started [`Receiver`] per resource name. Construction is
/// double-checked so two concurrent reconciles for the same resource never
/// start two receivers.
#[derive(Default)]
pub struct ReceiverRegistry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl ReceiverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the already-registered receiver for `name`, if any.
    pub async fn get(&self, name: &str) -> Option<Arc<Receiver>> {
        self.entries.read().await.get(name).map(|e| e.receiver.clone())
    }

    /// Ensures a receiver is registered and started for `name`, building one
    /// with `build` only if none exists yet.
    pub async fn ensure_started<F>(&self, name: &str, build: F) -> Result<Arc<Receiver>, ReceiverError>
    where
        F: FnOnce() -> Result<Receiver, ReceiverError>,
    {
        if let Some(existing) = self.get(name).await {
            return Ok(existing);
        }

        let mut entries = self.entries.write().await;
        // Re-check under the write lock: another reconcile may have raced us.
        if let Some(existing) = entries.get(name) {
            return Ok(existing.receiver.clone());
        }

        let receiver = Arc::new(build()?);
        let cancel = CancellationToken::new();
        receiver.start(cancel.clone()).await?;
        entries.insert(
            name.to_string(),
            Entry { receiver: receiver.clone(), cancel },
        );
        Ok(receiver)
    }

    /// Stops and removes the receiver registered for `name`, if any.
    pub async fn teardown(&self, name: &str) -> Result<(), ReceiverError> {
        let entry = self.entries.write().await.remove(name);
        if let Some(entry) = entry {
            entry.cancel.cancel();
            entry.receiver.stop().await?;
        }
        Ok(())
    }

    pub async fn names(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }
}
