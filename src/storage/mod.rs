//! Persistent storage for model states and predictions.

pub mod persistence;
mod sled_store;

pub use persistence::{InMemoryStore, PersistenceError, PersistenceLayer};
pub use sled_store::SledStore;

use std::sync::Arc;

use crate::config::{StorageBackend, StorageConfig};

/// Open the configured backend.
pub fn open(config: &StorageConfig) -> Result<Arc<dyn PersistenceLayer>, PersistenceError> {
    let store: Arc<dyn PersistenceLayer> = match config.backend {
        StorageBackend::Sled => {
            if let Some(parent) = config.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| PersistenceError::Storage(e.to_string()))?;
                }
            }
            Arc::new(SledStore::open(&config.path)?)
        }
        StorageBackend::Memory => Arc::new(InMemoryStore::new()),
    };
    tracing::info!(backend = store.backend_name(), "Persistence ready");
    Ok(store)
}
