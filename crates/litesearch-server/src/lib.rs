pub mod auth;
pub mod config;
pub mod handlers;
pub mod metrics;
pub mod router;

use litesearch_storage::{DocumentStore, InMemoryStore, PersistentStore, Storage};
use std::sync::Arc;

pub use config::Settings;
pub use router::create_router;

#[derive(Clone)]
pub struct AppState {
    pub store: DocumentStore,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(storage: Arc<dyn Storage>, settings: Settings) -> Self {
        Self {
            store: DocumentStore::new(storage),
            settings: Arc::new(settings),
        }
    }

    /// Opens the durable store under `settings.data_dir`, or a memory store
    /// when none is configured. Must run inside a tokio runtime.
    pub fn open(settings: Settings) -> anyhow::Result<Self> {
        let storage: Arc<dyn Storage> = match &settings.data_dir {
            Some(dir) => {
                let store = PersistentStore::open(dir.clone())
                    .map_err(|e| anyhow::anyhow!("opening store at {}: {e}", dir.display()))?;
                tracing::info!(data_dir = %dir.display(), "persistent store opened");
                Arc::new(store)
            }
            None => {
                tracing::info!("no DATA_DIR set; using in-memory store");
                Arc::new(InMemoryStore::new())
            }
        };
        Ok(Self::new(storage, settings))
    }
}
