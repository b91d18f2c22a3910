//! Registry of history collection handles
//!
//! Handles are created on first request and cached for the lifetime of the
//! registry. The cache key includes the identity of the backend instance,
//! not just its name, so the same collection name on two backends never
//! collides.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::HistoryResult;
use crate::storage::HistoryBackend;

use super::collection::{HistoryCollection, HistorySchema};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(super) struct RegistryKey {
    /// Address of the backend instance. Cached handles hold the backend,
    /// so the address stays unique while the entry exists.
    connection: usize,
    collection: String,
}

impl RegistryKey {
    fn new(backend: &Arc<dyn HistoryBackend>, collection: &str) -> Self {
        Self {
            connection: Arc::as_ptr(backend) as *const () as usize,
            collection: collection.to_string(),
        }
    }
}

/// Cache of history collection handles keyed by (connection, collection)
#[derive(Default)]
pub struct CollectionRegistry {
    pub(super) handles: Mutex<HashMap<RegistryKey, Arc<HistoryCollection>>>,
}

impl CollectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the cached handle, or create the collection and cache it
    ///
    /// The schema only matters on first creation; later calls for the same
    /// key return the cached handle as is. The lock is held while the
    /// collection is prepared, so concurrent first requests create it once.
    pub async fn get_or_create(
        &self,
        backend: Arc<dyn HistoryBackend>,
        collection: &str,
        schema: HistorySchema,
    ) -> HistoryResult<Arc<HistoryCollection>> {
        let key = RegistryKey::new(&backend, collection);

        let mut handles = self.handles.lock().await;
        if let Some(handle) = handles.get(&key) {
            return Ok(handle.clone());
        }

        let handle = Arc::new(HistoryCollection::create(backend, collection, schema).await?);
        handles.insert(key, handle.clone());
        Ok(handle)
    }

    /// Cached handle for a key, if it was created already
    pub async fn get(
        &self,
        backend: &Arc<dyn HistoryBackend>,
        collection: &str,
    ) -> Option<Arc<HistoryCollection>> {
        let key = RegistryKey::new(backend, collection);
        self.handles.lock().await.get(&key).cloned()
    }

    /// Number of cached handles
    pub async fn len(&self) -> usize {
        self.handles.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
