//! In-memory checkpoint store.
//!
//! Keeps checkpoints in a map behind a `tokio::sync::RwLock`, with a
//! per-thread index preserving insertion order. Data is lost when the
//! value is dropped; intended for tests and ephemeral runs.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Checkpoint, CheckpointStore};
use crate::error::Result;

/// In-memory [`CheckpointStore`] implementation.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    checkpoints: HashMap<String, Checkpoint>,
    thread_index: HashMap<String, Vec<String>>,
}

impl InMemoryCheckpointStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of checkpoints currently held.
    pub async fn len(&self) -> usize {
        self.inner.read().await.checkpoints.len()
    }

    /// Whether the store holds no checkpoints.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.checkpoints.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .thread_index
            .entry(checkpoint.thread_id.clone())
            .or_default()
            .push(checkpoint.id.clone());
        inner
            .checkpoints
            .insert(checkpoint.id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, checkpoint_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self.inner.read().await.checkpoints.get(checkpoint_id).cloned())
    }

    async fn load_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let inner = self.inner.read().await;
        let Some(ids) = inner.thread_index.get(thread_id) else {
            return Ok(None);
        };
        Ok(ids
            .iter()
            .filter_map(|id| inner.checkpoints.get(id))
            .max_by_key(|c| c.created_at)
            .cloned())
    }

    async fn list(&self, thread_id: &str, limit: usize) -> Result<Vec<Checkpoint>> {
        let inner = self.inner.read().await;
        let mut checkpoints: Vec<Checkpoint> = inner
            .thread_index
            .get(thread_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.checkpoints.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        checkpoints.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        checkpoints.truncate(limit);
        Ok(checkpoints)
    }

    async fn delete(&self, checkpoint_id: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(checkpoint) = inner.checkpoints.remove(checkpoint_id) else {
            return Ok(false);
        };
        if let Some(ids) = inner.thread_index.get_mut(&checkpoint.thread_id) {
            ids.retain(|id| id != checkpoint_id);
        }
        Ok(true)
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<usize> {
        let mut inner = self.inner.write().await;
        let ids = inner.thread_index.remove(thread_id).unwrap_or_default();
        let mut count = 0;
        for id in ids {
            if inner.checkpoints.remove(&id).is_some() {
                count += 1;
            }
        }
        Ok(count)
    }
}
