//! Filesystem checkpoint store.
//!
//! Layout: `<base>/<thread_id>/<checkpoint_id>.json`, one JSON object per
//! file. Lookups by bare checkpoint id scan thread directories; unreadable
//! or malformed files are skipped during listing rather than failing the
//! whole operation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::warn;

use super::{Checkpoint, CheckpointStore};
use crate::error::Result;

/// Filesystem-backed [`CheckpointStore`].
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    base_dir: PathBuf,
}

impl FileCheckpointStore {
    /// Create a store rooted at `base_dir`. The directory is created on the
    /// first save.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// The store's base directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn thread_dir(&self, thread_id: &str) -> PathBuf {
        self.base_dir.join(thread_id)
    }

    fn checkpoint_path(&self, thread_id: &str, checkpoint_id: &str) -> PathBuf {
        self.thread_dir(thread_id).join(format!("{checkpoint_id}.json"))
    }

    async fn read_checkpoint(path: &Path) -> Option<Checkpoint> {
        let data = fs::read_to_string(path).await.ok()?;
        match serde_json::from_str(&data) {
            Ok(checkpoint) => Some(checkpoint),
            Err(error) => {
                warn!(path = %path.display(), %error, "Skipping unreadable checkpoint file");
                None
            }
        }
    }

    async fn thread_checkpoints(&self, thread_id: &str) -> Result<Vec<Checkpoint>> {
        let dir = self.thread_dir(thread_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut checkpoints = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(checkpoint) = Self::read_checkpoint(&path).await {
                    checkpoints.push(checkpoint);
                }
            }
        }
        Ok(checkpoints)
    }

    async fn thread_ids(&self) -> Result<Vec<String>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.base_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let dir = self.thread_dir(&checkpoint.thread_id);
        fs::create_dir_all(&dir).await?;
        let path = self.checkpoint_path(&checkpoint.thread_id, &checkpoint.id);
        let data = serde_json::to_string_pretty(checkpoint)?;
        fs::write(&path, data).await?;
        Ok(())
    }

    async fn load(&self, checkpoint_id: &str) -> Result<Option<Checkpoint>> {
        for thread_id in self.thread_ids().await? {
            let path = self.checkpoint_path(&thread_id, checkpoint_id);
            if path.exists() {
                return Ok(Self::read_checkpoint(&path).await);
            }
        }
        Ok(None)
    }

    async fn load_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let checkpoints = self.thread_checkpoints(thread_id).await?;
        Ok(checkpoints.into_iter().max_by_key(|c| c.created_at))
    }

    async fn list(&self, thread_id: &str, limit: usize) -> Result<Vec<Checkpoint>> {
        let mut checkpoints = self.thread_checkpoints(thread_id).await?;
        checkpoints.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        checkpoints.truncate(limit);
        Ok(checkpoints)
    }

    async fn delete(&self, checkpoint_id: &str) -> Result<bool> {
        for thread_id in self.thread_ids().await? {
            let path = self.checkpoint_path(&thread_id, checkpoint_id);
            if path.exists() {
                fs::remove_file(&path).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<usize> {
        let dir = self.thread_dir(thread_id);
        if !dir.exists() {
            return Ok(0);
        }
        let mut count = 0;
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                fs::remove_file(&path).await?;
                count += 1;
            }
        }
        // Drop the thread directory when it is now empty.
        let mut remaining = fs::read_dir(&dir).await?;
        if remaining.next_entry().await?.is_none() {
            fs::remove_dir(&dir).await?;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentStatus;
    use crate::checkpoint::UsageTotals;
    use crate::message::Message;
    use serde_json::Value;

    fn checkpoint(thread: &str, step: usize) -> Checkpoint {
        Checkpoint::new(
            "agent",
            thread,
            step,
            AgentStatus::Running,
            vec![Message::system("s"), Message::user("u")],
            Vec::new(),
            UsageTotals { input: 5, output: 2 },
            Value::Null,
            None,
        )
    }

    #[tokio::test]
    async fn save_writes_thread_scoped_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let ckpt = checkpoint("t1", 1);
        store.save(&ckpt).await.unwrap();

        let path = dir.path().join("t1").join(format!("{}.json", ckpt.id));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn save_then_load_preserves_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let ckpt = checkpoint("t1", 4);
        store.save(&ckpt).await.unwrap();

        let loaded = store.load(&ckpt.id).await.unwrap().unwrap();
        assert_eq!(loaded.step, 4);
        assert_eq!(loaded.status, AgentStatus::Running);
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.token_usage, ckpt.token_usage);
    }

    #[tokio::test]
    async fn load_latest_and_list_order_by_created_at() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let base = chrono::Utc::now();
        for step in 1..=3 {
            let mut ckpt = checkpoint("t1", step);
            ckpt.created_at = base + chrono::Duration::seconds(step as i64);
            store.save(&ckpt).await.unwrap();
        }

        let latest = store.load_latest("t1").await.unwrap().unwrap();
        assert_eq!(latest.step, 3);

        let listed = store.list("t1", 2).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].step, 3);
        assert_eq!(listed[1].step, 2);
    }

    #[tokio::test]
    async fn malformed_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store.save(&checkpoint("t1", 1)).await.unwrap();
        std::fs::write(dir.path().join("t1").join("ckpt_bad.json"), "{not json").unwrap();

        let listed = store.list("t1", 10).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn delete_thread_removes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store.save(&checkpoint("t1", 1)).await.unwrap();
        store.save(&checkpoint("t1", 2)).await.unwrap();

        assert_eq!(store.delete_thread("t1").await.unwrap(), 2);
        assert!(!dir.path().join("t1").exists());
    }

    #[tokio::test]
    async fn delete_by_id_scans_threads() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let ckpt = checkpoint("t2", 1);
        store.save(&ckpt).await.unwrap();

        assert!(store.delete(&ckpt.id).await.unwrap());
        assert!(store.load(&ckpt.id).await.unwrap().is_none());
    }
}
