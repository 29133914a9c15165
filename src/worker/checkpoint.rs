//! Checkpoint persistence for the sync loop.
//!
//! The checkpoint is a small JSON document (`LastSyncTime`, `LastID`,
//! `StartSyncTime`). A missing file means "never synced" and yields defaults.

use std::{io::ErrorKind, path::PathBuf};

use anyhow::Context;
use async_trait::async_trait;

use crate::db::models::SyncState;

/// Trait for loading and saving the sync checkpoint.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the checkpoint, or defaults when none was ever saved.
    async fn load(&self) -> anyhow::Result<SyncState>;

    /// Replace the checkpoint.
    async fn save(&self, state: &SyncState) -> anyhow::Result<()>;
}

/// Checkpoint stored as a JSON file.
///
/// Saves write a sibling temp file and rename it over the target so a crash
/// never leaves a truncated checkpoint behind.
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "syncState.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self) -> anyhow::Result<SyncState> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(SyncState::default()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read {}", self.path.display()));
            },
        };

        if contents.trim().is_empty() {
            return Ok(SyncState::default());
        }

        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", self.path.display()))
    }

    async fn save(&self, state: &SyncState) -> anyhow::Result<()> {
        let json = serde_json::to_vec_pretty(state).context("Failed to encode checkpoint")?;
        let temp = self.temp_path();

        tokio::fs::write(&temp, &json)
            .await
            .with_context(|| format!("Failed to write {}", temp.display()))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .with_context(|| format!("Failed to move checkpoint into {}", self.path.display()))?;

        Ok(())
    }
}

/// In-memory checkpoint store for tests.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryCheckpointStore {
    state: std::sync::Mutex<Option<SyncState>>,
    fail_saves: std::sync::Mutex<bool>,
}

#[cfg(test)]
impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: SyncState) -> Self {
        Self {
            state: std::sync::Mutex::new(Some(state)),
            ..Self::default()
        }
    }

    /// Last saved state, if any save ever happened.
    pub fn saved(&self) -> Option<SyncState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Make subsequent saves fail.
    pub fn fail_saves(&self, fail: bool) {
        *self.fail_saves.lock().unwrap_or_else(|e| e.into_inner()) = fail;
    }
}

#[cfg(test)]
#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self) -> anyhow::Result<SyncState> {
        Ok(self.saved().unwrap_or_default())
    }

    async fn save(&self, state: &SyncState) -> anyhow::Result<()> {
        if *self.fail_saves.lock().unwrap_or_else(|e| e.into_inner()) {
            anyhow::bail!("checkpoint store unavailable");
        }
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = Some(state.clone());
        Ok(())
    }
}
