//! Durable snapshot of [`CachedState`].
//!
//! Writes go to a sibling `.tmp` file which is then renamed over the target,
//! so a restart never reads a half-written snapshot.

use crate::error::SnapshotError;
use crate::state::CachedState;
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    pub async fn load(&self) -> Result<CachedState, SnapshotError> {
        let text = fs::read_to_string(&self.path)
            .await
            .map_err(|source| SnapshotError::Read {
                path: self.path.clone(),
                source,
            })?;
        serde_json::from_str(&text).map_err(|source| SnapshotError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    pub async fn save(&self, state: &CachedState) -> Result<(), SnapshotError> {
        let write_err = |source| SnapshotError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(write_err)?;
            }
        }

        let temp_path = self.temp_path();
        fs::write(&temp_path, encode(state)).await.map_err(write_err)?;
        fs::rename(&temp_path, &self.path).await.map_err(write_err)?;
        Ok(())
    }
}

/// Serialized snapshot bytes. Identical states always encode identically.
pub fn encode(state: &CachedState) -> Vec<u8> {
    // Serializing plain maps, strings and numbers cannot fail
    serde_json::to_vec_pretty(state).unwrap_or_default()
}
