//! File-backed dedup store for handled item ids.
//!
//! The file holds a JSON array of id strings. Loading is fail-soft: a
//! missing, unreadable or corrupted file yields an empty set so startup
//! never blocks on bad state. Saving writes and fsyncs a sibling temp file,
//! then renames it over the target, so an interrupted write or a crash
//! leaves either the previous file or the new one.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::PersistenceError;
use crate::pipeline::types::{ItemId, SeenSet};

/// Persistent store for the [`SeenSet`].
#[derive(Debug, Clone)]
pub struct SeenStore {
    path: PathBuf,
}

impl SeenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "seen".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Load the persisted set. Never fails.
    pub async fn load(&self) -> SeenSet {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No seen-id file yet, starting empty");
                return SeenSet::new();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read seen-id file, starting empty");
                return SeenSet::new();
            }
        };

        match parse_ids(&raw) {
            Some(seen) => {
                debug!(path = %self.path.display(), count = seen.len(), "Loaded seen ids");
                seen
            }
            None => {
                warn!(path = %self.path.display(), "Seen-id file is corrupted, starting empty");
                SeenSet::new()
            }
        }
    }

    /// Persist the set atomically (write temp, then rename).
    pub async fn save(&self, seen: &SeenSet) -> Result<(), PersistenceError> {
        let json = serde_json::to_vec(seen)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| PersistenceError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let tmp = self.temp_path();
        write_synced(&tmp, &json)
            .await
            .map_err(|source| PersistenceError::Io {
                path: tmp.clone(),
                source,
            })?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|source| PersistenceError::Io {
                path: self.path.clone(),
                source,
            })?;

        debug!(path = %self.path.display(), count = seen.len(), "Saved seen ids");
        Ok(())
    }
}

/// Write `bytes` to `path` and flush them to disk before returning.
async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

/// Parse a JSON array of ids. Numeric ids are accepted and stringified.
fn parse_ids(raw: &str) -> Option<SeenSet> {
    let values: Vec<serde_json::Value> = serde_json::from_str(raw).ok()?;
    values
        .into_iter()
        .map(|v| match v {
            serde_json::Value::String(s) => Some(ItemId::from(s)),
            serde_json::Value::Number(n) => Some(ItemId::from(n.to_string())),
            _ => None,
        })
        .collect()
}
