//! Durable sticky-state storage.
//!
//! The engine persists the whole channel map after every durable
//! mutation, so the store contract is load-all/save-all. The shipped
//! implementation keeps everything in one JSON object keyed by
//! stringified channel id; saves go through a temp file and a rename so
//! a crash mid-write never leaves a half-written file behind.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{ChannelId, ChannelSticky};

/// Storage failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing medium could not be read or written.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Durable mapping from channel id to sticky state.
#[async_trait]
pub trait StickyStore: Send + Sync {
    /// Load every persisted channel state.
    ///
    /// A missing or empty backing file is an empty map, not an error.
    /// Individual records that fail to parse are skipped with a warning
    /// so one bad row cannot take the rest of the data down with it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the medium cannot be read
    /// at all.
    async fn load(&self) -> Result<HashMap<ChannelId, ChannelSticky>, StoreError>;

    /// Replace the persisted state with `states`, all-or-nothing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the write cannot complete;
    /// the caller's in-memory state stays authoritative in that case.
    async fn save(&self, states: &HashMap<ChannelId, ChannelSticky>) -> Result<(), StoreError>;
}

/// JSON-file store: one object, channel ids as keys.
#[derive(Debug, Clone)]
pub struct JsonStickyStore {
    path: PathBuf,
}

impl JsonStickyStore {
    /// Create a store backed by the file at `path`.
    ///
    /// The file does not need to exist yet; the parent directory is
    /// created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StickyStore for JsonStickyStore {
    async fn load(&self) -> Result<HashMap<ChannelId, ChannelSticky>, StoreError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no sticky data file yet");
                return Ok(HashMap::new());
            }
            Err(e) => {
                return Err(StoreError::Unavailable(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )))
            }
        };

        if contents.trim().is_empty() {
            return Ok(HashMap::new());
        }

        let raw: HashMap<String, serde_json::Value> =
            serde_json::from_str(&contents).map_err(|e| {
                StoreError::Unavailable(format!("failed to parse {}: {e}", self.path.display()))
            })?;

        let mut states = HashMap::with_capacity(raw.len());
        for (key, value) in raw {
            let Ok(channel) = key.parse::<ChannelId>() else {
                warn!(key = %key, "skipping sticky record with unparseable channel id");
                continue;
            };
            match serde_json::from_value::<ChannelSticky>(value) {
                Ok(state) => {
                    states.insert(channel, state);
                }
                Err(e) => warn!(channel = %channel, error = %e, "skipping malformed sticky record"),
            }
        }
        Ok(states)
    }

    async fn save(&self, states: &HashMap<ChannelId, ChannelSticky>) -> Result<(), StoreError> {
        let encoded: HashMap<String, &ChannelSticky> = states
            .iter()
            .map(|(channel, state)| (channel.to_string(), state))
            .collect();
        let json = serde_json::to_string_pretty(&encoded).map_err(|e| {
            StoreError::Unavailable(format!("failed to serialize sticky data: {e}"))
        })?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    StoreError::Unavailable(format!(
                        "failed to create {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json.as_bytes())
            .await
            .map_err(|e| {
                StoreError::Unavailable(format!("failed to write {}: {e}", tmp_path.display()))
            })?;
        tokio::fs::rename(&tmp_path, &self.path).await.map_err(|e| {
            StoreError::Unavailable(format!(
                "failed to rename sticky data into {}: {e}",
                self.path.display()
            ))
        })?;

        debug!(channels = states.len(), path = %self.path.display(), "sticky data saved");
        Ok(())
    }
}
