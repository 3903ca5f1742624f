//! The sticky-state engine: per-channel counters, repost decisions, and
//! persistence policy.
//!
//! One [`StickyEngine`] instance owns the authoritative in-memory state,
//! constructed with an injected store and channel port. Events for a
//! single channel are serialized through that channel's own mutex, so
//! two threshold crossings can never race into duplicate reposts, while
//! unrelated channels proceed concurrently. Port calls are awaited
//! holding only the affected channel's lock.
//!
//! Persistence is whole-map: after each durable mutation the engine
//! snapshots every channel and hands the map to the store. Snapshots and
//! saves pair up under a dedicated lock so a slow save cannot land on
//! top of a newer one out of order.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::store::{StickyStore, StoreError};
use crate::types::{ChannelId, ChannelSticky};

pub mod port;

use port::{ChannelPort, DeleteOutcome, PortError};

/// Validation and platform errors surfaced to the command layer.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Requested message limit is below the minimum of 1.
    #[error("message limit must be at least 1 (got {0})")]
    InvalidLimit(i64),
    /// Configuration command on a channel with no sticky message.
    #[error("no sticky message is set in this channel")]
    NoSticky,
    /// The platform call behind the command failed.
    #[error(transparent)]
    Platform(#[from] PortError),
}

/// Result of [`StickyEngine::clear_sticky`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    /// A sticky message existed and its entry was dropped.
    Removed,
    /// Nothing was configured for the channel; clearing is a no-op.
    NothingToClear,
}

/// Confirmation data returned by [`StickyEngine::set_sticky`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StickyApplied {
    /// Limit in effect after the command: the channel's prior limit on
    /// overwrite, the engine default on first configuration.
    pub msg_limit: u32,
}

/// One channel's state behind its own lock. `None` means no sticky is
/// configured; the slot itself stays in the map once created.
type Slot = Arc<Mutex<Option<ChannelSticky>>>;

/// Per-channel sticky state machine.
pub struct StickyEngine {
    store: Arc<dyn StickyStore>,
    port: Arc<dyn ChannelPort>,
    default_limit: u32,
    channels: RwLock<HashMap<ChannelId, Slot>>,
    /// Pairs snapshot+save so concurrent saves land in order.
    save_lock: Mutex<()>,
}

impl StickyEngine {
    /// Create an engine with no channels configured.
    ///
    /// `default_limit` is the repost limit applied on first `/stick`;
    /// values below 1 are clamped to 1.
    pub fn new(store: Arc<dyn StickyStore>, port: Arc<dyn ChannelPort>, default_limit: u32) -> Self {
        Self {
            store,
            port,
            default_limit: default_limit.max(1),
            channels: RwLock::new(HashMap::new()),
            save_lock: Mutex::new(()),
        }
    }

    /// Populate in-memory state from the store.
    ///
    /// Returns the number of channels restored.
    ///
    /// # Errors
    ///
    /// Propagates the store's error when the medium cannot be read; the
    /// caller decides whether starting empty is acceptable.
    pub async fn restore(&self) -> Result<usize, StoreError> {
        let loaded = self.store.load().await?;
        let count = loaded.len();
        let mut channels = self.channels_write();
        for (channel, state) in loaded {
            channels.insert(channel, Arc::new(Mutex::new(Some(state))));
        }
        Ok(count)
    }

    /// Configure (or replace) the sticky message for `channel` and post
    /// it immediately.
    ///
    /// The counter resets, an existing channel keeps its limit, and the
    /// prior posted instance stays referenced until the immediate post
    /// replaces it. The entry is persisted even when the post fails, so
    /// the next qualifying message retries the repost.
    ///
    /// # Errors
    ///
    /// [`EngineError::Platform`] when the immediate post failed; the
    /// entry is still saved.
    pub async fn set_sticky(
        &self,
        channel: ChannelId,
        text: String,
    ) -> Result<StickyApplied, EngineError> {
        let slot = self.slot(channel);
        let mut guard = slot.lock().await;

        let msg_limit = guard.as_ref().map_or(self.default_limit, |s| s.msg_limit);
        let last_message_id = guard.as_ref().and_then(|s| s.last_message_id);
        *guard = Some(ChannelSticky {
            message: text.clone(),
            msg_limit,
            message_count: 0,
            last_message_id,
        });

        let posted = self.port.send(channel, &text).await;
        if let Ok(new_id) = &posted {
            if let Some(state) = guard.as_mut() {
                state.last_message_id = Some(*new_id);
            }
        }
        drop(guard);
        self.persist().await;

        match posted {
            Ok(message_id) => {
                info!(%channel, %message_id, msg_limit, "sticky message set");
                Ok(StickyApplied { msg_limit })
            }
            Err(e) => {
                warn!(%channel, error = %e, "sticky saved but initial post failed");
                Err(EngineError::Platform(e))
            }
        }
    }

    /// Remove the sticky message for `channel`.
    ///
    /// The last posted instance is deleted best-effort; a delete failure
    /// never blocks dropping the entry. Idempotent: clearing an
    /// unconfigured channel reports [`ClearOutcome::NothingToClear`] and
    /// changes nothing.
    pub async fn clear_sticky(&self, channel: ChannelId) -> ClearOutcome {
        let slot = self.slot(channel);
        let mut guard = slot.lock().await;
        let Some(state) = guard.take() else {
            return ClearOutcome::NothingToClear;
        };

        if let Some(last) = state.last_message_id {
            match self.port.delete(channel, last).await {
                Ok(DeleteOutcome::Deleted) => {
                    debug!(%channel, message_id = %last, "deleted sticky instance");
                }
                Ok(DeleteOutcome::AlreadyAbsent) => {
                    debug!(%channel, "sticky instance already gone");
                }
                Err(e) => warn!(%channel, error = %e, "failed to delete sticky instance"),
            }
        }
        drop(guard);
        self.persist().await;
        info!(%channel, "sticky message removed");
        ClearOutcome::Removed
    }

    /// Update the repost limit for `channel`, resetting the counter.
    ///
    /// The reset prevents a freshly lowered limit from firing an
    /// immediate repost off the stale count.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidLimit`] for `limit < 1` on any channel;
    /// [`EngineError::NoSticky`] when the channel has no sticky message.
    pub async fn set_limit(&self, channel: ChannelId, limit: i64) -> Result<(), EngineError> {
        let msg_limit = u32::try_from(limit)
            .ok()
            .filter(|n| *n >= 1)
            .ok_or(EngineError::InvalidLimit(limit))?;

        let slot = self.slot(channel);
        let mut guard = slot.lock().await;
        let Some(state) = guard.as_mut() else {
            return Err(EngineError::NoSticky);
        };
        state.msg_limit = msg_limit;
        state.message_count = 0;
        drop(guard);
        self.persist().await;
        info!(%channel, msg_limit, "message limit updated");
        Ok(())
    }

    /// Count an observed channel message and repost once the limit is
    /// reached.
    ///
    /// Bot-authored messages and channels without a sticky are ignored.
    /// On repost the previous instance is deleted first (already-gone is
    /// fine, other failures are logged and do not block the post), then
    /// the text is sent anew. A failed send leaves the counter past the
    /// limit and skips the save, so the next message retries; plain
    /// increments below the limit are never persisted.
    pub async fn on_message(&self, channel: ChannelId, author_is_bot: bool) {
        if author_is_bot {
            return;
        }
        let slot = self.slot(channel);
        let mut guard = slot.lock().await;
        let Some(state) = guard.as_mut() else {
            return;
        };

        state.message_count = state.message_count.saturating_add(1);
        if state.message_count < state.msg_limit {
            return;
        }

        if let Some(last) = state.last_message_id {
            match self.port.delete(channel, last).await {
                Ok(DeleteOutcome::Deleted) => {
                    debug!(%channel, message_id = %last, "deleted previous sticky instance");
                }
                Ok(DeleteOutcome::AlreadyAbsent) => {
                    debug!(%channel, "previous sticky instance already gone");
                }
                // A stray duplicate beats losing the sticky; keep posting.
                Err(e) => {
                    warn!(%channel, error = %e, "failed to delete previous sticky instance");
                }
            }
        }

        match self.port.send(channel, &state.message).await {
            Ok(new_id) => {
                state.last_message_id = Some(new_id);
                state.message_count = 0;
                drop(guard);
                self.persist().await;
                debug!(%channel, message_id = %new_id, "sticky message reposted");
            }
            Err(e) => warn!(%channel, error = %e, "failed to repost sticky message"),
        }
    }

    /// Current state for `channel`, if a sticky message is configured.
    pub async fn sticky_state(&self, channel: ChannelId) -> Option<ChannelSticky> {
        let slot = self.channels_read().get(&channel).map(Arc::clone)?;
        let guard = slot.lock().await;
        guard.clone()
    }

    /// Persist all channel state, surfacing the store's error.
    ///
    /// Called internally after durable mutations and once more on
    /// shutdown so a clean exit never loses state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] when the write cannot
    /// complete; in-memory state is unaffected.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let _save = self.save_lock.lock().await;
        let snapshot = self.snapshot().await;
        self.store.save(&snapshot).await
    }

    /// Fire-and-forget persistence after a mutation. Store failures are
    /// logged; the process keeps serving from memory.
    async fn persist(&self) {
        if let Err(e) = self.flush().await {
            warn!(error = %e, "failed to persist sticky data, continuing with in-memory state");
        }
    }

    /// Clone the current state of every configured channel.
    async fn snapshot(&self) -> HashMap<ChannelId, ChannelSticky> {
        let slots: Vec<(ChannelId, Slot)> = self
            .channels_read()
            .iter()
            .map(|(channel, slot)| (*channel, Arc::clone(slot)))
            .collect();

        let mut snapshot = HashMap::with_capacity(slots.len());
        for (channel, slot) in slots {
            if let Some(state) = slot.lock().await.as_ref() {
                snapshot.insert(channel, state.clone());
            }
        }
        snapshot
    }

    /// Fetch (or lazily create) the lock slot for `channel`.
    fn slot(&self, channel: ChannelId) -> Slot {
        if let Some(slot) = self.channels_read().get(&channel) {
            return Arc::clone(slot);
        }
        let mut channels = self.channels_write();
        Arc::clone(
            channels
                .entry(channel)
                .or_insert_with(|| Arc::new(Mutex::new(None))),
        )
    }

    fn channels_read(&self) -> RwLockReadGuard<'_, HashMap<ChannelId, Slot>> {
        self.channels.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn channels_write(&self) -> RwLockWriteGuard<'_, HashMap<ChannelId, Slot>> {
        self.channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
