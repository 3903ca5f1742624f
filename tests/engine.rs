#![allow(missing_docs)]
//! Sticky engine scenario tests.
//!
//! Everything here drives the public engine API against an in-memory
//! store and a scriptable fake channel port; no gateway involved.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use limpet::engine::port::{ChannelPort, DeleteOutcome, PortError};
use limpet::engine::{ClearOutcome, EngineError, StickyEngine};
use limpet::store::{StickyStore, StoreError};
use limpet::types::{ChannelId, ChannelSticky, MessageId, DEFAULT_MSG_LIMIT};

// ── Fakes ──────────────────────────────────────────────────────────

/// Scriptable channel port: hands out sequential message ids and
/// records every send and delete.
#[derive(Default)]
struct FakePort {
    next_id: AtomicU64,
    sent: Mutex<Vec<(ChannelId, String)>>,
    deleted: Mutex<Vec<(ChannelId, MessageId)>>,
    fail_sends: AtomicBool,
    fail_deletes: AtomicBool,
    delete_reports_missing: AtomicBool,
}

impl FakePort {
    fn new() -> Arc<Self> {
        let port = Self::default();
        port.next_id.store(100, Ordering::SeqCst);
        Arc::new(port)
    }

    fn sent_count(&self) -> usize {
        self.sent.lock().expect("sent lock").len()
    }

    fn last_sent(&self) -> Option<(ChannelId, String)> {
        self.sent.lock().expect("sent lock").last().cloned()
    }

    fn deleted_ids(&self) -> Vec<MessageId> {
        self.deleted
            .lock()
            .expect("deleted lock")
            .iter()
            .map(|(_, id)| *id)
            .collect()
    }
}

#[async_trait]
impl ChannelPort for FakePort {
    async fn send(&self, channel: ChannelId, text: &str) -> Result<MessageId, PortError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(PortError::Send("gateway unavailable".to_owned()));
        }
        let id = MessageId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.sent
            .lock()
            .expect("sent lock")
            .push((channel, text.to_owned()));
        Ok(id)
    }

    async fn delete(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<DeleteOutcome, PortError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(PortError::Delete("gateway unavailable".to_owned()));
        }
        self.deleted
            .lock()
            .expect("deleted lock")
            .push((channel, message));
        if self.delete_reports_missing.load(Ordering::SeqCst) {
            Ok(DeleteOutcome::AlreadyAbsent)
        } else {
            Ok(DeleteOutcome::Deleted)
        }
    }

    async fn message_exists(
        &self,
        _channel: ChannelId,
        _message: MessageId,
    ) -> Result<bool, PortError> {
        Ok(true)
    }
}

/// In-memory store that remembers the last saved map and can be told
/// to fail.
#[derive(Default)]
struct MemoryStore {
    initial: Mutex<HashMap<ChannelId, ChannelSticky>>,
    saved: Mutex<Option<HashMap<ChannelId, ChannelSticky>>>,
    save_count: AtomicUsize,
    fail_saves: AtomicBool,
    fail_load: AtomicBool,
}

impl MemoryStore {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with_initial(states: HashMap<ChannelId, ChannelSticky>) -> Arc<Self> {
        let store = Self::default();
        *store.initial.lock().expect("initial lock") = states;
        Arc::new(store)
    }

    fn saved(&self) -> Option<HashMap<ChannelId, ChannelSticky>> {
        self.saved.lock().expect("saved lock").clone()
    }

    fn saves(&self) -> usize {
        self.save_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StickyStore for MemoryStore {
    async fn load(&self) -> Result<HashMap<ChannelId, ChannelSticky>, StoreError> {
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("disk on fire".to_owned()));
        }
        Ok(self.initial.lock().expect("initial lock").clone())
    }

    async fn save(&self, states: &HashMap<ChannelId, ChannelSticky>) -> Result<(), StoreError> {
        self.save_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("disk on fire".to_owned()));
        }
        *self.saved.lock().expect("saved lock") = Some(states.clone());
        Ok(())
    }
}

// ── Helpers ────────────────────────────────────────────────────────

const CHANNEL: ChannelId = ChannelId(42);

fn engine_with(port: &Arc<FakePort>, store: &Arc<MemoryStore>) -> StickyEngine {
    let dyn_store: Arc<dyn StickyStore> = store.clone();
    let dyn_port: Arc<dyn ChannelPort> = port.clone();
    StickyEngine::new(dyn_store, dyn_port, DEFAULT_MSG_LIMIT)
}

async fn post_messages(engine: &StickyEngine, channel: ChannelId, count: usize) {
    for _ in 0..count {
        engine.on_message(channel, false).await;
    }
}

// ── stick ──────────────────────────────────────────────────────────

#[tokio::test]
async fn stick_posts_immediately_and_persists() {
    let port = FakePort::new();
    let store = MemoryStore::new();
    let engine = engine_with(&port, &store);

    let applied = engine
        .set_sticky(CHANNEL, "read the rules".to_owned())
        .await
        .expect("stick should succeed");

    assert_eq!(applied.msg_limit, DEFAULT_MSG_LIMIT);
    assert_eq!(port.sent_count(), 1);
    assert_eq!(
        port.last_sent(),
        Some((CHANNEL, "read the rules".to_owned()))
    );

    let state = engine.sticky_state(CHANNEL).await.expect("state exists");
    assert_eq!(state.message, "read the rules");
    assert_eq!(state.message_count, 0);
    assert!(state.last_message_id.is_some());

    let saved = store.saved().expect("a save happened");
    assert_eq!(saved.get(&CHANNEL), Some(&state));
}

#[tokio::test]
async fn stick_overwrite_keeps_prior_limit_and_resets_count() {
    let port = FakePort::new();
    let store = MemoryStore::new();
    let engine = engine_with(&port, &store);

    engine
        .set_sticky(CHANNEL, "v1".to_owned())
        .await
        .expect("stick");
    engine.set_limit(CHANNEL, 5).await.expect("msglimit");
    post_messages(&engine, CHANNEL, 3).await;

    let applied = engine
        .set_sticky(CHANNEL, "v2".to_owned())
        .await
        .expect("re-stick");

    assert_eq!(applied.msg_limit, 5);
    let state = engine.sticky_state(CHANNEL).await.expect("state exists");
    assert_eq!(state.message, "v2");
    assert_eq!(state.msg_limit, 5);
    assert_eq!(state.message_count, 0);
}

#[tokio::test]
async fn stick_send_failure_still_persists_entry() {
    let port = FakePort::new();
    let store = MemoryStore::new();
    let engine = engine_with(&port, &store);

    port.fail_sends.store(true, Ordering::SeqCst);
    let result = engine.set_sticky(CHANNEL, "hello".to_owned()).await;

    assert!(matches!(result, Err(EngineError::Platform(_))));
    let state = engine.sticky_state(CHANNEL).await.expect("entry created");
    assert_eq!(state.message, "hello");
    assert_eq!(state.last_message_id, None);
    assert!(store.saved().expect("saved anyway").contains_key(&CHANNEL));
}

// ── unstick ────────────────────────────────────────────────────────

#[tokio::test]
async fn unstick_removes_and_is_idempotent() {
    let port = FakePort::new();
    let store = MemoryStore::new();
    let engine = engine_with(&port, &store);

    engine
        .set_sticky(CHANNEL, "bye".to_owned())
        .await
        .expect("stick");

    assert_eq!(engine.clear_sticky(CHANNEL).await, ClearOutcome::Removed);
    assert!(engine.sticky_state(CHANNEL).await.is_none());
    assert!(store.saved().expect("saved").is_empty());

    // Second clear reports the distinct no-op outcome and changes nothing.
    assert_eq!(
        engine.clear_sticky(CHANNEL).await,
        ClearOutcome::NothingToClear
    );
    assert!(engine.sticky_state(CHANNEL).await.is_none());
}

#[tokio::test]
async fn unstick_deletes_last_posted_instance() {
    let port = FakePort::new();
    let store = MemoryStore::new();
    let engine = engine_with(&port, &store);

    engine
        .set_sticky(CHANNEL, "bye".to_owned())
        .await
        .expect("stick");
    let posted = engine
        .sticky_state(CHANNEL)
        .await
        .and_then(|s| s.last_message_id)
        .expect("posted id");

    engine.clear_sticky(CHANNEL).await;
    assert_eq!(port.deleted_ids(), vec![posted]);
}

#[tokio::test]
async fn unstick_survives_delete_failure() {
    let port = FakePort::new();
    let store = MemoryStore::new();
    let engine = engine_with(&port, &store);

    engine
        .set_sticky(CHANNEL, "bye".to_owned())
        .await
        .expect("stick");
    port.fail_deletes.store(true, Ordering::SeqCst);

    assert_eq!(engine.clear_sticky(CHANNEL).await, ClearOutcome::Removed);
    assert!(engine.sticky_state(CHANNEL).await.is_none());
}

// ── msglimit ───────────────────────────────────────────────────────

#[tokio::test]
async fn msglimit_zero_rejected_on_any_channel() {
    let port = FakePort::new();
    let store = MemoryStore::new();
    let engine = engine_with(&port, &store);

    // Unconfigured channel: the limit check still comes first.
    assert!(matches!(
        engine.set_limit(CHANNEL, 0).await,
        Err(EngineError::InvalidLimit(0))
    ));

    engine
        .set_sticky(CHANNEL, "hello".to_owned())
        .await
        .expect("stick");
    assert!(matches!(
        engine.set_limit(CHANNEL, 0).await,
        Err(EngineError::InvalidLimit(0))
    ));
    assert!(matches!(
        engine.set_limit(CHANNEL, -3).await,
        Err(EngineError::InvalidLimit(-3))
    ));

    // State unchanged by the rejected commands.
    let state = engine.sticky_state(CHANNEL).await.expect("state exists");
    assert_eq!(state.msg_limit, DEFAULT_MSG_LIMIT);
}

#[tokio::test]
async fn msglimit_requires_existing_sticky() {
    let port = FakePort::new();
    let store = MemoryStore::new();
    let engine = engine_with(&port, &store);

    assert!(matches!(
        engine.set_limit(CHANNEL, 5).await,
        Err(EngineError::NoSticky)
    ));
}

#[tokio::test]
async fn stick_then_msglimit_yields_reset_state() {
    let port = FakePort::new();
    let store = MemoryStore::new();
    let engine = engine_with(&port, &store);

    engine
        .set_sticky(CHANNEL, "hello".to_owned())
        .await
        .expect("stick");
    engine.set_limit(CHANNEL, 5).await.expect("msglimit");

    let state = engine.sticky_state(CHANNEL).await.expect("state exists");
    assert_eq!(state.message, "hello");
    assert_eq!(state.msg_limit, 5);
    assert_eq!(state.message_count, 0);
}

#[tokio::test]
async fn msglimit_reset_prevents_stale_count_repost() {
    let port = FakePort::new();
    let store = MemoryStore::new();
    let engine = engine_with(&port, &store);

    engine
        .set_sticky(CHANNEL, "hello".to_owned())
        .await
        .expect("stick");
    post_messages(&engine, CHANNEL, 4).await;

    // Lowering the limit below the stale count must not fire a repost
    // until 2 fresh messages arrive.
    engine.set_limit(CHANNEL, 2).await.expect("msglimit");
    assert_eq!(port.sent_count(), 1);

    post_messages(&engine, CHANNEL, 1).await;
    assert_eq!(port.sent_count(), 1);
    post_messages(&engine, CHANNEL, 1).await;
    assert_eq!(port.sent_count(), 2);
}

// ── message counting and reposts ───────────────────────────────────

#[tokio::test]
async fn repost_fires_exactly_at_the_limit() {
    let port = FakePort::new();
    let store = MemoryStore::new();
    let engine = engine_with(&port, &store);

    engine
        .set_sticky(CHANNEL, "hello".to_owned())
        .await
        .expect("stick");
    engine.set_limit(CHANNEL, 3).await.expect("msglimit");

    post_messages(&engine, CHANNEL, 2).await;
    assert_eq!(port.sent_count(), 1, "below the limit nothing reposts");

    post_messages(&engine, CHANNEL, 1).await;
    assert_eq!(port.sent_count(), 2, "the third message triggers a repost");

    let state = engine.sticky_state(CHANNEL).await.expect("state exists");
    assert_eq!(state.message_count, 0, "count resets after a repost");
}

#[tokio::test]
async fn repost_deletes_previous_instance_first() {
    let port = FakePort::new();
    let store = MemoryStore::new();
    let engine = engine_with(&port, &store);

    engine
        .set_sticky(CHANNEL, "hello".to_owned())
        .await
        .expect("stick");
    let first_posted = engine
        .sticky_state(CHANNEL)
        .await
        .and_then(|s| s.last_message_id)
        .expect("posted id");

    engine.set_limit(CHANNEL, 1).await.expect("msglimit");
    post_messages(&engine, CHANNEL, 1).await;

    assert_eq!(port.deleted_ids(), vec![first_posted]);
    let state = engine.sticky_state(CHANNEL).await.expect("state exists");
    assert_ne!(state.last_message_id, Some(first_posted));
}

#[tokio::test]
async fn delete_of_missing_message_never_blocks_repost() {
    let port = FakePort::new();
    let store = MemoryStore::new();
    let engine = engine_with(&port, &store);

    engine
        .set_sticky(CHANNEL, "hello".to_owned())
        .await
        .expect("stick");
    engine.set_limit(CHANNEL, 1).await.expect("msglimit");

    port.delete_reports_missing.store(true, Ordering::SeqCst);
    post_messages(&engine, CHANNEL, 1).await;

    assert_eq!(port.sent_count(), 2, "new sticky still sent");
    let state = engine.sticky_state(CHANNEL).await.expect("state exists");
    assert!(state.last_message_id.is_some());
    assert_eq!(state.message_count, 0);
}

#[tokio::test]
async fn delete_hard_failure_still_posts_new_sticky() {
    let port = FakePort::new();
    let store = MemoryStore::new();
    let engine = engine_with(&port, &store);

    engine
        .set_sticky(CHANNEL, "hello".to_owned())
        .await
        .expect("stick");
    engine.set_limit(CHANNEL, 1).await.expect("msglimit");

    port.fail_deletes.store(true, Ordering::SeqCst);
    post_messages(&engine, CHANNEL, 1).await;

    // A stray duplicate is preferable to losing the sticky.
    assert_eq!(port.sent_count(), 2);
}

#[tokio::test]
async fn send_failure_keeps_state_and_retries_next_message() {
    let port = FakePort::new();
    let store = MemoryStore::new();
    let engine = engine_with(&port, &store);

    engine
        .set_sticky(CHANNEL, "hello".to_owned())
        .await
        .expect("stick");
    engine.set_limit(CHANNEL, 3).await.expect("msglimit");
    let posted = engine
        .sticky_state(CHANNEL)
        .await
        .and_then(|s| s.last_message_id);
    let saves_before = store.saves();

    port.fail_sends.store(true, Ordering::SeqCst);
    post_messages(&engine, CHANNEL, 3).await;

    let state = engine.sticky_state(CHANNEL).await.expect("state exists");
    assert_eq!(state.message_count, 3, "count stays at its pre-repost value");
    assert_eq!(state.last_message_id, posted);
    assert_eq!(store.saves(), saves_before, "failed repost is not persisted");

    // Next qualifying message retries the repost.
    port.fail_sends.store(false, Ordering::SeqCst);
    post_messages(&engine, CHANNEL, 1).await;

    let state = engine.sticky_state(CHANNEL).await.expect("state exists");
    assert_eq!(state.message_count, 0);
    assert_ne!(state.last_message_id, posted);
}

#[tokio::test]
async fn bot_messages_never_count() {
    let port = FakePort::new();
    let store = MemoryStore::new();
    let engine = engine_with(&port, &store);

    engine
        .set_sticky(CHANNEL, "hello".to_owned())
        .await
        .expect("stick");
    engine.set_limit(CHANNEL, 2).await.expect("msglimit");

    for _ in 0..5 {
        engine.on_message(CHANNEL, true).await;
    }

    let state = engine.sticky_state(CHANNEL).await.expect("state exists");
    assert_eq!(state.message_count, 0);
    assert_eq!(port.sent_count(), 1);
}

#[tokio::test]
async fn unconfigured_channel_is_ignored() {
    let port = FakePort::new();
    let store = MemoryStore::new();
    let engine = engine_with(&port, &store);

    post_messages(&engine, ChannelId(999), 20).await;

    assert_eq!(port.sent_count(), 0);
    assert_eq!(store.saves(), 0);
}

#[tokio::test]
async fn channels_count_independently() {
    let port = FakePort::new();
    let store = MemoryStore::new();
    let engine = engine_with(&port, &store);
    let other = ChannelId(77);

    engine
        .set_sticky(CHANNEL, "a".to_owned())
        .await
        .expect("stick a");
    engine.set_limit(CHANNEL, 2).await.expect("limit a");
    engine
        .set_sticky(other, "b".to_owned())
        .await
        .expect("stick b");
    engine.set_limit(other, 3).await.expect("limit b");

    post_messages(&engine, CHANNEL, 1).await;
    post_messages(&engine, other, 2).await;
    assert_eq!(port.sent_count(), 2, "neither channel reached its limit");

    post_messages(&engine, CHANNEL, 1).await;
    assert_eq!(port.sent_count(), 3, "first channel reposts alone");

    let state = engine.sticky_state(other).await.expect("state exists");
    assert_eq!(state.message_count, 2, "other channel keeps its own count");
}

// ── persistence policy ─────────────────────────────────────────────

#[tokio::test]
async fn plain_count_increments_are_not_persisted() {
    let port = FakePort::new();
    let store = MemoryStore::new();
    let engine = engine_with(&port, &store);

    engine
        .set_sticky(CHANNEL, "hello".to_owned())
        .await
        .expect("stick");
    let saves_before = store.saves();

    post_messages(&engine, CHANNEL, 5).await;

    assert_eq!(store.saves(), saves_before);
}

#[tokio::test]
async fn save_failure_keeps_engine_serving() {
    let port = FakePort::new();
    let store = MemoryStore::new();
    let engine = engine_with(&port, &store);

    store.fail_saves.store(true, Ordering::SeqCst);
    engine
        .set_sticky(CHANNEL, "hello".to_owned())
        .await
        .expect("stick succeeds despite store failure");
    engine.set_limit(CHANNEL, 1).await.expect("msglimit too");

    post_messages(&engine, CHANNEL, 1).await;
    assert_eq!(port.sent_count(), 2, "reposts keep flowing from memory");
}

#[tokio::test]
async fn restore_picks_up_persisted_counts() {
    let port = FakePort::new();
    let mut initial = HashMap::new();
    initial.insert(
        CHANNEL,
        ChannelSticky {
            message: "welcome".to_owned(),
            msg_limit: 3,
            message_count: 2,
            last_message_id: Some(MessageId(5)),
        },
    );
    let store = MemoryStore::with_initial(initial);
    let engine = engine_with(&port, &store);

    let restored = engine.restore().await.expect("restore");
    assert_eq!(restored, 1);

    // One more message completes the persisted count of 2 out of 3.
    post_messages(&engine, CHANNEL, 1).await;
    assert_eq!(port.sent_count(), 1);
    assert_eq!(port.deleted_ids(), vec![MessageId(5)]);
}

#[tokio::test]
async fn restore_propagates_store_errors() {
    let port = FakePort::new();
    let store = MemoryStore::new();
    store.fail_load.store(true, Ordering::SeqCst);
    let engine = engine_with(&port, &store);

    assert!(engine.restore().await.is_err());
}

#[tokio::test]
async fn flush_writes_current_snapshot() {
    let port = FakePort::new();
    let store = MemoryStore::new();
    let engine = engine_with(&port, &store);

    engine
        .set_sticky(CHANNEL, "hello".to_owned())
        .await
        .expect("stick");
    post_messages(&engine, CHANNEL, 2).await;

    engine.flush().await.expect("flush");

    let saved = store.saved().expect("saved");
    let state = engine.sticky_state(CHANNEL).await.expect("state exists");
    assert_eq!(saved.get(&CHANNEL), Some(&state));
    assert_eq!(
        saved.get(&CHANNEL).map(|s| s.message_count),
        Some(2),
        "flush captures counts that routine saves skip"
    );
}
