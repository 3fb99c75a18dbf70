//! 会话存储
//!
//! 以 thread_id 为键。每个 thread 一个槽位：`state` 保护会话数据（单个操作线性一致），
//! `turn` 为整轮互斥锁（同一 thread 同时至多一个 Dispatcher 在跑）。外层 map 的锁只在查找 / 插入
//! 槽位时短暂持有，不同 thread 之间互不阻塞。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use super::message::Message;
use super::thread::{Scratch, Session};
use crate::core::SupportError;

/// 整轮租约：持有期间同一 thread 的其他 handle_turn 等待
#[derive(Debug)]
pub struct TurnLease {
    _guard: OwnedMutexGuard<()>,
}

/// 会话存储接口（可替换为持久化实现）
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// 获取或创建会话，返回当前快照
    async fn get_or_create(&self, thread_id: &str) -> Session;

    /// 追加消息；thread 不存在时返回 ThreadNotFound
    async fn append(&self, thread_id: &str, message: Message) -> Result<(), SupportError>;

    /// 不可变快照（克隆），生成回复期间可安全并发读取
    async fn snapshot(&self, thread_id: &str) -> Result<Session, SupportError>;

    async fn update_scratch(
        &self,
        thread_id: &str,
        key: &str,
        value: Value,
    ) -> Result<(), SupportError>;

    /// 以整体替换的方式恢复会话（如从外部检查点加载）
    async fn restore(&self, session: Session);

    /// 一次性提交一轮的消息与 scratch，避免取消时出现半轮写入
    async fn commit_turn(
        &self,
        thread_id: &str,
        messages: Vec<Message>,
        scratch: Scratch,
    ) -> Result<(), SupportError>;

    /// 获取整轮互斥租约；thread 不存在时先创建
    async fn lock_thread(&self, thread_id: &str) -> TurnLease;

    async fn thread_count(&self) -> usize;
}

struct SessionSlot {
    turn: Arc<Mutex<()>>,
    state: Mutex<Session>,
}

impl SessionSlot {
    fn new(session: Session) -> Self {
        Self {
            turn: Arc::new(Mutex::new(())),
            state: Mutex::new(session),
        }
    }
}

/// 内存会话存储
#[derive(Default)]
pub struct MemorySessionStore {
    slots: RwLock<HashMap<String, Arc<SessionSlot>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, thread_id: &str) -> Option<Arc<SessionSlot>> {
        self.slots.read().await.get(thread_id).cloned()
    }

    async fn slot_or_create(&self, thread_id: &str) -> Arc<SessionSlot> {
        if let Some(slot) = self.slot(thread_id).await {
            return slot;
        }
        let mut slots = self.slots.write().await;
        slots
            .entry(thread_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(thread_id, "session created");
                Arc::new(SessionSlot::new(Session::new(thread_id)))
            })
            .clone()
    }

    async fn existing(&self, thread_id: &str) -> Result<Arc<SessionSlot>, SupportError> {
        self.slot(thread_id)
            .await
            .ok_or_else(|| SupportError::ThreadNotFound(thread_id.to_string()))
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get_or_create(&self, thread_id: &str) -> Session {
        let slot = self.slot_or_create(thread_id).await;
        let session = slot.state.lock().await;
        session.clone()
    }

    async fn append(&self, thread_id: &str, message: Message) -> Result<(), SupportError> {
        let slot = self.existing(thread_id).await?;
        slot.state.lock().await.push(message);
        Ok(())
    }

    async fn snapshot(&self, thread_id: &str) -> Result<Session, SupportError> {
        let slot = self.existing(thread_id).await?;
        let session = slot.state.lock().await;
        Ok(session.clone())
    }

    async fn update_scratch(
        &self,
        thread_id: &str,
        key: &str,
        value: Value,
    ) -> Result<(), SupportError> {
        let slot = self.existing(thread_id).await?;
        slot.state.lock().await.set_scratch(key, value);
        Ok(())
    }

    async fn restore(&self, session: Session) {
        let slot = self.slot_or_create(&session.thread_id).await;
        *slot.state.lock().await = session;
    }

    async fn commit_turn(
        &self,
        thread_id: &str,
        messages: Vec<Message>,
        scratch: Scratch,
    ) -> Result<(), SupportError> {
        let slot = self.existing(thread_id).await?;
        let mut session = slot.state.lock().await;
        for message in messages {
            session.push(message);
        }
        session.scratch = scratch;
        session.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn lock_thread(&self, thread_id: &str) -> TurnLease {
        let slot = self.slot_or_create(thread_id).await;
        let guard = slot.turn.clone().lock_owned().await;
        TurnLease { _guard: guard }
    }

    async fn thread_count(&self) -> usize {
        self.slots.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn append_requires_existing_thread() {
        let store = MemorySessionStore::new();
        let err = store.append("missing", Message::user("hi")).await.unwrap_err();
        assert!(matches!(err, SupportError::ThreadNotFound(id) if id == "missing"));
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let store = MemorySessionStore::new();
        let first = store.get_or_create("t-1").await;
        store.append("t-1", Message::user("hello")).await.unwrap();
        let second = store.get_or_create("t-1").await;

        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.messages.len(), 1);
        assert_eq!(store.thread_count().await, 1);
    }

    #[tokio::test]
    async fn snapshot_is_detached_copy() {
        let store = MemorySessionStore::new();
        store.get_or_create("t-1").await;
        let before = store.snapshot("t-1").await.unwrap();
        store.update_scratch("t-1", "user_id", json!("u-1")).await.unwrap();

        assert!(before.scratch.is_empty());
        let after = store.snapshot("t-1").await.unwrap();
        assert_eq!(after.scratch_str("user_id"), Some("u-1"));
    }

    #[tokio::test]
    async fn restore_replaces_session() {
        let store = MemorySessionStore::new();
        let mut session = Session::new("t-9");
        session.push(Message::user("old question"));
        session.set_scratch("email", json!("x@example.com"));
        store.restore(session).await;

        let snap = store.snapshot("t-9").await.unwrap();
        assert_eq!(snap.messages.len(), 1);
        assert_eq!(snap.scratch_str("email"), Some("x@example.com"));
    }

    #[tokio::test]
    async fn commit_turn_appends_in_order_and_replaces_scratch() {
        let store = MemorySessionStore::new();
        store.get_or_create("t-1").await;
        let mut scratch = Scratch::new();
        scratch.insert("consecutive_failures".into(), json!(1));
        store
            .commit_turn(
                "t-1",
                vec![Message::user("q"), Message::assistant("a")],
                scratch,
            )
            .await
            .unwrap();

        let snap = store.snapshot("t-1").await.unwrap();
        let contents: Vec<_> = snap.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["q", "a"]);
        assert_eq!(snap.consecutive_failures(), 1);
    }

    #[tokio::test]
    async fn lease_on_one_thread_does_not_block_another() {
        let store = MemorySessionStore::new();
        let _held = store.lock_thread("busy").await;

        let other = tokio::time::timeout(Duration::from_millis(200), store.lock_thread("free")).await;
        assert!(other.is_ok());

        let same = tokio::time::timeout(Duration::from_millis(50), store.lock_thread("busy")).await;
        assert!(same.is_err());
    }
}
