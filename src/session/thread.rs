//! 单个会话（thread）
//!
//! 会话由 SessionStore 独占持有；外部只拿到 snapshot（克隆）。scratch 为跨轮次的键值记忆，
//! 例如已解析的 user_id，避免每轮重复查询后端。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::message::Message;

/// 会话 scratch：键有序，便于日志与测试比对
pub type Scratch = BTreeMap<String, Value>;

/// scratch 中约定的键
pub mod keys {
    pub const ESCALATED: &str = "escalated";
    pub const ESCALATION_REASON: &str = "escalation_reason";
    pub const CONSECUTIVE_FAILURES: &str = "consecutive_failures";
    pub const EMAIL: &str = "email";
    pub const USER_ID: &str = "user_id";
    pub const IS_BLOCKED: &str = "is_blocked";
    pub const TICKET_ID: &str = "ticket_id";
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub thread_id: String,
    pub messages: Vec<Message>,
    pub scratch: Scratch,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(thread_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            thread_id: thread_id.into(),
            messages: Vec::new(),
            scratch: Scratch::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    pub fn set_scratch(&mut self, key: impl Into<String>, value: Value) {
        self.scratch.insert(key.into(), value);
        self.updated_at = Utc::now();
    }

    pub fn scratch_str(&self, key: &str) -> Option<&str> {
        self.scratch.get(key).and_then(Value::as_str)
    }

    /// 是否已转人工；转人工后不再自动调度工具，直到外部清除
    pub fn is_escalated(&self) -> bool {
        self.scratch
            .get(keys::ESCALATED)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// 连续失败轮数（Dispatcher 维护）
    pub fn consecutive_failures(&self) -> u32 {
        failure_count(&self.scratch)
    }
}

pub(crate) fn failure_count(scratch: &Scratch) -> u32 {
    scratch
        .get(keys::CONSECUTIVE_FAILURES)
        .and_then(Value::as_u64)
        .map(|n| n.min(u64::from(u32::MAX)) as u32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_session_is_empty() {
        let session = Session::new("t-1");
        assert!(session.messages.is_empty());
        assert!(session.scratch.is_empty());
        assert!(!session.is_escalated());
        assert_eq!(session.consecutive_failures(), 0);
    }

    #[test]
    fn scratch_helpers_read_typed_values() {
        let mut session = Session::new("t-1");
        session.set_scratch(keys::ESCALATED, json!(true));
        session.set_scratch(keys::CONSECUTIVE_FAILURES, json!(2));
        session.set_scratch(keys::EMAIL, json!("ana@example.com"));

        assert!(session.is_escalated());
        assert_eq!(session.consecutive_failures(), 2);
        assert_eq!(session.scratch_str(keys::EMAIL), Some("ana@example.com"));
    }
}
