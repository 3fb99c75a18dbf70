//! 会话管理器：对外唯一入口 handle_turn
//!
//! 每轮：取得 thread 租约（同一 thread 串行，不同 thread 并发）-> 快照 -> Dispatcher -> 转人工策略 ->
//! 一次性提交 user + assistant 消息与 scratch -> 返回回复与转人工标记。本层不重试。
//! 已转人工的 thread 不再调度工具，只返回交接提示，直到 clear_escalation。

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::core::SupportError;
use crate::dispatch::{DispatchMetadata, Dispatcher};
use crate::escalation::{EscalationPolicy, EscalationReason};
use crate::session::{keys, Message, Session, SessionStore};
use crate::tools::ToolCallRecord;

/// 转人工当轮附加的交接提示
pub const HANDOFF_MESSAGE: &str =
    "I've passed this conversation to our support team. A human agent will follow up with you here shortly.";

/// 已转人工的 thread 上的固定回复
pub const AWAITING_AGENT_MESSAGE: &str =
    "Your conversation is with our support team now. A human agent will reply here soon.";

/// handle_turn 的返回
#[derive(Debug, Clone, Serialize)]
pub struct TurnResponse {
    pub response_text: String,
    pub escalated: bool,
    pub reason: Option<EscalationReason>,
    /// 本轮超出工具调用上限，建议人工跟进；不会锁定 thread
    pub recommend_escalation: bool,
    pub tool_calls: Vec<ToolCallRecord>,
    pub metadata: DispatchMetadata,
}

pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    dispatcher: Dispatcher,
    policy: EscalationPolicy,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, dispatcher: Dispatcher, policy: EscalationPolicy) -> Self {
        Self {
            store,
            dispatcher,
            policy,
        }
    }

    /// 处理一轮用户消息
    pub async fn handle_turn(
        &self,
        thread_id: &str,
        user_message: &str,
    ) -> Result<TurnResponse, SupportError> {
        let _lease = self.store.lock_thread(thread_id).await;
        self.run_turn(thread_id, user_message).await
    }

    /// 可取消版本：取消发生在提交之前则本轮不写入任何内容
    pub async fn handle_turn_cancellable(
        &self,
        thread_id: &str,
        user_message: &str,
        cancel: CancellationToken,
    ) -> Result<TurnResponse, SupportError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(thread_id, "turn cancelled");
                Err(SupportError::Cancelled(thread_id.to_string()))
            }
            result = self.handle_turn(thread_id, user_message) => result,
        }
    }

    async fn run_turn(
        &self,
        thread_id: &str,
        user_message: &str,
    ) -> Result<TurnResponse, SupportError> {
        let snapshot = self.store.snapshot(thread_id).await?;

        if snapshot.is_escalated() {
            let reason = snapshot
                .scratch_str(keys::ESCALATION_REASON)
                .and_then(|r| r.parse::<EscalationReason>().ok());
            self.store
                .commit_turn(
                    thread_id,
                    vec![
                        Message::user(user_message),
                        Message::assistant(AWAITING_AGENT_MESSAGE),
                    ],
                    snapshot.scratch.clone(),
                )
                .await?;
            tracing::debug!(thread_id, "thread escalated, dispatch skipped");
            return Ok(TurnResponse {
                response_text: AWAITING_AGENT_MESSAGE.to_string(),
                escalated: true,
                reason,
                recommend_escalation: false,
                tool_calls: Vec::new(),
                metadata: DispatchMetadata::default(),
            });
        }

        let outcome = self.dispatcher.handle(&snapshot, user_message).await?;
        let decision = self.policy.evaluate(&snapshot, &outcome);

        let mut scratch = outcome.updated_scratch;
        let mut response_text = outcome.response_text;
        if let Some(reason) = decision.reason.filter(|_| decision.escalate) {
            tracing::warn!(thread_id, reason = %reason, "conversation escalated");
            scratch.insert(keys::ESCALATED.to_string(), Value::Bool(true));
            scratch.insert(keys::ESCALATION_REASON.to_string(), json!(reason.as_str()));
            response_text = match reason {
                // 直接交接，不展示查询结果
                EscalationReason::ExplicitRequest | EscalationReason::SecurityConcern => {
                    HANDOFF_MESSAGE.to_string()
                }
                _ => format!("{response_text}\n\n{HANDOFF_MESSAGE}"),
            };
        }

        self.store
            .commit_turn(
                thread_id,
                vec![
                    Message::user(user_message),
                    Message::assistant(response_text.clone()),
                ],
                scratch,
            )
            .await?;

        tracing::info!(
            thread_id,
            escalated = decision.escalate,
            recommend_escalation = outcome.recommend_escalation,
            tool_calls = outcome.tool_calls.len(),
            "turn handled"
        );

        Ok(TurnResponse {
            response_text,
            escalated: decision.escalate,
            reason: decision.reason,
            recommend_escalation: outcome.recommend_escalation,
            tool_calls: outcome.tool_calls,
            metadata: outcome.metadata,
        })
    }

    /// 外部（人工坐席）清除转人工标记，恢复自动调度并重置连续失败计数
    pub async fn clear_escalation(&self, thread_id: &str) -> Result<(), SupportError> {
        self.store.snapshot(thread_id).await?;
        let _lease = self.store.lock_thread(thread_id).await;
        let mut scratch = self.store.snapshot(thread_id).await?.scratch;
        scratch.insert(keys::ESCALATED.to_string(), Value::Bool(false));
        scratch.remove(keys::ESCALATION_REASON);
        scratch.insert(keys::CONSECUTIVE_FAILURES.to_string(), json!(0));
        self.store.commit_turn(thread_id, Vec::new(), scratch).await?;
        tracing::info!(thread_id, "escalation cleared");
        Ok(())
    }

    pub async fn history(&self, thread_id: &str) -> Result<Vec<Message>, SupportError> {
        Ok(self.store.snapshot(thread_id).await?.messages)
    }

    pub async fn session(&self, thread_id: &str) -> Result<Session, SupportError> {
        self.store.snapshot(thread_id).await
    }

    /// 从外部检查点恢复会话
    pub async fn restore(&self, session: Session) {
        let _lease = self.store.lock_thread(&session.thread_id).await;
        self.store.restore(session).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::Backends;
    use crate::config::DispatchSection;
    use crate::session::{MemorySessionStore, Role};
    use crate::tools::{register_support_tools, ToolExecutor, ToolRegistry};
    use std::time::Duration;

    fn manager() -> SessionManager {
        let mut registry = ToolRegistry::new();
        register_support_tools(&mut registry, &Backends::demo(), 5).unwrap();
        let executor = Arc::new(ToolExecutor::new(Arc::new(registry), Duration::from_secs(2)));
        SessionManager::new(
            Arc::new(MemorySessionStore::new()),
            Dispatcher::new(executor, DispatchSection::default()),
            EscalationPolicy::default(),
        )
    }

    #[tokio::test]
    async fn messages_alternate_user_assistant() {
        let manager = manager();
        for text in ["hello", "What's your refund policy?", ""] {
            manager.handle_turn("t-1", text).await.unwrap();
        }
        let history = manager.history("t-1").await.unwrap();
        assert_eq!(history.len(), 6);
        for (i, m) in history.iter().enumerate() {
            let expected = if i % 2 == 0 { Role::User } else { Role::Assistant };
            assert_eq!(m.role, expected);
        }
        assert_eq!(history[2].content, "What's your refund policy?");
    }

    #[tokio::test]
    async fn explicit_request_stops_dispatch() {
        let manager = manager();
        let first = manager
            .handle_turn("t-1", "I want to talk to a human")
            .await
            .unwrap();
        assert!(first.escalated);
        assert_eq!(first.reason, Some(EscalationReason::ExplicitRequest));
        assert_eq!(first.response_text, HANDOFF_MESSAGE);
        assert!(manager.session("t-1").await.unwrap().is_escalated());

        let second = manager
            .handle_turn("t-1", "What's your refund policy?")
            .await
            .unwrap();
        assert!(second.escalated);
        assert!(second.tool_calls.is_empty());
        assert_eq!(second.response_text, AWAITING_AGENT_MESSAGE);
        assert_eq!(second.reason, Some(EscalationReason::ExplicitRequest));
    }

    #[tokio::test]
    async fn clearing_resumes_automation() {
        let manager = manager();
        manager.handle_turn("t-1", "talk to a human please").await.unwrap();
        manager.clear_escalation("t-1").await.unwrap();

        let reply = manager
            .handle_turn("t-1", "What's your refund policy?")
            .await
            .unwrap();
        assert!(!reply.escalated);
        assert_eq!(reply.tool_calls.len(), 1);
    }

    #[tokio::test]
    async fn clear_on_unknown_thread_fails() {
        let err = manager().clear_escalation("ghost").await.unwrap_err();
        assert!(matches!(err, SupportError::ThreadNotFound(_)));
    }

    #[tokio::test]
    async fn cancelled_turn_commits_nothing() {
        let manager = manager();
        manager.handle_turn("t-1", "hello").await.unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let err = manager
            .handle_turn_cancellable("t-1", "What's your refund policy?", token)
            .await
            .unwrap_err();
        assert!(matches!(err, SupportError::Cancelled(_)));
        assert_eq!(manager.history("t-1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn restore_replaces_session() {
        let manager = manager();
        let mut checkpoint = Session::new("t-9");
        checkpoint.push(Message::user("earlier"));
        checkpoint.push(Message::assistant("reply"));
        manager.restore(checkpoint).await;
        manager.handle_turn("t-9", "hello").await.unwrap();
        assert_eq!(manager.history("t-9").await.unwrap().len(), 4);
    }
}
