//! Mock LLM 客户端（用于测试与离线运行，无需 API）
//!
//! MockLlmClient：最后一条是工具观察时据此作答，否则请求知识库检索。
//! ScriptedLlmClient：按预设队列依次返回回复，便于测试 Dispatcher 的 LLM 分支。

use std::collections::VecDeque;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use super::reply::{LlmReply, ToolCallRequest};
use super::LlmClient;
use crate::core::LlmError;
use crate::session::{Message, Role};

/// 观察内容回显的最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 300;

#[derive(Debug, Default)]
pub struct MockLlmClient;

fn offers_tool(tools: &Value, name: &str) -> bool {
    tools
        .as_array()
        .map(|list| list.iter().any(|t| t["name"] == name))
        .unwrap_or(false)
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        _system: &str,
        context: &[Message],
        tools: &Value,
    ) -> Result<LlmReply, LlmError> {
        let Some(last) = context.last() else {
            return Ok(LlmReply::Final("How can I help you today?".to_string()));
        };

        match last.role {
            Role::Tool => {
                let preview: String = last.content.chars().take(OBSERVATION_PREVIEW_CHARS).collect();
                Ok(LlmReply::Final(format!("Here is what I found: {preview}")))
            }
            Role::User if offers_tool(tools, "search_knowledge_base") => {
                Ok(LlmReply::ToolCalls(vec![ToolCallRequest::new(
                    "search_knowledge_base",
                    json!({ "query": last.content }),
                )]))
            }
            _ => Ok(LlmReply::Final(last.content.clone())),
        }
    }
}

/// 预设回复队列；耗尽后返回 Request 错误
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<Result<LlmReply, LlmError>>>,
    calls: Mutex<usize>,
}

impl ScriptedLlmClient {
    pub fn new(replies: Vec<Result<LlmReply, LlmError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(0),
        }
    }

    /// 已被调用次数
    pub async fn calls(&self) -> usize {
        *self.calls.lock().await
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(
        &self,
        _system: &str,
        _context: &[Message],
        _tools: &Value,
    ) -> Result<LlmReply, LlmError> {
        *self.calls.lock().await += 1;
        self.replies
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Request("script exhausted".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools() -> Value {
        json!([{ "name": "search_knowledge_base" }])
    }

    #[tokio::test]
    async fn mock_searches_then_answers() {
        let llm = MockLlmClient;
        let mut context = vec![Message::user("refund policy")];
        let first = llm.complete("", &context, &tools()).await.unwrap();
        assert!(matches!(first, LlmReply::ToolCalls(ref calls) if calls[0].tool == "search_knowledge_base"));

        context.push(Message::tool("search_knowledge_base", "Refund policy: 7 days"));
        let second = llm.complete("", &context, &tools()).await.unwrap();
        assert_eq!(second, LlmReply::Final("Here is what I found: Refund policy: 7 days".into()));
    }

    #[tokio::test]
    async fn scripted_replays_in_order() {
        let llm = ScriptedLlmClient::new(vec![Ok(LlmReply::Final("one".into()))]);
        let ctx = [Message::user("hi")];
        assert_eq!(llm.complete("", &ctx, &tools()).await.unwrap(), LlmReply::Final("one".into()));
        assert!(llm.complete("", &ctx, &tools()).await.is_err());
        assert_eq!(llm.calls().await, 2);
    }
}
