//! LLM 客户端抽象
//!
//! 语言模型是可插拔策略：给定系统提示、对话上下文与可用工具清单，返回最终回复或一组工具调用请求。
//! 调用结果不保证确定性，工具调用请求在执行前必须经注册表校验。

use async_trait::async_trait;
use serde_json::Value;

use super::reply::LlmReply;
use crate::core::LlmError;
use crate::session::Message;

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成；tools 为注册表导出的工具清单（JSON 数组）
    async fn complete(
        &self,
        system: &str,
        context: &[Message],
        tools: &Value,
    ) -> Result<LlmReply, LlmError>;

    /// 累计 token 使用：(prompt, completion, total)，默认全 0
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
