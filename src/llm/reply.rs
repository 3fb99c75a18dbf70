//! LLM 回复解析
//!
//! 模型输出中的 JSON 解析为工具调用请求（单个 {"tool", "args"} 或 {"tool_calls": [...]}），
//! 没有 JSON 时视为最终回复。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::LlmError;

/// 模型请求的一次工具调用（尚未校验）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub tool: String,
    #[serde(default = "empty_args")]
    pub args: Value,
}

fn empty_args() -> Value {
    Value::Object(Default::default())
}

impl ToolCallRequest {
    pub fn new(tool: impl Into<String>, args: Value) -> Self {
        Self {
            tool: tool.into(),
            args,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LlmReply {
    /// 直接回复用户
    Final(String),
    /// 需要执行工具
    ToolCalls(Vec<ToolCallRequest>),
}

#[derive(Deserialize)]
struct ToolCallBatch {
    tool_calls: Vec<ToolCallRequest>,
}

/// 解析模型输出：含有效 JSON 且 tool 非空则为 ToolCalls，否则为 Final
pub fn parse_llm_output(output: &str) -> Result<LlmReply, LlmError> {
    let trimmed = output.trim();

    // ```json ... ``` 或裸 JSON
    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```")
            .map(|end| rest[..end].trim())
            .unwrap_or(rest.trim())
    } else if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            &trimmed[start..=end]
        } else {
            return Ok(LlmReply::Final(trimmed.to_string()));
        }
    } else {
        return Ok(LlmReply::Final(trimmed.to_string()));
    };

    if let Ok(batch) = serde_json::from_str::<ToolCallBatch>(json_str) {
        let calls: Vec<ToolCallRequest> = batch
            .tool_calls
            .into_iter()
            .filter(|c| !c.tool.trim().is_empty())
            .collect();
        return Ok(if calls.is_empty() {
            LlmReply::Final(trimmed.to_string())
        } else {
            LlmReply::ToolCalls(calls)
        });
    }

    let single: ToolCallRequest = serde_json::from_str(json_str)
        .map_err(|e| LlmError::Parse(format!("{}: {}", e, json_str)))?;

    if single.tool.trim().is_empty() {
        Ok(LlmReply::Final(trimmed.to_string()))
    } else {
        Ok(LlmReply::ToolCalls(vec![single]))
    }
}
