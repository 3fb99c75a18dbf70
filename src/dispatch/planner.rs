//! LLM 规划：有界的 Plan -> Act -> Observe 循环
//!
//! 规则调度完成后，把对话历史与本轮工具观察交给 LLM；LLM 可继续请求工具或给出最终回复。
//! 每个工具调用请求先经注册表校验（工具存在且参数满足 input_schema），未通过的不执行，
//! 只作为观察回灌。调用次数与规则调度共享同一本轮上限。

use std::sync::Arc;

use crate::core::ToolError;
use crate::llm::{LlmClient, LlmReply, ToolCallRequest};
use crate::session::Message;
use crate::tools::{tool_call_schema_json, ToolCallRecord, ToolDescriptor, ToolExecutor, ToolOutcome, ToolRegistry};

use super::dispatcher::TurnLedger;

/// 单轮对话内最大 LLM 往返次数，防止死循环
const MAX_LLM_ROUNDS: usize = 4;
/// 送入 LLM 的历史消息条数上限
const MAX_HISTORY_MESSAGES: usize = 20;

const BASE_SYSTEM_PROMPT: &str = "You are the CultPass customer support assistant. Answer using only the tool observations you are given. Be concise and friendly. If the observations do not answer the question, say so and ask for the missing detail.";

/// 校验 LLM 请求：工具须已注册，参数须满足 input_schema
pub fn validate_request(
    registry: &ToolRegistry,
    request: &ToolCallRequest,
) -> Result<Arc<ToolDescriptor>, ToolError> {
    let descriptor = registry
        .lookup(&request.tool)
        .map_err(|_| ToolError::NotFound(request.tool.clone()))?;
    descriptor.validate(&request.args)?;
    Ok(descriptor)
}

/// 工具结果转为回灌给 LLM 的观察消息
fn observation(record: &ToolCallRecord) -> Message {
    let content = match &record.outcome {
        ToolOutcome::Success { output } => output.to_string(),
        ToolOutcome::Degraded { kind, reason } => format!("failed ({kind}): {reason}"),
    };
    Message::tool(record.tool.clone(), content)
}

pub struct LlmPlanner {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl LlmPlanner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            system_prompt: format!(
                "{BASE_SYSTEM_PROMPT}\n\nTool call format (JSON schema):\n{}",
                tool_call_schema_json()
            ),
        }
    }

    /// 返回 LLM 的最终回复；LLM 出错、超出轮数或调用上限时返回 None，由调用方使用规则组装的回复
    pub(crate) async fn run(
        &self,
        executor: &ToolExecutor,
        history: &[Message],
        user_message: &str,
        ledger: &mut TurnLedger,
    ) -> Option<String> {
        let tools = executor.registry().to_schema_json();
        let skip = history.len().saturating_sub(MAX_HISTORY_MESSAGES);
        let mut context: Vec<Message> = history[skip..].to_vec();
        context.push(Message::user(user_message));
        context.extend(ledger.calls().iter().map(observation));

        for round in 0..MAX_LLM_ROUNDS {
            let reply = match self.llm.complete(&self.system_prompt, &context, &tools).await {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::warn!(round, error = %e, "llm planning failed, using composed reply");
                    return None;
                }
            };

            match reply {
                LlmReply::Final(text) => {
                    let text = text.trim();
                    return (!text.is_empty()).then(|| text.to_string());
                }
                LlmReply::ToolCalls(requests) => {
                    tracing::debug!(round, count = requests.len(), "llm requested tools");
                    for request in requests {
                        let descriptor = match validate_request(executor.registry(), &request) {
                            Ok(d) => d,
                            Err(e) => {
                                tracing::warn!(tool = %request.tool, error = %e, "rejected llm tool call");
                                context.push(Message::tool(request.tool.clone(), format!("rejected: {e}")));
                                continue;
                            }
                        };
                        if !ledger.has_budget() {
                            ledger.mark_exhausted();
                            return None;
                        }
                        let record = executor.execute(&descriptor, request.args).await;
                        context.push(observation(&record));
                        ledger.record(record);
                    }
                }
            }
        }

        tracing::warn!(rounds = MAX_LLM_ROUNDS, "llm planner reached round limit");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::Backends;
    use crate::core::LlmError;
    use crate::llm::ScriptedLlmClient;
    use crate::tools::register_support_tools;
    use serde_json::json;
    use std::time::Duration;

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        register_support_tools(&mut registry, &Backends::demo(), 5).unwrap();
        ToolExecutor::new(Arc::new(registry), Duration::from_secs(2))
    }

    #[test]
    fn unknown_tool_is_rejected() {
        let executor = executor();
        let err = validate_request(
            executor.registry(),
            &ToolCallRequest::new("drop_tables", json!({})),
        )
        .unwrap_err();
        assert_eq!(err, ToolError::NotFound("drop_tables".into()));
    }

    #[test]
    fn missing_argument_is_rejected() {
        let executor = executor();
        let err = validate_request(
            executor.registry(),
            &ToolCallRequest::new("get_ticket_info", json!({})),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "schema_mismatch");
    }

    #[tokio::test]
    async fn invalid_requests_are_never_executed() {
        let executor = executor();
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            Ok(LlmReply::ToolCalls(vec![
                ToolCallRequest::new("drop_tables", json!({})),
                ToolCallRequest::new("get_ticket_info", json!({"ticket_id": 1001})),
                ToolCallRequest::new("get_ticket_info", json!({"ticket_id": "T-1001"})),
            ])),
            Ok(LlmReply::Final("Ticket T-1001 is open.".into())),
        ]));
        let planner = LlmPlanner::new(llm);
        let mut ledger = TurnLedger::new(5);
        let reply = planner.run(&executor, &[], "ticket T-1001?", &mut ledger).await;
        assert_eq!(reply.as_deref(), Some("Ticket T-1001 is open."));
        assert_eq!(ledger.calls().len(), 1);
        assert_eq!(ledger.calls()[0].tool, "get_ticket_info");
    }

    #[tokio::test]
    async fn llm_error_yields_none() {
        let executor = executor();
        let llm = Arc::new(ScriptedLlmClient::new(vec![Err(LlmError::Request("down".into()))]));
        let mut ledger = TurnLedger::new(5);
        let reply = LlmPlanner::new(llm).run(&executor, &[], "hi", &mut ledger).await;
        assert!(reply.is_none());
        assert!(!ledger.is_exhausted());
    }

    #[tokio::test]
    async fn budget_is_shared_with_the_ledger() {
        let executor = executor();
        let llm = Arc::new(ScriptedLlmClient::new(vec![Ok(LlmReply::ToolCalls(vec![
            ToolCallRequest::new("get_available_experiences", json!({})),
            ToolCallRequest::new("get_experience_details", json!({"experience_id": "exp-01"})),
        ]))]));
        let mut ledger = TurnLedger::new(1);
        let reply = LlmPlanner::new(llm).run(&executor, &[], "events?", &mut ledger).await;
        assert!(reply.is_none());
        assert!(ledger.is_exhausted());
        assert_eq!(ledger.calls().len(), 1);
    }
}
