//! 工具执行器
//!
//! 持有 Arc<ToolRegistry> 与单次调用超时。execute 先按 input_schema 校验，再在超时内调用工具；
//! 失败（超时 / 校验不符 / 后端错误）一律记为 Degraded，不向上传播。每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::time::timeout;

use crate::core::ToolError;
use crate::tools::{ToolCategory, ToolDescriptor, ToolRegistry};

/// 单次工具调用的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { output: Value },
    Degraded { kind: String, reason: String },
}

/// 本轮实际发生的一次工具调用
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub category: ToolCategory,
    pub args: Value,
    pub outcome: ToolOutcome,
    pub duration_ms: u64,
}

impl ToolCallRecord {
    pub fn output(&self) -> Option<&Value> {
        match &self.outcome {
            ToolOutcome::Success { output } => Some(output),
            ToolOutcome::Degraded { .. } => None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Degraded { .. })
    }

    /// 成功且有实际内容（非空数组 / 对象 / 非 null）
    pub fn is_usable(&self) -> bool {
        match self.output() {
            Some(Value::Array(items)) => !items.is_empty(),
            Some(Value::Object(map)) => !map.is_empty(),
            Some(Value::Null) | None => false,
            Some(_) => true,
        }
    }
}

/// 工具执行器：对每次调用施加超时，并把失败映射为降级结果
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// 校验并执行；输出 JSON 审计日志
    pub async fn execute(&self, tool: &ToolDescriptor, args: Value) -> ToolCallRecord {
        let start = Instant::now();
        let preview = args_preview(&args);

        let result = match tool.validate(&args) {
            Ok(()) => match timeout(self.timeout, tool.invoke(args.clone())).await {
                Ok(inner) => inner,
                Err(_) => Err(ToolError::Timeout(tool.name().to_string())),
            },
            Err(e) => Err(e),
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let outcome_label = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool.name(),
            "category": tool.category(),
            "ok": result.is_ok(),
            "outcome": outcome_label,
            "duration_ms": duration_ms,
            "args_preview": preview,
        });
        tracing::info!(audit = %audit, "tool");

        let outcome = match result {
            Ok(output) => ToolOutcome::Success { output },
            Err(e) => {
                tracing::warn!(tool = tool.name(), error = %e, "tool degraded");
                ToolOutcome::Degraded {
                    kind: e.kind().to_string(),
                    reason: e.to_string(),
                }
            }
        };

        ToolCallRecord {
            tool: tool.name().to_string(),
            category: tool.category(),
            args,
            outcome,
            duration_ms,
        }
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use serde_json::json;

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "sleeps"
        }

        fn category(&self) -> ToolCategory {
            ToolCategory::Knowledge
        }

        async fn execute(&self, _args: Value) -> Result<Value, ToolError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!({"late": true}))
        }
    }

    struct NeedsId;

    #[async_trait]
    impl Tool for NeedsId {
        fn name(&self) -> &str {
            "needs_id"
        }

        fn description(&self) -> &str {
            "requires id"
        }

        fn category(&self) -> ToolCategory {
            ToolCategory::User
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {"id": {"type": "string"}}, "required": ["id"]})
        }

        async fn execute(&self, args: Value) -> Result<Value, ToolError> {
            Ok(json!({ "id": args["id"] }))
        }
    }

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(SlowTool).unwrap();
        registry.register(NeedsId).unwrap();
        ToolExecutor::new(Arc::new(registry), Duration::from_millis(20))
    }

    #[tokio::test]
    async fn timeout_becomes_degraded() {
        let executor = executor();
        let tool = executor.registry().lookup("slow").unwrap();
        let record = executor.execute(&tool, json!({})).await;
        assert!(matches!(
            record.outcome,
            ToolOutcome::Degraded { ref kind, .. } if kind == "timeout"
        ));
        assert!(!record.is_usable());
    }

    #[tokio::test]
    async fn schema_mismatch_never_invokes() {
        let executor = executor();
        let tool = executor.registry().lookup("needs_id").unwrap();
        let record = executor.execute(&tool, json!({"id": 7})).await;
        assert!(matches!(
            record.outcome,
            ToolOutcome::Degraded { ref kind, .. } if kind == "schema_mismatch"
        ));
    }

    #[tokio::test]
    async fn success_is_usable() {
        let executor = executor();
        let tool = executor.registry().lookup("needs_id").unwrap();
        let record = executor.execute(&tool, json!({"id": "u-1"})).await;
        assert!(record.is_usable());
        assert_eq!(record.output().unwrap()["id"], "u-1");
    }

    #[test]
    fn empty_array_is_not_usable() {
        let record = ToolCallRecord {
            tool: "search".into(),
            category: ToolCategory::Knowledge,
            args: json!({}),
            outcome: ToolOutcome::Success { output: json!([]) },
            duration_ms: 0,
        };
        assert!(!record.is_usable());
        assert!(!record.is_degraded());
    }
}
