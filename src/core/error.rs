//! 错误类型
//!
//! 分四层：SupportError（会话管理器 / 会话存储对调用方暴露的结构性错误）、
//! ToolError（单次工具调用失败，由执行器降级为 ToolOutcome::Degraded，绝不中止本轮）、
//! BackendError（外部数据源）、LlmError（语言模型）。升级（escalation）不是错误路径，见 escalation 模块。

use thiserror::Error;

/// 对调用方可见的结构性错误
#[derive(Error, Debug)]
pub enum SupportError {
    /// append / snapshot 时 thread_id 从未创建
    #[error("Thread not found: {0}")]
    ThreadNotFound(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Duplicate tool name: {0}")]
    DuplicateTool(String),

    /// 调用方在 Dispatcher 完成前取消；本轮不写入任何结果
    #[error("Turn cancelled for thread {0}")]
    Cancelled(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// Dispatcher 内部编程错误，唯一允许向上传播的致命错误
    #[error("Internal error: {0}")]
    Internal(String),
}

/// 单次工具调用失败的原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Tool timeout: {0}")]
    Timeout(String),

    /// 输入无法满足工具的 input_schema
    #[error("Schema mismatch for {tool}: {reason}")]
    SchemaMismatch { tool: String, reason: String },

    #[error("Backend error in {tool}: {reason}")]
    Backend { tool: String, reason: String },

    #[error("Tool not found: {0}")]
    NotFound(String),
}

impl ToolError {
    /// 审计日志与降级结果中使用的短标签
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::SchemaMismatch { .. } => "schema_mismatch",
            Self::Backend { .. } => "backend_error",
            Self::NotFound(_) => "not_found",
        }
    }
}

/// 外部数据源（知识库、账户、体验、工单）返回的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

/// 语言模型调用错误；Dispatcher 遇到时退回确定性回复
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Request(String),

    #[error("LLM output parse error: {0}")]
    Parse(String),
}

impl From<ToolError> for SupportError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::NotFound(name) => SupportError::ToolNotFound(name),
            other => SupportError::Internal(other.to_string()),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for BackendError {
    fn from(err: sqlx::Error) -> Self {
        BackendError::Unavailable(err.to_string())
    }
}
