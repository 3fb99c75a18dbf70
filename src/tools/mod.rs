//! 工具层：注册表、schema 校验、执行器，以及对接四类后端的十个客服工具

pub mod account;
pub mod executor;
pub mod experience;
pub mod knowledge;
pub mod registry;
pub mod schema;
pub mod ticket;

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::backends::Backends;
use crate::core::{BackendError, SupportError, ToolError};

pub use account::{UserInfoTool, UserReservationsTool, UserSubscriptionTool};
pub use executor::{ToolCallRecord, ToolExecutor, ToolOutcome};
pub use experience::{AvailableExperiencesTool, ExperienceDetailsTool};
pub use knowledge::{ArticleByIdTool, SearchKnowledgeBaseTool};
pub use registry::{Tool, ToolCategory, ToolDescriptor, ToolRegistry};
pub use schema::tool_call_schema_json;
pub use ticket::{AddTicketMessageTool, TicketInfoTool, UpdateTicketStatusTool};

/// 注册全部客服工具；注册顺序即同分时的决胜顺序
pub fn register_support_tools(
    registry: &mut ToolRegistry,
    backends: &Backends,
    search_top_k: usize,
) -> Result<(), SupportError> {
    registry.register(SearchKnowledgeBaseTool::new(
        Arc::clone(&backends.knowledge),
        search_top_k,
    ))?;
    registry.register(ArticleByIdTool::new(Arc::clone(&backends.knowledge)))?;
    registry.register(UserInfoTool::new(Arc::clone(&backends.accounts)))?;
    registry.register(UserSubscriptionTool::new(Arc::clone(&backends.accounts)))?;
    registry.register(UserReservationsTool::new(Arc::clone(&backends.accounts)))?;
    registry.register(AvailableExperiencesTool::new(Arc::clone(&backends.experiences)))?;
    registry.register(ExperienceDetailsTool::new(Arc::clone(&backends.experiences)))?;
    registry.register(TicketInfoTool::new(Arc::clone(&backends.tickets)))?;
    registry.register(UpdateTicketStatusTool::new(Arc::clone(&backends.tickets)))?;
    registry.register(AddTicketMessageTool::new(Arc::clone(&backends.tickets)))?;
    Ok(())
}

/// 取必填字符串参数（schema 校验之后仍做一次防御性读取）
pub(crate) fn required_str<'a>(args: &'a Value, key: &str, tool: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::SchemaMismatch {
            tool: tool.to_string(),
            reason: format!("missing string field '{key}'"),
        })
}

pub(crate) fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub(crate) fn backend_failure(tool: &str, err: BackendError) -> ToolError {
    ToolError::Backend {
        tool: tool.to_string(),
        reason: err.to_string(),
    }
}

pub(crate) fn to_output<T: Serialize>(tool: &str, value: &T) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(|e| ToolError::Backend {
        tool: tool.to_string(),
        reason: format!("serialize output: {e}"),
    })
}
