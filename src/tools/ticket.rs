//! 工单工具：查询、改状态、追加消息（udahub.db）

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{backend_failure, optional_str, required_str, to_output, Tool, ToolCategory};
use crate::backends::{TicketBackend, TicketRole, TicketStatus};
use crate::core::ToolError;

/// get_ticket_info：工单详情及消息历史
pub struct TicketInfoTool {
    backend: Arc<dyn TicketBackend>,
}

impl TicketInfoTool {
    pub fn new(backend: Arc<dyn TicketBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for TicketInfoTool {
    fn name(&self) -> &str {
        "get_ticket_info"
    }

    fn description(&self) -> &str {
        "Get a support ticket with its status, issue type and message history. Args: {\"ticket_id\": \"T-1001\"}"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Ticket
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "ticket_id": { "type": "string" } },
            "required": ["ticket_id"]
        })
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "ticket_id": { "type": "string" },
                "status": { "type": "string", "enum": ["open", "in_progress", "resolved", "escalated"] },
                "main_issue_type": { "type": "string" },
                "messages": { "type": "array" }
            }
        })
    }

    fn keywords(&self) -> &[&'static str] {
        &["ticket", "status", "t-"]
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let ticket_id = required_str(&args, "ticket_id", self.name())?;
        let ticket = self
            .backend
            .get_ticket(ticket_id)
            .await
            .map_err(|e| backend_failure(self.name(), e))?;
        to_output(self.name(), &ticket)
    }
}

/// update_ticket_status：改状态，可同时改写 main_issue_type
pub struct UpdateTicketStatusTool {
    backend: Arc<dyn TicketBackend>,
}

impl UpdateTicketStatusTool {
    pub fn new(backend: Arc<dyn TicketBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for UpdateTicketStatusTool {
    fn name(&self) -> &str {
        "update_ticket_status"
    }

    fn description(&self) -> &str {
        "Set the status of a ticket (open, in_progress, resolved, escalated), optionally reclassifying it. Args: {\"ticket_id\": \"T-1001\", \"status\": \"resolved\", \"issue_type\": \"billing\"}"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Ticket
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "ticket_id": { "type": "string" },
                "status": { "type": "string", "enum": ["open", "in_progress", "resolved", "escalated"] },
                "issue_type": { "type": "string" }
            },
            "required": ["ticket_id", "status"]
        })
    }

    fn keywords(&self) -> &[&'static str] {
        &["close", "resolve", "reopen", "update"]
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let ticket_id = required_str(&args, "ticket_id", self.name())?;
        let status = TicketStatus::from_str(required_str(&args, "status", self.name())?).map_err(
            |reason| ToolError::SchemaMismatch {
                tool: self.name().to_string(),
                reason,
            },
        )?;
        let ticket = self
            .backend
            .update_status(ticket_id, status, optional_str(&args, "issue_type"))
            .await
            .map_err(|e| backend_failure(self.name(), e))?;
        tracing::info!(ticket_id, status = %status, "ticket status updated");
        to_output(self.name(), &ticket)
    }
}

/// add_ticket_message：追加消息，role 缺省为 ai
pub struct AddTicketMessageTool {
    backend: Arc<dyn TicketBackend>,
}

impl AddTicketMessageTool {
    pub fn new(backend: Arc<dyn TicketBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for AddTicketMessageTool {
    fn name(&self) -> &str {
        "add_ticket_message"
    }

    fn description(&self) -> &str {
        "Append a message to a ticket's history. Args: {\"ticket_id\": \"T-1001\", \"content\": \"...\", \"role\": \"ai\"}"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Ticket
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "ticket_id": { "type": "string" },
                "content": { "type": "string" },
                "role": { "type": "string", "enum": ["user", "agent", "ai", "system"] }
            },
            "required": ["ticket_id", "content"]
        })
    }

    fn keywords(&self) -> &[&'static str] {
        &["note", "add message"]
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let ticket_id = required_str(&args, "ticket_id", self.name())?;
        let content = required_str(&args, "content", self.name())?;
        let role = match optional_str(&args, "role") {
            Some(raw) => TicketRole::from_str(raw).map_err(|reason| ToolError::SchemaMismatch {
                tool: self.name().to_string(),
                reason,
            })?,
            None => TicketRole::Ai,
        };
        let message = self
            .backend
            .append_message(ticket_id, role, content)
            .await
            .map_err(|e| backend_failure(self.name(), e))?;
        to_output(self.name(), &message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryTickets;

    fn tickets() -> Arc<dyn TicketBackend> {
        Arc::new(InMemoryTickets::demo())
    }

    #[tokio::test]
    async fn update_then_read_back() {
        let backend = tickets();
        UpdateTicketStatusTool::new(Arc::clone(&backend))
            .execute(json!({"ticket_id": "T-1001", "status": "escalated", "issue_type": "refund"}))
            .await
            .unwrap();
        let out = TicketInfoTool::new(backend)
            .execute(json!({"ticket_id": "T-1001"}))
            .await
            .unwrap();
        assert_eq!(out["status"], "escalated");
        assert_eq!(out["main_issue_type"], "refund");
    }

    #[tokio::test]
    async fn unknown_status_is_schema_mismatch() {
        let err = UpdateTicketStatusTool::new(tickets())
            .execute(json!({"ticket_id": "T-1001", "status": "archived"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "schema_mismatch");
    }

    #[tokio::test]
    async fn message_role_defaults_to_ai() {
        let backend = tickets();
        let out = AddTicketMessageTool::new(Arc::clone(&backend))
            .execute(json!({"ticket_id": "T-1001", "content": "We are looking into it."}))
            .await
            .unwrap();
        assert_eq!(out["role"], "ai");
        let ticket = backend.get_ticket("T-1001").await.unwrap();
        assert_eq!(ticket.messages.len(), 2);
    }
}
