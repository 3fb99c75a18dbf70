//! 账户工具：用户信息、订阅、预约（cultpass.db）

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{backend_failure, required_str, to_output, Tool, ToolCategory};
use crate::backends::AccountBackend;
use crate::core::ToolError;

/// get_user_info：按邮箱查用户（含 is_blocked）
pub struct UserInfoTool {
    backend: Arc<dyn AccountBackend>,
}

impl UserInfoTool {
    pub fn new(backend: Arc<dyn AccountBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for UserInfoTool {
    fn name(&self) -> &str {
        "get_user_info"
    }

    fn description(&self) -> &str {
        "Look up a CultPass user by email, including whether the account is blocked. Args: {\"user_email\": \"ana@example.com\"}"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::User
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "user_email": { "type": "string" } },
            "required": ["user_email"]
        })
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "user_id": { "type": "string" },
                "full_name": { "type": "string" },
                "email": { "type": "string" },
                "is_blocked": { "type": "boolean" }
            }
        })
    }

    fn keywords(&self) -> &[&'static str] {
        &["account", "profile", "blocked", "login", "log in", "email"]
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let email = required_str(&args, "user_email", self.name())?;
        let user = self
            .backend
            .get_user(email)
            .await
            .map_err(|e| backend_failure(self.name(), e))?;
        to_output(self.name(), &user)
    }
}

/// get_user_subscription：按 user_id 查订阅
pub struct UserSubscriptionTool {
    backend: Arc<dyn AccountBackend>,
}

impl UserSubscriptionTool {
    pub fn new(backend: Arc<dyn AccountBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for UserSubscriptionTool {
    fn name(&self) -> &str {
        "get_user_subscription"
    }

    fn description(&self) -> &str {
        "Get the subscription (tier, status, monthly quota) of a user. Args: {\"user_id\": \"u-100\"}"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::User
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "user_id": { "type": "string" } },
            "required": ["user_id"]
        })
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "tier": { "type": "string" },
                "status": { "type": "string" },
                "monthly_quota": { "type": "integer" }
            }
        })
    }

    fn keywords(&self) -> &[&'static str] {
        &["subscription", "plan", "tier", "quota", "premium", "membership"]
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let user_id = required_str(&args, "user_id", self.name())?;
        let subscription = self
            .backend
            .get_subscription(user_id)
            .await
            .map_err(|e| backend_failure(self.name(), e))?;
        to_output(self.name(), &subscription)
    }
}

/// get_user_reservations：按 user_id 列出预约
pub struct UserReservationsTool {
    backend: Arc<dyn AccountBackend>,
}

impl UserReservationsTool {
    pub fn new(backend: Arc<dyn AccountBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for UserReservationsTool {
    fn name(&self) -> &str {
        "get_user_reservations"
    }

    fn description(&self) -> &str {
        "List the reservations of a user with experience title, location and date. Args: {\"user_id\": \"u-100\"}"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::User
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "user_id": { "type": "string" } },
            "required": ["user_id"]
        })
    }

    fn output_schema(&self) -> Value {
        json!({ "type": "array", "items": { "type": "object" } })
    }

    fn keywords(&self) -> &[&'static str] {
        &["reservation", "booking", "booked", "reserved"]
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let user_id = required_str(&args, "user_id", self.name())?;
        let reservations = self
            .backend
            .get_reservations(user_id)
            .await
            .map_err(|e| backend_failure(self.name(), e))?;
        to_output(self.name(), &reservations)
    }
}
