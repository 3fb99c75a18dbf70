//! 体验工具：可预约列表与详情

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{backend_failure, optional_str, required_str, to_output, Tool, ToolCategory};
use crate::backends::{ExperienceBackend, ExperienceFilters};
use crate::core::ToolError;

/// get_available_experiences：未来、仍有名额，可按地点 / premium 过滤，按日期升序
pub struct AvailableExperiencesTool {
    backend: Arc<dyn ExperienceBackend>,
}

impl AvailableExperiencesTool {
    pub fn new(backend: Arc<dyn ExperienceBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for AvailableExperiencesTool {
    fn name(&self) -> &str {
        "get_available_experiences"
    }

    fn description(&self) -> &str {
        "List upcoming experiences that still have free slots. Args: {\"location\": \"São Paulo\", \"is_premium\": true} (both optional)"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Experience
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "location": { "type": "string" },
                "is_premium": { "type": "boolean" }
            },
            "required": []
        })
    }

    fn output_schema(&self) -> Value {
        json!({ "type": "array", "items": { "type": "object" } })
    }

    fn keywords(&self) -> &[&'static str] {
        &["available", "upcoming", "events", "experiences", "book", "slots"]
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let filters = ExperienceFilters {
            location: optional_str(&args, "location").map(str::to_string),
            is_premium: args.get("is_premium").and_then(|v| v.as_bool()),
        };
        let experiences = self
            .backend
            .list_available(&filters)
            .await
            .map_err(|e| backend_failure(self.name(), e))?;
        to_output(self.name(), &experiences)
    }
}

/// get_experience_details：按 ID 查单个体验
pub struct ExperienceDetailsTool {
    backend: Arc<dyn ExperienceBackend>,
}

impl ExperienceDetailsTool {
    pub fn new(backend: Arc<dyn ExperienceBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for ExperienceDetailsTool {
    fn name(&self) -> &str {
        "get_experience_details"
    }

    fn description(&self) -> &str {
        "Get details of one experience. Args: {\"experience_id\": \"exp-01\"}"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Experience
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "experience_id": { "type": "string" } },
            "required": ["experience_id"]
        })
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "experience_id": { "type": "string" },
                "title": { "type": "string" },
                "location": { "type": "string" },
                "when": { "type": "string" },
                "slots_available": { "type": "integer" },
                "is_premium": { "type": "boolean" }
            }
        })
    }

    fn keywords(&self) -> &[&'static str] {
        &["details", "exp-", "about"]
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let experience_id = required_str(&args, "experience_id", self.name())?;
        let experience = self
            .backend
            .get_experience(experience_id)
            .await
            .map_err(|e| backend_failure(self.name(), e))?;
        to_output(self.name(), &experience)
    }
}
