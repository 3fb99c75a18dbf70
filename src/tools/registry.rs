//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / category / schema / execute），注册时固化为
//! 不可变的 ToolDescriptor。注册只在启动时进行，之后以 Arc<ToolRegistry> 共享并发只读。
//! 名称唯一；保留注册顺序，作为同分工具之间的最终决胜规则。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::schema::{required_inputs, validate_input};
use crate::core::{SupportError, ToolError};

/// 工具类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Knowledge,
    User,
    Experience,
    Ticket,
}

impl ToolCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Knowledge => "knowledge",
            Self::User => "user",
            Self::Experience => "experience",
            Self::Ticket => "ticket",
        }
    }
}

impl fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 工具 trait：名称、描述（供 LLM 理解）、类别、输入 / 输出 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn category(&self) -> ToolCategory;

    /// 参数 JSON Schema；默认无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    fn output_schema(&self) -> Value {
        serde_json::json!({ "type": "object" })
    }

    /// 与用户消息匹配的提示词，用于同类工具中挑选最具体的一个
    fn keywords(&self) -> &[&'static str] {
        &[]
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError>;
}

/// 注册后的工具描述（不可变）
pub struct ToolDescriptor {
    name: String,
    description: String,
    category: ToolCategory,
    input_schema: Value,
    output_schema: Value,
    keywords: Vec<&'static str>,
    tool: Arc<dyn Tool>,
}

impl ToolDescriptor {
    fn from_tool(tool: Arc<dyn Tool>) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            category: tool.category(),
            input_schema: tool.parameters_schema(),
            output_schema: tool.output_schema(),
            keywords: tool.keywords().to_vec(),
            tool,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn category(&self) -> ToolCategory {
        self.category
    }

    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    pub fn output_schema(&self) -> &Value {
        &self.output_schema
    }

    pub fn keywords(&self) -> &[&'static str] {
        &self.keywords
    }

    pub fn required_inputs(&self) -> Vec<&str> {
        required_inputs(&self.input_schema)
    }

    /// 依 input_schema 校验参数；不通过则 SchemaMismatch，绝不执行未校验的调用
    pub fn validate(&self, args: &Value) -> Result<(), ToolError> {
        validate_input(&self.input_schema, args).map_err(|reason| ToolError::SchemaMismatch {
            tool: self.name.clone(),
            reason,
        })
    }

    pub async fn invoke(&self, args: Value) -> Result<Value, ToolError> {
        self.tool.execute(args).await
    }
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}

/// 工具注册表：按名称唯一存储，保留注册顺序
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<ToolDescriptor>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工具；重名返回 DuplicateTool
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), SupportError> {
        let descriptor = ToolDescriptor::from_tool(Arc::new(tool));
        if self.index.contains_key(descriptor.name()) {
            return Err(SupportError::DuplicateTool(descriptor.name().to_string()));
        }
        self.index.insert(descriptor.name().to_string(), self.tools.len());
        self.tools.push(Arc::new(descriptor));
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<ToolDescriptor>, SupportError> {
        self.index
            .get(name)
            .map(|&i| self.tools[i].clone())
            .ok_or_else(|| SupportError::ToolNotFound(name.to_string()))
    }

    /// 按类别过滤，保持注册顺序
    pub fn list_by_category(&self, category: ToolCategory) -> Vec<Arc<ToolDescriptor>> {
        self.tools
            .iter()
            .filter(|d| d.category() == category)
            .cloned()
            .collect()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|d| d.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 工具清单（name / description / parameters），供 LLM 选择工具
    pub fn to_schema_json(&self) -> Value {
        Value::Array(
            self.tools
                .iter()
                .map(|d| {
                    serde_json::json!({
                        "name": d.name(),
                        "category": d.category(),
                        "description": d.description(),
                        "parameters": d.input_schema()
                    })
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct StubTool {
        name: &'static str,
        category: ToolCategory,
    }

    #[async_trait]
    impl Tool for StubTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "stub"
        }

        fn category(&self) -> ToolCategory {
            self.category
        }

        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"]
            })
        }

        async fn execute(&self, args: Value) -> Result<Value, ToolError> {
            Ok(args)
        }
    }

    fn stub(name: &'static str, category: ToolCategory) -> StubTool {
        StubTool { name, category }
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(stub("search", ToolCategory::Knowledge)).unwrap();
        let err = registry.register(stub("search", ToolCategory::User)).unwrap_err();
        assert!(matches!(err, SupportError::DuplicateTool(name) if name == "search"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn lookup_missing_is_not_found() {
        let registry = ToolRegistry::new();
        assert!(matches!(
            registry.lookup("nope"),
            Err(SupportError::ToolNotFound(_))
        ));
    }

    #[test]
    fn list_by_category_keeps_registration_order() {
        let mut registry = ToolRegistry::new();
        registry.register(stub("b", ToolCategory::User)).unwrap();
        registry.register(stub("x", ToolCategory::Ticket)).unwrap();
        registry.register(stub("a", ToolCategory::User)).unwrap();

        let names: Vec<_> = registry
            .list_by_category(ToolCategory::User)
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn descriptor_validates_and_invokes() {
        let mut registry = ToolRegistry::new();
        registry.register(stub("search", ToolCategory::Knowledge)).unwrap();
        let descriptor = registry.lookup("search").unwrap();

        assert_eq!(descriptor.required_inputs(), vec!["query"]);
        assert!(descriptor.validate(&json!({})).is_err());
        let out = descriptor.invoke(json!({"query": "refund"})).await.unwrap();
        assert_eq!(out["query"], "refund");
    }

    #[test]
    fn schema_json_lists_every_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(stub("search", ToolCategory::Knowledge)).unwrap();
        let schema = registry.to_schema_json();
        assert_eq!(schema[0]["name"], "search");
        assert_eq!(schema[0]["category"], "knowledge");
    }
}
