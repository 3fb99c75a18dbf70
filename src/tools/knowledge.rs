//! 知识库工具：关键词检索与按 ID 取文章

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{backend_failure, required_str, to_output, Tool, ToolCategory};
use crate::backends::KnowledgeBackend;
use crate::core::ToolError;

/// search_knowledge_base：按标题 / 正文 / 标签相关度返回前 top_k 篇
pub struct SearchKnowledgeBaseTool {
    backend: Arc<dyn KnowledgeBackend>,
    default_top_k: usize,
}

impl SearchKnowledgeBaseTool {
    pub fn new(backend: Arc<dyn KnowledgeBackend>, default_top_k: usize) -> Self {
        Self {
            backend,
            default_top_k: default_top_k.max(1),
        }
    }
}

#[async_trait]
impl Tool for SearchKnowledgeBaseTool {
    fn name(&self) -> &str {
        "search_knowledge_base"
    }

    fn description(&self) -> &str {
        "Search the CultPass knowledge base for articles relevant to the query. Args: {\"query\": \"refund policy\", \"top_k\": 5}"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Knowledge
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "free-text question" },
                "top_k": { "type": "integer", "description": "max articles" }
            },
            "required": ["query"]
        })
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "array",
            "items": {
                "type": "object",
                "properties": {
                    "article_id": { "type": "string" },
                    "title": { "type": "string" },
                    "snippet": { "type": "string" },
                    "score": { "type": "integer" }
                }
            }
        })
    }

    fn keywords(&self) -> &[&'static str] {
        &["how", "policy", "what", "help", "can i", "faq"]
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let query = required_str(&args, "query", self.name())?;
        let top_k = args
            .get("top_k")
            .and_then(|v| v.as_u64())
            .map(|k| k as usize)
            .filter(|&k| k > 0)
            .unwrap_or(self.default_top_k);
        let hits = self
            .backend
            .search(query, top_k)
            .await
            .map_err(|e| backend_failure(self.name(), e))?;
        to_output(self.name(), &hits)
    }
}

/// get_article_by_id：返回全文
pub struct ArticleByIdTool {
    backend: Arc<dyn KnowledgeBackend>,
}

impl ArticleByIdTool {
    pub fn new(backend: Arc<dyn KnowledgeBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for ArticleByIdTool {
    fn name(&self) -> &str {
        "get_article_by_id"
    }

    fn description(&self) -> &str {
        "Fetch the full text of a knowledge base article. Args: {\"article_id\": \"KB-002\"}"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Knowledge
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "article_id": { "type": "string" } },
            "required": ["article_id"]
        })
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "article_id": { "type": "string" },
                "title": { "type": "string" },
                "content": { "type": "string" },
                "tags": { "type": "string" }
            }
        })
    }

    fn keywords(&self) -> &[&'static str] {
        &["article", "kb-"]
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let article_id = required_str(&args, "article_id", self.name())?;
        let article = self
            .backend
            .get_article(article_id)
            .await
            .map_err(|e| backend_failure(self.name(), e))?;
        to_output(self.name(), &article)
    }
}
