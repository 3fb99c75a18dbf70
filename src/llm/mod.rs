//! LLM 层：客户端抽象、回复解析与实现（OpenAI 兼容 / Mock / Scripted）

pub mod mock;
pub mod openai;
pub mod reply;
pub mod traits;

pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::{OpenAiClient, TokenUsage};
pub use reply::{parse_llm_output, LlmReply, ToolCallRequest};
pub use traits::LlmClient;
