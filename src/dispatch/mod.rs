//! 调度层：消息分类、工具选择与调用、回复组装、可选的 LLM 规划

pub mod classifier;
pub mod compose;
pub mod dispatcher;
pub mod planner;

pub use classifier::{classify, Classification, ConversationCategory, MessageFacts};
pub use compose::{compose_response, CLARIFYING_QUESTION, COULD_NOT_RESOLVE};
pub use dispatcher::{DispatchMetadata, DispatchOutcome, Dispatcher};
pub use planner::{validate_request, LlmPlanner};
