//! 核心类型：错误分层

pub mod error;

pub use error::{BackendError, LlmError, SupportError, ToolError};
