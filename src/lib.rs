//! Udahub - 工具驱动的客服会话管理器（CultPass 助手）
//!
//! 模块划分：
//! - **agent**: 按配置装配 SessionManager
//! - **backends**: 知识库 / 账户 / 体验 / 工单数据源（内存演示数据、SQLite）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型
//! - **dispatch**: 消息分类、工具选择与调用、回复组装、LLM 规划
//! - **escalation**: 转人工策略
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **manager**: 会话管理器（handle_turn）
//! - **session**: 会话、消息与会话存储
//! - **tools**: 工具注册表、执行器与十个客服工具

pub mod agent;
pub mod backends;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod escalation;
pub mod llm;
pub mod manager;
pub mod observability;
pub mod session;
pub mod tools;

pub use core::SupportError;
pub use escalation::{EscalationDecision, EscalationPolicy, EscalationReason};
pub use manager::{SessionManager, TurnResponse};
