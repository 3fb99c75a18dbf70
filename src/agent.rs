//! 组件装配
//!
//! 按配置构建后端（memory / sqlite）、注册十个客服工具、执行器、可选的 LLM 规划与转人工策略，
//! 组装成可多会话共享的 SessionManager。

use std::sync::Arc;
use std::time::Duration;

use crate::backends::Backends;
use crate::config::AppConfig;
use crate::core::SupportError;
use crate::dispatch::{Dispatcher, LlmPlanner};
use crate::escalation::EscalationPolicy;
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};
use crate::manager::SessionManager;
use crate::session::{MemorySessionStore, SessionStore};
use crate::tools::{register_support_tools, ToolExecutor, ToolRegistry};

/// 按 [llm].provider 选择客户端；未知 provider 退回 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    match cfg.llm.provider.to_lowercase().as_str() {
        "openai" => {
            tracing::info!(model = %cfg.llm.model, "Using OpenAI-compatible LLM");
            Arc::new(OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                cfg.llm.api_key.as_deref(),
            ))
        }
        "mock" => Arc::new(MockLlmClient),
        other => {
            tracing::warn!(provider = other, "Unknown LLM provider, using Mock LLM");
            Arc::new(MockLlmClient)
        }
    }
}

/// 按 [backends].kind 构建数据源
pub async fn create_backends(cfg: &AppConfig) -> Result<Backends, SupportError> {
    match cfg.backends.kind.to_lowercase().as_str() {
        "memory" => Ok(Backends::demo()),
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            use crate::backends::sqlite::{CultpassDb, UdahubDb};

            let storage = |e: crate::core::BackendError| SupportError::Storage(e.to_string());
            let udahub = Arc::new(
                UdahubDb::open(&cfg.backends.udahub_db, cfg.app.account_id.clone())
                    .await
                    .map_err(storage)?,
            );
            let cultpass = Arc::new(CultpassDb::open(&cfg.backends.cultpass_db).await.map_err(storage)?);
            tracing::info!(
                udahub = %cfg.backends.udahub_db.display(),
                cultpass = %cfg.backends.cultpass_db.display(),
                "SQLite backends opened"
            );
            Ok(Backends {
                knowledge: udahub.clone(),
                tickets: udahub,
                accounts: cultpass.clone(),
                experiences: cultpass,
            })
        }
        other => Err(SupportError::Config(format!(
            "unsupported backend kind '{other}'"
        ))),
    }
}

/// 用给定后端与会话存储装配 SessionManager
pub fn create_session_manager_with(
    cfg: &AppConfig,
    backends: &Backends,
    store: Arc<dyn SessionStore>,
) -> Result<SessionManager, SupportError> {
    let mut registry = ToolRegistry::new();
    register_support_tools(&mut registry, backends, cfg.dispatch.search_top_k)?;
    registry.lookup(&cfg.dispatch.fallback_tool).map_err(|_| {
        SupportError::Config(format!(
            "fallback tool '{}' is not registered",
            cfg.dispatch.fallback_tool
        ))
    })?;

    let executor = Arc::new(ToolExecutor::new(
        Arc::new(registry),
        Duration::from_secs(cfg.dispatch.tool_timeout_secs),
    ));
    let mut dispatcher = Dispatcher::new(executor, cfg.dispatch.clone());
    if cfg.dispatch.use_llm {
        dispatcher = dispatcher.with_planner(LlmPlanner::new(create_llm_from_config(cfg)));
    }

    Ok(SessionManager::new(
        store,
        dispatcher,
        EscalationPolicy::from_config(&cfg.escalation),
    ))
}

/// 按配置构建后端与内存会话存储
pub async fn create_session_manager(cfg: &AppConfig) -> Result<SessionManager, SupportError> {
    let backends = create_backends(cfg).await?;
    create_session_manager_with(cfg, &backends, Arc::new(MemorySessionStore::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_config_builds_manager() {
        let manager = create_session_manager(&AppConfig::default()).await.unwrap();
        let reply = manager
            .handle_turn("t-1", "What's your refund policy?")
            .await
            .unwrap();
        assert!(!reply.escalated);
    }

    #[tokio::test]
    async fn unknown_backend_kind_is_config_error() {
        let mut cfg = AppConfig::default();
        cfg.backends.kind = "postgres".into();
        let err = create_backends(&cfg).await.err().unwrap();
        assert!(matches!(err, SupportError::Config(_)));
    }

    #[test]
    fn unregistered_fallback_is_rejected() {
        let mut cfg = AppConfig::default();
        cfg.dispatch.fallback_tool = "ask_the_oracle".into();
        let err = create_session_manager_with(&cfg, &Backends::demo(), Arc::new(MemorySessionStore::new()))
            .err()
            .unwrap();
        assert!(matches!(err, SupportError::Config(_)));
    }
}
