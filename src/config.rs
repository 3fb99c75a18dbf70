//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再叠加可选的指定文件，最后用环境变量 `UDAHUB__*` 覆盖
//! （双下划线表示嵌套，如 `UDAHUB__DISPATCH__MAX_TOOL_CALLS=3`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub dispatch: DispatchSection,
    pub escalation: EscalationSection,
    pub llm: LlmSection,
    pub backends: BackendsSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// udahub.db 中的租户账号
    #[serde(default = "default_account_id")]
    pub account_id: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            account_id: default_account_id(),
        }
    }
}

fn default_account_id() -> String {
    "cultpass".to_string()
}

/// [dispatch] 段：每轮工具调用上限、单次超时、兜底工具
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchSection {
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: usize,
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default = "default_fallback_tool")]
    pub fallback_tool: String,
    #[serde(default = "default_search_top_k")]
    pub search_top_k: usize,
    /// 启用 LLM 规划（否则纯规则调度）
    #[serde(default)]
    pub use_llm: bool,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            max_tool_calls: default_max_tool_calls(),
            tool_timeout_secs: default_tool_timeout_secs(),
            fallback_tool: default_fallback_tool(),
            search_top_k: default_search_top_k(),
            use_llm: false,
        }
    }
}

fn default_max_tool_calls() -> usize {
    5
}

fn default_tool_timeout_secs() -> u64 {
    10
}

fn default_fallback_tool() -> String {
    "search_knowledge_base".to_string()
}

fn default_search_top_k() -> usize {
    5
}

/// [escalation] 段：连续失败阈值与各类触发短语（小写子串匹配）
#[derive(Debug, Clone, Deserialize)]
pub struct EscalationSection {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_human_request_phrases")]
    pub human_request_phrases: Vec<String>,
    #[serde(default = "default_security_phrases")]
    pub security_phrases: Vec<String>,
    #[serde(default = "default_refund_phrases")]
    pub refund_phrases: Vec<String>,
}

impl Default for EscalationSection {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            human_request_phrases: default_human_request_phrases(),
            security_phrases: default_security_phrases(),
            refund_phrases: default_refund_phrases(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    3
}

fn phrases(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn default_human_request_phrases() -> Vec<String> {
    phrases(&[
        "talk to a human",
        "speak to a human",
        "talk to a person",
        "speak to a person",
        "talk to someone",
        "speak with someone",
        "human agent",
        "real person",
        "live agent",
        "talk to an agent",
        "speak to an agent",
        "representative",
    ])
}

fn default_security_phrases() -> Vec<String> {
    phrases(&[
        "hacked",
        "stolen",
        "unauthorized",
        "unauthorised",
        "fraud",
        "phishing",
        "compromised",
        "suspicious login",
        "someone else logged",
        "identity theft",
    ])
}

fn default_refund_phrases() -> Vec<String> {
    phrases(&[
        "want a refund",
        "need a refund",
        "like a refund",
        "have a refund",
        "get a refund",
        "request a refund",
        "issue a refund",
        "process a refund",
        "give me a refund",
        "refund me",
        "refund my",
        "refund please",
        "money back",
        "chargeback",
        "charged twice",
    ])
}

/// [llm] 段
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// mock / openai
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 未设置时读 OPENAI_API_KEY
    pub api_key: Option<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key: None,
        }
    }
}

fn default_provider() -> String {
    "mock".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

/// [backends] 段：memory（演示数据）或 sqlite（需 feature = "sqlite"）
#[derive(Debug, Clone, Deserialize)]
pub struct BackendsSection {
    #[serde(default = "default_backend_kind")]
    pub kind: String,
    #[serde(default = "default_udahub_db")]
    pub udahub_db: PathBuf,
    #[serde(default = "default_cultpass_db")]
    pub cultpass_db: PathBuf,
}

impl Default for BackendsSection {
    fn default() -> Self {
        Self {
            kind: default_backend_kind(),
            udahub_db: default_udahub_db(),
            cultpass_db: default_cultpass_db(),
        }
    }
}

fn default_backend_kind() -> String {
    "memory".to_string()
}

fn default_udahub_db() -> PathBuf {
    PathBuf::from("data/udahub.db")
}

fn default_cultpass_db() -> PathBuf {
    PathBuf::from("data/cultpass.db")
}

/// 从 config 目录加载配置，环境变量 UDAHUB__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 UDAHUB__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("UDAHUB")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
