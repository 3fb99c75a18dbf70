//! 转人工策略
//!
//! 纯函数式判断：只读会话快照与本轮 Dispatcher 结果，不做 I/O。按固定优先级取第一个命中的原因：
//! 明确要求人工 > 安全问题 > 退款意图 > 账户被封 > 连续失败达到阈值。
//! 超出工具调用上限只是 Dispatcher 的建议，由 TurnResponse::recommend_escalation 透出，不在此转人工。

use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::EscalationSection;
use crate::dispatch::DispatchOutcome;
use crate::session::Session;
use crate::tools::ToolCategory;

/// 转人工原因（机器可读）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    ExplicitRequest,
    SecurityConcern,
    RefundRequest,
    BlockedAccount,
    RepeatedFailure,
}

impl EscalationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExplicitRequest => "explicit_request",
            Self::SecurityConcern => "security_concern",
            Self::RefundRequest => "refund_request",
            Self::BlockedAccount => "blocked_account",
            Self::RepeatedFailure => "repeated_failure",
        }
    }
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EscalationReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "explicit_request" => Ok(Self::ExplicitRequest),
            "security_concern" => Ok(Self::SecurityConcern),
            "refund_request" => Ok(Self::RefundRequest),
            "blocked_account" => Ok(Self::BlockedAccount),
            "repeated_failure" => Ok(Self::RepeatedFailure),
            other => Err(format!("unknown escalation reason '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationDecision {
    pub escalate: bool,
    pub reason: Option<EscalationReason>,
}

impl EscalationDecision {
    pub fn proceed() -> Self {
        Self {
            escalate: false,
            reason: None,
        }
    }

    pub fn escalate(reason: EscalationReason) -> Self {
        Self {
            escalate: true,
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EscalationPolicy {
    failure_threshold: u32,
    human_request_phrases: Vec<Regex>,
    security_phrases: Vec<Regex>,
    refund_phrases: Vec<Regex>,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self::from_config(&EscalationSection::default())
    }
}

/// 短语按整词匹配（不区分大小写）："refund me" 不会命中 "refund meeting"
fn phrase_patterns(list: &[String]) -> Vec<Regex> {
    list.iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .filter_map(|p| {
            let edge = |c: Option<char>| {
                if c.is_some_and(char::is_alphanumeric) {
                    r"\b"
                } else {
                    ""
                }
            };
            let pattern = format!(
                "(?i){}{}{}",
                edge(p.chars().next()),
                regex::escape(p),
                edge(p.chars().last())
            );
            match Regex::new(&pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!(phrase = p, error = %e, "escalation phrase ignored");
                    None
                }
            }
        })
        .collect()
}

fn mentions(text: &str, phrases: &[Regex]) -> bool {
    phrases.iter().any(|re| re.is_match(text))
}

impl EscalationPolicy {
    pub fn from_config(cfg: &EscalationSection) -> Self {
        Self {
            failure_threshold: cfg.failure_threshold,
            human_request_phrases: phrase_patterns(&cfg.human_request_phrases),
            security_phrases: phrase_patterns(&cfg.security_phrases),
            refund_phrases: phrase_patterns(&cfg.refund_phrases),
        }
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// 判断本轮是否转人工；连续失败读取的是本轮开始前快照中的计数
    pub fn evaluate(&self, snapshot: &Session, outcome: &DispatchOutcome) -> EscalationDecision {
        let text = outcome.user_message.as_str();

        let reason = if mentions(text, &self.human_request_phrases) {
            Some(EscalationReason::ExplicitRequest)
        } else if mentions(text, &self.security_phrases) {
            Some(EscalationReason::SecurityConcern)
        } else if mentions(text, &self.refund_phrases) {
            Some(EscalationReason::RefundRequest)
        } else if reports_blocked_account(outcome) {
            Some(EscalationReason::BlockedAccount)
        } else if self.failure_threshold > 0
            && snapshot.consecutive_failures() >= self.failure_threshold
        {
            Some(EscalationReason::RepeatedFailure)
        } else {
            None
        };

        reason.map_or_else(EscalationDecision::proceed, EscalationDecision::escalate)
    }
}

/// 本轮某个用户类工具返回了 is_blocked = true
fn reports_blocked_account(outcome: &DispatchOutcome) -> bool {
    outcome
        .tool_calls
        .iter()
        .filter(|c| c.category == ToolCategory::User)
        .filter_map(|c| c.output())
        .any(|out| out.get("is_blocked").and_then(Value::as_bool) == Some(true))
}
