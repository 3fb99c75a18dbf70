//! 消息分类与事实提取
//!
//! 规则匹配（不调用 LLM）：按关键词把消息归入零到多个会话类别，并用正则提取邮箱、工单号、
//! 文章号、体验号等可直接填入工具参数的事实。

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::tools::ToolCategory;

/// 会话类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationCategory {
    GeneralInquiry,
    Account,
    Booking,
    Technical,
    Billing,
}

const ACCOUNT_KEYWORDS: &[&str] = &[
    "account",
    "profile",
    "subscription",
    "membership",
    "my plan",
    "tier",
    "quota",
    "blocked",
    "email",
];

const BOOKING_KEYWORDS: &[&str] = &[
    "book",
    "reserv",
    "experience",
    "event",
    "slot",
    "available",
    "upcoming",
    "exp-",
];

const TECHNICAL_KEYWORDS: &[&str] = &[
    "app",
    "crash",
    "error",
    "bug",
    "not working",
    "log in",
    "login",
    "password",
    "loading",
];

const BILLING_KEYWORDS: &[&str] = &[
    "refund",
    "payment",
    "charge",
    "billing",
    "invoice",
    "price",
    "cancel",
    "money",
];

/// 指向本人数据的说法（"my booking" 需要查预约而不只是列可用体验）
const OWNERSHIP_MARKERS: &[&str] = &["my ", "i booked", "i reserved", "mine"];

fn contains_any(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| text.contains(w))
}

static EMAIL_RE: OnceLock<Regex> = OnceLock::new();
static TICKET_RE: OnceLock<Regex> = OnceLock::new();
static ARTICLE_RE: OnceLock<Regex> = OnceLock::new();
static EXPERIENCE_RE: OnceLock<Regex> = OnceLock::new();

fn email_re() -> &'static Regex {
    EMAIL_RE.get_or_init(|| {
        Regex::new(r"(?i)[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}").expect("email regex")
    })
}

fn ticket_re() -> &'static Regex {
    TICKET_RE.get_or_init(|| Regex::new(r"(?i)\bT-\d+\b").expect("ticket regex"))
}

fn article_re() -> &'static Regex {
    ARTICLE_RE.get_or_init(|| Regex::new(r"(?i)\bKB-\d+\b").expect("article regex"))
}

fn experience_re() -> &'static Regex {
    EXPERIENCE_RE.get_or_init(|| Regex::new(r"(?i)\bexp-\d+\b").expect("experience regex"))
}

/// 从消息中提取的事实
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageFacts {
    pub email: Option<String>,
    pub ticket_id: Option<String>,
    pub article_id: Option<String>,
    pub experience_id: Option<String>,
    pub wants_premium: bool,
    pub about_own_data: bool,
}

impl MessageFacts {
    pub fn extract(text: &str) -> Self {
        let lower = text.to_lowercase();
        Self {
            email: email_re().find(text).map(|m| m.as_str().to_lowercase()),
            ticket_id: ticket_re().find(text).map(|m| m.as_str().to_uppercase()),
            article_id: article_re().find(text).map(|m| m.as_str().to_uppercase()),
            experience_id: experience_re().find(text).map(|m| m.as_str().to_lowercase()),
            wants_premium: lower.contains("premium"),
            about_own_data: contains_any(&lower, OWNERSHIP_MARKERS),
        }
    }
}

/// 分类结果：会话类别、需要调度的工具类别（按出现顺序去重）与提取的事实
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub categories: BTreeSet<ConversationCategory>,
    pub tool_categories: Vec<ToolCategory>,
    pub facts: MessageFacts,
}

impl Classification {
    /// 涉及多于一个工具类别
    pub fn is_ambiguous(&self) -> bool {
        self.tool_categories.len() > 1
    }
}

pub fn classify(text: &str) -> Classification {
    let lower = text.to_lowercase();
    let facts = MessageFacts::extract(text);

    let mut categories = BTreeSet::new();
    if contains_any(&lower, ACCOUNT_KEYWORDS) || facts.email.is_some() {
        categories.insert(ConversationCategory::Account);
    }
    if contains_any(&lower, BOOKING_KEYWORDS) {
        categories.insert(ConversationCategory::Booking);
    }
    if contains_any(&lower, TECHNICAL_KEYWORDS) {
        categories.insert(ConversationCategory::Technical);
    }
    if contains_any(&lower, BILLING_KEYWORDS) {
        categories.insert(ConversationCategory::Billing);
    }
    if categories.is_empty() && !lower.trim().is_empty() {
        categories.insert(ConversationCategory::GeneralInquiry);
    }

    let mut tool_categories = Vec::new();
    let mut push = |c: ToolCategory| {
        if !tool_categories.contains(&c) {
            tool_categories.push(c);
        }
    };
    if facts.ticket_id.is_some() {
        push(ToolCategory::Ticket);
    }
    for category in &categories {
        match category {
            ConversationCategory::Account => push(ToolCategory::User),
            ConversationCategory::Booking => {
                if facts.about_own_data {
                    push(ToolCategory::User);
                }
                push(ToolCategory::Experience);
            }
            ConversationCategory::GeneralInquiry
            | ConversationCategory::Technical
            | ConversationCategory::Billing => {
                // 只带工单号的消息不再额外检索知识库
                if facts.ticket_id.is_none() || facts.article_id.is_some() {
                    push(ToolCategory::Knowledge);
                }
            }
        }
    }

    tracing::debug!(?categories, ?tool_categories, "message classified");
    Classification {
        categories,
        tool_categories,
        facts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refund_policy_is_knowledge_only() {
        let c = classify("What's your refund policy?");
        assert_eq!(c.tool_categories, vec![ToolCategory::Knowledge]);
        assert!(c.categories.contains(&ConversationCategory::Billing));
        assert!(!c.is_ambiguous());
    }

    #[test]
    fn unmatched_text_is_general_inquiry() {
        let c = classify("hello there");
        assert_eq!(
            c.categories.iter().copied().collect::<Vec<_>>(),
            vec![ConversationCategory::GeneralInquiry]
        );
        assert_eq!(c.tool_categories, vec![ToolCategory::Knowledge]);
    }

    #[test]
    fn empty_text_has_no_category() {
        let c = classify("   ");
        assert!(c.categories.is_empty());
        assert!(c.tool_categories.is_empty());
    }

    #[test]
    fn extracts_identifiers() {
        let facts = MessageFacts::extract("Ticket t-1001 for Ana@Example.com about KB-002 and EXP-04");
        assert_eq!(facts.email.as_deref(), Some("ana@example.com"));
        assert_eq!(facts.ticket_id.as_deref(), Some("T-1001"));
        assert_eq!(facts.article_id.as_deref(), Some("KB-002"));
        assert_eq!(facts.experience_id.as_deref(), Some("exp-04"));
    }

    #[test]
    fn own_booking_touches_user_and_experience() {
        let c = classify("Where is my booking? ana@example.com");
        assert_eq!(c.tool_categories, vec![ToolCategory::User, ToolCategory::Experience]);
        assert!(c.is_ambiguous());
    }

    #[test]
    fn ticket_id_routes_to_ticket_tools() {
        let c = classify("What is the status of T-1001?");
        assert_eq!(c.tool_categories, vec![ToolCategory::Ticket]);
    }
}
