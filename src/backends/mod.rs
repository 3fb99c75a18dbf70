//! 外部数据源接口
//!
//! 知识库（udahub.db）、账户 / 体验（cultpass.db）、工单（udahub.db）四类后端，均以 trait 注入，
//! 工具层只依赖这些窄接口。内存实现见 [`memory`]，SQLite 实现见 `sqlite`（feature = "sqlite"）。

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::BackendError;

pub use memory::{InMemoryAccounts, InMemoryExperiences, InMemoryKnowledgeBase, InMemoryTickets};

/// 知识库文章
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub article_id: String,
    pub title: String,
    pub content: String,
    /// 逗号分隔的标签
    pub tags: String,
}

/// 检索命中：snippet 为正文前若干字符
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleHit {
    pub article_id: String,
    pub title: String,
    pub snippet: String,
    pub score: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: String,
    pub full_name: String,
    pub email: String,
    pub is_blocked: bool,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub subscription_id: String,
    pub user_id: String,
    pub status: String,
    pub tier: String,
    pub monthly_quota: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRecord {
    pub reservation_id: String,
    pub experience_id: String,
    pub experience_title: String,
    pub experience_location: String,
    pub experience_when: Option<DateTime<Utc>>,
    pub status: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperienceRecord {
    pub experience_id: String,
    pub title: String,
    pub description: String,
    pub location: String,
    pub when: DateTime<Utc>,
    pub slots_available: u32,
    pub is_premium: bool,
}

/// list_available 的可选过滤条件
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperienceFilters {
    /// 地点子串（不区分大小写）
    pub location: Option<String>,
    pub is_premium: Option<bool>,
}

impl ExperienceFilters {
    /// 体验是否可预订且满足过滤条件：未开始、有余位
    pub fn admits(&self, experience: &ExperienceRecord, now: DateTime<Utc>) -> bool {
        if experience.when < now || experience.slots_available == 0 {
            return false;
        }
        if let Some(location) = &self.location {
            if !experience
                .location
                .to_lowercase()
                .contains(&location.to_lowercase())
            {
                return false;
            }
        }
        self.is_premium.map_or(true, |p| p == experience.is_premium)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    Resolved,
    Escalated,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
            Self::Escalated => "escalated",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "in_progress" => Ok(Self::InProgress),
            "resolved" => Ok(Self::Resolved),
            "escalated" => Ok(Self::Escalated),
            other => Err(format!("unknown ticket status '{other}'")),
        }
    }
}

/// 工单消息发送方
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketRole {
    User,
    Agent,
    Ai,
    System,
}

impl TicketRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
            Self::Ai => "ai",
            Self::System => "system",
        }
    }
}

impl FromStr for TicketRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "user" => Ok(Self::User),
            "agent" => Ok(Self::Agent),
            "ai" => Ok(Self::Ai),
            "system" => Ok(Self::System),
            other => Err(format!("unknown ticket role '{other}'")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketMessage {
    pub message_id: String,
    pub role: TicketRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRecord {
    pub ticket_id: String,
    pub channel: String,
    pub created_at: Option<DateTime<Utc>>,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub status: TicketStatus,
    pub main_issue_type: Option<String>,
    pub tags: Option<String>,
    pub messages: Vec<TicketMessage>,
}

#[async_trait]
pub trait KnowledgeBackend: Send + Sync {
    /// 关键词检索，按 score 降序，最多 top_k 条
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<ArticleHit>, BackendError>;

    async fn get_article(&self, article_id: &str) -> Result<Article, BackendError>;
}

#[async_trait]
pub trait AccountBackend: Send + Sync {
    async fn get_user(&self, email: &str) -> Result<UserRecord, BackendError>;

    async fn get_subscription(&self, user_id: &str) -> Result<SubscriptionRecord, BackendError>;

    async fn get_reservations(&self, user_id: &str)
        -> Result<Vec<ReservationRecord>, BackendError>;
}

#[async_trait]
pub trait ExperienceBackend: Send + Sync {
    async fn list_available(
        &self,
        filters: &ExperienceFilters,
    ) -> Result<Vec<ExperienceRecord>, BackendError>;

    async fn get_experience(&self, experience_id: &str) -> Result<ExperienceRecord, BackendError>;
}

#[async_trait]
pub trait TicketBackend: Send + Sync {
    async fn get_ticket(&self, ticket_id: &str) -> Result<TicketRecord, BackendError>;

    /// 更新状态；issue_type 非空时同时改写 main_issue_type
    async fn update_status(
        &self,
        ticket_id: &str,
        status: TicketStatus,
        issue_type: Option<&str>,
    ) -> Result<TicketRecord, BackendError>;

    async fn append_message(
        &self,
        ticket_id: &str,
        role: TicketRole,
        content: &str,
    ) -> Result<TicketMessage, BackendError>;
}

/// 四类后端的集合，供工具注册时共享
#[derive(Clone)]
pub struct Backends {
    pub knowledge: Arc<dyn KnowledgeBackend>,
    pub accounts: Arc<dyn AccountBackend>,
    pub experiences: Arc<dyn ExperienceBackend>,
    pub tickets: Arc<dyn TicketBackend>,
}

impl Backends {
    /// 内置演示数据的内存后端
    pub fn demo() -> Self {
        Self {
            knowledge: Arc::new(InMemoryKnowledgeBase::demo()),
            accounts: Arc::new(InMemoryAccounts::demo()),
            experiences: Arc::new(InMemoryExperiences::demo()),
            tickets: Arc::new(InMemoryTickets::demo()),
        }
    }
}

/// snippet 最大字符数
const SNIPPET_CHARS: usize = 160;

/// 关键词相关度：每个查询词命中标题 +3、正文 +1、标签 +2
pub fn relevance_score(query: &str, article: &Article) -> u32 {
    let title = article.title.to_lowercase();
    let content = article.content.to_lowercase();
    let tags = article.tags.to_lowercase();
    query
        .to_lowercase()
        .split_whitespace()
        .map(|term| term.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|term| !term.is_empty())
        .map(|term| {
            let mut score = 0;
            if title.contains(term) {
                score += 3;
            }
            if content.contains(term) {
                score += 1;
            }
            if tags.contains(term) {
                score += 2;
            }
            score
        })
        .sum()
}

/// 对文章集合打分、去零分、降序、截断到 top_k；同分按 article_id 保持稳定顺序
pub fn rank_articles<'a>(
    query: &str,
    articles: impl IntoIterator<Item = &'a Article>,
    top_k: usize,
) -> Vec<ArticleHit> {
    let mut hits: Vec<ArticleHit> = articles
        .into_iter()
        .filter_map(|article| {
            let score = relevance_score(query, article);
            (score > 0).then(|| ArticleHit {
                article_id: article.article_id.clone(),
                title: article.title.clone(),
                snippet: snippet(&article.content),
                score,
            })
        })
        .collect();
    hits.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.article_id.cmp(&b.article_id)));
    hits.truncate(top_k);
    hits
}

fn snippet(content: &str) -> String {
    if content.chars().count() > SNIPPET_CHARS {
        format!("{}...", content.chars().take(SNIPPET_CHARS).collect::<String>())
    } else {
        content.to_string()
    }
}
