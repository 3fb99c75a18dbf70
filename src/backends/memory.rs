//! 内存后端（演示数据 + 测试）
//!
//! 只读数据在构造后不变；工单可变，用 RwLock 保护。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::RwLock;

use super::{
    rank_articles, AccountBackend, Article, ArticleHit, ExperienceBackend, ExperienceFilters,
    ExperienceRecord, KnowledgeBackend, ReservationRecord, SubscriptionRecord, TicketBackend,
    TicketMessage, TicketRecord, TicketRole, TicketStatus, UserRecord,
};
use crate::core::BackendError;

#[derive(Debug, Default)]
pub struct InMemoryKnowledgeBase {
    articles: Vec<Article>,
}

impl InMemoryKnowledgeBase {
    pub fn new(articles: Vec<Article>) -> Self {
        Self { articles }
    }

    pub fn demo() -> Self {
        let article = |id: &str, title: &str, content: &str, tags: &str| Article {
            article_id: id.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            tags: tags.to_string(),
        };
        Self::new(vec![
            article(
                "KB-001",
                "How to reserve an experience",
                "Open the CultPass app, pick an experience and tap Reserve. Basic members can book 4 experiences per month, Premium members 8.",
                "booking,reservation,experience",
            ),
            article(
                "KB-002",
                "Refund policy",
                "Subscription payments are refundable within 7 days of the charge if no experience was used. Refund requests are handled by our support team.",
                "billing,refund,payment",
            ),
            article(
                "KB-003",
                "Cancelling or pausing your subscription",
                "You can cancel or pause your subscription from Settings > Subscription. Cancellation takes effect at the end of the billing cycle.",
                "subscription,cancel,pause,billing",
            ),
            article(
                "KB-004",
                "Trouble logging in",
                "If you cannot log in, reset your password from the login screen. If the app keeps crashing, update to the latest version and restart your phone.",
                "login,password,app,technical",
            ),
            article(
                "KB-005",
                "Premium vs Basic tiers",
                "Premium members get priority booking and access to exclusive events. Basic members have standard access.",
                "subscription,premium,tier",
            ),
        ])
    }
}

#[async_trait]
impl KnowledgeBackend for InMemoryKnowledgeBase {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<ArticleHit>, BackendError> {
        Ok(rank_articles(query, &self.articles, top_k))
    }

    async fn get_article(&self, article_id: &str) -> Result<Article, BackendError> {
        self.articles
            .iter()
            .find(|a| a.article_id.eq_ignore_ascii_case(article_id))
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("article {article_id}")))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryAccounts {
    users: Vec<UserRecord>,
    subscriptions: Vec<SubscriptionRecord>,
    reservations: HashMap<String, Vec<ReservationRecord>>,
}

impl InMemoryAccounts {
    pub fn new(
        users: Vec<UserRecord>,
        subscriptions: Vec<SubscriptionRecord>,
        reservations: HashMap<String, Vec<ReservationRecord>>,
    ) -> Self {
        Self {
            users,
            subscriptions,
            reservations,
        }
    }

    pub fn demo() -> Self {
        let now = Utc::now();
        let user = |id: &str, name: &str, email: &str, blocked: bool| UserRecord {
            user_id: id.to_string(),
            full_name: name.to_string(),
            email: email.to_string(),
            is_blocked: blocked,
            created_at: Some(now - Duration::days(200)),
        };
        let subscription = |id: &str, user_id: &str, tier: &str, quota: u32| SubscriptionRecord {
            subscription_id: id.to_string(),
            user_id: user_id.to_string(),
            status: "active".to_string(),
            tier: tier.to_string(),
            monthly_quota: quota,
            started_at: Some(now - Duration::days(180)),
            ended_at: None,
        };
        let mut reservations = HashMap::new();
        reservations.insert(
            "u-100".to_string(),
            vec![ReservationRecord {
                reservation_id: "r-1".to_string(),
                experience_id: "exp-01".to_string(),
                experience_title: "Jazz at Ibirapuera".to_string(),
                experience_location: "São Paulo".to_string(),
                experience_when: Some(now + Duration::days(5)),
                status: "reserved".to_string(),
                created_at: Some(now - Duration::days(2)),
            }],
        );
        Self::new(
            vec![
                user("u-100", "Ana Souza", "ana@example.com", false),
                user("u-200", "Bruno Lima", "bruno@example.com", true),
            ],
            vec![
                subscription("s-100", "u-100", "premium", 8),
                subscription("s-200", "u-200", "basic", 4),
            ],
            reservations,
        )
    }
}

#[async_trait]
impl AccountBackend for InMemoryAccounts {
    async fn get_user(&self, email: &str) -> Result<UserRecord, BackendError> {
        self.users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("user with email {email}")))
    }

    async fn get_subscription(&self, user_id: &str) -> Result<SubscriptionRecord, BackendError> {
        self.subscriptions
            .iter()
            .find(|s| s.user_id == user_id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("subscription for user {user_id}")))
    }

    async fn get_reservations(
        &self,
        user_id: &str,
    ) -> Result<Vec<ReservationRecord>, BackendError> {
        Ok(self.reservations.get(user_id).cloned().unwrap_or_default())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryExperiences {
    experiences: Vec<ExperienceRecord>,
}

impl InMemoryExperiences {
    pub fn new(experiences: Vec<ExperienceRecord>) -> Self {
        Self { experiences }
    }

    pub fn demo() -> Self {
        let now = Utc::now();
        let exp = |id: &str, title: &str, location: &str, days: i64, slots: u32, premium: bool| {
            ExperienceRecord {
                experience_id: id.to_string(),
                title: title.to_string(),
                description: format!("{title} in {location}"),
                location: location.to_string(),
                when: now + Duration::days(days),
                slots_available: slots,
                is_premium: premium,
            }
        };
        Self::new(vec![
            exp("exp-01", "Jazz at Ibirapuera", "São Paulo", 5, 12, false),
            exp("exp-02", "MASP guided tour", "São Paulo", 9, 4, true),
            exp("exp-03", "Samba night in Lapa", "Rio de Janeiro", 3, 0, false),
            exp("exp-04", "Inhotim day trip", "Brumadinho", 14, 20, true),
        ])
    }
}

#[async_trait]
impl ExperienceBackend for InMemoryExperiences {
    async fn list_available(
        &self,
        filters: &ExperienceFilters,
    ) -> Result<Vec<ExperienceRecord>, BackendError> {
        let now = Utc::now();
        let mut found: Vec<ExperienceRecord> = self
            .experiences
            .iter()
            .filter(|e| filters.admits(e, now))
            .cloned()
            .collect();
        found.sort_by_key(|e| e.when);
        Ok(found)
    }

    async fn get_experience(&self, experience_id: &str) -> Result<ExperienceRecord, BackendError> {
        self.experiences
            .iter()
            .find(|e| e.experience_id.eq_ignore_ascii_case(experience_id))
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("experience {experience_id}")))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTickets {
    tickets: RwLock<HashMap<String, TicketRecord>>,
}

impl InMemoryTickets {
    pub fn new(tickets: Vec<TicketRecord>) -> Self {
        Self {
            tickets: RwLock::new(
                tickets
                    .into_iter()
                    .map(|t| (t.ticket_id.clone(), t))
                    .collect(),
            ),
        }
    }

    pub fn demo() -> Self {
        let now = Utc::now();
        Self::new(vec![TicketRecord {
            ticket_id: "T-1001".to_string(),
            channel: "chat".to_string(),
            created_at: Some(now - Duration::hours(3)),
            user_id: Some("u-100".to_string()),
            user_name: Some("Ana Souza".to_string()),
            status: TicketStatus::Open,
            main_issue_type: Some("booking".to_string()),
            tags: Some("reservation".to_string()),
            messages: vec![TicketMessage {
                message_id: "m-1".to_string(),
                role: TicketRole::User,
                content: "I can't see my reservation for the jazz concert.".to_string(),
                created_at: now - Duration::hours(3),
            }],
        }])
    }
}

#[async_trait]
impl TicketBackend for InMemoryTickets {
    async fn get_ticket(&self, ticket_id: &str) -> Result<TicketRecord, BackendError> {
        self.tickets
            .read()
            .await
            .get(ticket_id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("ticket {ticket_id}")))
    }

    async fn update_status(
        &self,
        ticket_id: &str,
        status: TicketStatus,
        issue_type: Option<&str>,
    ) -> Result<TicketRecord, BackendError> {
        let mut tickets = self.tickets.write().await;
        let ticket = tickets
            .get_mut(ticket_id)
            .ok_or_else(|| BackendError::NotFound(format!("ticket {ticket_id}")))?;
        ticket.status = status;
        if let Some(issue) = issue_type {
            ticket.main_issue_type = Some(issue.to_string());
        }
        Ok(ticket.clone())
    }

    async fn append_message(
        &self,
        ticket_id: &str,
        role: TicketRole,
        content: &str,
    ) -> Result<TicketMessage, BackendError> {
        let mut tickets = self.tickets.write().await;
        let ticket = tickets
            .get_mut(ticket_id)
            .ok_or_else(|| BackendError::NotFound(format!("ticket {ticket_id}")))?;
        let message = TicketMessage {
            message_id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        ticket.messages.push(message.clone());
        Ok(message)
    }
}
