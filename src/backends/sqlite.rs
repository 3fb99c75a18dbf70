//! SQLite 后端
//!
//! udahub.db：knowledge / tickets / ticket_metadata / ticket_messages / users；
//! cultpass.db：users / subscriptions / reservations / experiences。
//! 时间统一以 RFC3339 文本存储。

#![cfg(feature = "sqlite")]

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use super::{
    rank_articles, AccountBackend, Article, ArticleHit, ExperienceBackend, ExperienceFilters,
    ExperienceRecord, KnowledgeBackend, ReservationRecord, SubscriptionRecord, TicketBackend,
    TicketMessage, TicketRecord, TicketRole, TicketStatus, UserRecord,
};
use crate::core::BackendError;

async fn open_pool(db_path: &Path) -> Result<SqlitePool, BackendError> {
    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;
    Ok(pool)
}

fn parse_ts(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn non_negative(n: i64) -> u32 {
    u32::try_from(n.max(0)).unwrap_or(u32::MAX)
}

/// udahub.db：知识库与工单
pub struct UdahubDb {
    pool: SqlitePool,
    account_id: String,
}

impl UdahubDb {
    /// 打开（不存在则创建）数据库并建表；account_id 用于知识库按租户过滤
    pub async fn open(
        db_path: impl AsRef<Path>,
        account_id: impl Into<String>,
    ) -> Result<Self, BackendError> {
        let db = Self {
            pool: open_pool(db_path.as_ref()).await?,
            account_id: account_id.into(),
        };
        db.init_tables().await?;
        Ok(db)
    }

    async fn init_tables(&self) -> Result<(), BackendError> {
        for ddl in [
            "CREATE TABLE IF NOT EXISTS knowledge (
                article_id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                tags TEXT NOT NULL DEFAULT ''
            )",
            "CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                external_user_id TEXT,
                user_name TEXT
            )",
            "CREATE TABLE IF NOT EXISTS tickets (
                ticket_id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                user_id TEXT,
                channel TEXT NOT NULL,
                created_at TEXT
            )",
            "CREATE TABLE IF NOT EXISTS ticket_metadata (
                ticket_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                main_issue_type TEXT,
                tags TEXT
            )",
            "CREATE TABLE IF NOT EXISTS ticket_messages (
                message_id TEXT PRIMARY KEY,
                ticket_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_ticket_messages_ticket ON ticket_messages(ticket_id)",
        ] {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn load_ticket_messages(&self, ticket_id: &str) -> Result<Vec<TicketMessage>, BackendError> {
        let rows = sqlx::query(
            "SELECT message_id, role, content, created_at FROM ticket_messages
             WHERE ticket_id = ? ORDER BY created_at, rowid",
        )
        .bind(ticket_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| TicketMessage {
                message_id: row.get("message_id"),
                role: row
                    .get::<String, _>("role")
                    .parse()
                    .unwrap_or(TicketRole::System),
                content: row.get("content"),
                created_at: parse_ts(Some(row.get("created_at"))).unwrap_or_else(Utc::now),
            })
            .collect())
    }
}

fn article_from_row(row: &SqliteRow) -> Article {
    Article {
        article_id: row.get("article_id"),
        title: row.get("title"),
        content: row.get("content"),
        tags: row.get("tags"),
    }
}

#[async_trait]
impl KnowledgeBackend for UdahubDb {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<ArticleHit>, BackendError> {
        let rows = sqlx::query(
            "SELECT article_id, title, content, tags FROM knowledge WHERE account_id = ?",
        )
        .bind(&self.account_id)
        .fetch_all(&self.pool)
        .await?;
        let articles: Vec<Article> = rows.iter().map(article_from_row).collect();
        Ok(rank_articles(query, &articles, top_k))
    }

    async fn get_article(&self, article_id: &str) -> Result<Article, BackendError> {
        let row = sqlx::query(
            "SELECT article_id, title, content, tags FROM knowledge WHERE article_id = ?",
        )
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref()
            .map(article_from_row)
            .ok_or_else(|| BackendError::NotFound(format!("article {article_id}")))
    }
}

#[async_trait]
impl TicketBackend for UdahubDb {
    async fn get_ticket(&self, ticket_id: &str) -> Result<TicketRecord, BackendError> {
        let row = sqlx::query(
            "SELECT t.ticket_id, t.channel, t.created_at, t.user_id, u.user_name,
                    m.status, m.main_issue_type, m.tags
             FROM tickets t
             LEFT JOIN users u ON u.user_id = t.user_id
             LEFT JOIN ticket_metadata m ON m.ticket_id = t.ticket_id
             WHERE t.ticket_id = ?",
        )
        .bind(ticket_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| BackendError::NotFound(format!("ticket {ticket_id}")))?;

        let status: Option<String> = row.get("status");
        Ok(TicketRecord {
            ticket_id: row.get("ticket_id"),
            channel: row.get("channel"),
            created_at: parse_ts(row.get("created_at")),
            user_id: row.get("user_id"),
            user_name: row.get("user_name"),
            status: status
                .and_then(|s| s.parse().ok())
                .unwrap_or(TicketStatus::Open),
            main_issue_type: row.get("main_issue_type"),
            tags: row.get("tags"),
            messages: self.load_ticket_messages(ticket_id).await?,
        })
    }

    async fn update_status(
        &self,
        ticket_id: &str,
        status: TicketStatus,
        issue_type: Option<&str>,
    ) -> Result<TicketRecord, BackendError> {
        let result = sqlx::query(
            "UPDATE ticket_metadata
             SET status = ?, main_issue_type = COALESCE(?, main_issue_type)
             WHERE ticket_id = ?",
        )
        .bind(status.as_str())
        .bind(issue_type)
        .bind(ticket_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(BackendError::NotFound(format!("ticket metadata for {ticket_id}")));
        }
        self.get_ticket(ticket_id).await
    }

    async fn append_message(
        &self,
        ticket_id: &str,
        role: TicketRole,
        content: &str,
    ) -> Result<TicketMessage, BackendError> {
        let exists = sqlx::query("SELECT 1 FROM tickets WHERE ticket_id = ?")
            .bind(ticket_id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(BackendError::NotFound(format!("ticket {ticket_id}")));
        }

        let message = TicketMessage {
            message_id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO ticket_messages (message_id, ticket_id, role, content, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&message.message_id)
        .bind(ticket_id)
        .bind(role.as_str())
        .bind(&message.content)
        .bind(message.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(message)
    }
}

/// cultpass.db：用户、订阅、预订、体验
pub struct CultpassDb {
    pool: SqlitePool,
}

impl CultpassDb {
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let db = Self {
            pool: open_pool(db_path.as_ref()).await?,
        };
        db.init_tables().await?;
        Ok(db)
    }

    async fn init_tables(&self) -> Result<(), BackendError> {
        for ddl in [
            "CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                full_name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                is_blocked INTEGER NOT NULL DEFAULT 0,
                created_at TEXT
            )",
            "CREATE TABLE IF NOT EXISTS subscriptions (
                subscription_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                status TEXT NOT NULL,
                tier TEXT NOT NULL,
                monthly_quota INTEGER NOT NULL,
                started_at TEXT,
                ended_at TEXT
            )",
            "CREATE TABLE IF NOT EXISTS experiences (
                experience_id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                location TEXT NOT NULL,
                \"when\" TEXT NOT NULL,
                slots_available INTEGER NOT NULL,
                is_premium INTEGER NOT NULL DEFAULT 0
            )",
            "CREATE TABLE IF NOT EXISTS reservations (
                reservation_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                experience_id TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT
            )",
        ] {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn experience_from_row(row: &SqliteRow) -> Option<ExperienceRecord> {
    Some(ExperienceRecord {
        experience_id: row.get("experience_id"),
        title: row.get("title"),
        description: row.get("description"),
        location: row.get("location"),
        when: parse_ts(Some(row.get("when")))?,
        slots_available: non_negative(row.get("slots_available")),
        is_premium: row.get::<i64, _>("is_premium") != 0,
    })
}

#[async_trait]
impl AccountBackend for CultpassDb {
    async fn get_user(&self, email: &str) -> Result<UserRecord, BackendError> {
        let row = sqlx::query(
            "SELECT user_id, full_name, email, is_blocked, created_at FROM users
             WHERE lower(email) = lower(?)",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| BackendError::NotFound(format!("user with email {email}")))?;

        Ok(UserRecord {
            user_id: row.get("user_id"),
            full_name: row.get("full_name"),
            email: row.get("email"),
            is_blocked: row.get::<i64, _>("is_blocked") != 0,
            created_at: parse_ts(row.get("created_at")),
        })
    }

    async fn get_subscription(&self, user_id: &str) -> Result<SubscriptionRecord, BackendError> {
        let row = sqlx::query(
            "SELECT subscription_id, user_id, status, tier, monthly_quota, started_at, ended_at
             FROM subscriptions WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| BackendError::NotFound(format!("subscription for user {user_id}")))?;

        Ok(SubscriptionRecord {
            subscription_id: row.get("subscription_id"),
            user_id: row.get("user_id"),
            status: row.get("status"),
            tier: row.get("tier"),
            monthly_quota: non_negative(row.get("monthly_quota")),
            started_at: parse_ts(row.get("started_at")),
            ended_at: parse_ts(row.get("ended_at")),
        })
    }

    async fn get_reservations(
        &self,
        user_id: &str,
    ) -> Result<Vec<ReservationRecord>, BackendError> {
        let rows = sqlx::query(
            "SELECT r.reservation_id, r.experience_id, r.status, r.created_at,
                    e.title, e.location, e.\"when\" AS experience_when
             FROM reservations r
             LEFT JOIN experiences e ON e.experience_id = r.experience_id
             WHERE r.user_id = ?
             ORDER BY r.created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ReservationRecord {
                reservation_id: row.get("reservation_id"),
                experience_id: row.get("experience_id"),
                experience_title: row
                    .get::<Option<String>, _>("title")
                    .unwrap_or_else(|| "Unknown".to_string()),
                experience_location: row
                    .get::<Option<String>, _>("location")
                    .unwrap_or_else(|| "Unknown".to_string()),
                experience_when: parse_ts(row.get("experience_when")),
                status: row.get("status"),
                created_at: parse_ts(row.get("created_at")),
            })
            .collect())
    }
}

#[async_trait]
impl ExperienceBackend for CultpassDb {
    async fn list_available(
        &self,
        filters: &ExperienceFilters,
    ) -> Result<Vec<ExperienceRecord>, BackendError> {
        let rows = sqlx::query(
            "SELECT experience_id, title, description, location, \"when\", slots_available, is_premium
             FROM experiences WHERE slots_available > 0",
        )
        .fetch_all(&self.pool)
        .await?;

        let now = Utc::now();
        let mut found: Vec<ExperienceRecord> = rows
            .iter()
            .filter_map(experience_from_row)
            .filter(|e| filters.admits(e, now))
            .collect();
        found.sort_by_key(|e| e.when);
        Ok(found)
    }

    async fn get_experience(&self, experience_id: &str) -> Result<ExperienceRecord, BackendError> {
        let row = sqlx::query(
            "SELECT experience_id, title, description, location, \"when\", slots_available, is_premium
             FROM experiences WHERE experience_id = ?",
        )
        .bind(experience_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref()
            .and_then(experience_from_row)
            .ok_or_else(|| BackendError::NotFound(format!("experience {experience_id}")))
    }
}
