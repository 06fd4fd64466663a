//! services/message_store.rs
//! Persistence of scheduled messages and their audit log (SQLite through sqlx).

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use uuid::Uuid;

use crate::models::log_model::{DeliveryLogEntry, LogStatus, MessageLogRecord};
use crate::models::message_model::{MessageStatus, ScheduledMessage};

/// What the scheduler and the delivery log need from storage.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// `status = pending AND scheduled_time <= now`, in no particular order.
    async fn find_due_messages(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledMessage>>;

    /// Messages still `processing` whose last update is at or before `before`.
    async fn find_stale_processing(&self, before: DateTime<Utc>) -> Result<Vec<ScheduledMessage>>;

    /// Atomically moves a due message from `pending` to the status already applied to `claimed`,
    /// counting one attempt. Returns the stored row as claimed, or `None` when the message is
    /// no longer pending or no longer due (cancelled, edited or picked up meanwhile).
    async fn claim(
        &self,
        claimed: &ScheduledMessage,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduledMessage>>;

    /// Full-row write, applied only while the stored status is still `expected`.
    /// `Ok(false)` means the row is gone or moved on; nothing was written.
    async fn save(&self, message: &ScheduledMessage, expected: MessageStatus) -> Result<bool>;

    async fn create_log_entry(
        &self,
        message_id: &str,
        status: LogStatus,
        error: Option<&str>,
        timestamp: DateTime<Utc>,
    ) -> Result<MessageLogRecord>;

    /// Newest first.
    async fn logs_for_message(&self, message_id: &str) -> Result<Vec<MessageLogRecord>>;

    /// Newest first, across every message.
    async fn recent_logs(&self, limit: u64) -> Result<Vec<MessageLogRecord>>;
}

/// Fixed-width UTC text, so comparing strings in SQL compares instants.
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .with_context(|| format!("Invalid timestamp in database: '{raw}'"))
}

const MESSAGE_COLUMNS: &str = "id, created_by, sender_email, recipient, platform, subject, content, \
     scheduled_time, status, attempts, last_error, meta, logs, created_at, updated_at";

#[derive(Clone, Debug)]
pub struct SqliteMessageStore {
    db_pool: Pool<Sqlite>,
}

impl SqliteMessageStore {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        SqliteMessageStore { db_pool }
    }

    /// Runs the embedded sqlx migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.db_pool)
            .await
            .context("Failed to run scheduled message migrations")?;
        Ok(())
    }

    pub async fn insert(&self, message: &ScheduledMessage) -> Result<()> {
        let meta = encode_meta(message)?;
        let logs = serde_json::to_string(&message.logs).context("Failed to encode logs")?;

        sqlx::query(&format!(
            "INSERT INTO scheduled_messages ({MESSAGE_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
        ))
        .bind(&message.id)
        .bind(&message.created_by)
        .bind(&message.sender_email)
        .bind(&message.recipient)
        .bind(message.platform.as_str())
        .bind(&message.subject)
        .bind(&message.content)
        .bind(format_ts(message.scheduled_time))
        .bind(message.status.as_str())
        .bind(message.attempts)
        .bind(&message.last_error)
        .bind(meta)
        .bind(logs)
        .bind(format_ts(message.created_at))
        .bind(format_ts(message.updated_at))
        .execute(&self.db_pool)
        .await
        .context("Failed to insert scheduled message")?;

        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<ScheduledMessage>> {
        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM scheduled_messages WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.db_pool)
        .await
        .context("Failed to load scheduled message")?;

        row.as_ref().map(message_from_row).transpose()
    }

    /// One page of a user's messages, latest `scheduled_time` first.
    pub async fn list_for_owner(
        &self,
        owner: &str,
        status: Option<MessageStatus>,
        page: u64,
        limit: u64,
    ) -> Result<(u64, Vec<ScheduledMessage>)> {
        let offset = (page.max(1) - 1) * limit;
        let status_str = status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM scheduled_messages \
             WHERE created_by = ?1 AND (?2 IS NULL OR status = ?2)",
        )
        .bind(owner)
        .bind(status_str)
        .fetch_one(&self.db_pool)
        .await
        .context("Failed to count scheduled messages")?;

        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM scheduled_messages \
             WHERE created_by = ?1 AND (?2 IS NULL OR status = ?2) \
             ORDER BY scheduled_time DESC LIMIT ?3 OFFSET ?4"
        ))
        .bind(owner)
        .bind(status_str)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.db_pool)
        .await
        .context("Failed to list scheduled messages")?;

        let messages = rows
            .iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>>>()?;
        Ok((total as u64, messages))
    }

    async fn fetch_by_status(
        &self,
        status: MessageStatus,
        time_column: &str,
        until: DateTime<Utc>,
    ) -> Result<Vec<ScheduledMessage>> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM scheduled_messages \
             WHERE status = ?1 AND {time_column} <= ?2"
        ))
        .bind(status.as_str())
        .bind(format_ts(until))
        .fetch_all(&self.db_pool)
        .await
        .with_context(|| format!("Failed to query {status} messages"))?;

        rows.iter().map(message_from_row).collect()
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn find_due_messages(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledMessage>> {
        self.fetch_by_status(MessageStatus::Pending, "scheduled_time", now)
            .await
    }

    async fn find_stale_processing(&self, before: DateTime<Utc>) -> Result<Vec<ScheduledMessage>> {
        self.fetch_by_status(MessageStatus::Processing, "updated_at", before)
            .await
    }

    async fn claim(
        &self,
        claimed: &ScheduledMessage,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduledMessage>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE scheduled_messages
            SET status = ?2, attempts = attempts + 1, updated_at = ?3
            WHERE id = ?1 AND status = ?4 AND scheduled_time <= ?5
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(&claimed.id)
        .bind(claimed.status.as_str())
        .bind(format_ts(claimed.updated_at))
        .bind(MessageStatus::Pending.as_str())
        .bind(format_ts(now))
        .fetch_optional(&self.db_pool)
        .await
        .context("Failed to claim scheduled message")?;

        row.as_ref().map(message_from_row).transpose()
    }

    async fn save(&self, message: &ScheduledMessage, expected: MessageStatus) -> Result<bool> {
        let meta = encode_meta(message)?;
        let logs = serde_json::to_string(&message.logs).context("Failed to encode logs")?;

        let result = sqlx::query(
            r#"
            UPDATE scheduled_messages
            SET
                sender_email = ?2,
                recipient = ?3,
                platform = ?4,
                subject = ?5,
                content = ?6,
                scheduled_time = ?7,
                status = ?8,
                attempts = ?9,
                last_error = ?10,
                meta = ?11,
                logs = ?12,
                updated_at = ?13
            WHERE id = ?1 AND status = ?14
            "#,
        )
        .bind(&message.id)
        .bind(&message.sender_email)
        .bind(&message.recipient)
        .bind(message.platform.as_str())
        .bind(&message.subject)
        .bind(&message.content)
        .bind(format_ts(message.scheduled_time))
        .bind(message.status.as_str())
        .bind(message.attempts)
        .bind(&message.last_error)
        .bind(meta)
        .bind(logs)
        .bind(format_ts(message.updated_at))
        .bind(expected.as_str())
        .execute(&self.db_pool)
        .await
        .context("Failed to update scheduled message")?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_log_entry(
        &self,
        message_id: &str,
        status: LogStatus,
        error: Option<&str>,
        timestamp: DateTime<Utc>,
    ) -> Result<MessageLogRecord> {
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO message_logs (id, message_id, status, error, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&id)
        .bind(message_id)
        .bind(status.as_str())
        .bind(error)
        .bind(format_ts(timestamp))
        .execute(&self.db_pool)
        .await
        .context("Failed to insert message log")?;

        Ok(MessageLogRecord {
            id,
            message_id: message_id.to_string(),
            status,
            error: error.map(str::to_string),
            timestamp,
        })
    }

    async fn logs_for_message(&self, message_id: &str) -> Result<Vec<MessageLogRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, message_id, status, error, timestamp
            FROM message_logs
            WHERE message_id = ?1
            ORDER BY timestamp DESC
            "#,
        )
        .bind(message_id)
        .fetch_all(&self.db_pool)
        .await
        .context("Failed to load message logs")?;

        rows.iter().map(log_from_row).collect()
    }

    async fn recent_logs(&self, limit: u64) -> Result<Vec<MessageLogRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, message_id, status, error, timestamp
            FROM message_logs
            ORDER BY timestamp DESC
            LIMIT ?1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.db_pool)
        .await
        .context("Failed to load recent message logs")?;

        rows.iter().map(log_from_row).collect()
    }
}

fn encode_meta(message: &ScheduledMessage) -> Result<Option<String>> {
    message
        .meta
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .context("Failed to encode meta")
}

fn message_from_row(row: &SqliteRow) -> Result<ScheduledMessage> {
    let platform: String = row.try_get("platform")?;
    let status: String = row.try_get("status")?;
    let meta: Option<String> = row.try_get("meta")?;
    let logs: String = row.try_get("logs")?;

    Ok(ScheduledMessage {
        id: row.try_get("id")?,
        created_by: row.try_get("created_by")?,
        sender_email: row.try_get("sender_email")?,
        recipient: row.try_get("recipient")?,
        platform: platform.parse()?,
        subject: row.try_get("subject")?,
        content: row.try_get("content")?,
        scheduled_time: parse_ts(&row.try_get::<String, _>("scheduled_time")?)?,
        status: status.parse()?,
        attempts: row.try_get("attempts")?,
        last_error: row.try_get("last_error")?,
        meta: meta
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .context("Invalid meta JSON in database")?,
        logs: serde_json::from_str::<Vec<DeliveryLogEntry>>(&logs)
            .context("Invalid logs JSON in database")?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_ts(&row.try_get::<String, _>("updated_at")?)?,
    })
}

fn log_from_row(row: &SqliteRow) -> Result<MessageLogRecord> {
    let status: String = row.try_get("status")?;

    Ok(MessageLogRecord {
        id: row.try_get("id")?,
        message_id: row.try_get("message_id")?,
        status: status.parse()?,
        error: row.try_get("error")?,
        timestamp: parse_ts(&row.try_get::<String, _>("timestamp")?)?,
    })
}
