//! services/message_service.rs
//! Owner-facing operations on scheduled messages: create, read, edit and cancel while pending.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::log_model::MessageLogRecord;
use crate::models::message_model::{
    CreateMessageRequest, ListMessagesResponse, MessageStatus, Platform, ScheduledMessage,
    TransitionError, UpdateMessageRequest,
};
use crate::services::delivery_log::DeliveryLog;
use crate::services::message_store::{MessageStore, SqliteMessageStore};
use crate::services::user_directory::UserDirectory;

pub const DEFAULT_PAGE_SIZE: u64 = 20;
const MAX_PAGE_SIZE: u64 = 100;

#[derive(Debug, thiserror::Error)]
pub enum MessageServiceError {
    #[error("Message not found")]
    NotFound,

    #[error("Not authorized")]
    Forbidden,

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    InvalidState(#[from] TransitionError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type ServiceResult<T> = Result<T, MessageServiceError>;

#[derive(Clone)]
pub struct MessageService {
    store: SqliteMessageStore,
    users: Arc<dyn UserDirectory>,
    delivery_log: DeliveryLog,
    admins: Arc<HashSet<String>>,
}

impl MessageService {
    pub fn new(store: SqliteMessageStore, users: Arc<dyn UserDirectory>) -> Self {
        Self {
            delivery_log: DeliveryLog::new(Arc::new(store.clone())),
            store,
            users,
            admins: Arc::new(HashSet::new()),
        }
    }

    /// Users allowed to read the delivery log of every message.
    pub fn with_admins<I>(mut self, admins: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        self.admins = Arc::new(admins.into_iter().collect());
        self
    }

    pub async fn create(
        &self,
        owner: &str,
        req: CreateMessageRequest,
        now: DateTime<Utc>,
    ) -> ServiceResult<ScheduledMessage> {
        let (Some(platform), Some(content), Some(scheduled_time)) = (
            req.platform.as_deref(),
            req.content.filter(|c| !c.trim().is_empty()),
            req.scheduled_time,
        ) else {
            return Err(MessageServiceError::Validation(
                "platform, content and scheduledTime are required".to_string(),
            ));
        };

        let platform = parse_platform(platform)?;
        let recipient = checked_recipient(platform, req.recipient.as_deref())?;
        check_future(scheduled_time, now)?;

        let mut message = ScheduledMessage::new(owner, platform, recipient, content, scheduled_time, now);
        message.subject = req.subject;
        message.meta = req.meta;
        message.sender_email = self.users.get_user_by_id(owner).await?.map(|u| u.email);

        self.store.insert(&message).await?;
        log::info!(
            "(create_message) Message {} scheduled via {} for {}",
            message.id,
            message.platform,
            message.scheduled_time
        );
        Ok(message)
    }

    pub async fn list(
        &self,
        owner: &str,
        status: Option<&str>,
        page: Option<u64>,
        limit: Option<u64>,
    ) -> ServiceResult<ListMessagesResponse> {
        let status = status
            .map(|s| {
                s.parse::<MessageStatus>()
                    .map_err(|e| MessageServiceError::Validation(e.to_string()))
            })
            .transpose()?;
        let page = page.unwrap_or(1).max(1);
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

        let (total, messages) = self.store.list_for_owner(owner, status, page, limit).await?;
        Ok(ListMessagesResponse {
            total,
            page,
            limit,
            messages,
        })
    }

    pub async fn get(&self, owner: &str, id: &str) -> ServiceResult<ScheduledMessage> {
        let message = self
            .store
            .get(id)
            .await?
            .ok_or(MessageServiceError::NotFound)?;

        if message.created_by != owner {
            return Err(MessageServiceError::Forbidden);
        }
        Ok(message)
    }

    /// Only while `pending`; absent fields keep their value.
    pub async fn update(
        &self,
        owner: &str,
        id: &str,
        req: UpdateMessageRequest,
        now: DateTime<Utc>,
    ) -> ServiceResult<ScheduledMessage> {
        let mut message = self.get(owner, id).await?;
        message.ensure_editable()?;

        if let Some(platform) = req.platform.as_deref() {
            message.platform = parse_platform(platform)?;
        }
        if let Some(recipient) = req.recipient.filter(|r| !r.trim().is_empty()) {
            message.recipient = Some(recipient);
        }
        if let Some(content) = req.content.filter(|c| !c.trim().is_empty()) {
            message.content = content;
        }
        if req.subject.is_some() {
            message.subject = req.subject;
        }
        if req.meta.is_some() {
            message.meta = req.meta;
        }
        if let Some(scheduled_time) = req.scheduled_time {
            check_future(scheduled_time, now)?;
            message.scheduled_time = scheduled_time;
        }

        // platform and recipient may have changed independently
        message.recipient = checked_recipient(message.platform, message.recipient.as_deref())?;
        message.updated_at = now;

        self.save_pending(&message, MessageStatus::Pending).await?;
        log::info!("(update_message) Message {} updated", message.id);
        Ok(message)
    }

    /// Only while `pending`.
    pub async fn cancel(
        &self,
        owner: &str,
        id: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<ScheduledMessage> {
        let mut message = self.get(owner, id).await?;
        message.cancel(now)?;

        self.save_pending(&message, MessageStatus::Cancelled).await?;
        log::info!("(cancel_message) Message {} cancelled", message.id);
        Ok(message)
    }

    /// Writes an edit or cancel only if the stored row is still `pending`. A row the scheduler
    /// picked up in the meantime reports its current status.
    async fn save_pending(&self, message: &ScheduledMessage, to: MessageStatus) -> ServiceResult<()> {
        if self.store.save(message, MessageStatus::Pending).await? {
            return Ok(());
        }

        let current = self
            .store
            .get(&message.id)
            .await?
            .ok_or(MessageServiceError::NotFound)?;
        log::warn!(
            "(save_pending) Message {} moved to {} before the change was saved",
            message.id,
            current.status
        );
        Err(TransitionError {
            from: current.status,
            to,
        }
        .into())
    }

    pub async fn logs(&self, owner: &str, id: &str) -> ServiceResult<Vec<MessageLogRecord>> {
        let message = self.get(owner, id).await?;
        Ok(self.delivery_log.for_message(&message.id).await?)
    }

    /// Global view; admins only.
    pub async fn recent_logs(
        &self,
        caller: &str,
        limit: u64,
    ) -> ServiceResult<Vec<MessageLogRecord>> {
        if !self.admins.contains(caller) {
            return Err(MessageServiceError::Forbidden);
        }
        Ok(self.delivery_log.recent(limit.clamp(1, MAX_PAGE_SIZE)).await?)
    }
}

fn parse_platform(raw: &str) -> ServiceResult<Platform> {
    raw.parse::<Platform>()
        .map_err(|e| MessageServiceError::Validation(e.to_string()))
}

/// Stored as given for delivery channels, dropped for reminders.
fn checked_recipient(platform: Platform, recipient: Option<&str>) -> ServiceResult<Option<String>> {
    platform
        .validate_recipient(recipient)
        .map_err(|e| MessageServiceError::Validation(e.to_string()))?;
    Ok(platform
        .requires_recipient()
        .then(|| recipient.map(|r| r.trim().to_string()))
        .flatten())
}

fn check_future(scheduled_time: DateTime<Utc>, now: DateTime<Utc>) -> ServiceResult<()> {
    if scheduled_time <= now {
        return Err(MessageServiceError::Validation(
            "scheduledTime must be in the future".to_string(),
        ));
    }
    Ok(())
}
