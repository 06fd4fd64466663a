//! models/message_model.rs
//! Scheduled message record, its channel and its status state machine.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::dispatch_model::DispatchError;
use crate::models::log_model::DeliveryLogEntry;

/// E.164, with the leading '+' optional.
static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[1-9]\d{1,14}$").expect("phone regex must compile"));

const WHATSAPP_PREFIX: &str = "whatsapp:";

/// Delivery channel of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Email,
    Sms,
    #[serde(rename = "whatsapp")]
    WhatsApp,
    /// Personal reminder: goes to the operator-configured Telegram chat, never to a recipient.
    Telegram,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Email => "email",
            Platform::Sms => "sms",
            Platform::WhatsApp => "whatsapp",
            Platform::Telegram => "telegram",
        }
    }

    pub fn requires_recipient(&self) -> bool {
        !matches!(self, Platform::Telegram)
    }

    /// Validates `recipient` for this channel and returns the destination to hand to the
    /// provider. The reminder channel has no destination of its own and ignores `recipient`.
    pub fn validate_recipient(&self, recipient: Option<&str>) -> Result<Option<String>, DispatchError> {
        if !self.requires_recipient() {
            return Ok(None);
        }

        let recipient = recipient.map(str::trim).unwrap_or_default();
        if recipient.is_empty() {
            return Err(DispatchError::Validation(
                "recipient is required for email, sms and whatsapp".to_string(),
            ));
        }

        match self {
            Platform::Email => {
                recipient
                    .parse::<lettre::Address>()
                    .map_err(|_| DispatchError::Validation("Invalid email recipient".to_string()))?;
                Ok(Some(recipient.to_string()))
            }
            Platform::Sms => {
                check_phone(recipient)?;
                Ok(Some(recipient.to_string()))
            }
            Platform::WhatsApp => {
                let number = recipient.strip_prefix(WHATSAPP_PREFIX).unwrap_or(recipient);
                check_phone(number)?;
                Ok(Some(format!("{WHATSAPP_PREFIX}{number}")))
            }
            Platform::Telegram => Ok(None),
        }
    }
}

fn check_phone(number: &str) -> Result<(), DispatchError> {
    if PHONE_RE.is_match(number) {
        Ok(())
    } else {
        Err(DispatchError::Validation(
            "Invalid phone number format (E.164 required)".to_string(),
        ))
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Platform::Email),
            "sms" => Ok(Platform::Sms),
            "whatsapp" => Ok(Platform::WhatsApp),
            "telegram" => Ok(Platform::Telegram),
            other => Err(DispatchError::UnsupportedPlatform(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Processing,
    Sent,
    Failed,
    Cancelled,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Processing => "processing",
            MessageStatus::Sent => "sent",
            MessageStatus::Failed => "failed",
            MessageStatus::Cancelled => "cancelled",
        }
    }

    /// The only legal edges. `Pending -> Pending` is an edit.
    pub fn can_transition_to(&self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Pending, Pending)
                | (Processing, Sent)
                | (Processing, Failed)
        )
    }

    pub fn transition(self, next: MessageStatus) -> Result<MessageStatus, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MessageStatus::Pending),
            "processing" => Ok(MessageStatus::Processing),
            "sent" => Ok(MessageStatus::Sent),
            "failed" => Ok(MessageStatus::Failed),
            "cancelled" => Ok(MessageStatus::Cancelled),
            other => Err(anyhow::anyhow!("Unknown message status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal status transition from {from} to {to}")]
pub struct TransitionError {
    pub from: MessageStatus,
    pub to: MessageStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledMessage {
    pub id: String,
    pub created_by: String,
    pub sender_email: Option<String>,
    pub recipient: Option<String>,
    pub platform: Platform,
    pub subject: Option<String>,
    pub content: String,
    pub scheduled_time: DateTime<Utc>,
    pub status: MessageStatus,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub meta: Option<serde_json::Value>,
    pub logs: Vec<DeliveryLogEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledMessage {
    /// A fresh `pending` record. Field validation is the caller's job.
    pub fn new(
        created_by: &str,
        platform: Platform,
        recipient: Option<String>,
        content: String,
        scheduled_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        ScheduledMessage {
            id: uuid::Uuid::new_v4().to_string(),
            created_by: created_by.to_string(),
            sender_email: None,
            recipient,
            platform,
            subject: None,
            content,
            scheduled_time,
            status: MessageStatus::Pending,
            attempts: 0,
            last_error: None,
            meta: None,
            logs: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == MessageStatus::Pending && self.scheduled_time <= now
    }

    /// Picked up by the scheduler: `pending -> processing`, one more attempt.
    pub fn mark_processing(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.status = self.status.transition(MessageStatus::Processing)?;
        self.attempts += 1;
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_sent(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.status = self.status.transition(MessageStatus::Sent)?;
        self.last_error = None;
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_failed(&mut self, now: DateTime<Utc>, error: &str) -> Result<(), TransitionError> {
        self.status = self.status.transition(MessageStatus::Failed)?;
        self.last_error = Some(error.to_string());
        self.updated_at = now;
        Ok(())
    }

    /// Only legal while still `pending`.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.status = self.status.transition(MessageStatus::Cancelled)?;
        self.updated_at = now;
        Ok(())
    }

    /// Edits keep the message `pending`; anything else is rejected.
    pub fn ensure_editable(&self) -> Result<(), TransitionError> {
        self.status.transition(MessageStatus::Pending).map(|_| ())
    }

    pub(crate) fn push_log(&mut self, entry: DeliveryLogEntry) {
        self.logs.push(entry);
    }
}

/// Body of `POST /api/messages`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageRequest {
    pub platform: Option<String>,
    pub recipient: Option<String>,
    pub subject: Option<String>,
    pub content: Option<String>,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub meta: Option<serde_json::Value>,
}

/// Body of `PUT /api/messages/{id}`; absent fields stay untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMessageRequest {
    pub platform: Option<String>,
    pub recipient: Option<String>,
    pub subject: Option<String>,
    pub content: Option<String>,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub meta: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListMessagesResponse {
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub messages: Vec<ScheduledMessage>,
}
