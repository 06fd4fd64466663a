//! models/dispatch_model.rs
//! Normalized send request, provider contract payload and the classified delivery error.

use crate::models::message_model::{Platform, ScheduledMessage};

/// Why a delivery attempt failed. `Display` is what ends up in `lastError`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Sender identity error: {0}")]
    Identity(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Provider error: {0}")]
    Provider(String),
}

/// Who a message is sent on behalf of.
#[derive(Debug, Clone, PartialEq)]
pub struct SenderIdentity {
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub delegation_credential: Option<String>,
}

/// Everything the dispatcher needs, detached from the stored record.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub platform: Platform,
    pub recipient: Option<String>,
    pub subject: Option<String>,
    pub content: String,
    pub sender: Option<SenderIdentity>,
}

impl SendRequest {
    pub fn from_message(message: &ScheduledMessage, sender: Option<SenderIdentity>) -> Self {
        SendRequest {
            platform: message.platform,
            recipient: message.recipient.clone(),
            subject: message.subject.clone(),
            content: message.content.clone(),
            sender,
        }
    }
}

/// What a provider receives once the dispatcher has validated and routed the request.
#[derive(Debug, Clone, Copy)]
pub struct ProviderRequest<'a> {
    pub destination: &'a str,
    pub subject: Option<&'a str>,
    pub content: &'a str,
    pub sender: Option<&'a SenderIdentity>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent { provider_message_id: String },
    Failed { error: String },
}
