//! services/channel_dispatcher.rs
//! Routes a normalized send request to the provider of its channel.

use std::sync::Arc;

use async_trait::async_trait;

use crate::models::dispatch_model::{DispatchError, ProviderRequest, SendRequest, SenderIdentity};
use crate::models::message_model::Platform;

/// One outbound transport. Implementations keep no per-call state.
#[async_trait]
pub trait ChannelProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns the provider's id for the sent message.
    async fn send(&self, request: ProviderRequest<'_>) -> Result<String, DispatchError>;
}

#[derive(Clone)]
struct ReminderRoute {
    chat_id: String,
    provider: Arc<dyn ChannelProvider>,
}

/// Stateless apart from its provider handles, so one instance serves concurrent deliveries.
#[derive(Clone, Default)]
pub struct ChannelDispatcher {
    email: Option<Arc<dyn ChannelProvider>>,
    sms: Option<Arc<dyn ChannelProvider>>,
    whatsapp: Option<Arc<dyn ChannelProvider>>,
    reminder: Option<ReminderRoute>,
}

impl ChannelDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_email(mut self, provider: Arc<dyn ChannelProvider>) -> Self {
        self.email = Some(provider);
        self
    }

    pub fn with_sms(mut self, provider: Arc<dyn ChannelProvider>) -> Self {
        self.sms = Some(provider);
        self
    }

    pub fn with_whatsapp(mut self, provider: Arc<dyn ChannelProvider>) -> Self {
        self.whatsapp = Some(provider);
        self
    }

    /// Reminders always go to `chat_id`, whoever scheduled them.
    pub fn with_reminder(mut self, chat_id: &str, provider: Arc<dyn ChannelProvider>) -> Self {
        self.reminder = Some(ReminderRoute {
            chat_id: chat_id.to_string(),
            provider,
        });
        self
    }

    pub async fn dispatch(&self, req: &SendRequest) -> Result<String, DispatchError> {
        let destination = req.platform.validate_recipient(req.recipient.as_deref())?;

        let (provider, destination, sender) = match req.platform {
            Platform::Email => {
                let sender = delegated_sender(req.sender.as_ref())?;
                let provider = route(
                    &self.email,
                    "Email not configured (missing GOOGLE_CLIENT_ID or GOOGLE_CLIENT_SECRET)",
                )?;
                (provider, require_destination(destination)?, Some(sender))
            }
            Platform::Sms => {
                let provider = route(
                    &self.sms,
                    "SMS not configured (missing TWILIO_ACCOUNT_SID, TWILIO_AUTH_TOKEN or TWILIO_SMS_PHONE)",
                )?;
                (provider, require_destination(destination)?, req.sender.as_ref())
            }
            Platform::WhatsApp => {
                let provider = route(
                    &self.whatsapp,
                    "WhatsApp not configured (missing TWILIO_ACCOUNT_SID, TWILIO_AUTH_TOKEN or TWILIO_WHATSAPP_PHONE)",
                )?;
                (provider, require_destination(destination)?, req.sender.as_ref())
            }
            Platform::Telegram => {
                let reminder = self.reminder.as_ref().ok_or_else(|| {
                    DispatchError::Configuration(
                        "Telegram not configured (missing TELEGRAM_BOT_TOKEN or TELEGRAM_ADMIN_CHAT_ID)"
                            .to_string(),
                    )
                })?;
                (
                    &reminder.provider,
                    reminder.chat_id.clone(),
                    req.sender.as_ref(),
                )
            }
        };

        log::info!(
            "(dispatch) -> Sending via {} ({})",
            req.platform,
            provider.name()
        );

        provider
            .send(ProviderRequest {
                destination: &destination,
                subject: req.subject.as_deref(),
                content: &req.content,
                sender,
            })
            .await
    }
}

fn route<'a>(
    slot: &'a Option<Arc<dyn ChannelProvider>>,
    missing: &str,
) -> Result<&'a Arc<dyn ChannelProvider>, DispatchError> {
    slot.as_ref()
        .ok_or_else(|| DispatchError::Configuration(missing.to_string()))
}

fn require_destination(destination: Option<String>) -> Result<String, DispatchError> {
    destination.ok_or_else(|| DispatchError::Validation("recipient is required".to_string()))
}

/// Email goes out as the sender, so it needs an address and a delegated credential.
fn delegated_sender(sender: Option<&SenderIdentity>) -> Result<&SenderIdentity, DispatchError> {
    let sender = sender.ok_or_else(|| {
        DispatchError::Identity("No sender specified for email delivery".to_string())
    })?;

    if sender.email.is_none() {
        return Err(DispatchError::Identity(
            "Sender has no email address".to_string(),
        ));
    }
    if sender.delegation_credential.is_none() {
        return Err(DispatchError::Identity(
            "Sender not linked with Google (missing refresh token)".to_string(),
        ));
    }
    Ok(sender)
}
