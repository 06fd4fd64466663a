//! services/delivery_executor.rs
//! Turns one due message into a delivery outcome. Never returns an error.

use std::sync::Arc;

use crate::models::dispatch_model::{DeliveryOutcome, DispatchError, SendRequest, SenderIdentity};
use crate::models::message_model::{Platform, ScheduledMessage};
use crate::services::channel_dispatcher::ChannelDispatcher;
use crate::services::user_directory::UserDirectory;

#[derive(Clone)]
pub struct DeliveryExecutor {
    users: Arc<dyn UserDirectory>,
    dispatcher: ChannelDispatcher,
}

impl DeliveryExecutor {
    pub fn new(users: Arc<dyn UserDirectory>, dispatcher: ChannelDispatcher) -> Self {
        Self { users, dispatcher }
    }

    pub async fn execute(&self, message: &ScheduledMessage) -> DeliveryOutcome {
        match self.deliver(message).await {
            Ok(provider_message_id) => DeliveryOutcome::Sent {
                provider_message_id,
            },
            Err(e) => DeliveryOutcome::Failed {
                error: e.to_string(),
            },
        }
    }

    async fn deliver(&self, message: &ScheduledMessage) -> Result<String, DispatchError> {
        let sender = self.resolve_sender(message).await?;
        let request = SendRequest::from_message(message, sender);
        self.dispatcher.dispatch(&request).await
    }

    /// Email sends as the owning user and needs their delegated credential, so it always
    /// looks the user up. Other channels only carry the sender for the record and take the
    /// cached address when there is one.
    async fn resolve_sender(
        &self,
        message: &ScheduledMessage,
    ) -> Result<Option<SenderIdentity>, DispatchError> {
        let required = message.platform == Platform::Email;

        if !required {
            if let Some(email) = &message.sender_email {
                return Ok(Some(SenderIdentity {
                    user_id: Some(message.created_by.clone()),
                    email: Some(email.clone()),
                    delegation_credential: None,
                }));
            }
        }

        let user = match self.users.get_user_by_id(&message.created_by).await {
            Ok(user) => user,
            Err(e) if required => {
                return Err(DispatchError::Identity(format!("Sender lookup failed: {e:#}")));
            }
            Err(e) => {
                log::warn!(
                    "(resolve_sender) Could not look up user {} for message {}: {:#}",
                    message.created_by,
                    message.id,
                    e
                );
                None
            }
        };

        match user {
            Some(user) => Ok(Some(SenderIdentity {
                user_id: Some(user.id),
                email: Some(user.email),
                delegation_credential: user.delegation_credential,
            })),
            None if required => Err(DispatchError::Identity("Sender user not found".to_string())),
            None => Ok(None),
        }
    }
}
