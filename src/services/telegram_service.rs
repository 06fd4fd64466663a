//! services/telegram_service.rs
//! Personal reminders through the Telegram Bot API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::config::app_config::TelegramConfig;
use crate::models::dispatch_model::{DispatchError, ProviderRequest};
use crate::services::channel_dispatcher::ChannelProvider;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const DEFAULT_TEXT: &str = "Message from EchoDrop (Telegram)";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct TelegramResponse {
    ok: bool,
    description: Option<String>,
    result: Option<TelegramMessage>,
}

#[derive(Deserialize)]
struct TelegramMessage {
    message_id: i64,
}

#[derive(Clone)]
pub struct TelegramService {
    http_client: Client,
    bot_token: String,
}

impl TelegramService {
    pub fn new(http_client: Client, config: &TelegramConfig) -> Self {
        Self {
            http_client,
            bot_token: config.bot_token.clone(),
        }
    }
}

/// Content first, then subject, then a fixed text.
pub(crate) fn reminder_text<'a>(subject: Option<&'a str>, content: &'a str) -> &'a str {
    [Some(content), subject]
        .into_iter()
        .flatten()
        .find(|s| !s.trim().is_empty())
        .unwrap_or(DEFAULT_TEXT)
}

#[async_trait]
impl ChannelProvider for TelegramService {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn send(&self, request: ProviderRequest<'_>) -> Result<String, DispatchError> {
        let url = format!("{}/bot{}/sendMessage", TELEGRAM_API_BASE, self.bot_token);
        let text = reminder_text(request.subject, request.content);

        let resp = self
            .http_client
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": request.destination,
                "text": text,
            }))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            // the URL embeds the bot token
            .map_err(|e| DispatchError::Provider(format!("Telegram send failed: {}", e.without_url())))?;

        let status = resp.status();
        let body: TelegramResponse = resp.json().await.map_err(|e| {
            DispatchError::Provider(format!(
                "Invalid Telegram response ({status}): {}",
                e.without_url()
            ))
        })?;

        if !status.is_success() || !body.ok {
            return Err(DispatchError::Provider(format!(
                "Telegram API error {status}: {}",
                body.description.unwrap_or_default()
            )));
        }

        let message_id = body
            .result
            .map(|m| m.message_id.to_string())
            .unwrap_or_default();

        log::info!(
            "(send_telegram) Telegram message sent to chat {}",
            request.destination
        );
        Ok(message_id)
    }
}
