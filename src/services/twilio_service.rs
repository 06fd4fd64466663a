//! services/twilio_service.rs
//! SMS and WhatsApp delivery through the Twilio Messages API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::config::app_config::TwilioConfig;
use crate::models::dispatch_model::{DispatchError, ProviderRequest};
use crate::services::channel_dispatcher::ChannelProvider;

const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct TwilioMessage {
    sid: String,
}

/// One sender number on one Twilio account. SMS and WhatsApp are two instances.
#[derive(Clone)]
pub struct TwilioService {
    http_client: Client,
    account_sid: String,
    auth_token: String,
    from: String,
    label: &'static str,
}

impl TwilioService {
    /// `None` without an SMS sender number.
    pub fn sms(http_client: Client, config: &TwilioConfig) -> Option<Self> {
        let from = config.sms_from.clone()?;
        Some(Self::build(http_client, config, from, "twilio-sms"))
    }

    /// `None` without a WhatsApp sender number.
    pub fn whatsapp(http_client: Client, config: &TwilioConfig) -> Option<Self> {
        let phone = config.whatsapp_from.as_deref()?;
        let phone = phone.strip_prefix("whatsapp:").unwrap_or(phone);
        Some(Self::build(
            http_client,
            config,
            format!("whatsapp:{phone}"),
            "twilio-whatsapp",
        ))
    }

    fn build(http_client: Client, config: &TwilioConfig, from: String, label: &'static str) -> Self {
        Self {
            http_client,
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            from,
            label,
        }
    }
}

#[async_trait]
impl ChannelProvider for TwilioService {
    fn name(&self) -> &'static str {
        self.label
    }

    async fn send(&self, request: ProviderRequest<'_>) -> Result<String, DispatchError> {
        let url = format!(
            "{}/Accounts/{}/Messages.json",
            TWILIO_API_BASE, self.account_sid
        );

        let resp = self
            .http_client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[
                ("To", request.destination),
                ("From", self.from.as_str()),
                ("Body", request.content),
            ])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| DispatchError::Provider(format!("Twilio request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body_txt = resp.text().await.unwrap_or_default();
            // Twilio errors carry a human readable "message"
            let detail = serde_json::from_str::<serde_json::Value>(&body_txt)
                .ok()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
                .unwrap_or(body_txt);
            return Err(DispatchError::Provider(format!(
                "Twilio API error {status}: {detail}"
            )));
        }

        let message = resp
            .json::<TwilioMessage>()
            .await
            .map_err(|e| DispatchError::Provider(format!("Invalid Twilio response: {e}")))?;

        log::info!(
            "(send_twilio) {} sent to {} (sid={})",
            self.label,
            request.destination,
            message.sid
        );
        Ok(message.sid)
    }
}
