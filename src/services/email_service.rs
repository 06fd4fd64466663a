//! services/email_service.rs
//! Email delivery through the Gmail API, on behalf of the scheduling user.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use lettre::{
    message::{header::ContentType, Mailbox},
    Message,
};
use reqwest::Client;
use serde::Deserialize;

use crate::config::app_config::GoogleConfig;
use crate::models::dispatch_model::{DispatchError, ProviderRequest};
use crate::services::channel_dispatcher::ChannelProvider;

const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GMAIL_SEND_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me/messages/send";
const DEFAULT_SUBJECT: &str = "Message from EchoDrop";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct GmailSendResponse {
    id: String,
}

#[derive(Clone)]
pub struct EmailService {
    http_client: Client,
    client_id: String,
    client_secret: String,
}

impl EmailService {
    pub fn new(http_client: Client, config: &GoogleConfig) -> Self {
        Self {
            http_client,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        }
    }

    /// Trades the sender's refresh token for a short-lived access token.
    async fn access_token(&self, refresh_token: &str) -> Result<String, DispatchError> {
        let resp = self
            .http_client
            .post(GOOGLE_TOKEN_URL)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| DispatchError::Provider(format!("Google token request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body_txt = resp.text().await.unwrap_or_default();
            return Err(DispatchError::Identity(format!(
                "Delegated credential rejected ({status}): {body_txt}"
            )));
        }

        let token = resp
            .json::<TokenResponse>()
            .await
            .map_err(|e| DispatchError::Identity(format!("Invalid Google token response: {e}")))?;
        Ok(token.access_token)
    }
}

/// RFC 5322 message, base64url without padding as the Gmail API wants it.
pub(crate) fn build_raw_message(
    from: &str,
    to: &str,
    subject: Option<&str>,
    content: &str,
) -> Result<String, DispatchError> {
    let from: Mailbox = from
        .parse()
        .map_err(|e| DispatchError::Identity(format!("Invalid sender address '{from}': {e}")))?;
    let to: Mailbox = to
        .parse()
        .map_err(|e| DispatchError::Validation(format!("Invalid email recipient '{to}': {e}")))?;

    let message = Message::builder()
        .from(from)
        .to(to)
        .subject(subject.filter(|s| !s.trim().is_empty()).unwrap_or(DEFAULT_SUBJECT))
        .header(ContentType::TEXT_PLAIN)
        .body(content.to_string())
        .map_err(|e| DispatchError::Validation(format!("Could not build email: {e}")))?;

    Ok(URL_SAFE_NO_PAD.encode(message.formatted()))
}

#[async_trait]
impl ChannelProvider for EmailService {
    fn name(&self) -> &'static str {
        "gmail"
    }

    async fn send(&self, request: ProviderRequest<'_>) -> Result<String, DispatchError> {
        let sender = request
            .sender
            .ok_or_else(|| DispatchError::Identity("No sender specified".to_string()))?;
        let (Some(from), Some(refresh_token)) =
            (sender.email.as_deref(), sender.delegation_credential.as_deref())
        else {
            return Err(DispatchError::Identity(
                "Sender not linked with Google (missing refresh token)".to_string(),
            ));
        };

        let raw = build_raw_message(from, request.destination, request.subject, request.content)?;
        let access_token = self.access_token(refresh_token).await?;

        let resp = self
            .http_client
            .post(GMAIL_SEND_URL)
            .bearer_auth(access_token)
            .json(&serde_json::json!({ "raw": raw }))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| DispatchError::Provider(format!("Gmail send failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body_txt = resp.text().await.unwrap_or_default();
            log::error!(
                "(send_email) Gmail rejected message from {} (user {}): {}",
                from,
                sender.user_id.as_deref().unwrap_or("-"),
                status
            );
            return Err(DispatchError::Provider(format!(
                "Gmail API error {status}: {body_txt}"
            )));
        }

        let sent = resp
            .json::<GmailSendResponse>()
            .await
            .map_err(|e| DispatchError::Provider(format!("Invalid Gmail response: {e}")))?;

        log::info!("(send_email) Email sent by {} Message ID: {}", from, sent.id);
        Ok(sent.id)
    }
}
