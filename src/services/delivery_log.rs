//! services/delivery_log.rs
//! Single writer of the delivery log. Each outcome lands in the message's embedded `logs`
//! and in the `message_logs` audit table; reads come back per message or globally.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, SubsecRound, Utc};

use crate::models::log_model::{DeliveryLogEntry, LogStatus, MessageLogRecord};
use crate::models::message_model::{MessageStatus, ScheduledMessage};
use crate::services::message_store::MessageStore;

#[derive(Clone)]
pub struct DeliveryLog {
    store: Arc<dyn MessageStore>,
}

impl DeliveryLog {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }

    /// Moves a `processing` message to its terminal status and logs it, both views with the
    /// same timestamp. The message row is persisted before the audit row is written, and only
    /// if it is still `processing` in the store.
    pub async fn record_outcome(
        &self,
        message: &mut ScheduledMessage,
        status: LogStatus,
        error: Option<&str>,
        time: DateTime<Utc>,
    ) -> Result<MessageLogRecord> {
        // both views keep what the audit table can store
        let time = time.trunc_subsecs(3);

        match status {
            LogStatus::Sent => message.mark_sent(time)?,
            LogStatus::Failed => message.mark_failed(time, error.unwrap_or("Unknown error"))?,
        }
        let error = message.last_error.clone();

        message.push_log(DeliveryLogEntry {
            time,
            status,
            error: error.clone(),
        });

        let saved = self
            .store
            .save(message, MessageStatus::Processing)
            .await
            .with_context(|| format!("Failed to persist {status} status for {}", message.id))?;
        if !saved {
            bail!(
                "Message {} is no longer processing; {status} outcome not recorded",
                message.id
            );
        }

        self.store
            .create_log_entry(&message.id, status, error.as_deref(), time)
            .await
    }

    pub async fn for_message(&self, message_id: &str) -> Result<Vec<MessageLogRecord>> {
        self.store.logs_for_message(message_id).await
    }

    pub async fn recent(&self, limit: u64) -> Result<Vec<MessageLogRecord>> {
        self.store.recent_logs(limit).await
    }
}
