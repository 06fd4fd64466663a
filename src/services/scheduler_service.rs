//! services/scheduler_service.rs
//! Periodic driver: finds due messages, delivers them and records the outcome.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::config::app_config::SchedulerConfig;
use crate::models::dispatch_model::DeliveryOutcome;
use crate::models::log_model::LogStatus;
use crate::models::message_model::ScheduledMessage;
use crate::services::delivery_executor::DeliveryExecutor;
use crate::services::delivery_log::DeliveryLog;
use crate::services::message_store::MessageStore;

pub const STALE_PROCESSING_ERROR: &str = "Delivery interrupted: message was left in processing";

/// Counts for one tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub due: usize,
    pub sent: usize,
    pub failed: usize,
    /// Due at scan time but cancelled, edited or claimed before this tick got to them.
    pub skipped: usize,
    /// Messages whose state could not be persisted.
    pub errors: usize,
    /// Stale `processing` messages failed by the sweep.
    pub swept: usize,
}

enum MessageResult {
    Sent,
    Failed,
    Skipped,
    Error,
}

#[derive(Clone)]
pub struct SchedulerService {
    store: Arc<dyn MessageStore>,
    executor: DeliveryExecutor,
    delivery_log: DeliveryLog,
    config: SchedulerConfig,
}

impl SchedulerService {
    pub fn new(
        store: Arc<dyn MessageStore>,
        executor: DeliveryExecutor,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            delivery_log: DeliveryLog::new(store.clone()),
            store,
            executor,
            config,
        }
    }

    /// Ticks until `shutdown` flips to true or its sender is dropped. A tick that has
    /// started always runs to completion; ticks never overlap.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        log::info!(
            "(scheduler) Scheduler initialized: tick every {}s, concurrency {}",
            self.config.tick_interval.as_secs(),
            self.config.concurrency
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.run_tick(Utc::now()).await {
                        Ok(report) if report.due > 0 || report.swept > 0 => {
                            log::info!(
                                "(scheduler) Tick finished: {} due, {} sent, {} failed, {} skipped, {} not recorded, {} swept",
                                report.due,
                                report.sent,
                                report.failed,
                                report.skipped,
                                report.errors,
                                report.swept
                            );
                        }
                        Ok(_) => log::debug!("(scheduler) Tick finished, nothing due"),
                        Err(e) => log::error!("(scheduler) Scheduler error: {:#}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        log::info!("(scheduler) Shutdown requested, scheduler stopped");
                        break;
                    }
                }
            }
        }
    }

    /// One pass over the due-set. `Err` only when the scan itself fails; per-message
    /// failures are recorded on the message and counted in the report.
    pub async fn run_tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let mut report = TickReport::default();

        if let Some(stale_after) = self.config.stale_processing_after {
            report.swept = self.sweep_stale(now, stale_after).await;
        }

        let due: Vec<ScheduledMessage> = self
            .store
            .find_due_messages(now)
            .await
            .context("Failed to query due messages")?
            .into_iter()
            .filter(|m| m.is_due(now))
            .collect();
        report.due = due.len();

        if due.is_empty() {
            return Ok(report);
        }
        log::debug!("(scheduler) Due messages count: {}", due.len());

        let results: Vec<MessageResult> = stream::iter(due)
            .map(|message| self.process_message(message, now))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        for result in results {
            match result {
                MessageResult::Sent => report.sent += 1,
                MessageResult::Failed => report.failed += 1,
                MessageResult::Skipped => report.skipped += 1,
                MessageResult::Error => report.errors += 1,
            }
        }
        Ok(report)
    }

    async fn process_message(&self, mut scanned: ScheduledMessage, now: DateTime<Utc>) -> MessageResult {
        if let Err(e) = scanned.mark_processing(Utc::now()) {
            log::warn!("(scheduler) Skipping message {}: {}", scanned.id, e);
            return MessageResult::Error;
        }

        // Committed before dispatch: the next scan must not see this message as pending.
        // The stored row is what gets delivered, edits made after the scan included.
        let mut message = match self.store.claim(&scanned, now).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                log::info!(
                    "(scheduler) Message {} changed since the scan, not delivering",
                    scanned.id
                );
                return MessageResult::Skipped;
            }
            Err(e) => {
                log::error!(
                    "(scheduler) Could not mark message {} as processing: {:#}",
                    scanned.id,
                    e
                );
                return MessageResult::Error;
            }
        };

        let outcome = self.executor.execute(&message).await;
        let finished = Utc::now();
        let target = message
            .recipient
            .clone()
            .unwrap_or_else(|| "reminder chat".to_string());

        let (status, error) = match &outcome {
            DeliveryOutcome::Sent { .. } => (LogStatus::Sent, None),
            DeliveryOutcome::Failed { error } => (LogStatus::Failed, Some(error.as_str())),
        };

        if let Err(e) = self
            .delivery_log
            .record_outcome(&mut message, status, error, finished)
            .await
        {
            log::error!(
                "(scheduler) Could not record {} outcome for message {}: {:#}",
                status,
                message.id,
                e
            );
            return MessageResult::Error;
        }

        match outcome {
            DeliveryOutcome::Sent {
                provider_message_id,
            } => {
                log::info!(
                    "(scheduler) ✅ Message sent to {} (scheduled id: {}, provider id: {})",
                    target,
                    message.id,
                    provider_message_id
                );
                MessageResult::Sent
            }
            DeliveryOutcome::Failed { error } => {
                log::error!(
                    "(scheduler) ❌ Failed to send message to {} (scheduled id: {}): {}",
                    target,
                    message.id,
                    error
                );
                MessageResult::Failed
            }
        }
    }

    /// Fails messages left `processing` (e.g. by a crash mid-dispatch) for too long.
    async fn sweep_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> usize {
        let cutoff = match chrono::Duration::from_std(stale_after)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
        {
            Some(cutoff) => cutoff,
            None => {
                log::error!(
                    "(sweep_stale) Stale threshold of {}s is out of range, sweep skipped",
                    stale_after.as_secs()
                );
                return 0;
            }
        };

        let stale = match self.store.find_stale_processing(cutoff).await {
            Ok(stale) => stale,
            Err(e) => {
                log::error!("(sweep_stale) Failed to query stale messages: {:#}", e);
                return 0;
            }
        };

        let mut swept = 0;
        for mut message in stale {
            log::warn!(
                "(sweep_stale) Message {} stuck in processing since {}, marking failed",
                message.id,
                message.updated_at
            );
            match self
                .delivery_log
                .record_outcome(
                    &mut message,
                    LogStatus::Failed,
                    Some(STALE_PROCESSING_ERROR),
                    now,
                )
                .await
            {
                Ok(_) => swept += 1,
                Err(e) => log::error!(
                    "(sweep_stale) Could not fail message {}: {:#}",
                    message.id,
                    e
                ),
            }
        }
        swept
    }
}
