//! tests/support.rs
//! Fixtures shared by the test modules: in-memory database, stub providers and store wrappers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};

use crate::config::app_config::SchedulerConfig;
use crate::models::dispatch_model::{DispatchError, ProviderRequest};
use crate::models::log_model::{LogStatus, MessageLogRecord};
use crate::models::message_model::{MessageStatus, Platform, ScheduledMessage};
use crate::models::user_model::UserRecord;
use crate::services::channel_dispatcher::{ChannelDispatcher, ChannelProvider};
use crate::services::delivery_executor::DeliveryExecutor;
use crate::services::message_store::{MessageStore, SqliteMessageStore};
use crate::services::scheduler_service::SchedulerService;
use crate::services::user_directory::UserDirectory;

/// One connection that never gets recycled, otherwise the in-memory database vanishes.
pub async fn memory_pool() -> Pool<Sqlite> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory database");

    SqliteMessageStore::new(pool.clone())
        .run_migrations()
        .await
        .expect("Failed to run migrations");
    pool
}

/// A `pending` message that became due one second before `now`.
pub fn due_message(
    owner: &str,
    platform: Platform,
    recipient: Option<&str>,
    now: DateTime<Utc>,
) -> ScheduledMessage {
    let mut message = ScheduledMessage::new(
        owner,
        platform,
        recipient.map(str::to_string),
        format!("Hello via {platform}"),
        now - Duration::seconds(1),
        now - Duration::hours(1),
    );
    message.subject = Some("Reminder".to_string());
    message
}

pub fn scheduler(
    store: Arc<dyn MessageStore>,
    users: Arc<dyn UserDirectory>,
    dispatcher: ChannelDispatcher,
    config: SchedulerConfig,
) -> SchedulerService {
    SchedulerService::new(store, DeliveryExecutor::new(users, dispatcher), config)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentCall {
    pub destination: String,
    pub subject: Option<String>,
    pub content: String,
    pub sender_email: Option<String>,
}

/// Records every call and succeeds unless the destination is in `fail_for`.
pub struct StubProvider {
    name: &'static str,
    fail_for: Vec<String>,
    calls: Mutex<Vec<SentCall>>,
}

impl StubProvider {
    pub fn ok(name: &'static str) -> Arc<Self> {
        Self::failing_for(name, &[])
    }

    pub fn failing_for(name: &'static str, destinations: &[&str]) -> Arc<Self> {
        Arc::new(StubProvider {
            name,
            fail_for: destinations.iter().map(|d| d.to_string()).collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<SentCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelProvider for StubProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn send(&self, request: ProviderRequest<'_>) -> Result<String, DispatchError> {
        let call_no = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(SentCall {
                destination: request.destination.to_string(),
                subject: request.subject.map(str::to_string),
                content: request.content.to_string(),
                sender_email: request.sender.and_then(|s| s.email.clone()),
            });
            calls.len()
        };

        if self.fail_for.iter().any(|d| d == request.destination) {
            return Err(DispatchError::Provider(format!(
                "{} rejected {}",
                self.name, request.destination
            )));
        }
        Ok(format!("{}-{}", self.name, call_no))
    }
}

/// In-memory user directory; `unavailable` makes every lookup fail.
#[derive(Default)]
pub struct StubUsers {
    users: HashMap<String, UserRecord>,
    unavailable: bool,
    lookups: AtomicUsize,
}

impl StubUsers {
    pub fn with_user(mut self, id: &str, email: &str, credential: Option<&str>) -> Self {
        self.users.insert(
            id.to_string(),
            UserRecord {
                id: id.to_string(),
                email: email.to_string(),
                delegation_credential: credential.map(str::to_string),
            },
        );
        self
    }

    pub fn unavailable() -> Self {
        StubUsers {
            unavailable: true,
            ..Default::default()
        }
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserDirectory for StubUsers {
    async fn get_user_by_id(&self, id: &str) -> Result<Option<UserRecord>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(anyhow!("user directory unavailable"));
        }
        Ok(self.users.get(id).cloned())
    }
}

/// Delegates to SQLite and counts writes.
pub struct RecordingStore {
    inner: SqliteMessageStore,
    writes: AtomicUsize,
}

impl RecordingStore {
    pub fn new(inner: SqliteMessageStore) -> Arc<Self> {
        Arc::new(RecordingStore {
            inner,
            writes: AtomicUsize::new(0),
        })
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageStore for RecordingStore {
    async fn find_due_messages(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledMessage>> {
        self.inner.find_due_messages(now).await
    }

    async fn find_stale_processing(&self, before: DateTime<Utc>) -> Result<Vec<ScheduledMessage>> {
        self.inner.find_stale_processing(before).await
    }

    async fn claim(
        &self,
        claimed: &ScheduledMessage,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduledMessage>> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.claim(claimed, now).await
    }

    async fn save(&self, message: &ScheduledMessage, expected: MessageStatus) -> Result<bool> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.save(message, expected).await
    }

    async fn create_log_entry(
        &self,
        message_id: &str,
        status: LogStatus,
        error: Option<&str>,
        timestamp: DateTime<Utc>,
    ) -> Result<MessageLogRecord> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner
            .create_log_entry(message_id, status, error, timestamp)
            .await
    }

    async fn logs_for_message(&self, message_id: &str) -> Result<Vec<MessageLogRecord>> {
        self.inner.logs_for_message(message_id).await
    }

    async fn recent_logs(&self, limit: u64) -> Result<Vec<MessageLogRecord>> {
        self.inner.recent_logs(limit).await
    }
}

/// Every call fails, like a store that went away.
pub struct UnreachableStore;

#[async_trait]
impl MessageStore for UnreachableStore {
    async fn find_due_messages(&self, _now: DateTime<Utc>) -> Result<Vec<ScheduledMessage>> {
        Err(anyhow!("database is locked"))
    }

    async fn find_stale_processing(&self, _before: DateTime<Utc>) -> Result<Vec<ScheduledMessage>> {
        Err(anyhow!("database is locked"))
    }

    async fn claim(
        &self,
        _claimed: &ScheduledMessage,
        _now: DateTime<Utc>,
    ) -> Result<Option<ScheduledMessage>> {
        Err(anyhow!("database is locked"))
    }

    async fn save(&self, _message: &ScheduledMessage, _expected: MessageStatus) -> Result<bool> {
        Err(anyhow!("database is locked"))
    }

    async fn create_log_entry(
        &self,
        _message_id: &str,
        _status: LogStatus,
        _error: Option<&str>,
        _timestamp: DateTime<Utc>,
    ) -> Result<MessageLogRecord> {
        Err(anyhow!("database is locked"))
    }

    async fn logs_for_message(&self, _message_id: &str) -> Result<Vec<MessageLogRecord>> {
        Err(anyhow!("database is locked"))
    }

    async fn recent_logs(&self, _limit: u64) -> Result<Vec<MessageLogRecord>> {
        Err(anyhow!("database is locked"))
    }
}
