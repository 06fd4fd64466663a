//! config/app_config.rs
//! Process configuration, read from the environment (after `.env` is loaded).

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub server_host: String,
    pub server_port: u16,
    pub scheduler: SchedulerConfig,
    pub google: Option<GoogleConfig>,
    pub twilio: Option<TwilioConfig>,
    pub telegram: Option<TelegramConfig>,
    /// User ids allowed on the global delivery log.
    pub admin_user_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Time between two ticks.
    pub tick_interval: Duration,
    /// Messages dispatched at the same time within one tick. 1 means sequential.
    pub concurrency: usize,
    /// Messages `processing` for longer than this are failed. `None` disables the sweep.
    pub stale_processing_after: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            tick_interval: Duration::from_secs(60),
            concurrency: 1,
            stale_processing_after: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub sms_from: Option<String>,
    pub whatsapp_from: Option<String>,
}

/// Personal reminder target: a bot and one fixed chat.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = SchedulerConfig::default();

        let tick_secs: u64 = parse_var("SCHEDULER_TICK_SECS")?
            .unwrap_or(defaults.tick_interval.as_secs());
        let concurrency: usize = parse_var("SCHEDULER_CONCURRENCY")?.unwrap_or(defaults.concurrency);
        let stale_minutes: u64 = parse_var("SCHEDULER_STALE_PROCESSING_MINUTES")?.unwrap_or(0);
        let stale_processing_after = stale_threshold(stale_minutes)
            .context("Invalid value for SCHEDULER_STALE_PROCESSING_MINUTES")?;

        let scheduler = SchedulerConfig {
            tick_interval: Duration::from_secs(tick_secs.max(1)),
            concurrency: concurrency.max(1),
            stale_processing_after,
        };

        let google = match (var("GOOGLE_CLIENT_ID"), var("GOOGLE_CLIENT_SECRET")) {
            (Some(client_id), Some(client_secret)) => Some(GoogleConfig {
                client_id,
                client_secret,
            }),
            _ => None,
        };

        let twilio = match (var("TWILIO_ACCOUNT_SID"), var("TWILIO_AUTH_TOKEN")) {
            (Some(account_sid), Some(auth_token)) => Some(TwilioConfig {
                account_sid,
                auth_token,
                sms_from: var("TWILIO_SMS_PHONE"),
                whatsapp_from: var("TWILIO_WHATSAPP_PHONE"),
            }),
            _ => None,
        };

        let telegram = match (var("TELEGRAM_BOT_TOKEN"), var("TELEGRAM_ADMIN_CHAT_ID")) {
            (Some(bot_token), Some(chat_id)) => Some(TelegramConfig { bot_token, chat_id }),
            _ => None,
        };

        Ok(AppConfig {
            database_path: var("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data").join("echodrop.db")),
            server_host: var("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            server_port: parse_var("SERVER_PORT")?.unwrap_or(5022),
            scheduler,
            google,
            twilio,
            telegram,
            admin_user_ids: var("ADMIN_USER_IDS")
                .map(|ids| split_list(&ids))
                .unwrap_or_default(),
        })
    }
}

/// `0` disables the sweep.
pub(crate) fn stale_threshold(minutes: u64) -> Result<Option<Duration>> {
    if minutes == 0 {
        return Ok(None);
    }
    let secs = minutes
        .checked_mul(60)
        .ok_or_else(|| anyhow!("{minutes} minutes does not fit in a duration"))?;
    Ok(Some(Duration::from_secs(secs)))
}

/// Comma separated, blanks dropped.
pub(crate) fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Unset and blank are the same thing.
fn var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(name)
        .map(|raw| {
            raw.parse::<T>()
                .with_context(|| format!("Invalid value for {name}: '{raw}'"))
        })
        .transpose()
}
