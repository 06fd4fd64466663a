use std::path::Path;
use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use dotenv::dotenv;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tokio::sync::watch;

use crate::config::app_config::AppConfig;
use crate::logger::init_logger;
use crate::services::channel_dispatcher::ChannelDispatcher;
use crate::services::delivery_executor::DeliveryExecutor;
use crate::services::email_service::EmailService;
use crate::services::message_service::MessageService;
use crate::services::message_store::SqliteMessageStore;
use crate::services::scheduler_service::SchedulerService;
use crate::services::telegram_service::TelegramService;
use crate::services::twilio_service::TwilioService;
use crate::services::user_directory::{SqliteUserDirectory, UserDirectory};

mod app;
mod config;
mod handlers;
mod logger;
mod models;
mod services;

#[cfg(test)]
mod tests;

async fn setup_database(db_path: &Path) -> Result<Pool<Sqlite>> {
    if let Some(dir) = db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Could not create database directory {:?}", dir))?;
    }

    log::info!("Connecting to SQLite at {}", db_path.display());

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);

    SqlitePoolOptions::new()
        .connect_with(options)
        .await
        .context("Could not connect to the SQLite database")
}

/// One route per configured channel; the rest fail deliveries with a configuration error.
fn build_dispatcher(config: &AppConfig) -> ChannelDispatcher {
    let http_client = reqwest::Client::new();
    let mut dispatcher = ChannelDispatcher::new();

    match &config.google {
        Some(google) => {
            dispatcher = dispatcher.with_email(Arc::new(EmailService::new(http_client.clone(), google)));
        }
        None => log::warn!("Email channel disabled: GOOGLE_CLIENT_ID/GOOGLE_CLIENT_SECRET not set"),
    }

    match &config.twilio {
        Some(twilio) => {
            if let Some(sms) = TwilioService::sms(http_client.clone(), twilio) {
                dispatcher = dispatcher.with_sms(Arc::new(sms));
            } else {
                log::warn!("SMS channel disabled: TWILIO_SMS_PHONE not set");
            }
            if let Some(whatsapp) = TwilioService::whatsapp(http_client.clone(), twilio) {
                dispatcher = dispatcher.with_whatsapp(Arc::new(whatsapp));
            } else {
                log::warn!("WhatsApp channel disabled: TWILIO_WHATSAPP_PHONE not set");
            }
        }
        None => log::warn!("SMS/WhatsApp channels disabled: Twilio credentials not set"),
    }

    match &config.telegram {
        Some(telegram) => {
            dispatcher = dispatcher.with_reminder(
                &telegram.chat_id,
                Arc::new(TelegramService::new(http_client, telegram)),
            );
        }
        None => log::warn!(
            "Reminder channel disabled: TELEGRAM_BOT_TOKEN/TELEGRAM_ADMIN_CHAT_ID not set"
        ),
    }

    dispatcher
}

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv().ok(); // a missing .env is fine
    init_logger();

    let config = AppConfig::from_env()?;

    let db_pool = setup_database(&config.database_path).await?;

    let store = SqliteMessageStore::new(db_pool.clone());
    store
        .run_migrations()
        .await
        .context("Migrations for 'scheduled_messages' failed")?;

    let users: Arc<dyn UserDirectory> = Arc::new(SqliteUserDirectory::new(db_pool.clone()));

    let executor = DeliveryExecutor::new(users.clone(), build_dispatcher(&config));
    let scheduler = SchedulerService::new(
        Arc::new(store.clone()),
        executor,
        config.scheduler.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    let message_service = MessageService::new(store.clone(), users.clone())
        .with_admins(config.admin_user_ids.clone());
    if config.admin_user_ids.is_empty() {
        log::warn!("ADMIN_USER_IDS not set: the global delivery log is unavailable");
    }

    log::info!(
        "Starting server on {}:{}",
        config.server_host,
        config.server_port
    );
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(message_service.clone()))
            .configure(app::init_app)
    })
    .workers(1)
    .bind((config.server_host.as_str(), config.server_port))?
    .run()
    .await?;

    // let the tick in flight finish
    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler_task.await {
        log::error!("Scheduler task ended abnormally: {}", e);
    }

    Ok(())
}
