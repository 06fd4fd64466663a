//! services/mod.rs

pub mod channel_dispatcher;
pub mod delivery_executor;
pub mod delivery_log;
pub mod email_service;
pub mod message_service;
pub mod message_store;
pub mod scheduler_service;
pub mod telegram_service;
pub mod twilio_service;
pub mod user_directory;
