//! handlers/mod.rs
//! HTTP handlers for scheduled messages and delivery logs.

pub mod log_handler;
pub mod message_handler;
