//! models/mod.rs
//! Records and request/response shapes shared by services and handlers.

pub mod dispatch_model;
pub mod log_model;
pub mod message_model;
pub mod user_model;
