//! logger.rs
//! Logger setup with env_logger.

use log::LevelFilter;

pub fn init_logger() {
    // sqlx logs every statement at info; the scheduler runs one scan per tick.
    let log_env = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

    env_logger::Builder::new()
        .filter_module("sqlx::query", LevelFilter::Warn)
        .parse_filters(&log_env)
        .format_timestamp_secs()
        .init();
}
