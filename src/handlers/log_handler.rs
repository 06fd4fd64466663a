//! handlers/log_handler.rs
use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;

use crate::handlers::message_handler::{current_user, error_response};
use crate::models::log_model::LogsResponse;
use crate::services::message_service::MessageService;

const DEFAULT_LOG_LIMIT: u64 = 50;

#[derive(Deserialize)]
pub struct LogsQuery {
    limit: Option<u64>,
}

/// GET /api/logs (admins)
pub async fn recent_logs_endpoint(
    req: HttpRequest,
    service: web::Data<MessageService>,
    query: web::Query<LogsQuery>,
) -> HttpResponse {
    let caller = match current_user(&req) {
        Ok(caller) => caller,
        Err(resp) => return resp,
    };
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT);

    match service.recent_logs(&caller, limit).await {
        Ok(logs) => HttpResponse::Ok().json(LogsResponse { logs }),
        Err(e) => error_response(e),
    }
}
