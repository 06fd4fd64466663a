//! handlers/message_handler.rs
use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::models::log_model::LogsResponse;
use crate::models::message_model::{CreateMessageRequest, UpdateMessageRequest};
use crate::services::message_service::{MessageService, MessageServiceError};

/// Set by the authenticating gateway in front of this service.
pub const USER_HEADER: &str = "X-User-Id";

#[derive(Deserialize)]
pub struct ListQuery {
    status: Option<String>,
    page: Option<u64>,
    limit: Option<u64>,
}

pub(crate) fn current_user(req: &HttpRequest) -> Result<String, HttpResponse> {
    req.headers()
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| HttpResponse::Unauthorized().json(json!({ "msg": "Not authenticated" })))
}

pub(crate) fn error_response(e: MessageServiceError) -> HttpResponse {
    match e {
        MessageServiceError::NotFound => {
            HttpResponse::NotFound().json(json!({ "msg": "Message not found" }))
        }
        MessageServiceError::Forbidden => {
            HttpResponse::Forbidden().json(json!({ "msg": "Not authorized" }))
        }
        MessageServiceError::Validation(msg) => HttpResponse::BadRequest().json(json!({ "msg": msg })),
        MessageServiceError::InvalidState(t) => HttpResponse::Conflict().json(json!({
            "msg": format!("Only pending messages can be changed (status is {})", t.from),
        })),
        MessageServiceError::Storage(err) => {
            log::error!("(message_handler) Storage error: {:?}", err);
            HttpResponse::InternalServerError().json(json!({
                "msg": "Server error",
                "error": err.to_string()
            }))
        }
    }
}

/// POST /api/messages
pub async fn create_message_endpoint(
    req: HttpRequest,
    service: web::Data<MessageService>,
    body: web::Json<CreateMessageRequest>,
) -> HttpResponse {
    let owner = match current_user(&req) {
        Ok(owner) => owner,
        Err(resp) => return resp,
    };

    match service.create(&owner, body.into_inner(), Utc::now()).await {
        Ok(message) => HttpResponse::Created().json(json!({
            "msg": "Scheduled message created",
            "scheduledMessage": message
        })),
        Err(e) => error_response(e),
    }
}

/// GET /api/messages
pub async fn list_messages_endpoint(
    req: HttpRequest,
    service: web::Data<MessageService>,
    query: web::Query<ListQuery>,
) -> HttpResponse {
    let owner = match current_user(&req) {
        Ok(owner) => owner,
        Err(resp) => return resp,
    };

    match service
        .list(&owner, query.status.as_deref(), query.page, query.limit)
        .await
    {
        Ok(list) => HttpResponse::Ok().json(list),
        Err(e) => error_response(e),
    }
}

/// GET /api/messages/{id}
pub async fn get_message_endpoint(
    req: HttpRequest,
    service: web::Data<MessageService>,
    path: web::Path<String>,
) -> HttpResponse {
    let owner = match current_user(&req) {
        Ok(owner) => owner,
        Err(resp) => return resp,
    };

    match service.get(&owner, &path.into_inner()).await {
        Ok(message) => HttpResponse::Ok().json(message),
        Err(e) => error_response(e),
    }
}

/// PUT /api/messages/{id}
pub async fn update_message_endpoint(
    req: HttpRequest,
    service: web::Data<MessageService>,
    path: web::Path<String>,
    body: web::Json<UpdateMessageRequest>,
) -> HttpResponse {
    let owner = match current_user(&req) {
        Ok(owner) => owner,
        Err(resp) => return resp,
    };

    match service
        .update(&owner, &path.into_inner(), body.into_inner(), Utc::now())
        .await
    {
        Ok(message) => HttpResponse::Ok().json(json!({
            "msg": "Message updated",
            "scheduledMessage": message
        })),
        Err(e) => error_response(e),
    }
}

/// POST /api/messages/{id}/cancel
pub async fn cancel_message_endpoint(
    req: HttpRequest,
    service: web::Data<MessageService>,
    path: web::Path<String>,
) -> HttpResponse {
    let owner = match current_user(&req) {
        Ok(owner) => owner,
        Err(resp) => return resp,
    };

    match service.cancel(&owner, &path.into_inner(), Utc::now()).await {
        Ok(message) => HttpResponse::Ok().json(json!({
            "msg": "Message cancelled",
            "scheduledMessage": message
        })),
        Err(e) => error_response(e),
    }
}

/// GET /api/messages/{id}/logs
pub async fn message_logs_endpoint(
    req: HttpRequest,
    service: web::Data<MessageService>,
    path: web::Path<String>,
) -> HttpResponse {
    let owner = match current_user(&req) {
        Ok(owner) => owner,
        Err(resp) => return resp,
    };

    match service.logs(&owner, &path.into_inner()).await {
        Ok(logs) => HttpResponse::Ok().json(LogsResponse { logs }),
        Err(e) => error_response(e),
    }
}
