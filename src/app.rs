//! app.rs
use crate::handlers::{log_handler, message_handler};
use actix_web::web;

pub fn init_app(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .service(
                web::scope("/messages")
                    .route("", web::post().to(message_handler::create_message_endpoint))
                    .route("", web::get().to(message_handler::list_messages_endpoint))
                    .route("/{id}", web::get().to(message_handler::get_message_endpoint))
                    .route("/{id}", web::put().to(message_handler::update_message_endpoint))
                    .route(
                        "/{id}/cancel",
                        web::post().to(message_handler::cancel_message_endpoint),
                    )
                    .route(
                        "/{id}/logs",
                        web::get().to(message_handler::message_logs_endpoint),
                    ),
            )
            .service(
                web::scope("/logs").route("", web::get().to(log_handler::recent_logs_endpoint)),
            ),
    );
}
