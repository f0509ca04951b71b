pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::bot::handlers as bot;
use crate::funnel::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Chat ingestion
        .route(
            "/api/v1/bot/telegram/webhook",
            post(bot::handle_telegram_webhook),
        )
        // Sessions
        .route(
            "/api/v1/sessions/:id/actions",
            post(handlers::handle_record_action),
        )
        .route("/api/v1/sessions/:id/score", get(handlers::handle_get_score))
        .route("/api/v1/sessions/:id/lead", post(handlers::handle_mark_lead))
        .route(
            "/api/v1/sessions/:id/responded",
            post(handlers::handle_mark_responded),
        )
        // Reactivation
        .route(
            "/api/v1/reactivation/stale",
            get(handlers::handle_stale_sessions),
        )
        .route(
            "/api/v1/reactivation/enqueue",
            post(handlers::handle_enqueue),
        )
        .route("/api/v1/reactivation/due", get(handlers::handle_due_entries))
        .route(
            "/api/v1/reactivation/:id/sent",
            post(handlers::handle_mark_sent),
        )
        .route("/api/v1/reactivation/scan", post(handlers::handle_scan))
        .route(
            "/api/v1/reactivation/dispatch",
            post(handlers::handle_dispatch),
        )
        .with_state(state)
}
