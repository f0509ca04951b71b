use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use crate::errors::AppError;
use crate::state::AppState;
use crate::telegram::update::parse_update;

const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// POST /api/v1/bot/telegram/webhook
///
/// Answers `{"ok": true}` for every authenticated delivery, including ones it
/// could not process. Telegram redelivers on any other answer.
pub async fn handle_telegram_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    if let Some(expected) = state.config.telegram_webhook_secret.as_deref() {
        let provided = headers
            .get(SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if provided != expected {
            warn!("Rejected webhook call with a bad secret token");
            return Err(AppError::Unauthorized);
        }
    }

    let raw: Value = match serde_json::from_slice(&body) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Webhook body is not JSON: {e}");
            return Ok(ack());
        }
    };

    let Some(inbound) = parse_update(&raw).and_then(|update| update.inbound()) else {
        debug!("Ignoring update without a message or callback");
        return Ok(ack());
    };

    match state.inbound.handle(&inbound, raw, Utc::now()).await {
        Ok(outcome) => debug!(
            "Processed update for session {} (scored: {})",
            outcome.session_id,
            outcome.scored.is_some()
        ),
        Err(e) => error!("Failed to process update from chat {}: {e}", inbound.chat_id),
    }

    Ok(ack())
}

fn ack() -> Json<Value> {
    Json(json!({ "ok": true }))
}
