//! Telegram Bot API transport: outbound `sendMessage` / `sendChatAction`,
//! and the inbound update shapes the webhook accepts.

pub mod update;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

const TELEGRAM_API: &str = "https://api.telegram.org";
/// Telegram rejects longer text messages.
pub const MAX_MESSAGE_CHARS: usize = 4096;
const REQUEST_TIMEOUT_SECS: u64 = 20;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Telegram {method} failed: {description}")]
    Api { method: String, description: String },
}

/// Outbound chat delivery. Implementations must be safe to retry.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_typing(&self, chat_id: &str) -> Result<(), TransportError>;

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), TransportError>;
}

#[derive(Debug, Deserialize)]
struct ApiReply {
    ok: bool,
    description: Option<String>,
}

#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    token: String,
}

impl TelegramClient {
    pub fn new(token: String) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, token })
    }

    async fn call(&self, method: &str, payload: Value) -> Result<(), TransportError> {
        let url = format!("{TELEGRAM_API}/bot{}/{method}", self.token);
        let response = self.client.post(url).json(&payload).send().await?;
        let status = response.status();
        let reply: ApiReply = response.json().await?;

        if !status.is_success() || !reply.ok {
            return Err(TransportError::Api {
                method: method.to_string(),
                description: reply
                    .description
                    .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string()),
            });
        }

        debug!("Telegram {method} ok");
        Ok(())
    }
}

#[async_trait]
impl ChatTransport for TelegramClient {
    async fn send_typing(&self, chat_id: &str) -> Result<(), TransportError> {
        self.call(
            "sendChatAction",
            json!({ "chat_id": chat_id, "action": "typing" }),
        )
        .await
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), TransportError> {
        self.call("sendMessage", json!({ "chat_id": chat_id, "text": text }))
            .await
    }
}

/// Masks a bot token for logs: first 6 and last 4 characters.
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() < 12 {
        return "***".to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}
