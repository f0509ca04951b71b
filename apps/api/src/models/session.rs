use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// Durable identity of one external user talking to one bot.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SessionRow {
    pub id: Uuid,
    pub bot_id: String,
    pub external_user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MessageRow {
    pub id: Uuid,
    pub session_id: Uuid,
    pub bot_id: String,
    pub role: String,
    pub content: Option<String>,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

/// Insert parameters for a transcript message.
pub struct NewMessage<'a> {
    pub session_id: Uuid,
    pub bot_id: &'a str,
    pub role: &'a str,
    pub content: Option<&'a str>,
    pub payload: Value,
}
