use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub edited_message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    pub language_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub from: User,
    pub data: Option<String>,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundKind {
    Text(String),
    Callback(String),
}

/// What the ingestion path needs from an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub chat_id: String,
    pub kind: InboundKind,
}

impl Inbound {
    pub fn content(&self) -> &str {
        match &self.kind {
            InboundKind::Text(text) | InboundKind::Callback(text) => text,
        }
    }
}

impl Update {
    /// `None` for updates without a chat (channel posts, polls, ...).
    pub fn inbound(&self) -> Option<Inbound> {
        if let Some(query) = &self.callback_query {
            let chat_id = query
                .message
                .as_ref()
                .map(|m| m.chat.id)
                .unwrap_or(query.from.id);
            return Some(Inbound {
                chat_id: chat_id.to_string(),
                kind: InboundKind::Callback(query.data.clone().unwrap_or_default()),
            });
        }

        let message = self.message.as_ref().or(self.edited_message.as_ref())?;
        Some(Inbound {
            chat_id: message.chat.id.to_string(),
            kind: InboundKind::Text(message.text.clone().unwrap_or_default()),
        })
    }
}

/// Parses a raw webhook body; malformed bodies yield `None`, never an error.
pub fn parse_update(body: &Value) -> Option<Update> {
    serde_json::from_value(body.clone()).ok()
}
