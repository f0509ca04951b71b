//! Reactivation executor: drains due queue entries, composes a message through
//! the LLM, delivers it over the chat transport and records the outcome.
//!
//! Collaborator failures are isolated per entry: the entry stays `pending` and
//! its `scheduled_at` moves forward by `retry_delay`. Store failures abort the tick.
//!
//! An entry is claimed (rescheduled by `retry_delay`) before anything is sent,
//! so a tick that dies mid-delivery cannot re-fire it on the next tick. A send
//! that went out but could not be recorded is buffered and recorded at the
//! start of the next tick; it is never sent again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::funnel::prompts::{REACTIVATION_PROMPT, REACTIVATION_SYSTEM};
use crate::funnel::store::FunnelStore;
use crate::funnel::FunnelError;
use crate::llm_client::{LlmClient, LlmError};
use crate::models::funnel::DueReactivation;
use crate::models::session::NewMessage;
use crate::telegram::{ChatTransport, TransportError, MAX_MESSAGE_CHARS};

/// Messages of session history handed to the composer.
const TRANSCRIPT_MESSAGES: i64 = 20;
/// Attempts at recording a send that already went out.
const RECORD_ATTEMPTS: u32 = 3;
const RECORD_BACKOFF_MS: u64 = 50;

/// Session context the composer sees.
#[derive(Debug, Clone, Serialize)]
pub struct ReactivationContext {
    pub session_id: Uuid,
    pub stage: String,
    pub score: i32,
    pub attempt_number: i32,
    pub idle_hours: i64,
    /// `(role, content)`, oldest first.
    pub transcript: Vec<(String, String)>,
}

#[async_trait]
pub trait MessageComposer: Send + Sync {
    async fn compose(&self, context: &ReactivationContext) -> Result<String, LlmError>;
}

/// Composes reactivation copy with Claude.
pub struct LlmComposer(pub LlmClient);

#[async_trait]
impl MessageComposer for LlmComposer {
    async fn compose(&self, context: &ReactivationContext) -> Result<String, LlmError> {
        let prompt = build_prompt(context);
        let response = self.0.call(&prompt, REACTIVATION_SYSTEM).await?;
        let text = response.text().map(str::trim).unwrap_or_default();
        if text.is_empty() {
            return Err(LlmError::EmptyContent);
        }
        Ok(text.chars().take(MAX_MESSAGE_CHARS).collect())
    }
}

fn build_prompt(context: &ReactivationContext) -> String {
    let transcript = if context.transcript.is_empty() {
        "(no messages)".to_string()
    } else {
        context
            .transcript
            .iter()
            .map(|(role, content)| format!("{role}: {content}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    REACTIVATION_PROMPT
        .replace("{stage}", &context.stage)
        .replace("{score}", &context.score.to_string())
        .replace("{attempt}", &context.attempt_number.to_string())
        .replace("{idle_hours}", &context.idle_hours.to_string())
        .replace("{transcript}", &transcript)
}

#[derive(Debug, Error)]
enum DeliveryError {
    #[error("compose failed: {0}")]
    Compose(#[from] LlmError),

    #[error("delivery failed: {0}")]
    Transport(#[from] TransportError),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub due: usize,
    pub delivered: usize,
    /// Sent to the user, but `mark_sent` is still outstanding.
    pub unrecorded: usize,
    pub deferred: usize,
    /// Closed without sending because the lead came back or converted.
    pub superseded: usize,
    /// Subset of `superseded` closed because a lead was created.
    pub converted: usize,
}

enum Delivery {
    Recorded,
    Unrecorded,
}

#[derive(Debug, Clone)]
struct UnrecordedSend {
    message: String,
    sent_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ReactivationExecutor {
    store: Arc<dyn FunnelStore>,
    composer: Arc<dyn MessageComposer>,
    transport: Arc<dyn ChatTransport>,
    retry_delay: Duration,
    dispatch_limit: i64,
    unrecorded: Arc<Mutex<HashMap<Uuid, UnrecordedSend>>>,
}

impl ReactivationExecutor {
    pub fn new(
        store: Arc<dyn FunnelStore>,
        composer: Arc<dyn MessageComposer>,
        transport: Arc<dyn ChatTransport>,
        retry_delay: Duration,
        dispatch_limit: i64,
    ) -> Self {
        Self {
            store,
            composer,
            transport,
            retry_delay,
            dispatch_limit,
            unrecorded: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Pending entries with `scheduled_at <= now`, joined to their session.
    pub async fn due_entries(
        &self,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<DueReactivation>, FunnelError> {
        if limit <= 0 {
            return Err(FunnelError::InvalidInput(format!(
                "limit must be positive, got {limit}"
            )));
        }
        Ok(self.store.due_reactivations(now, limit).await?)
    }

    /// `pending -> sent`. Returns false, changing nothing, when the entry is
    /// not pending: a `sent` or `responded` entry is never overwritten.
    pub async fn mark_sent(
        &self,
        entry_id: Uuid,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, FunnelError> {
        let moved = self
            .store
            .mark_reactivation_sent(entry_id, message, now)
            .await?;
        if !moved {
            warn!("Reactivation {entry_id} was not pending; mark_sent ignored");
        }
        Ok(moved)
    }

    /// Closes every pending or sent entry of the session. Called on any inbound message.
    pub async fn mark_responded(&self, session_id: Uuid) -> Result<u64, FunnelError> {
        let moved = self.store.mark_session_responded(session_id).await?;
        if moved > 0 {
            info!("Session {session_id} responded; closed {moved} reactivation entries");
        }
        Ok(moved)
    }

    /// One pass of the dispatch driver loop.
    pub async fn dispatch_once(&self, now: DateTime<Utc>) -> Result<DispatchReport, FunnelError> {
        self.flush_unrecorded().await?;

        let due = self.due_entries(self.dispatch_limit, now).await?;
        let mut report = DispatchReport {
            due: due.len(),
            ..DispatchReport::default()
        };

        for item in &due {
            if item.is_superseded() {
                if item.lead_created {
                    info!(
                        "Reactivation {} dropped: session {} converted to a lead",
                        item.entry.id, item.session.id
                    );
                    report.converted += 1;
                } else {
                    debug!(
                        "Reactivation {} superseded by activity on session {}",
                        item.entry.id, item.session.id
                    );
                }
                self.mark_responded(item.session.id).await?;
                report.superseded += 1;
                continue;
            }

            match self.deliver(item, now).await {
                Ok(Delivery::Recorded) => report.delivered += 1,
                Ok(Delivery::Unrecorded) => report.unrecorded += 1,
                Err(DeliveryError::Store(e)) => return Err(e.into()),
                Err(e) => {
                    let retry_at = now + self.retry_delay;
                    warn!(
                        "Reactivation {} for session {} failed, retrying at {retry_at}: {e}",
                        item.entry.id, item.session.id
                    );
                    self.store
                        .reschedule_reactivation(item.entry.id, retry_at)
                        .await?;
                    report.deferred += 1;
                }
            }
        }

        Ok(report)
    }

    /// Records sends buffered by an earlier tick. Stops at the first store error,
    /// keeping the rest buffered.
    async fn flush_unrecorded(&self) -> Result<(), FunnelError> {
        let buffered: Vec<(Uuid, UnrecordedSend)> = self.with_unrecorded(|map| {
            map.iter().map(|(id, send)| (*id, send.clone())).collect()
        });

        for (entry_id, send) in buffered {
            let moved = self
                .store
                .mark_reactivation_sent(entry_id, &send.message, send.sent_at)
                .await?;
            info!("Recorded earlier send of reactivation {entry_id} (changed: {moved})");
            self.with_unrecorded(|map| {
                map.remove(&entry_id);
            });
        }
        Ok(())
    }

    fn with_unrecorded<R>(&self, f: impl FnOnce(&mut HashMap<Uuid, UnrecordedSend>) -> R) -> R {
        let mut map = self.unrecorded.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut map)
    }

    async fn record_sent(
        &self,
        entry_id: Uuid,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let mut attempt = 1;
        loop {
            match self.store.mark_reactivation_sent(entry_id, message, now).await {
                Ok(moved) => return Ok(moved),
                Err(e) if attempt < RECORD_ATTEMPTS => {
                    warn!("Recording reactivation {entry_id} failed (attempt {attempt}): {e}");
                    tokio::time::sleep(std::time::Duration::from_millis(
                        RECORD_BACKOFF_MS << (attempt - 1),
                    ))
                    .await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn deliver(
        &self,
        item: &DueReactivation,
        now: DateTime<Utc>,
    ) -> Result<Delivery, DeliveryError> {
        let chat_id = &item.session.external_user_id;

        // Claim before sending.
        self.store
            .reschedule_reactivation(item.entry.id, now + self.retry_delay)
            .await?;

        if let Err(e) = self.transport.send_typing(chat_id).await {
            debug!("Typing indicator failed for chat {chat_id}: {e}");
        }

        let mut history = self
            .store
            .recent_messages(item.session.id, TRANSCRIPT_MESSAGES)
            .await?;
        history.reverse();

        let context = ReactivationContext {
            session_id: item.session.id,
            stage: item.stage.clone(),
            score: item.score,
            attempt_number: item.entry.attempt_number,
            idle_hours: (now - item.last_interaction_at).num_hours(),
            transcript: history
                .into_iter()
                .filter_map(|m| m.content.map(|c| (m.role, c)))
                .collect(),
        };

        let text = self.composer.compose(&context).await?;
        self.transport.send_message(chat_id, &text).await?;

        let delivery = match self.record_sent(item.entry.id, &text, now).await {
            Ok(true) => {
                info!(
                    "Sent reactivation attempt {} to session {}",
                    item.entry.attempt_number, item.session.id
                );
                Delivery::Recorded
            }
            Ok(false) => {
                // The lead answered while we were composing; responded wins.
                info!("Reactivation {} closed before it was marked sent", item.entry.id);
                Delivery::Recorded
            }
            Err(e) => {
                error!(
                    "Reactivation {} was sent to session {} but could not be recorded: {e}",
                    item.entry.id, item.session.id
                );
                let send = UnrecordedSend {
                    message: text.clone(),
                    sent_at: now,
                };
                self.with_unrecorded(|map| {
                    map.insert(item.entry.id, send);
                });
                Delivery::Unrecorded
            }
        };

        let logged = self
            .store
            .append_message(
                NewMessage {
                    session_id: item.session.id,
                    bot_id: &item.session.bot_id,
                    role: "assistant",
                    content: Some(&text),
                    payload: json!({
                        "reactivation_entry_id": item.entry.id,
                        "attempt_number": item.entry.attempt_number,
                    }),
                },
                now,
            )
            .await;
        if let Err(e) = logged {
            warn!("Failed to log reactivation message for session {}: {e}", item.session.id);
        }

        Ok(delivery)
    }
}
