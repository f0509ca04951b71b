use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

use crate::bot::classify::classify;
use crate::funnel::executor::ReactivationExecutor;
use crate::funnel::guard::{admit, GuardDecision};
use crate::funnel::rules::ActionType;
use crate::funnel::scoring::{ScoringEngine, ScoringResult};
use crate::funnel::store::FunnelStore;
use crate::funnel::FunnelError;
use crate::models::funnel::SessionActionRow;
use crate::models::session::NewMessage;
use crate::telegram::update::Inbound;

#[derive(Debug, Clone, Serialize)]
pub struct GuardedScore {
    pub action: ActionType,
    pub decision: GuardDecision,
    pub result: Option<ScoringResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub session_id: Uuid,
    pub closed_reactivations: u64,
    pub scored: Option<GuardedScore>,
}

/// Lock stripes for per-session cap checks.
const SESSION_LOCK_STRIPES: usize = 64;

/// The chat-ingestion caller of the scoring engine. Owns the anti-gaming caps.
///
/// Check-score-log runs under a per-session lock, so concurrent deliveries for
/// one session cannot both pass a cap. The lock is in-process: with several
/// replicas behind one webhook the caps are best-effort.
#[derive(Clone)]
pub struct InboundPipeline {
    store: Arc<dyn FunnelStore>,
    scoring: ScoringEngine,
    executor: ReactivationExecutor,
    bot_id: String,
    session_locks: Arc<Vec<Mutex<()>>>,
}

impl InboundPipeline {
    pub fn new(
        store: Arc<dyn FunnelStore>,
        scoring: ScoringEngine,
        executor: ReactivationExecutor,
        bot_id: String,
    ) -> Self {
        Self {
            store,
            scoring,
            executor,
            bot_id,
            session_locks: Arc::new((0..SESSION_LOCK_STRIPES).map(|_| Mutex::new(())).collect()),
        }
    }

    async fn lock_session(&self, session_id: Uuid) -> MutexGuard<'_, ()> {
        let stripe = (session_id.as_u128() % self.session_locks.len() as u128) as usize;
        self.session_locks[stripe].lock().await
    }

    /// Handles one inbound chat event.
    ///
    /// Pending reactivations are closed before the action is scored, so a
    /// follow-up cannot go out after the lead has already answered.
    pub async fn handle(
        &self,
        inbound: &Inbound,
        raw_update: Value,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome, FunnelError> {
        let session = self
            .store
            .find_or_create_session(&self.bot_id, &inbound.chat_id, now)
            .await?;

        self.store
            .append_message(
                NewMessage {
                    session_id: session.id,
                    bot_id: &self.bot_id,
                    role: "user",
                    content: Some(inbound.content()),
                    payload: serde_json::json!({ "update": raw_update }),
                },
                now,
            )
            .await?;

        let closed_reactivations = self.executor.mark_responded(session.id).await?;

        let _guard = self.lock_session(session.id).await;
        let history = self.store.session_actions(session.id).await?;
        let scored = match classify(&inbound.kind, &history) {
            Some(classified) => Some(
                self.score_with_history(
                    session.id,
                    classified.action,
                    classified.subject.as_deref(),
                    &history,
                    now,
                )
                .await?,
            ),
            None => {
                debug!("Inbound on session {} carries no scoring signal", session.id);
                None
            }
        };

        Ok(IngestOutcome {
            session_id: session.id,
            closed_reactivations,
            scored,
        })
    }

    /// Scores `action` unless a cap applies. The action is logged either way,
    /// with the points it actually earned.
    pub async fn score_guarded(
        &self,
        session_id: Uuid,
        action: ActionType,
        subject: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<GuardedScore, FunnelError> {
        let _guard = self.lock_session(session_id).await;
        let history = self.store.session_actions(session_id).await?;
        self.score_with_history(session_id, action, subject, &history, now)
            .await
    }

    async fn score_with_history(
        &self,
        session_id: Uuid,
        action: ActionType,
        subject: Option<&str>,
        history: &[SessionActionRow],
        now: DateTime<Utc>,
    ) -> Result<GuardedScore, FunnelError> {
        let decision = admit(history, action, subject);
        let result = match decision {
            GuardDecision::Admit => Some(self.scoring.apply(session_id, action, now).await?),
            capped => {
                info!("Action {action} on session {session_id} not scored: {capped:?}");
                None
            }
        };

        self.store
            .record_session_action(SessionActionRow {
                id: Uuid::new_v4(),
                session_id,
                action_type: action.as_str().to_string(),
                subject: subject.map(String::from),
                points: if result.is_some() { action.points() } else { 0 },
                created_at: now,
            })
            .await?;

        Ok(GuardedScore {
            action,
            decision,
            result,
        })
    }
}
