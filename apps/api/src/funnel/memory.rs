//! In-memory `FunnelStore` with the same atomicity contract as the Postgres
//! store. Each operation runs under one lock; `yield_now` at entry lets
//! concurrent tasks interleave between operations the way they would against a database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::funnel::stage::FunnelStage;
use crate::funnel::store::{FunnelStore, ScoreUpdate, StoreResult};
use crate::models::funnel::{
    DueReactivation, ReactivationEntryRow, ReactivationStatus, SessionActionRow, SessionScoreRow,
};
use crate::models::session::{MessageRow, NewMessage, SessionRow};

#[derive(Default)]
struct Tables {
    sessions: Vec<SessionRow>,
    messages: Vec<MessageRow>,
    scores: HashMap<Uuid, SessionScoreRow>,
    actions: Vec<SessionActionRow>,
    queue: Vec<ReactivationEntryRow>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    forced_conflicts: AtomicU32,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` score updates report a lost race.
    pub fn force_conflicts(&self, n: u32) {
        self.forced_conflicts.store(n, Ordering::SeqCst);
    }

    /// While set, every operation fails as if the pool timed out.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn score_rows(&self) -> Vec<SessionScoreRow> {
        self.tables.lock().unwrap().scores.values().cloned().collect()
    }

    pub fn queue_rows(&self) -> Vec<ReactivationEntryRow> {
        self.tables.lock().unwrap().queue.clone()
    }

    pub fn message_rows(&self) -> Vec<MessageRow> {
        self.tables.lock().unwrap().messages.clone()
    }

    async fn enter(&self) -> StoreResult<()> {
        tokio::task::yield_now().await;
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(sqlx::Error::PoolTimedOut);
        }
        Ok(())
    }
}

#[async_trait]
impl FunnelStore for MemoryStore {
    async fn find_or_create_session(
        &self,
        bot_id: &str,
        external_user_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<SessionRow> {
        self.enter().await?;
        let mut tables = self.tables.lock().unwrap();
        if let Some(existing) = tables
            .sessions
            .iter_mut()
            .find(|s| s.bot_id == bot_id && s.external_user_id == external_user_id)
        {
            existing.updated_at = now;
            return Ok(existing.clone());
        }
        let session = SessionRow {
            id: Uuid::new_v4(),
            bot_id: bot_id.to_string(),
            external_user_id: external_user_id.to_string(),
            created_at: now,
            updated_at: now,
        };
        tables.sessions.push(session.clone());
        Ok(session)
    }

    async fn find_session(&self, session_id: Uuid) -> StoreResult<Option<SessionRow>> {
        self.enter().await?;
        let tables = self.tables.lock().unwrap();
        Ok(tables.sessions.iter().find(|s| s.id == session_id).cloned())
    }

    async fn append_message(
        &self,
        message: NewMessage<'_>,
        now: DateTime<Utc>,
    ) -> StoreResult<MessageRow> {
        self.enter().await?;
        let row = MessageRow {
            id: Uuid::new_v4(),
            session_id: message.session_id,
            bot_id: message.bot_id.to_string(),
            role: message.role.to_string(),
            content: message.content.map(String::from),
            payload: message.payload,
            created_at: now,
        };
        self.tables.lock().unwrap().messages.push(row.clone());
        Ok(row)
    }

    async fn recent_messages(&self, session_id: Uuid, limit: i64) -> StoreResult<Vec<MessageRow>> {
        self.enter().await?;
        let tables = self.tables.lock().unwrap();
        let mut rows: Vec<_> = tables
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn get_or_create_score(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<SessionScoreRow> {
        self.enter().await?;
        let mut tables = self.tables.lock().unwrap();
        let row = tables
            .scores
            .entry(session_id)
            .or_insert_with(|| SessionScoreRow {
                id: Uuid::new_v4(),
                session_id,
                score: 0,
                stage: FunnelStage::Sandbox.as_str().to_string(),
                last_interaction_at: now,
                lead_created: false,
                version: 0,
                created_at: now,
                updated_at: now,
            });
        Ok(row.clone())
    }

    async fn find_score(&self, session_id: Uuid) -> StoreResult<Option<SessionScoreRow>> {
        self.enter().await?;
        Ok(self.tables.lock().unwrap().scores.get(&session_id).cloned())
    }

    async fn update_score(&self, update: ScoreUpdate) -> StoreResult<Option<SessionScoreRow>> {
        self.enter().await?;
        let forced = self
            .forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if forced {
            return Ok(None);
        }
        let mut tables = self.tables.lock().unwrap();
        let Some(row) = tables
            .scores
            .values_mut()
            .find(|row| row.id == update.score_id && row.version == update.expected_version)
        else {
            return Ok(None);
        };
        row.score = update.score;
        row.stage = update.stage.as_str().to_string();
        row.last_interaction_at = update.at;
        row.updated_at = update.at;
        row.version += 1;
        Ok(Some(row.clone()))
    }

    async fn set_lead_created(&self, session_id: Uuid, now: DateTime<Utc>) -> StoreResult<bool> {
        self.enter().await?;
        let mut tables = self.tables.lock().unwrap();
        match tables.scores.get_mut(&session_id) {
            Some(row) => {
                row.lead_created = true;
                row.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn stale_scores(
        &self,
        stages: &[FunnelStage],
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<SessionScoreRow>> {
        self.enter().await?;
        let tables = self.tables.lock().unwrap();
        let mut rows: Vec<_> = tables
            .scores
            .values()
            .filter(|row| stages.iter().any(|s| s.as_str() == row.stage))
            .filter(|row| !row.lead_created && row.last_interaction_at < cutoff)
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.last_interaction_at);
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn record_session_action(&self, action: SessionActionRow) -> StoreResult<()> {
        self.enter().await?;
        self.tables.lock().unwrap().actions.push(action);
        Ok(())
    }

    async fn session_actions(&self, session_id: Uuid) -> StoreResult<Vec<SessionActionRow>> {
        self.enter().await?;
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .actions
            .iter()
            .filter(|a| a.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn insert_reactivation(
        &self,
        session_id: Uuid,
        attempt_number: i32,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<ReactivationEntryRow> {
        self.enter().await?;
        let row = ReactivationEntryRow {
            id: Uuid::new_v4(),
            session_id,
            attempt_number,
            scheduled_at,
            status: ReactivationStatus::Pending.as_str().to_string(),
            message_sent: None,
            sent_at: None,
            created_at: now,
        };
        self.tables.lock().unwrap().queue.push(row.clone());
        Ok(row)
    }

    async fn reactivations_since(
        &self,
        session_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<ReactivationEntryRow>> {
        self.enter().await?;
        let tables = self.tables.lock().unwrap();
        let mut rows: Vec<_> = tables
            .queue
            .iter()
            .filter(|e| e.session_id == session_id && e.created_at > since)
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.created_at);
        Ok(rows)
    }

    async fn due_reactivations(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<DueReactivation>> {
        self.enter().await?;
        let tables = self.tables.lock().unwrap();
        let mut due: Vec<_> = tables
            .queue
            .iter()
            .filter(|e| e.is_pending() && e.scheduled_at <= now)
            .filter_map(|entry| {
                let session = tables.sessions.iter().find(|s| s.id == entry.session_id)?;
                let score = tables.scores.get(&entry.session_id)?;
                Some(DueReactivation {
                    entry: entry.clone(),
                    session: session.clone(),
                    score: score.score,
                    stage: score.stage.clone(),
                    last_interaction_at: score.last_interaction_at,
                    lead_created: score.lead_created,
                })
            })
            .collect();
        due.sort_by_key(|d| d.entry.scheduled_at);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn mark_reactivation_sent(
        &self,
        entry_id: Uuid,
        message: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.enter().await?;
        let mut tables = self.tables.lock().unwrap();
        match tables
            .queue
            .iter_mut()
            .find(|e| e.id == entry_id && e.is_pending())
        {
            Some(entry) => {
                entry.status = ReactivationStatus::Sent.as_str().to_string();
                entry.message_sent = Some(message.to_string());
                entry.sent_at = Some(now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_session_responded(&self, session_id: Uuid) -> StoreResult<u64> {
        self.enter().await?;
        let mut tables = self.tables.lock().unwrap();
        let mut moved = 0;
        for entry in tables.queue.iter_mut().filter(|e| {
            e.session_id == session_id && e.status != ReactivationStatus::Responded.as_str()
        }) {
            entry.status = ReactivationStatus::Responded.as_str().to_string();
            moved += 1;
        }
        Ok(moved)
    }

    async fn reschedule_reactivation(
        &self,
        entry_id: Uuid,
        scheduled_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.enter().await?;
        let mut tables = self.tables.lock().unwrap();
        match tables
            .queue
            .iter_mut()
            .find(|e| e.id == entry_id && e.is_pending())
        {
            Some(entry) => {
                entry.scheduled_at = scheduled_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
