//! Storage seam for the funnel. Every mutation of sessions, scores and the
//! reactivation queue goes through this trait so the status and stage rules
//! live in one place.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::funnel::stage::FunnelStage;
use crate::models::funnel::{
    DueReactivation, ReactivationEntryRow, SessionActionRow, SessionScoreRow,
};
use crate::models::session::{MessageRow, NewMessage, SessionRow};

pub type StoreResult<T> = Result<T, sqlx::Error>;

/// New values for a score row, applied only if `expected_version` still matches.
#[derive(Debug, Clone)]
pub struct ScoreUpdate {
    pub score_id: Uuid,
    pub expected_version: i64,
    pub score: i32,
    pub stage: FunnelStage,
    pub at: DateTime<Utc>,
}

#[async_trait]
pub trait FunnelStore: Send + Sync {
    /// Atomic under concurrent calls with the same key: one row per `(bot_id, external_user_id)`.
    async fn find_or_create_session(
        &self,
        bot_id: &str,
        external_user_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<SessionRow>;

    async fn find_session(&self, session_id: Uuid) -> StoreResult<Option<SessionRow>>;

    async fn append_message(
        &self,
        message: NewMessage<'_>,
        now: DateTime<Utc>,
    ) -> StoreResult<MessageRow>;

    /// Newest first.
    async fn recent_messages(&self, session_id: Uuid, limit: i64) -> StoreResult<Vec<MessageRow>>;

    /// Returns the score row, inserting `score = 0, stage = sandbox` if absent.
    /// Concurrent first calls resolve to the same row.
    async fn get_or_create_score(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<SessionScoreRow>;

    async fn find_score(&self, session_id: Uuid) -> StoreResult<Option<SessionScoreRow>>;

    /// Compare-and-set on `version`. `None` means another writer got there first.
    async fn update_score(&self, update: ScoreUpdate) -> StoreResult<Option<SessionScoreRow>>;

    /// Returns whether a score row exists for the session.
    async fn set_lead_created(&self, session_id: Uuid, now: DateTime<Utc>) -> StoreResult<bool>;

    /// Rows in `stages` without a lead, idle since before `cutoff`, oldest first.
    async fn stale_scores(
        &self,
        stages: &[FunnelStage],
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<SessionScoreRow>>;

    async fn record_session_action(
        &self,
        action: SessionActionRow,
    ) -> StoreResult<()>;

    async fn session_actions(&self, session_id: Uuid) -> StoreResult<Vec<SessionActionRow>>;

    async fn insert_reactivation(
        &self,
        session_id: Uuid,
        attempt_number: i32,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<ReactivationEntryRow>;

    /// Entries for the session created strictly after `since`, oldest first.
    async fn reactivations_since(
        &self,
        session_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<ReactivationEntryRow>>;

    /// Pending entries with `scheduled_at <= now`, earliest first.
    async fn due_reactivations(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<DueReactivation>>;

    /// `pending -> sent` only. Returns false if the entry was not pending.
    async fn mark_reactivation_sent(
        &self,
        entry_id: Uuid,
        message: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// `pending | sent -> responded` for every entry of the session. Returns rows moved.
    async fn mark_session_responded(&self, session_id: Uuid) -> StoreResult<u64>;

    /// Moves a still-pending entry's `scheduled_at`. Returns false if it is no longer pending.
    async fn reschedule_reactivation(
        &self,
        entry_id: Uuid,
        scheduled_at: DateTime<Utc>,
    ) -> StoreResult<bool>;
}
