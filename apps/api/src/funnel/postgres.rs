use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::funnel::stage::FunnelStage;
use crate::funnel::store::{FunnelStore, ScoreUpdate, StoreResult};
use crate::models::funnel::{
    DueReactivation, DueReactivationRow, ReactivationEntryRow, SessionActionRow, SessionScoreRow,
};
use crate::models::session::{MessageRow, NewMessage, SessionRow};

/// PostgreSQL-backed funnel store.
#[derive(Clone)]
pub struct PgFunnelStore {
    pool: PgPool,
}

impl PgFunnelStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FunnelStore for PgFunnelStore {
    async fn find_or_create_session(
        &self,
        bot_id: &str,
        external_user_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<SessionRow> {
        // DO UPDATE (not DO NOTHING) so RETURNING yields the existing row too.
        sqlx::query_as::<_, SessionRow>(
            r#"
            INSERT INTO sessions (id, bot_id, external_user_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            ON CONFLICT (bot_id, external_user_id)
            DO UPDATE SET updated_at = EXCLUDED.updated_at
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(bot_id)
        .bind(external_user_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await
    }

    async fn find_session(&self, session_id: Uuid) -> StoreResult<Option<SessionRow>> {
        sqlx::query_as::<_, SessionRow>("SELECT * FROM sessions WHERE id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn append_message(
        &self,
        message: NewMessage<'_>,
        now: DateTime<Utc>,
    ) -> StoreResult<MessageRow> {
        sqlx::query_as::<_, MessageRow>(
            r#"
            INSERT INTO messages (id, session_id, bot_id, role, content, payload, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(message.session_id)
        .bind(message.bot_id)
        .bind(message.role)
        .bind(message.content)
        .bind(&message.payload)
        .bind(now)
        .fetch_one(&self.pool)
        .await
    }

    async fn recent_messages(&self, session_id: Uuid, limit: i64) -> StoreResult<Vec<MessageRow>> {
        sqlx::query_as::<_, MessageRow>(
            "SELECT * FROM messages WHERE session_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    async fn get_or_create_score(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<SessionScoreRow> {
        sqlx::query(
            r#"
            INSERT INTO session_scores
                (id, session_id, score, stage, last_interaction_at, lead_created, version,
                 created_at, updated_at)
            VALUES ($1, $2, 0, $3, $4, FALSE, 0, $4, $4)
            ON CONFLICT (session_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(session_id)
        .bind(FunnelStage::Sandbox.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;

        sqlx::query_as::<_, SessionScoreRow>("SELECT * FROM session_scores WHERE session_id = $1")
            .bind(session_id)
            .fetch_one(&self.pool)
            .await
    }

    async fn find_score(&self, session_id: Uuid) -> StoreResult<Option<SessionScoreRow>> {
        sqlx::query_as::<_, SessionScoreRow>("SELECT * FROM session_scores WHERE session_id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn update_score(&self, update: ScoreUpdate) -> StoreResult<Option<SessionScoreRow>> {
        sqlx::query_as::<_, SessionScoreRow>(
            r#"
            UPDATE session_scores
            SET score = $1,
                stage = $2,
                last_interaction_at = $3,
                updated_at = $3,
                version = version + 1
            WHERE id = $4 AND version = $5
            RETURNING *
            "#,
        )
        .bind(update.score)
        .bind(update.stage.as_str())
        .bind(update.at)
        .bind(update.score_id)
        .bind(update.expected_version)
        .fetch_optional(&self.pool)
        .await
    }

    async fn set_lead_created(&self, session_id: Uuid, now: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE session_scores SET lead_created = TRUE, updated_at = $2 WHERE session_id = $1",
        )
        .bind(session_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn stale_scores(
        &self,
        stages: &[FunnelStage],
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<SessionScoreRow>> {
        let stages: Vec<String> = stages.iter().map(|s| s.as_str().to_string()).collect();
        sqlx::query_as::<_, SessionScoreRow>(
            r#"
            SELECT * FROM session_scores
            WHERE stage = ANY($1)
              AND lead_created = FALSE
              AND last_interaction_at < $2
            ORDER BY last_interaction_at ASC
            LIMIT $3
            "#,
        )
        .bind(&stages)
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    async fn record_session_action(&self, action: SessionActionRow) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO session_actions (id, session_id, action_type, subject, points, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(action.id)
        .bind(action.session_id)
        .bind(&action.action_type)
        .bind(&action.subject)
        .bind(action.points)
        .bind(action.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn session_actions(&self, session_id: Uuid) -> StoreResult<Vec<SessionActionRow>> {
        sqlx::query_as::<_, SessionActionRow>(
            "SELECT * FROM session_actions WHERE session_id = $1 ORDER BY created_at ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn insert_reactivation(
        &self,
        session_id: Uuid,
        attempt_number: i32,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<ReactivationEntryRow> {
        sqlx::query_as::<_, ReactivationEntryRow>(
            r#"
            INSERT INTO reactivation_queue
                (id, session_id, attempt_number, scheduled_at, status, created_at)
            VALUES ($1, $2, $3, $4, 'pending', $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(session_id)
        .bind(attempt_number)
        .bind(scheduled_at)
        .bind(now)
        .fetch_one(&self.pool)
        .await
    }

    async fn reactivations_since(
        &self,
        session_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<ReactivationEntryRow>> {
        sqlx::query_as::<_, ReactivationEntryRow>(
            r#"
            SELECT * FROM reactivation_queue
            WHERE session_id = $1 AND created_at > $2
            ORDER BY created_at ASC
            "#,
        )
        .bind(session_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await
    }

    async fn due_reactivations(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<DueReactivation>> {
        let rows = sqlx::query_as::<_, DueReactivationRow>(
            r#"
            SELECT q.id             AS entry_id,
                   q.session_id,
                   q.attempt_number,
                   q.scheduled_at,
                   q.status,
                   q.message_sent,
                   q.sent_at,
                   q.created_at     AS entry_created_at,
                   s.bot_id,
                   s.external_user_id,
                   s.created_at     AS session_created_at,
                   s.updated_at     AS session_updated_at,
                   sc.score,
                   sc.stage,
                   sc.last_interaction_at,
                   sc.lead_created
            FROM reactivation_queue q
            JOIN sessions s ON s.id = q.session_id
            JOIN session_scores sc ON sc.session_id = q.session_id
            WHERE q.status = 'pending' AND q.scheduled_at <= $1
            ORDER BY q.scheduled_at ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(DueReactivation::from).collect())
    }

    async fn mark_reactivation_sent(
        &self,
        entry_id: Uuid,
        message: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE reactivation_queue
            SET status = 'sent', message_sent = $2, sent_at = $3
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(entry_id)
        .bind(message)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_session_responded(&self, session_id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE reactivation_queue
            SET status = 'responded'
            WHERE session_id = $1 AND status IN ('pending', 'sent')
            "#,
        )
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn reschedule_reactivation(
        &self,
        entry_id: Uuid,
        scheduled_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE reactivation_queue SET scheduled_at = $2 WHERE id = $1 AND status = 'pending'",
        )
        .bind(entry_id)
        .bind(scheduled_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
