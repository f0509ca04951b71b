//! Scoring engine: one score row per session, points in, stage out.
//!
//! The engine applies every valid action it is given. Anti-gaming caps (an
//! action type scoring at most twice, random browsing capped at 3 points) are
//! the caller's job and are enforced in `guard` before `record_action` is
//! called. The engine never schedules reactivation; callers read
//! `stage_changed` and the stale scan picks warm sessions up on its own.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::funnel::rules::ActionType;
use crate::funnel::stage::{FunnelStage, StagePolicy};
use crate::funnel::store::{FunnelStore, ScoreUpdate};
use crate::funnel::FunnelError;
use crate::models::funnel::SessionScoreRow;

/// Compare-and-set attempts before a lost race is surfaced as a conflict.
const MAX_UPDATE_ATTEMPTS: u32 = 3;
const CONFLICT_BACKOFF_MS: u64 = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoringResult {
    pub score: i32,
    pub stage: FunnelStage,
    pub previous_stage: FunnelStage,
    pub stage_changed: bool,
}

#[derive(Clone)]
pub struct ScoringEngine {
    store: Arc<dyn FunnelStore>,
    policy: StagePolicy,
}

impl ScoringEngine {
    pub fn new(store: Arc<dyn FunnelStore>, policy: StagePolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &StagePolicy {
        &self.policy
    }

    /// Parses `action_type` before touching the store, so an unknown name mutates nothing.
    pub async fn record_action(
        &self,
        session_id: Uuid,
        action_type: &str,
        now: DateTime<Utc>,
    ) -> Result<ScoringResult, FunnelError> {
        let action: ActionType = action_type.parse()?;
        self.apply(session_id, action, now).await
    }

    /// Read-modify-write of the session's score, retried on a lost race.
    pub async fn apply(
        &self,
        session_id: Uuid,
        action: ActionType,
        now: DateTime<Utc>,
    ) -> Result<ScoringResult, FunnelError> {
        let points = action.points();

        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let current = self.store.get_or_create_score(session_id, now).await?;
            let previous_stage = current.funnel_stage()?;
            let score = current.score + points;
            let stage = self.policy.stage_for(score);

            let update = ScoreUpdate {
                score_id: current.id,
                expected_version: current.version,
                score,
                stage,
                at: now,
            };

            if self.store.update_score(update).await?.is_some() {
                let stage_changed = stage != previous_stage;
                if stage_changed {
                    info!(
                        "Session {session_id} moved {previous_stage} -> {stage} (score {score}, action {action})"
                    );
                }
                return Ok(ScoringResult {
                    score,
                    stage,
                    previous_stage,
                    stage_changed,
                });
            }

            warn!("Score update for session {session_id} lost a race (attempt {attempt})");
            if attempt < MAX_UPDATE_ATTEMPTS {
                tokio::time::sleep(Duration::from_millis(
                    CONFLICT_BACKOFF_MS * (1 << (attempt - 1)),
                ))
                .await;
            }
        }

        Err(FunnelError::Conflict {
            session_id,
            attempts: MAX_UPDATE_ATTEMPTS,
        })
    }

    /// Idempotent. Returns false when the session has never been scored.
    pub async fn mark_lead_created(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, FunnelError> {
        let updated = self.store.set_lead_created(session_id, now).await?;
        if !updated {
            warn!("mark_lead_created: session {session_id} has no score row");
        }
        Ok(updated)
    }

    pub async fn score(&self, session_id: Uuid) -> Result<Option<SessionScoreRow>, FunnelError> {
        Ok(self.store.find_score(session_id).await?)
    }
}
