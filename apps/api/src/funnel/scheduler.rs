//! Reactivation scheduler: finds warm sessions that went quiet and queues
//! timed re-engagement attempts for them.
//!
//! An idle episode is everything queued for a session after its last scored
//! interaction. Within one episode: attempt 1 is due `idle_threshold` after the
//! last interaction, attempt k is due `backoff * 2^(k-2)` after attempt k-1 went
//! out, and nothing more is queued once `max_attempts` is reached or the lead
//! has answered. New activity starts a new episode.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::funnel::stage::FunnelStage;
use crate::funnel::store::FunnelStore;
use crate::funnel::FunnelError;
use crate::models::funnel::{ReactivationEntryRow, ReactivationStatus, SessionScoreRow};

const WARM_STAGES: [FunnelStage; 2] = [FunnelStage::Warmup, FunnelStage::Handoff];

#[derive(Debug, Clone)]
pub struct ReactivationPolicy {
    pub idle_threshold: Duration,
    pub max_attempts: u32,
    pub backoff: Duration,
    pub scan_limit: i64,
}

impl Default for ReactivationPolicy {
    fn default() -> Self {
        Self {
            idle_threshold: Duration::hours(24),
            max_attempts: 3,
            backoff: Duration::hours(24),
            scan_limit: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextAttempt {
    /// A pending entry already exists for this episode.
    Outstanding,
    /// The lead answered during this episode; wait for new scored activity.
    AwaitingActivity,
    Exhausted,
    Schedule {
        attempt_number: i32,
        scheduled_at: DateTime<Utc>,
    },
}

/// Decides the next step for one stale session given its current episode.
pub fn plan_next_attempt(
    policy: &ReactivationPolicy,
    score: &SessionScoreRow,
    episode: &[ReactivationEntryRow],
) -> NextAttempt {
    if episode.iter().any(ReactivationEntryRow::is_pending) {
        return NextAttempt::Outstanding;
    }
    if episode
        .iter()
        .any(|e| e.status == ReactivationStatus::Responded.as_str())
    {
        return NextAttempt::AwaitingActivity;
    }

    let last = episode.iter().max_by_key(|e| e.attempt_number);
    let made = last.map_or(0, |e| e.attempt_number.max(0) as u32);
    if made >= policy.max_attempts {
        return NextAttempt::Exhausted;
    }

    let attempt_number = made as i32 + 1;
    let scheduled_at = match last {
        None => score.last_interaction_at + policy.idle_threshold,
        Some(previous) => {
            let anchor = previous.sent_at.unwrap_or(previous.scheduled_at);
            // attempt 2 waits one backoff, attempt 3 two, attempt 4 four...
            let factor = 1_i32 << made.saturating_sub(1).min(16);
            anchor + policy.backoff * factor
        }
    };

    NextAttempt::Schedule {
        attempt_number,
        scheduled_at,
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub stale: usize,
    pub enqueued: usize,
    pub outstanding: usize,
    pub awaiting_activity: usize,
    pub exhausted: usize,
}

#[derive(Clone)]
pub struct ReactivationScheduler {
    store: Arc<dyn FunnelStore>,
    policy: ReactivationPolicy,
}

impl ReactivationScheduler {
    pub fn new(store: Arc<dyn FunnelStore>, policy: ReactivationPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &ReactivationPolicy {
        &self.policy
    }

    /// Warm sessions without a lead, idle for longer than `idle_threshold`, oldest first.
    /// Read only.
    pub async fn find_stale_sessions(
        &self,
        idle_threshold: Duration,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionScoreRow>, FunnelError> {
        if limit <= 0 {
            return Err(FunnelError::InvalidInput(format!(
                "limit must be positive, got {limit}"
            )));
        }
        let cutoff = now.checked_sub_signed(idle_threshold).ok_or_else(|| {
            FunnelError::InvalidInput(format!("idle threshold {idle_threshold} is out of range"))
        })?;
        Ok(self.store.stale_scores(&WARM_STAGES, cutoff, limit).await?)
    }

    /// Inserts a pending entry.
    ///
    /// Precondition: the session has no pending entry. This operation does not
    /// check; `scan_once` upholds it through `plan_next_attempt`.
    pub async fn enqueue(
        &self,
        session_id: Uuid,
        attempt_number: i32,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ReactivationEntryRow, FunnelError> {
        if attempt_number < 1 {
            return Err(FunnelError::InvalidInput(format!(
                "attempt_number is 1-based, got {attempt_number}"
            )));
        }
        let entry = self
            .store
            .insert_reactivation(session_id, attempt_number, scheduled_at, now)
            .await?;
        info!(
            "Queued reactivation attempt {attempt_number} for session {session_id} at {scheduled_at}"
        );
        Ok(entry)
    }

    /// One pass of the stale-scan driver loop.
    pub async fn scan_once(&self, now: DateTime<Utc>) -> Result<ScanReport, FunnelError> {
        let stale = self
            .find_stale_sessions(self.policy.idle_threshold, self.policy.scan_limit, now)
            .await?;

        let mut report = ScanReport {
            stale: stale.len(),
            ..ScanReport::default()
        };

        for score in &stale {
            let episode = self
                .store
                .reactivations_since(score.session_id, score.last_interaction_at)
                .await?;

            match plan_next_attempt(&self.policy, score, &episode) {
                NextAttempt::Outstanding => report.outstanding += 1,
                NextAttempt::AwaitingActivity => report.awaiting_activity += 1,
                NextAttempt::Exhausted => {
                    debug!("Session {} exhausted its reactivation attempts", score.session_id);
                    report.exhausted += 1;
                }
                NextAttempt::Schedule {
                    attempt_number,
                    scheduled_at,
                } => {
                    self.enqueue(score.session_id, attempt_number, scheduled_at, now)
                        .await?;
                    report.enqueued += 1;
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funnel::memory::MemoryStore;
    use crate::funnel::rules::ActionType;
    use crate::funnel::scoring::ScoringEngine;
    use crate::funnel::stage::StagePolicy;

    fn score_row(last_interaction_at: DateTime<Utc>) -> SessionScoreRow {
        SessionScoreRow {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            score: 4,
            stage: "warmup".to_string(),
            last_interaction_at,
            lead_created: false,
            version: 2,
            created_at: last_interaction_at,
            updated_at: last_interaction_at,
        }
    }

    fn entry(
        attempt_number: i32,
        status: ReactivationStatus,
        scheduled_at: DateTime<Utc>,
        sent_at: Option<DateTime<Utc>>,
    ) -> ReactivationEntryRow {
        ReactivationEntryRow {
            id: Uuid::new_v4(),
            session_id: Uuid::nil(),
            attempt_number,
            scheduled_at,
            status: status.as_str().to_string(),
            message_sent: sent_at.map(|_| "hello".to_string()),
            sent_at,
            created_at: scheduled_at,
        }
    }

    fn setup() -> (Arc<MemoryStore>, ScoringEngine, ReactivationScheduler) {
        let store = Arc::new(MemoryStore::new());
        let engine = ScoringEngine::new(store.clone(), StagePolicy::default());
        let scheduler = ReactivationScheduler::new(store.clone(), ReactivationPolicy::default());
        (store, engine, scheduler)
    }

    #[test]
    fn test_first_attempt_fires_at_idle_threshold() {
        let policy = ReactivationPolicy::default();
        let last = Utc::now() - Duration::hours(30);
        let plan = plan_next_attempt(&policy, &score_row(last), &[]);
        assert_eq!(
            plan,
            NextAttempt::Schedule {
                attempt_number: 1,
                scheduled_at: last + Duration::hours(24),
            }
        );
    }

    #[test]
    fn test_followups_back_off_exponentially() {
        let policy = ReactivationPolicy::default();
        let last = Utc::now() - Duration::hours(100);
        let sent1 = last + Duration::hours(25);

        let plan = plan_next_attempt(
            &policy,
            &score_row(last),
            &[entry(1, ReactivationStatus::Sent, sent1, Some(sent1))],
        );
        assert_eq!(
            plan,
            NextAttempt::Schedule {
                attempt_number: 2,
                scheduled_at: sent1 + Duration::hours(24),
            }
        );

        let sent2 = sent1 + Duration::hours(24);
        let plan = plan_next_attempt(
            &policy,
            &score_row(last),
            &[
                entry(1, ReactivationStatus::Sent, sent1, Some(sent1)),
                entry(2, ReactivationStatus::Sent, sent2, Some(sent2)),
            ],
        );
        assert_eq!(
            plan,
            NextAttempt::Schedule {
                attempt_number: 3,
                scheduled_at: sent2 + Duration::hours(48),
            }
        );
    }

    #[test]
    fn test_pending_entry_suppresses_duplicates() {
        let policy = ReactivationPolicy::default();
        let now = Utc::now();
        let plan = plan_next_attempt(
            &policy,
            &score_row(now - Duration::hours(30)),
            &[entry(1, ReactivationStatus::Pending, now, None)],
        );
        assert_eq!(plan, NextAttempt::Outstanding);
    }

    #[test]
    fn test_max_attempts_exhausts_episode() {
        let policy = ReactivationPolicy {
            max_attempts: 2,
            ..ReactivationPolicy::default()
        };
        let now = Utc::now();
        let plan = plan_next_attempt(
            &policy,
            &score_row(now - Duration::hours(200)),
            &[
                entry(1, ReactivationStatus::Sent, now, Some(now)),
                entry(2, ReactivationStatus::Sent, now, Some(now)),
            ],
        );
        assert_eq!(plan, NextAttempt::Exhausted);
    }

    #[test]
    fn test_responded_entry_waits_for_activity() {
        let policy = ReactivationPolicy::default();
        let now = Utc::now();
        let plan = plan_next_attempt(
            &policy,
            &score_row(now - Duration::hours(48)),
            &[entry(1, ReactivationStatus::Responded, now, Some(now))],
        );
        assert_eq!(plan, NextAttempt::AwaitingActivity);
    }

    #[tokio::test]
    async fn test_stale_scan_skips_sandbox_and_converted_leads() {
        let (_, engine, scheduler) = setup();
        let long_ago = Utc::now() - Duration::days(90);

        let sandbox = Uuid::new_v4();
        engine.apply(sandbox, ActionType::ApplyFilter, long_ago).await.unwrap();

        let converted = Uuid::new_v4();
        engine.apply(converted, ActionType::HardAction, long_ago).await.unwrap();
        engine.apply(converted, ActionType::HardAction, long_ago).await.unwrap();
        engine.mark_lead_created(converted, long_ago).await.unwrap();

        let warm = Uuid::new_v4();
        engine.apply(warm, ActionType::HardAction, long_ago).await.unwrap();

        let stale = scheduler
            .find_stale_sessions(Duration::hours(24), 50, Utc::now())
            .await
            .unwrap();

        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].session_id, warm);
    }

    #[tokio::test]
    async fn test_stale_scan_orders_oldest_first_and_respects_limit() {
        let (_, engine, scheduler) = setup();
        let now = Utc::now();
        let older = Uuid::new_v4();
        let newer = Uuid::new_v4();
        engine
            .apply(newer, ActionType::HardAction, now - Duration::hours(30))
            .await
            .unwrap();
        engine
            .apply(older, ActionType::HardAction, now - Duration::hours(60))
            .await
            .unwrap();

        let stale = scheduler
            .find_stale_sessions(Duration::hours(24), 1, now)
            .await
            .unwrap();

        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].session_id, older);
    }

    #[tokio::test]
    async fn test_recent_session_is_not_stale() {
        let (_, engine, scheduler) = setup();
        let now = Utc::now();
        engine
            .apply(Uuid::new_v4(), ActionType::HardAction, now - Duration::hours(2))
            .await
            .unwrap();

        let stale = scheduler
            .find_stale_sessions(Duration::hours(24), 50, now)
            .await
            .unwrap();
        assert!(stale.is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_idle_threshold_is_rejected() {
        let (_, _, scheduler) = setup();
        let err = scheduler
            .find_stale_sessions(Duration::days(200_000_000), 50, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, FunnelError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_enqueue_rejects_zero_attempt() {
        let (store, _, scheduler) = setup();
        let now = Utc::now();
        let err = scheduler
            .enqueue(Uuid::new_v4(), 0, now, now)
            .await
            .unwrap_err();
        assert!(matches!(err, FunnelError::InvalidInput(_)));
        assert!(store.queue_rows().is_empty());
    }

    #[tokio::test]
    async fn test_scan_once_queues_one_attempt_per_episode() {
        let (store, engine, scheduler) = setup();
        let now = Utc::now();
        let session = Uuid::new_v4();
        engine
            .apply(session, ActionType::HardAction, now - Duration::hours(25))
            .await
            .unwrap();

        let first = scheduler.scan_once(now).await.unwrap();
        assert_eq!(first.stale, 1);
        assert_eq!(first.enqueued, 1);

        let second = scheduler.scan_once(now + Duration::minutes(5)).await.unwrap();
        assert_eq!(second.enqueued, 0);
        assert_eq!(second.outstanding, 1);

        let queue = store.queue_rows();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].attempt_number, 1);
        assert_eq!(queue[0].scheduled_at, now - Duration::hours(1));
    }

    #[tokio::test]
    async fn test_new_activity_starts_new_episode() {
        let (store, engine, scheduler) = setup();
        let start = Utc::now() - Duration::days(10);
        let session = Uuid::new_v4();
        engine.apply(session, ActionType::HardAction, start).await.unwrap();

        let scan_at = start + Duration::hours(25);
        scheduler.scan_once(scan_at).await.unwrap();
        let entry = store.queue_rows().pop().unwrap();
        store
            .mark_reactivation_sent(entry.id, "hi", scan_at)
            .await
            .unwrap();
        store.mark_session_responded(session).await.unwrap();

        // Answered but no scored activity yet: leave it alone.
        let report = scheduler.scan_once(scan_at + Duration::hours(1)).await.unwrap();
        assert_eq!(report.awaiting_activity, 1);

        let back = scan_at + Duration::hours(2);
        engine.apply(session, ActionType::AskAboutProcess, back).await.unwrap();
        let report = scheduler.scan_once(back + Duration::hours(25)).await.unwrap();
        assert_eq!(report.enqueued, 1);

        let newest = store
            .queue_rows()
            .into_iter()
            .max_by_key(|e| e.created_at)
            .unwrap();
        assert_eq!(newest.attempt_number, 1);
    }
}
