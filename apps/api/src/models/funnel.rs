use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::funnel::stage::FunnelStage;
use crate::funnel::FunnelError;
use crate::models::session::SessionRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SessionScoreRow {
    pub id: Uuid,
    pub session_id: Uuid,
    pub score: i32,
    pub stage: String,
    pub last_interaction_at: DateTime<Utc>,
    pub lead_created: bool,
    /// Bumped on every score write; compare-and-set key.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionScoreRow {
    pub fn funnel_stage(&self) -> Result<FunnelStage, FunnelError> {
        self.stage.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactivationStatus {
    Pending,
    Sent,
    Responded,
}

impl ReactivationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReactivationStatus::Pending => "pending",
            ReactivationStatus::Sent => "sent",
            ReactivationStatus::Responded => "responded",
        }
    }
}

impl fmt::Display for ReactivationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReactivationStatus {
    type Err = FunnelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReactivationStatus::Pending),
            "sent" => Ok(ReactivationStatus::Sent),
            "responded" => Ok(ReactivationStatus::Responded),
            other => Err(FunnelError::InvalidInput(format!(
                "unknown reactivation status '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReactivationEntryRow {
    pub id: Uuid,
    pub session_id: Uuid,
    pub attempt_number: i32,
    pub scheduled_at: DateTime<Utc>,
    pub status: String,
    pub message_sent: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ReactivationEntryRow {
    pub fn status(&self) -> Result<ReactivationStatus, FunnelError> {
        self.status.parse()
    }

    pub fn is_pending(&self) -> bool {
        self.status == ReactivationStatus::Pending.as_str()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SessionActionRow {
    pub id: Uuid,
    pub session_id: Uuid,
    pub action_type: String,
    pub subject: Option<String>,
    pub points: i32,
    pub created_at: DateTime<Utc>,
}

/// Flat join row used by the due-entry query.
#[derive(Debug, Clone, FromRow)]
pub struct DueReactivationRow {
    pub entry_id: Uuid,
    pub session_id: Uuid,
    pub attempt_number: i32,
    pub scheduled_at: DateTime<Utc>,
    pub status: String,
    pub message_sent: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub entry_created_at: DateTime<Utc>,
    pub bot_id: String,
    pub external_user_id: String,
    pub session_created_at: DateTime<Utc>,
    pub session_updated_at: DateTime<Utc>,
    pub score: i32,
    pub stage: String,
    pub last_interaction_at: DateTime<Utc>,
    pub lead_created: bool,
}

/// A pending, due queue entry together with the session data needed to compose a message.
#[derive(Debug, Clone, Serialize)]
pub struct DueReactivation {
    pub entry: ReactivationEntryRow,
    pub session: SessionRow,
    pub score: i32,
    pub stage: String,
    pub last_interaction_at: DateTime<Utc>,
    pub lead_created: bool,
}

impl DueReactivation {
    /// True when the lead came back or converted after this entry was queued.
    pub fn is_superseded(&self) -> bool {
        self.lead_created || self.last_interaction_at > self.entry.created_at
    }
}

impl From<DueReactivationRow> for DueReactivation {
    fn from(row: DueReactivationRow) -> Self {
        Self {
            entry: ReactivationEntryRow {
                id: row.entry_id,
                session_id: row.session_id,
                attempt_number: row.attempt_number,
                scheduled_at: row.scheduled_at,
                status: row.status,
                message_sent: row.message_sent,
                sent_at: row.sent_at,
                created_at: row.entry_created_at,
            },
            session: SessionRow {
                id: row.session_id,
                bot_id: row.bot_id,
                external_user_id: row.external_user_id,
                created_at: row.session_created_at,
                updated_at: row.session_updated_at,
            },
            score: row.score,
            stage: row.stage,
            last_interaction_at: row.last_interaction_at,
            lead_created: row.lead_created,
        }
    }
}
