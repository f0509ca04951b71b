// Lead engagement funnel: scoring, stage policy, reactivation scheduling and dispatch.
// All table access goes through `store::FunnelStore`; nothing here keeps state between calls.

pub mod executor;
pub mod guard;
pub mod handlers;
#[cfg(test)]
pub mod memory;
pub mod postgres;
pub mod prompts;
pub mod rules;
pub mod scheduler;
pub mod scoring;
pub mod stage;
pub mod store;
pub mod worker;

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum FunnelError {
    #[error("Unknown action type: {0}")]
    UnknownAction(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Concurrent update on session {session_id} lost after {attempts} attempts")]
    Conflict { session_id: Uuid, attempts: u32 },

    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),
}
