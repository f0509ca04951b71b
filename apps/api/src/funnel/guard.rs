//! Anti-gaming caps applied by ingestion callers before they score an action.

use serde::Serialize;

use crate::funnel::rules::{ActionType, MAX_RANDOM_VIEW_POINTS, MAX_SAME_ACTION};
use crate::models::funnel::SessionActionRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardDecision {
    Admit,
    SameActionCapped,
    RandomBrowsingCapped,
}

/// Decides whether `action` may still score, given the session's action log.
///
/// Capped actions are logged with zero points and do not count towards either cap.
/// `subject` narrows the same-action count to one target (e.g. a unit id), so
/// viewing two different units is not "the same action twice".
pub fn admit(
    history: &[SessionActionRow],
    action: ActionType,
    subject: Option<&str>,
) -> GuardDecision {
    let same = history
        .iter()
        .filter(|row| row.points > 0 && row.action_type == action.as_str())
        .filter(|row| subject.is_none() || row.subject.as_deref() == subject)
        .count();
    if same >= MAX_SAME_ACTION {
        return GuardDecision::SameActionCapped;
    }

    if action.is_random_browsing() {
        let browsing: i32 = history
            .iter()
            .filter(|row| {
                row.action_type
                    .parse::<ActionType>()
                    .map(ActionType::is_random_browsing)
                    .unwrap_or(false)
            })
            .map(|row| row.points)
            .sum();
        if browsing + action.points() > MAX_RANDOM_VIEW_POINTS {
            return GuardDecision::RandomBrowsingCapped;
        }
    }

    GuardDecision::Admit
}
