//! Static point table for conversational actions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::funnel::FunnelError;

/// Same action type may score at most this many times per session (enforced by callers).
pub const MAX_SAME_ACTION: usize = 2;
/// Points that random browsing may contribute in total (enforced by callers).
pub const MAX_RANDOM_VIEW_POINTS: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    // Low engagement
    ViewFirstProperty,
    ApplyFilter,
    AskSimpleQuestion,
    // Medium engagement
    ViewPropertyAgain,
    ClickDepthButton,
    AskDetailedQuestion,
    // Buying signals
    #[serde(rename = "view_same_property_3x")]
    ViewSameProperty3x,
    AskAboutFinancing,
    AskAboutProcess,
    HardAction,
}

impl ActionType {
    pub const ALL: [ActionType; 10] = [
        ActionType::ViewFirstProperty,
        ActionType::ApplyFilter,
        ActionType::AskSimpleQuestion,
        ActionType::ViewPropertyAgain,
        ActionType::ClickDepthButton,
        ActionType::AskDetailedQuestion,
        ActionType::ViewSameProperty3x,
        ActionType::AskAboutFinancing,
        ActionType::AskAboutProcess,
        ActionType::HardAction,
    ];

    pub fn points(self) -> i32 {
        match self {
            ActionType::ViewFirstProperty => 1,
            ActionType::ApplyFilter => 1,
            ActionType::AskSimpleQuestion => 1,
            ActionType::ViewPropertyAgain => 2,
            ActionType::ClickDepthButton => 1,
            ActionType::AskDetailedQuestion => 2,
            ActionType::ViewSameProperty3x => 2,
            ActionType::AskAboutFinancing => 3,
            ActionType::AskAboutProcess => 2,
            ActionType::HardAction => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::ViewFirstProperty => "view_first_property",
            ActionType::ApplyFilter => "apply_filter",
            ActionType::AskSimpleQuestion => "ask_simple_question",
            ActionType::ViewPropertyAgain => "view_property_again",
            ActionType::ClickDepthButton => "click_depth_button",
            ActionType::AskDetailedQuestion => "ask_detailed_question",
            ActionType::ViewSameProperty3x => "view_same_property_3x",
            ActionType::AskAboutFinancing => "ask_about_financing",
            ActionType::AskAboutProcess => "ask_about_process",
            ActionType::HardAction => "hard_action",
        }
    }

    /// Browsing without focus; shares the random-view point cap.
    pub fn is_random_browsing(self) -> bool {
        matches!(self, ActionType::ViewFirstProperty | ActionType::ApplyFilter)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = FunnelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionType::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| FunnelError::UnknownAction(s.to_string()))
    }
}
