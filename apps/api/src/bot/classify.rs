//! Maps inbound chat events to scoring actions.
//!
//! Callback buttons carry explicit intents (`view:<unit>`, `filter:<name>`,
//! `photos:<unit>`, `location:<unit>`, `price:<unit>`, `book:<unit>`, `contact`).
//! Free text falls back to keyword heuristics in English and Russian.

use crate::funnel::rules::ActionType;
use crate::models::funnel::SessionActionRow;
use crate::telegram::update::InboundKind;

/// Questions at least this long count as detailed.
const DETAILED_QUESTION_CHARS: usize = 80;

// Keywords match at word boundaries. A trailing `*` marks a stem that may be
// followed by more letters ("financ*" matches "financing", not "refinance").
const FINANCING_KEYWORDS: &[&str] = &[
    "mortgage*", "loan*", "financ*", "installment*", "credit", "credits", "down payment",
    "ипотек*", "рассрочк*", "кредит*", "первоначальн*",
];
const PROCESS_KEYWORDS: &[&str] = &[
    "document*", "contract*", "process", "legal*", "title deed*", "tapu", "residence permit*",
    "документ*", "договор*", "оформлен*", "внж",
];
const HARD_ACTION_KEYWORDS: &[&str] = &[
    "call me", "contact me", "book a viewing", "arrange a viewing", "schedule a viewing",
    "позвоните*", "свяжитесь*", "на просмотр",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub action: ActionType,
    pub subject: Option<String>,
}

impl Classified {
    fn new(action: ActionType, subject: Option<&str>) -> Self {
        Self {
            action,
            subject: subject.map(String::from),
        }
    }
}

/// `history` is every action previously classified for the session, scored or capped.
pub fn classify(kind: &InboundKind, history: &[SessionActionRow]) -> Option<Classified> {
    match kind {
        InboundKind::Callback(data) => classify_callback(data.trim(), history),
        InboundKind::Text(text) => classify_text(text.trim()),
    }
}

fn classify_callback(data: &str, history: &[SessionActionRow]) -> Option<Classified> {
    let (verb, arg) = match data.split_once(':') {
        Some((verb, arg)) => (verb, Some(arg.trim()).filter(|a| !a.is_empty())),
        None => (data, None),
    };

    match verb {
        "view" => {
            let unit = arg?;
            Some(Classified::new(view_action(history, unit), Some(unit)))
        }
        "filter" => Some(Classified::new(ActionType::ApplyFilter, arg)),
        "photos" | "location" | "price" => {
            Some(Classified::new(ActionType::ClickDepthButton, Some(data)))
        }
        "book" | "contact" | "call" => Some(Classified::new(ActionType::HardAction, None)),
        _ => None,
    }
}

/// First view, second view, then "focused" views of the same unit.
fn view_action(history: &[SessionActionRow], unit: &str) -> ActionType {
    let seen = history
        .iter()
        .filter(|row| row.subject.as_deref() == Some(unit))
        .filter(|row| {
            matches!(
                row.action_type.parse::<ActionType>(),
                Ok(ActionType::ViewFirstProperty
                    | ActionType::ViewPropertyAgain
                    | ActionType::ViewSameProperty3x)
            )
        })
        .count();
    match seen {
        0 => ActionType::ViewFirstProperty,
        1 => ActionType::ViewPropertyAgain,
        _ => ActionType::ViewSameProperty3x,
    }
}

fn classify_text(text: &str) -> Option<Classified> {
    if text.is_empty() || text == "/start" {
        return None;
    }
    if let Some(unit) = text.strip_prefix("/photo ") {
        let subject = format!("photos:{}", unit.trim());
        return Some(Classified::new(ActionType::ClickDepthButton, Some(&subject)));
    }

    let lower = text.to_lowercase();
    let words = normalize_words(&lower);
    let mentions = |keywords: &[&str]| keywords.iter().any(|k| mentions_keyword(&words, k));

    if mentions(HARD_ACTION_KEYWORDS) {
        return Some(Classified::new(ActionType::HardAction, None));
    }
    if mentions(FINANCING_KEYWORDS) {
        return Some(Classified::new(ActionType::AskAboutFinancing, None));
    }
    if mentions(PROCESS_KEYWORDS) {
        return Some(Classified::new(ActionType::AskAboutProcess, None));
    }
    if text.contains('?') {
        let action = if text.chars().count() >= DETAILED_QUESTION_CHARS {
            ActionType::AskDetailedQuestion
        } else {
            ActionType::AskSimpleQuestion
        };
        return Some(Classified::new(action, None));
    }
    None
}

/// Lowercased words joined by single spaces, padded with a space on both ends.
fn normalize_words(lower: &str) -> String {
    let mut out = String::from(" ");
    for word in lower.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
        out.push_str(word);
        out.push(' ');
    }
    out
}

fn mentions_keyword(words: &str, keyword: &str) -> bool {
    match keyword.strip_suffix('*') {
        Some(stem) => words.contains(&format!(" {stem}")),
        None => words.contains(&format!(" {keyword} ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn viewed(unit: &str, action: ActionType) -> SessionActionRow {
        SessionActionRow {
            id: Uuid::new_v4(),
            session_id: Uuid::nil(),
            action_type: action.as_str().to_string(),
            subject: Some(unit.to_string()),
            points: action.points(),
            created_at: Utc::now(),
        }
    }

    fn callback(data: &str) -> InboundKind {
        InboundKind::Callback(data.to_string())
    }

    fn text(t: &str) -> InboundKind {
        InboundKind::Text(t.to_string())
    }

    #[test]
    fn test_repeat_views_escalate() {
        let kind = callback("view:unit-1");
        assert_eq!(
            classify(&kind, &[]).unwrap().action,
            ActionType::ViewFirstProperty
        );

        let once = vec![viewed("unit-1", ActionType::ViewFirstProperty)];
        assert_eq!(
            classify(&kind, &once).unwrap().action,
            ActionType::ViewPropertyAgain
        );

        let twice = vec![
            viewed("unit-1", ActionType::ViewFirstProperty),
            viewed("unit-1", ActionType::ViewPropertyAgain),
        ];
        assert_eq!(
            classify(&kind, &twice).unwrap().action,
            ActionType::ViewSameProperty3x
        );
    }

    #[test]
    fn test_views_of_other_units_do_not_count() {
        let history = vec![viewed("unit-2", ActionType::ViewFirstProperty)];
        let classified = classify(&callback("view:unit-1"), &history).unwrap();
        assert_eq!(classified.action, ActionType::ViewFirstProperty);
        assert_eq!(classified.subject.as_deref(), Some("unit-1"));
    }

    #[test]
    fn test_callback_buttons() {
        assert_eq!(
            classify(&callback("filter:city"), &[]).unwrap().action,
            ActionType::ApplyFilter
        );
        assert_eq!(
            classify(&callback("photos:unit-3"), &[]).unwrap(),
            Classified::new(ActionType::ClickDepthButton, Some("photos:unit-3"))
        );
        assert_eq!(
            classify(&callback("book:unit-3"), &[]).unwrap().action,
            ActionType::HardAction
        );
        assert!(classify(&callback("view:"), &[]).is_none());
        assert!(classify(&callback("noop"), &[]).is_none());
    }

    #[test]
    fn test_text_keywords() {
        assert_eq!(
            classify(&text("Can I get a mortgage as a foreigner?"), &[]).unwrap().action,
            ActionType::AskAboutFinancing
        );
        assert_eq!(
            classify(&text("Есть рассрочка?"), &[]).unwrap().action,
            ActionType::AskAboutFinancing
        );
        assert_eq!(
            classify(&text("What documents do I need"), &[]).unwrap().action,
            ActionType::AskAboutProcess
        );
        assert_eq!(
            classify(&text("Please call me tomorrow"), &[]).unwrap().action,
            ActionType::HardAction
        );
    }

    #[test]
    fn test_keywords_match_whole_words_only() {
        assert_eq!(
            classify(&text("The view is incredible!"), &[]),
            None
        );
        assert_eq!(
            classify(&text("I'm just viewing, thanks"), &[]),
            None
        );
        assert_eq!(
            classify(&text("Could we arrange a viewing on Friday"), &[]).unwrap().action,
            ActionType::HardAction
        );
        assert_eq!(
            classify(&text("Do you offer financing, e.g. on credit?"), &[]).unwrap().action,
            ActionType::AskAboutFinancing
        );
        assert_eq!(
            classify(&text("Какие нужны документы?"), &[]).unwrap().action,
            ActionType::AskAboutProcess
        );
    }

    #[test]
    fn test_questions_by_length() {
        assert_eq!(
            classify(&text("Is it near the sea?"), &[]).unwrap().action,
            ActionType::AskSimpleQuestion
        );
        let long = "Is the building finished already, and how far is it from the beach and the nearest school?";
        assert_eq!(
            classify(&text(long), &[]).unwrap().action,
            ActionType::AskDetailedQuestion
        );
    }

    #[test]
    fn test_small_talk_is_not_scored() {
        assert!(classify(&text("/start"), &[]).is_none());
        assert!(classify(&text("thanks"), &[]).is_none());
        assert!(classify(&text(""), &[]).is_none());
    }

    #[test]
    fn test_photo_command() {
        assert_eq!(
            classify(&text("/photo abc-1"), &[]).unwrap(),
            Classified::new(ActionType::ClickDepthButton, Some("photos:abc-1"))
        );
    }
}
