//! Reconciles an extraction with what the user literally typed.

use once_cell::sync::Lazy;
use regex::Regex;

use super::draft::{AssigneeSource, Extraction, TaskDraft};
use super::normalize::{is_time_like, normalize_whitespace, strip_leading_mention, user_id_of};

static REMIND_ME_TO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bremind\s+me\s+to\s+(.+)").expect("valid regex"));
static REMIND_USER_TO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bremind\s+<@([UW][A-Z0-9]+)(?:\|[^>]*)?>\s+to\s+(.+)").expect("valid regex")
});
static REMIND_USER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bremind\s+<@([UW][A-Z0-9]+)(?:\|[^>]*)?>").expect("valid regex")
});
static SELF_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bremind\s+me\b|\bme\b|提醒我").expect("valid regex"));

const MIN_TITLE_CHARS: usize = 3;

impl TaskDraft {
    /// Lifts a raw extraction into a draft, before any reconciliation.
    pub fn from_extraction(
        extraction: Extraction,
        channel_id: &str,
        requester_id: &str,
        raw_text: &str,
    ) -> Self {
        let assignee = extraction
            .assignee
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty());
        Self {
            title: extraction.title,
            task: extraction.task,
            time: extraction.time,
            reminder_time: extraction.reminder_time,
            assignee_source: if assignee.is_some() {
                AssigneeSource::Extracted
            } else {
                AssigneeSource::Missing
            },
            assignee,
            assignees: extraction.assignees.unwrap_or_default(),
            channel_id: channel_id.to_string(),
            created_by: requester_id.to_string(),
            raw_text: raw_text.to_string(),
        }
    }
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| normalize_whitespace(&v))
        .filter(|v| !v.is_empty())
}

fn derive_title(text: &str) -> Option<String> {
    if let Some(caps) = REMIND_ME_TO.captures(text) {
        return Some(normalize_whitespace(&format!("Remind me to {}", &caps[1])));
    }
    REMIND_USER_TO
        .captures(text)
        .map(|caps| normalize_whitespace(&format!("Remind <@{}> to {}", &caps[1], &caps[2])))
}

fn literal_assignee(text: &str, bot_id: Option<&str>) -> Option<String> {
    REMIND_USER
        .captures(text)
        .map(|caps| caps[1].to_string())
        .filter(|id| Some(id.as_str()) != bot_id)
}

/// Resolves title and assignee ambiguities in `draft` against the literal
/// utterance. Pure: the same inputs always give the same draft.
pub fn sanitize(
    raw_text: &str,
    requester_id: &str,
    bot_id: Option<&str>,
    draft: TaskDraft,
) -> TaskDraft {
    let cleaned = normalize_whitespace(&strip_leading_mention(raw_text, bot_id));

    let mut title = clean(draft.title.clone()).or_else(|| clean(draft.task.clone()));
    if title
        .as_deref()
        .map_or(true, |t| t.chars().count() < MIN_TITLE_CHARS)
    {
        if let Some(derived) = derive_title(&cleaned) {
            title = Some(derived);
        }
    }
    if title.as_deref().is_some_and(is_time_like) {
        if let Some(derived) = derive_title(&cleaned) {
            title = Some(derived);
        }
    }

    let extracted = draft
        .assignee
        .as_deref()
        .map(|a| user_id_of(a).unwrap_or_else(|| a.trim().to_string()))
        .filter(|a| !a.is_empty() && Some(a.as_str()) != bot_id);

    let (assignee, assignee_source) = if SELF_REFERENCE.is_match(&cleaned) {
        (requester_id.to_string(), AssigneeSource::SelfReference)
    } else if let Some(extracted) = extracted {
        let source = match draft.assignee_source {
            AssigneeSource::Missing => AssigneeSource::Extracted,
            other => other,
        };
        (extracted, source)
    } else if let Some(literal) = literal_assignee(&cleaned, bot_id) {
        (literal, AssigneeSource::Literal)
    } else {
        (requester_id.to_string(), AssigneeSource::Defaulted)
    };

    let mut assignees = vec![assignee.clone()];
    for raw in &draft.assignees {
        let id = user_id_of(raw).unwrap_or_else(|| raw.trim().to_string());
        if id.is_empty() || Some(id.as_str()) == bot_id || assignees.contains(&id) {
            continue;
        }
        assignees.push(id);
    }

    TaskDraft {
        title,
        task: None,
        time: clean(draft.time),
        reminder_time: clean(draft.reminder_time),
        assignee: Some(assignee),
        assignee_source,
        assignees,
        channel_id: draft.channel_id,
        created_by: draft.created_by,
        raw_text: cleaned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOT: &str = "UBOT";

    fn run(text: &str, extraction: Extraction) -> TaskDraft {
        let draft = TaskDraft::from_extraction(extraction, "C1", "UREQ", text);
        sanitize(text, "UREQ", Some(BOT), draft)
    }

    #[test]
    fn test_self_reference_overrides_extracted_assignee() {
        let out = run(
            "<@UBOT> remind me to ship the report in 30 minutes",
            Extraction {
                title: Some("ship the report".to_string()),
                assignee: Some("<@UOTHER>".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(out.assignee.as_deref(), Some("UREQ"));
        assert_eq!(out.assignee_source, AssigneeSource::SelfReference);
        assert_eq!(out.title.as_deref(), Some("ship the report"));
        assert_eq!(out.raw_text, "remind me to ship the report in 30 minutes");
    }

    #[test]
    fn test_short_or_time_like_titles_are_rederived() {
        let short = run(
            "remind me to water the plants",
            Extraction {
                title: Some("wa".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(short.title.as_deref(), Some("Remind me to water the plants"));

        let time_like = run(
            "remind <@U42> to send the invoice in 2 hours",
            Extraction {
                title: Some("in 2 hours".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(
            time_like.title.as_deref(),
            Some("Remind <@U42> to send the invoice in 2 hours")
        );
        assert_eq!(time_like.assignee.as_deref(), Some("U42"));
        assert_eq!(time_like.assignee_source, AssigneeSource::Literal);
    }

    #[test]
    fn test_time_like_title_kept_without_pattern() {
        let out = run(
            "tomorrow",
            Extraction {
                title: Some("tomorrow".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(out.title.as_deref(), Some("tomorrow"));
    }

    #[test]
    fn test_extracted_assignee_normalised_and_bot_ignored() {
        let out = run(
            "<@UBOT> ask <@UALEX> to review the deck",
            Extraction {
                title: Some("Review the deck".to_string()),
                assignee: Some("<@UALEX|alex>".to_string()),
                assignees: Some(vec!["<@UBOT>".to_string(), "<@UKIM>".to_string()]),
                ..Default::default()
            },
        );
        assert_eq!(out.assignee.as_deref(), Some("UALEX"));
        assert_eq!(out.assignee_source, AssigneeSource::Extracted);
        assert_eq!(out.assignees, vec!["UALEX".to_string(), "UKIM".to_string()]);
    }

    #[test]
    fn test_assignee_defaults_to_requester() {
        let out = run(
            "book the venue",
            Extraction {
                title: Some("Book the venue".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(out.assignee.as_deref(), Some("UREQ"));
        assert_eq!(out.assignee_source, AssigneeSource::Defaulted);
        assert_eq!(out.assignees, vec!["UREQ".to_string()]);
    }

    #[test]
    fn test_times_are_whitespace_normalised() {
        let out = run(
            "remind me to stretch",
            Extraction {
                reminder_time: Some("  in \n 5   minutes ".to_string()),
                time: Some("   ".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(out.reminder_time.as_deref(), Some("in 5 minutes"));
        assert_eq!(out.time, None);
    }
}
