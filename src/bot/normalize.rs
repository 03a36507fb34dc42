//! Best-effort time parsing and Slack mention helpers.
//!
//! Nothing here fails loudly: an unparseable phrase is simply `None`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static IN_MINUTES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bin\s+(\d+)\s*(?:minutes?|mins?)\b").expect("valid regex"));
static MINUTES_LATER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d+)\s*(?:minutes?|mins?)\s+(?:later|after)\b").expect("valid regex")
});
static IN_HOURS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bin\s+(\d+)\s*(?:hours?|hrs?)\b").expect("valid regex"));
static HOURS_LATER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d+)\s*(?:hours?|hrs?)\s+(?:later|after)\b").expect("valid regex")
});
static ZH_MINUTES: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*分钟后").expect("valid regex"));
static ZH_HOURS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*小时后").expect("valid regex"));

static TIME_LIKE: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^in\s+\d+\s*(?:minutes?|mins?|hours?|hrs?)\b",
        r"\b(?:later|after)$",
        r"^\d{4}-\d{1,2}-\d{1,2}",
        r"\b\d{1,2}:\d{2}\b",
        r"\b(?:today|tomorrow|tonight|next\s+\w+)\b",
        r"\d+\s*(?:分钟|小时)后",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

static MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<@([UW][A-Z0-9]+)(?:\|[^>]*)?>").expect("valid regex"));
static BARE_USER_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^@?([UW][A-Z0-9]{2,})$").expect("valid regex"));

#[derive(Clone, Copy)]
enum Unit {
    Minutes,
    Hours,
}

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Turns free text into an absolute instant.
///
/// Tries, in order: an absolute date/time, English "in N minutes/hours" or
/// "N minutes/hours later", then the Chinese "N分钟后" / "N小时后" forms.
pub fn parse_relative_time(text: &str, base: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(absolute) = parse_absolute(text) {
        return Some(absolute);
    }

    for (re, unit) in [
        (&*IN_MINUTES, Unit::Minutes),
        (&*MINUTES_LATER, Unit::Minutes),
        (&*IN_HOURS, Unit::Hours),
        (&*HOURS_LATER, Unit::Hours),
        (&*ZH_MINUTES, Unit::Minutes),
        (&*ZH_HOURS, Unit::Hours),
    ] {
        if let Some(caps) = re.captures(text) {
            let amount = caps.get(1)?.as_str().parse::<i64>().ok()?;
            let offset = match unit {
                Unit::Minutes => chrono::Duration::try_minutes(amount),
                Unit::Hours => chrono::Duration::try_hours(amount),
            }?;
            return base.checked_add_signed(offset);
        }
    }

    None
}

fn parse_absolute(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Whether `text` reads like a time expression rather than a task title.
pub fn is_time_like(text: &str) -> bool {
    let s = text.trim().to_lowercase();
    if s.is_empty() {
        return false;
    }
    TIME_LIKE.iter().any(|re| re.is_match(&s))
}

/// Referenced user ids, de-duplicated, in first-seen order.
pub fn extract_mentions(text: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for caps in MENTION.captures_iter(text) {
        let id = caps[1].to_string();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

/// User id out of `<@U123>`, `<@U123|bob>`, `@U123` or `U123`.
pub fn user_id_of(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if let Some(caps) = MENTION.captures(raw) {
        return Some(caps[1].to_string());
    }
    BARE_USER_ID
        .captures(raw)
        .map(|caps| caps[1].to_string())
}

/// Renders `<@ID>` when an id can be found, the raw text otherwise.
pub fn to_mention(raw: &str) -> String {
    match user_id_of(raw) {
        Some(id) => format!("<@{}>", id),
        None => raw.trim().to_string(),
    }
}

/// Drops a leading `<@BOT>` (or `<@BOT|name>`) token.
pub fn strip_leading_mention(text: &str, bot_user_id: Option<&str>) -> String {
    let Some(bot) = bot_user_id.filter(|b| !b.is_empty()) else {
        return text.trim().to_string();
    };
    let trimmed = text.trim_start();
    let prefix = format!("<@{}", bot);
    if let Some(rest) = trimmed.strip_prefix(&prefix) {
        if rest.starts_with('>') || rest.starts_with('|') {
            if let Some(end) = rest.find('>') {
                return rest[end + 1..].trim().to_string();
            }
        }
    }
    text.trim().to_string()
}

/// Collapses newlines and runs of whitespace into single spaces.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
