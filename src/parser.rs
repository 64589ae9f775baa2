use crate::errors::BroadcastParseError;
use crate::weekday::{DayOfWeek, TimeOfDay};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Episode length assumed when a provider gives nothing usable.
pub const DEFAULT_EPISODE_MINUTES: u32 = 24;

/// Provider durations at or above this are treated as bogus.
const MAX_PLAUSIBLE_MINUTES: u32 = 180;

const SYNOPSIS_MAX_CHARS: usize = 200;

// "<word> at <H:MM>" at the very start; anything after (e.g. "(JST)") is ignored.
static BROADCAST_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(\w+)\s+at\s+(\d{1,2}:\d{2})").unwrap());
static HOURS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*hr").unwrap());
static MINUTES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*min").unwrap());
static HTML_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());

/// Weekly broadcast slot in the source zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParsedBroadcast {
    pub day: DayOfWeek,
    pub time: TimeOfDay,
}

/// Parse text like `"Saturdays at 01:00 (JST)"`, reporting why it failed.
pub fn try_parse_broadcast(text: &str) -> Result<ParsedBroadcast, BroadcastParseError> {
    if text.trim().is_empty() {
        return Err(BroadcastParseError::Empty);
    }

    let caps = BROADCAST_RE
        .captures(text)
        .ok_or_else(|| BroadcastParseError::NoMatch(text.to_string()))?;
    let day_word = caps.get(1).map_or("", |m| m.as_str());
    let time_text = caps.get(2).map_or("", |m| m.as_str());

    let day = normalize_day(day_word)
        .parse::<DayOfWeek>()
        .map_err(|_| BroadcastParseError::UnknownDay(day_word.to_string()))?;
    let time = time_text
        .parse::<TimeOfDay>()
        .map_err(|_| BroadcastParseError::InvalidTime(time_text.to_string()))?;

    Ok(ParsedBroadcast { day, time })
}

/// Lenient form of [`try_parse_broadcast`]; never panics.
pub fn parse_broadcast(text: &str) -> Option<ParsedBroadcast> {
    try_parse_broadcast(text).ok()
}

/// Call sites check this before using a parse result.
pub fn is_valid_broadcast(parsed: Option<&ParsedBroadcast>) -> bool {
    parsed.is_some()
}

/// "SATURDAYS" -> "Saturday"
fn normalize_day(word: &str) -> String {
    let singular = word
        .strip_suffix('s')
        .or_else(|| word.strip_suffix('S'))
        .unwrap_or(word);
    let lower = singular.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Episode length from text like `"24 min per ep"` or `"1 hr 30 min"`.
pub fn episode_minutes(text: Option<&str>) -> u32 {
    let Some(text) = text else {
        return DEFAULT_EPISODE_MINUTES;
    };

    let normalized = text.to_lowercase();
    let capture = |re: &Regex| -> u32 {
        re.captures(&normalized)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    };
    let hours = capture(&HOURS_RE);
    let minutes = capture(&MINUTES_RE);

    let total = hours.saturating_mul(60).saturating_add(minutes);
    if total == 0 {
        DEFAULT_EPISODE_MINUTES
    } else {
        total
    }
}

/// Clamp a provider's integer duration into the plausible window.
pub fn plausible_minutes(minutes: u32) -> u32 {
    if minutes == 0 || minutes >= MAX_PLAUSIBLE_MINUTES {
        DEFAULT_EPISODE_MINUTES
    } else {
        minutes
    }
}

/// Render minutes the way the weekly-text provider writes durations.
pub fn duration_text(minutes: u32) -> Option<String> {
    if minutes == 0 {
        return None;
    }
    if minutes < 60 {
        return Some(format!("{} min", minutes));
    }
    let (hours, mins) = (minutes / 60, minutes % 60);
    if mins == 0 {
        Some(format!("{} hr", hours))
    } else {
        Some(format!("{} hr {} min", hours, mins))
    }
}

/// Compact display form: `24m`, `1h`, `1h 30m`.
pub fn format_minutes(total: u32) -> String {
    let (hours, minutes) = (total / 60, total % 60);
    if hours == 0 {
        format!("{}m", minutes)
    } else if minutes == 0 {
        format!("{}h", hours)
    } else {
        format!("{}h {}m", hours, minutes)
    }
}

/// Scale a provider reports its score on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ScoreScale {
    #[default]
    #[serde(rename = "0-10")]
    Ten,
    #[serde(rename = "0-100")]
    Hundred,
}

/// Normalize a score to 0-10 with one decimal place; zero means "unscored".
pub fn rescale_score(raw: Option<f64>, scale: ScoreScale) -> Option<f64> {
    let raw = raw.filter(|s| s.is_finite() && *s > 0.0)?;
    match scale {
        ScoreScale::Ten => Some(raw),
        ScoreScale::Hundred => Some(raw.round() / 10.0),
    }
}

/// Strip markup from a provider synopsis and cap its length.
pub fn sanitize_synopsis(raw: Option<&str>) -> Option<String> {
    let raw = raw.filter(|s| !s.is_empty())?;
    let plain = HTML_TAG_RE.replace_all(raw, "");
    if plain.chars().count() > SYNOPSIS_MAX_CHARS {
        let truncated: String = plain.chars().take(SYNOPSIS_MAX_CHARS).collect();
        Some(format!("{}...", truncated))
    } else {
        Some(plain.into_owned())
    }
}
