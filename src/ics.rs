//! iCalendar export of a selection.
//!
//! Each title becomes one weekly-recurring VEVENT anchored at its
//! occurrence for the current render pass, written in Asia/Tokyo local time.

use crate::reconcile::ReconciledTitle;
use crate::schedule::RenderPass;
use crate::timezone::SOURCE_ZONE;
use tracing::warn;

pub const DEFAULT_FILENAME: &str = "anime-schedule.ics";
const PRODID: &str = "-//Anime Season//EN";
const UID_DOMAIN: &str = "aniseason.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcsOptions {
    pub title: String,
    pub description: String,
}

impl Default for IcsOptions {
    fn default() -> Self {
        Self {
            title: "Anime Schedule".to_string(),
            description: "My anime airing schedule".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcsDocument {
    pub content: String,
    pub filename: String,
}

/// Escape TEXT property values (RFC 5545 3.3.11).
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            other => out.push(other),
        }
    }
    out
}

fn event_description(title: &ReconciledTitle) -> String {
    match title.synopsis.as_deref().filter(|s| !s.is_empty()) {
        Some(synopsis) => format!("Synopsis: {}\n\nMAL: {}", synopsis, title.url),
        None => format!("MAL: {}", title.url),
    }
}

/// Build the calendar file for `titles`; titles that cannot be placed are skipped.
pub fn generate_ics<'a, I>(pass: &RenderPass, titles: I, options: &IcsOptions) -> IcsDocument
where
    I: IntoIterator<Item = &'a ReconciledTitle>,
{
    let stamp = pass.now().format("%Y%m%dT%H%M%SZ").to_string();

    let mut lines: Vec<String> = vec![
        "BEGIN:VCALENDAR".into(),
        "VERSION:2.0".into(),
        format!("PRODID:{}", PRODID),
        "CALSCALE:GREGORIAN".into(),
        "METHOD:PUBLISH".into(),
        format!("X-WR-CALNAME:{}", escape_text(&options.title)),
        format!("X-WR-CALDESC:{}", escape_text(&options.description)),
        "BEGIN:VTIMEZONE".into(),
        format!("TZID:{}", SOURCE_ZONE.name()),
        "BEGIN:STANDARD".into(),
        "DTSTART:19700101T000000".into(),
        "TZOFFSETFROM:+0900".into(),
        "TZOFFSETTO:+0900".into(),
        "END:STANDARD".into(),
        "END:VTIMEZONE".into(),
    ];

    for title in titles {
        let occurrence = match pass.occurrence(title) {
            Ok(occurrence) => occurrence,
            Err(reason) => {
                warn!(title = %title.title, %reason, "leaving title out of calendar export");
                continue;
            }
        };
        let start = occurrence.start.with_timezone(&SOURCE_ZONE);
        let end = occurrence.end.with_timezone(&SOURCE_ZONE);

        lines.extend([
            "BEGIN:VEVENT".to_string(),
            format!("UID:{}-{}@{}", title.identity_key, start.format("%Y%m%d"), UID_DOMAIN),
            format!("DTSTAMP:{}", stamp),
            format!("DTSTART;TZID={}:{}", SOURCE_ZONE.name(), start.format("%Y%m%dT%H%M%S")),
            format!("DTEND;TZID={}:{}", SOURCE_ZONE.name(), end.format("%Y%m%dT%H%M%S")),
            format!("SUMMARY:{}", escape_text(title.display_title())),
            format!("DESCRIPTION:{}", escape_text(&event_description(title))),
            format!("URL:{}", title.url),
            "RRULE:FREQ=WEEKLY".to_string(),
            "END:VEVENT".to_string(),
        ]);
    }

    lines.push("END:VCALENDAR".into());

    IcsDocument {
        content: lines.join("\r\n"),
        filename: DEFAULT_FILENAME.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ScoreScale;
    use crate::reconcile::{reconcile, Schedule, SourceRecord};
    use chrono::{TimeZone, Utc};
    use chrono_tz::Etc;

    fn frieren() -> ReconciledTitle {
        let record = SourceRecord {
            identity_key: Some(52991),
            title: "Sousou no Frieren".into(),
            english_title: Some("Frieren, Beyond Journey's End".into()),
            synopsis: Some("An elf; a mage.\r\nShe outlives her party.".into()),
            broadcast_text: Some("Fridays at 23:00 (JST)".into()),
            duration_text: Some("24 min per ep".into()),
            score_scale: ScoreScale::Ten,
            ..Default::default()
        };
        reconcile(&[record], &[]).remove(0)
    }

    fn pass(zone: chrono_tz::Tz) -> RenderPass {
        RenderPass::new(Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap(), zone)
    }

    #[test]
    fn test_escape_text() {
        assert_eq!(escape_text(r"a\b;c,d"), r"a\\b\;c\,d");
        assert_eq!(escape_text("line1\r\nline2"), r"line1\nline2");
    }

    #[test]
    fn test_event_lines() {
        let doc = generate_ics(&pass(SOURCE_ZONE), [&frieren()], &IcsOptions::default());
        assert_eq!(doc.filename, "anime-schedule.ics");

        let lines: Vec<&str> = doc.content.split("\r\n").collect();
        assert_eq!(lines.first(), Some(&"BEGIN:VCALENDAR"));
        assert_eq!(lines.last(), Some(&"END:VCALENDAR"));
        assert!(lines.contains(&"PRODID:-//Anime Season//EN"));
        assert!(lines.contains(&"X-WR-CALNAME:Anime Schedule"));
        assert!(lines.contains(&"UID:52991-20261023@aniseason.com"));
        assert!(lines.contains(&"DTSTAMP:20261019T120000Z"));
        assert!(lines.contains(&"DTSTART;TZID=Asia/Tokyo:20261023T230000"));
        assert!(lines.contains(&"DTEND;TZID=Asia/Tokyo:20261023T232400"));
        assert!(lines.contains(&"SUMMARY:Frieren\\, Beyond Journey's End"));
        assert!(lines.contains(
            &"DESCRIPTION:Synopsis: An elf\\; a mage.\\nShe outlives her party.\\n\\nMAL: https://myanimelist.net/anime/52991"
        ));
        assert!(lines.contains(&"RRULE:FREQ=WEEKLY"));
    }

    #[test]
    fn test_times_are_written_in_source_zone_for_any_viewer() {
        let viewer = generate_ics(&pass(Etc::GMTPlus5), [&frieren()], &IcsOptions::default());
        assert!(viewer.content.contains("DTSTART;TZID=Asia/Tokyo:20261023T230000"));
    }

    #[test]
    fn test_epoch_titles_and_empty_selection() {
        let mut title = frieren();
        // Fri 2026-10-23 16:00 UTC, Sat 01:00 in Tokyo
        title.schedule = Schedule::Airing {
            epoch: 1_792_771_200,
            episode: Some(5),
        };
        title.synopsis = None;
        let doc = generate_ics(&pass(Etc::GMTMinus9), [&title], &IcsOptions::default());
        assert!(doc.content.contains("DTSTART;TZID=Asia/Tokyo:20261024T010000"));
        assert!(doc.content.contains("DESCRIPTION:MAL: https://myanimelist.net/anime/52991"));

        let empty = generate_ics(&pass(SOURCE_ZONE), std::iter::empty(), &IcsOptions::default());
        assert!(!empty.content.contains("BEGIN:VEVENT"));
    }
}
