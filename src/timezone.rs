//! Translating broadcast slots between time zones.
//!
//! Upstream weekly schedules are expressed in [`SOURCE_ZONE`]. A slot is
//! anchored to its next occurrence relative to a caller-supplied "now",
//! converted to the viewer's zone, and the local weekday is re-derived from
//! the converted calendar date, since the conversion can move it either way.

use crate::errors::ProjectionError;
use crate::weekday::{DayOfWeek, TimeOfDay};
use chrono::{DateTime, Datelike, Days, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::Serialize;

/// Zone every weekly broadcast text is written in (JST, UTC+9, no DST).
pub const SOURCE_ZONE: Tz = chrono_tz::Asia::Tokyo;

/// A broadcast slot as seen from the viewer's zone
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalBroadcastTime {
    pub local_day: DayOfWeek,
    pub local_time: TimeOfDay,
    /// Next occurrence, no earlier than the start of "now"'s minute and less
    /// than seven days out.
    pub local_anchor: DateTime<Tz>,
}

impl LocalBroadcastTime {
    fn from_local(local: DateTime<Tz>) -> Self {
        Self {
            local_day: DayOfWeek::from(local.weekday()),
            local_time: TimeOfDay::from_naive(local.time()),
            local_anchor: local,
        }
    }
}

/// Resolve a wall-clock time in `zone`. Ambiguous times take the earlier
/// instant; times skipped by a DST jump move forward by an hour.
pub fn resolve_local(zone: &Tz, naive: NaiveDateTime) -> Result<DateTime<Tz>, ProjectionError> {
    if let Some(dt) = zone.from_local_datetime(&naive).earliest() {
        return Ok(dt);
    }
    let shifted = naive + chrono::Duration::hours(1);
    zone.from_local_datetime(&shifted)
        .earliest()
        .ok_or_else(|| ProjectionError::NonexistentLocalTime(naive.to_string()))
}

/// Next wall-clock occurrence of `day` at `time` in `zone`, on or after `now`.
///
/// The day offset is taken from `now`'s weekday in `zone`, wrapping negative
/// offsets by a week. A same-day slot whose minute has already passed is
/// pushed a further week so the result never lies in the past. Slots have
/// minute precision, so the slot in `now`'s own minute still counts.
pub fn next_occurrence(
    day: DayOfWeek,
    time: TimeOfDay,
    zone: &Tz,
    now: DateTime<Utc>,
) -> Result<DateTime<Tz>, ProjectionError> {
    let now_in_zone = now.with_timezone(zone);
    let offset = DayOfWeek::from(now_in_zone.weekday()).days_until(day);
    let date = now_in_zone.date_naive() + Days::new(offset as u64);

    let candidate = resolve_local(zone, date.and_time(time.as_naive()))?;
    if candidate.with_timezone(&Utc) >= floor_to_minute(now) {
        return Ok(candidate);
    }

    let next_week = date + Days::new(7);
    resolve_local(zone, next_week.and_time(time.as_naive()))
}

fn floor_to_minute(at: DateTime<Utc>) -> DateTime<Utc> {
    at.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(at)
}

/// Convert a weekly slot in `source` into the viewer's `target` zone.
pub fn project_to_local(
    day: DayOfWeek,
    time: TimeOfDay,
    source: &Tz,
    target: &Tz,
    now: DateTime<Utc>,
) -> Result<LocalBroadcastTime, ProjectionError> {
    let anchored = next_occurrence(day, time, source, now)?;
    Ok(LocalBroadcastTime::from_local(anchored.with_timezone(target)))
}

/// Convert an absolute UTC epoch (seconds) into the viewer's zone.
pub fn project_from_epoch(
    epoch_seconds: i64,
    target: &Tz,
) -> Result<LocalBroadcastTime, ProjectionError> {
    let instant = DateTime::<Utc>::from_timestamp(epoch_seconds, 0)
        .ok_or(ProjectionError::InvalidEpoch(epoch_seconds))?;
    Ok(LocalBroadcastTime::from_local(instant.with_timezone(target)))
}

/// Look up an IANA zone name, falling back to UTC.
pub fn parse_zone(name: &str) -> Tz {
    match name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            tracing::warn!(zone = name, "unknown time zone, using UTC");
            chrono_tz::UTC
        }
    }
}

/// The zone the operating system reports, or UTC.
pub fn system_zone() -> Tz {
    match iana_time_zone::get_timezone() {
        Ok(name) => parse_zone(&name),
        Err(e) => {
            tracing::debug!(error = %e, "could not detect system time zone");
            chrono_tz::UTC
        }
    }
}

/// Offset label like `+09:00` for a zone at a given instant.
pub fn offset_label(zone: &Tz, at: DateTime<Utc>) -> String {
    at.with_timezone(zone).format("%:z").to_string()
}
