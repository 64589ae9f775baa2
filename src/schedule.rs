//! Turning reconciled titles into calendar entries.
//!
//! Every computation for one rendering goes through a [`RenderPass`], which
//! pins a single "now" and viewer zone. Two output shapes exist: fixed
//! [`CalendarEventOccurrence`]s placed in the current week, and perpetual
//! [`CalendarRecurrenceRule`]s that a renderer lays onto any week.

use crate::clock::Clock;
use crate::errors::{ProjectionError, ScheduleError};
use crate::reconcile::{ReconciledTitle, Schedule};
use crate::timezone::{self, LocalBroadcastTime, SOURCE_ZONE};
use crate::weekday::{DayOfWeek, TimeOfDay};
use chrono::{DateTime, Datelike, Duration, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

/// One dated airing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalendarEventOccurrence {
    pub id: String,
    pub title: String,
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
    pub source_ref: u32,
}

/// A date-less weekly rule in the viewer's zone
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalendarRecurrenceRule {
    pub id: String,
    pub title: String,
    /// Sunday = 0
    pub days_of_week: Vec<u8>,
    pub start_time: TimeOfDay,
    pub duration_minutes: u32,
    pub source_ref: u32,
}

impl CalendarRecurrenceRule {
    /// Whether an episode is on air at `now_local`.
    ///
    /// Only today's slot is considered: the rule is live when today's weekday
    /// is in the rule and `now` is within `[start, start + duration]`.
    pub fn is_airing(&self, now_local: &DateTime<Tz>) -> bool {
        let today = DayOfWeek::from(now_local.weekday());
        if !self.days_of_week.contains(&today.index()) {
            return false;
        }

        let zone = now_local.timezone();
        let naive_start = now_local.date_naive().and_time(self.start_time.as_naive());
        let Ok(start) = timezone::resolve_local(&zone, naive_start) else {
            return false;
        };
        let end = start + Duration::minutes(self.duration_minutes as i64);
        *now_local >= start && *now_local <= end
    }
}

pub fn event_id(identity_key: u32) -> String {
    format!("anime-{}", identity_key)
}

/// Which part of the week a calendar grid shows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekLayout {
    pub week_start: DayOfWeek,
    /// Slots starting before this hour are hidden
    pub start_hour: u32,
}

impl WeekLayout {
    pub fn shows(&self, time: TimeOfDay) -> bool {
        time.hour() >= self.start_hour
    }
}

/// The `[start, end)` bounds of the viewer's current week.
pub fn week_bounds(
    now_local: &DateTime<Tz>,
    week_start: DayOfWeek,
) -> Result<(DateTime<Tz>, DateTime<Tz>), ProjectionError> {
    let back = week_start.days_until(DayOfWeek::from(now_local.weekday()));
    let first = now_local.date_naive() - chrono::Days::new(back as u64);
    let next = first + chrono::Days::new(7);
    let zone = now_local.timezone();
    let start = timezone::resolve_local(&zone, first.and_time(chrono::NaiveTime::MIN))?;
    let end = timezone::resolve_local(&zone, next.and_time(chrono::NaiveTime::MIN))?;
    Ok((start, end))
}

/// Next start of a local weekly slot, counted from `now`'s local weekday.
///
/// Shares the rolling rule with [`timezone::next_occurrence`]: a slot earlier
/// today is placed next week rather than in the past.
pub fn materialize_this_week(
    day: DayOfWeek,
    time: TimeOfDay,
    zone: &Tz,
    now: DateTime<Utc>,
) -> Result<DateTime<Tz>, ProjectionError> {
    timezone::next_occurrence(day, time, zone, now)
}

/// Perpetual weekly rule for a projected slot.
pub fn recurrence_rule(
    title: &ReconciledTitle,
    local: &LocalBroadcastTime,
) -> CalendarRecurrenceRule {
    CalendarRecurrenceRule {
        id: event_id(title.identity_key),
        title: title.display_title().to_string(),
        days_of_week: vec![local.local_day.index()],
        start_time: local.local_time,
        duration_minutes: title.duration_minutes,
        source_ref: title.identity_key,
    }
}

/// A single "now" and viewer zone shared by one rendering
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderPass {
    now: DateTime<Utc>,
    zone: Tz,
}

impl RenderPass {
    pub fn new(now: DateTime<Utc>, zone: Tz) -> Self {
        Self { now, zone }
    }

    pub fn capture(clock: &dyn Clock, zone: Tz) -> Self {
        Self::new(clock.now(), zone)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn zone(&self) -> Tz {
        self.zone
    }

    pub fn now_local(&self) -> DateTime<Tz> {
        self.now.with_timezone(&self.zone)
    }

    /// Project a title's schedule into the viewer's zone.
    pub fn local_broadcast(
        &self,
        schedule: &Schedule,
    ) -> Result<LocalBroadcastTime, ProjectionError> {
        match schedule {
            Schedule::Airing { epoch, .. } => timezone::project_from_epoch(*epoch, &self.zone),
            Schedule::Weekly(slot) => {
                timezone::project_to_local(slot.day, slot.time, &SOURCE_ZONE, &self.zone, self.now)
            }
        }
    }

    pub fn materialize_this_week(
        &self,
        day: DayOfWeek,
        time: TimeOfDay,
    ) -> Result<DateTime<Tz>, ProjectionError> {
        materialize_this_week(day, time, &self.zone, self.now)
    }

    fn within_week(&self, at: &DateTime<Tz>) -> bool {
        let at = at.with_timezone(&Utc);
        at >= self.now && at < self.now + Duration::days(7)
    }

    /// Fixed occurrence for one title.
    ///
    /// A known next-airing instant inside the coming week is used as is;
    /// anything else is placed by its local weekday and time.
    pub fn occurrence(
        &self,
        title: &ReconciledTitle,
    ) -> Result<CalendarEventOccurrence, ScheduleError> {
        let local = self.local_broadcast(&title.schedule)?;
        let start = match title.schedule {
            Schedule::Airing { .. } if self.within_week(&local.local_anchor) => local.local_anchor,
            _ => self.materialize_this_week(local.local_day, local.local_time)?,
        };
        let end = start + Duration::minutes(title.duration_minutes as i64);
        Ok(CalendarEventOccurrence {
            id: event_id(title.identity_key),
            title: title.display_title().to_string(),
            start,
            end,
            source_ref: title.identity_key,
        })
    }

    /// Fixed occurrences for a batch; failures are logged and skipped.
    pub fn occurrences<'a, I>(&self, titles: I) -> Vec<CalendarEventOccurrence>
    where
        I: IntoIterator<Item = &'a ReconciledTitle>,
    {
        titles
            .into_iter()
            .filter_map(|title| match self.occurrence(title) {
                Ok(event) => Some(event),
                Err(reason) => {
                    warn!(title = %title.title, %reason, "skipping occurrence");
                    None
                }
            })
            .collect()
    }

    /// Fixed occurrences that land in the viewer's current week, from the
    /// layout's first hour on.
    pub fn week_occurrences<'a, I>(
        &self,
        titles: I,
        layout: WeekLayout,
    ) -> Vec<CalendarEventOccurrence>
    where
        I: IntoIterator<Item = &'a ReconciledTitle>,
    {
        let bounds = match week_bounds(&self.now_local(), layout.week_start) {
            Ok(bounds) => Some(bounds),
            Err(reason) => {
                warn!(%reason, "could not resolve the current week, keeping every occurrence");
                None
            }
        };
        self.occurrences(titles)
            .into_iter()
            .filter(|o| bounds.map_or(true, |(start, end)| o.start >= start && o.start < end))
            .filter(|o| layout.shows(TimeOfDay::from_naive(o.start.time())))
            .collect()
    }

    pub fn rule(&self, title: &ReconciledTitle) -> Result<CalendarRecurrenceRule, ScheduleError> {
        let local = self.local_broadcast(&title.schedule)?;
        Ok(recurrence_rule(title, &local))
    }

    /// Recurrence rules for a batch; failures are logged and skipped.
    pub fn recurrence_rules<'a, I>(&self, titles: I) -> Vec<CalendarRecurrenceRule>
    where
        I: IntoIterator<Item = &'a ReconciledTitle>,
    {
        titles
            .into_iter()
            .filter_map(|title| match self.rule(title) {
                Ok(rule) => Some(rule),
                Err(reason) => {
                    warn!(title = %title.title, %reason, "skipping recurrence rule");
                    None
                }
            })
            .collect()
    }

    /// Rule id -> currently on air, all against this pass's "now".
    pub fn live_status(&self, rules: &[CalendarRecurrenceRule]) -> HashMap<String, bool> {
        let now_local = self.now_local();
        rules
            .iter()
            .map(|rule| (rule.id.clone(), rule.is_airing(&now_local)))
            .collect()
    }
}
