use crate::schedule::WeekLayout;
use crate::timezone;
use crate::weekday::{DayOfWeek, TimeOfDay};
use chrono_tz::Tz;
use directories::ProjectDirs;
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.json";

/// Clock style for displayed times
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeFormat {
    #[default]
    #[serde(rename = "24h")]
    TwentyFourHour,
    #[serde(rename = "12h")]
    TwelveHour,
}

impl TimeFormat {
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "24h" => Some(TimeFormat::TwentyFourHour),
            "12h" => Some(TimeFormat::TwelveHour),
            _ => None,
        }
    }

    pub fn format(&self, time: TimeOfDay) -> String {
        match self {
            TimeFormat::TwentyFourHour => time.to_string(),
            TimeFormat::TwelveHour => time.as_naive().format("%-I:%M %p").to_string(),
        }
    }
}

/// How the calendar grid is laid out
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase", from = "RawPreferences")]
pub struct CalendarPreferences {
    pub time_format: TimeFormat,
    /// 0 = Sunday
    pub week_start: u8,
    /// First hour shown, 0-23
    pub start_hour: u8,
}

impl Default for CalendarPreferences {
    fn default() -> Self {
        Self {
            time_format: TimeFormat::TwentyFourHour,
            week_start: 1,
            start_hour: 8,
        }
    }
}

impl CalendarPreferences {
    pub fn week_start_day(&self) -> DayOfWeek {
        DayOfWeek::from_index(self.week_start).unwrap_or(DayOfWeek::Monday)
    }

    pub fn layout(&self) -> WeekLayout {
        WeekLayout {
            week_start: self.week_start_day(),
            start_hour: u32::from(self.start_hour),
        }
    }
}

/// Whatever was on disk; anything unusable falls back to the default.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPreferences {
    #[serde(default)]
    time_format: serde_json::Value,
    #[serde(default)]
    week_start: serde_json::Value,
    #[serde(default)]
    start_hour: serde_json::Value,
}

fn clamp_number(value: &serde_json::Value, min: i64, max: i64, default: u8) -> u8 {
    match value.as_f64().filter(|n| n.is_finite()) {
        Some(n) => (n as i64).clamp(min, max) as u8,
        None => default,
    }
}

impl From<RawPreferences> for CalendarPreferences {
    fn from(raw: RawPreferences) -> Self {
        let defaults = CalendarPreferences::default();
        Self {
            time_format: raw
                .time_format
                .as_str()
                .and_then(TimeFormat::from_label)
                .unwrap_or(defaults.time_format),
            week_start: clamp_number(&raw.week_start, 0, 6, defaults.week_start),
            start_hour: clamp_number(&raw.start_hour, 0, 23, defaults.start_hour),
        }
    }
}

/// Keep numeric ids only; duplicates are removed later.
fn lenient_ids<'de, D>(deserializer: D) -> Result<Vec<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Option::<Vec<serde_json::Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(values
        .iter()
        .filter_map(|v| v.as_u64())
        .filter_map(|id| u32::try_from(id).ok())
        .collect())
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct AppConfig {
    /// IANA zone overriding the system zone
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub preferences: CalendarPreferences,
    /// Selected catalog ids, in the order they were added
    #[serde(default, deserialize_with = "lenient_ids")]
    pub selected: Vec<u32>,
}

impl AppConfig {
    pub fn config_dir() -> Option<PathBuf> {
        ProjectDirs::from("com", "aniseason", "anime-season").map(|p| p.config_dir().to_path_buf())
    }

    pub fn default_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join(CONFIG_FILE))
    }

    pub fn load() -> Result<Self, anyhow::Error> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(AppConfig::default()),
        }
    }

    /// Read a config file; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, anyhow::Error> {
        if !path.exists() {
            return Ok(AppConfig::default());
        }
        let content = fs::read_to_string(path)?;
        let mut config: AppConfig = serde_json::from_str(&content)?;
        config.sanitize();
        Ok(config)
    }

    pub fn save(&self) -> Result<(), anyhow::Error> {
        match Self::default_path() {
            Some(path) => self.save_to(&path),
            None => Err(anyhow::anyhow!("no config directory available")),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), anyhow::Error> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Drop duplicate selections and blank zone names.
    pub fn sanitize(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.selected.retain(|id| seen.insert(*id));
        if self.timezone.as_deref().map(str::trim).is_some_and(str::is_empty) {
            self.timezone = None;
        }
    }

    /// Returns false when the id was already selected.
    pub fn add_selected(&mut self, id: u32) -> bool {
        if self.selected.contains(&id) {
            return false;
        }
        self.selected.push(id);
        true
    }

    pub fn remove_selected(&mut self, id: u32) -> bool {
        let before = self.selected.len();
        self.selected.retain(|current| *current != id);
        self.selected.len() != before
    }

    pub fn is_selected(&self, id: u32) -> bool {
        self.selected.contains(&id)
    }

    pub fn clear_selected(&mut self) {
        self.selected.clear();
    }

    /// Resolved viewer zone; unknown names fall back to UTC.
    pub fn viewer_zone(&self) -> Tz {
        match &self.timezone {
            Some(name) => timezone::parse_zone(name),
            None => timezone::system_zone(),
        }
    }

    pub fn set_timezone(&mut self, tz: Option<String>) {
        self.timezone = tz.filter(|t| !t.trim().is_empty());
    }
}
