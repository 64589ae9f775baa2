//! Merging per-title records from the two upstream providers.
//!
//! Provider A (weekly text schedules) and Provider B (absolute next-airing
//! epochs plus richer metadata) are joined on the cross-provider catalog id.
//! When both know a title and B has an epoch, B's absolute timestamp wins;
//! otherwise A's broadcast text is parsed. Titles with neither are dropped.

use crate::parser::{self, ParsedBroadcast, ScoreScale};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// One provider's view of a title, normalized by its adapter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Cross-provider catalog id (MyAnimeList id)
    pub identity_key: Option<u32>,
    pub title: String,
    pub english_title: Option<String>,
    pub synopsis: Option<String>,
    pub image_url: Option<String>,
    pub url: Option<String>,
    pub status: Option<String>,
    pub episodes: Option<u32>,
    pub duration_text: Option<String>,
    pub broadcast_text: Option<String>,
    pub next_airing_epoch: Option<i64>,
    pub next_episode: Option<u32>,
    pub score_raw: Option<f64>,
    #[serde(default)]
    pub score_scale: ScoreScale,
}

/// How a reconciled title's airing time is known
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Absolute next-airing instant (UTC epoch seconds)
    Airing { epoch: i64, episode: Option<u32> },
    /// Weekly slot in the source zone, parsed from text
    Weekly(ParsedBroadcast),
}

/// The merged, provider-independent record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledTitle {
    pub identity_key: u32,
    pub title: String,
    pub english_title: Option<String>,
    pub synopsis: Option<String>,
    pub image_url: Option<String>,
    pub url: String,
    pub status: Option<String>,
    pub episodes: Option<u32>,
    /// Always on the 0-10 scale
    pub score: Option<f64>,
    pub duration_minutes: u32,
    pub broadcast_text: Option<String>,
    pub schedule: Schedule,
}

impl ReconciledTitle {
    /// English title when known, otherwise the primary title.
    pub fn display_title(&self) -> &str {
        self.english_title
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.title)
    }
}

pub fn catalog_url(identity_key: u32) -> String {
    format!("https://myanimelist.net/anime/{}", identity_key)
}

/// Merge both providers' records into one entry per identity key.
///
/// Output keeps Provider A's order, followed by titles only Provider B knows.
pub fn reconcile(
    provider_a: &[SourceRecord],
    provider_b: &[SourceRecord],
) -> Vec<ReconciledTitle> {
    let mut airing: HashMap<u32, &SourceRecord> = HashMap::new();
    let mut airing_order: Vec<u32> = Vec::new();
    for record in provider_b {
        let (Some(key), Some(_)) = (record.identity_key, record.next_airing_epoch) else {
            debug!(title = %record.title, "dropping record without catalog id or airing time");
            continue;
        };
        if airing.insert(key, record).is_none() {
            airing_order.push(key);
        }
    }

    let mut seen: HashSet<u32> = HashSet::new();
    let mut merged = Vec::new();

    for record in provider_a {
        let Some(key) = record.identity_key else {
            continue;
        };
        if seen.contains(&key) {
            continue;
        }
        // A later duplicate may still carry a usable schedule
        let title = match airing.get(&key) {
            Some(rich) => merge_airing(key, rich, Some(record)),
            None => weekly_only(key, record),
        };
        if let Some(title) = title {
            seen.insert(key);
            merged.push(title);
        }
    }

    for key in airing_order {
        if seen.insert(key) {
            if let Some(rich) = airing.get(&key) {
                merged.extend(merge_airing(key, rich, None));
            }
        }
    }

    merged
}

fn merge_airing(
    key: u32,
    rich: &SourceRecord,
    weekly: Option<&SourceRecord>,
) -> Option<ReconciledTitle> {
    let epoch = rich.next_airing_epoch?;
    let fallback = |pick: fn(&SourceRecord) -> Option<String>| -> Option<String> {
        pick(rich).or_else(|| weekly.and_then(pick))
    };

    let title = if rich.title.is_empty() {
        weekly.map(|w| w.title.clone()).unwrap_or_default()
    } else {
        rich.title.clone()
    };
    let score = parser::rescale_score(rich.score_raw, rich.score_scale)
        .or_else(|| weekly.and_then(|w| parser::rescale_score(w.score_raw, w.score_scale)));
    let duration = fallback(|r| r.duration_text.clone());

    Some(ReconciledTitle {
        identity_key: key,
        title,
        english_title: fallback(|r| r.english_title.clone()),
        synopsis: fallback(|r| r.synopsis.clone()),
        image_url: fallback(|r| r.image_url.clone()),
        url: fallback(|r| r.url.clone()).unwrap_or_else(|| catalog_url(key)),
        status: fallback(|r| r.status.clone()),
        episodes: rich.episodes.or_else(|| weekly.and_then(|w| w.episodes)),
        score,
        duration_minutes: parser::episode_minutes(duration.as_deref()),
        broadcast_text: weekly.and_then(|w| w.broadcast_text.clone()),
        schedule: Schedule::Airing {
            epoch,
            episode: rich.next_episode,
        },
    })
}

fn weekly_only(key: u32, record: &SourceRecord) -> Option<ReconciledTitle> {
    let text = record.broadcast_text.as_deref()?;
    let slot = match parser::try_parse_broadcast(text) {
        Ok(slot) => slot,
        Err(reason) => {
            warn!(title = %record.title, %reason, "skipping title with unparseable broadcast");
            return None;
        }
    };

    Some(ReconciledTitle {
        identity_key: key,
        title: record.title.clone(),
        english_title: record.english_title.clone(),
        synopsis: record.synopsis.clone(),
        image_url: record.image_url.clone(),
        url: record.url.clone().unwrap_or_else(|| catalog_url(key)),
        status: record.status.clone(),
        episodes: record.episodes,
        score: parser::rescale_score(record.score_raw, record.score_scale),
        duration_minutes: parser::episode_minutes(record.duration_text.as_deref()),
        broadcast_text: Some(text.to_string()),
        schedule: Schedule::Weekly(slot),
    })
}
