//! Upstream metadata providers.
//!
//! Both adapters normalize their wire formats into [`SourceRecord`]s and sit
//! behind [`ProviderClient`], so the app and tests never see provider JSON.

pub mod anilist;
pub mod jikan;

use crate::errors::{FetchError, Provider};
use crate::reconcile::SourceRecord;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use anilist::AniListClient;
pub use jikan::JikanClient;

/// Page size both providers are asked for
pub const PER_PAGE: u32 = 25;

const USER_AGENT: &str = concat!("anime-season/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// What a page request is listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageQuery {
    /// Titles airing in the current season
    Seasonal,
    /// Free-text title search among airing titles
    Search(String),
}

impl PageQuery {
    /// A search with no visible characters; answered without a request.
    pub fn is_blank(&self) -> bool {
        matches!(self, PageQuery::Search(q) if q.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub current_page: u32,
    pub has_next_page: bool,
    pub last_page: u32,
    pub total: u32,
}

impl Default for PageInfo {
    fn default() -> Self {
        Self {
            current_page: 1,
            has_next_page: false,
            last_page: 1,
            total: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPage {
    pub records: Vec<SourceRecord>,
    pub page_info: PageInfo,
}

impl NormalizedPage {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// A metadata provider the app can list and look titles up in.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn provider(&self) -> Provider;

    async fn fetch_page(&self, query: &PageQuery, page: u32) -> Result<NormalizedPage, FetchError>;

    /// Look a title up by its catalog id; `Ok(None)` when the provider has no such title.
    async fn fetch_by_id(&self, identity_key: u32) -> Result<Option<SourceRecord>, FetchError>;

    /// Forget cached responses. Clients without a cache have nothing to do.
    fn clear_cache(&self) {}
}

/// Broadcast season, named the way AniList's `MediaSeason` enum spells it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Season {
    Winter,
    Spring,
    Summer,
    Fall,
}

impl Season {
    pub fn from_month(month: u32) -> Self {
        match month {
            1..=3 => Season::Winter,
            4..=6 => Season::Spring,
            7..=9 => Season::Summer,
            _ => Season::Fall,
        }
    }

    /// Season and year containing `now`.
    pub fn current(now: DateTime<Utc>) -> (Self, i32) {
        (Self::from_month(now.month()), now.year())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Season::Winter => "WINTER",
            Season::Spring => "SPRING",
            Season::Summer => "SUMMER",
            Season::Fall => "FALL",
        }
    }
}

impl std::fmt::Display for Season {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backoff for throttled requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Wait before retrying after `attempt` (0-based). A server-supplied
    /// `Retry-After` takes precedence over exponential backoff.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<u64>) -> Duration {
        match retry_after {
            Some(secs) => Duration::from_secs(secs),
            None => self.base_delay.saturating_mul(2u32.saturating_pow(attempt)),
        }
    }
}

pub(crate) fn cache_key(query: &PageQuery, season: Season, year: i32, page: u32) -> String {
    match query {
        PageQuery::Seasonal => format!("seasonal:{}:{}:{}", season, year, page),
        PageQuery::Search(text) => format!("search:{}:{}", text.trim().to_lowercase(), page),
    }
}

pub(crate) fn by_id_cache_key(identity_key: u32) -> String {
    format!("anime:{}", identity_key)
}

/// `Retry-After` in whole seconds, when the header is present and numeric.
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

pub(crate) fn trim_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

pub(crate) fn transport_error(provider: Provider, e: reqwest::Error) -> FetchError {
    FetchError::Transport(provider, e.to_string())
}

pub(crate) fn status_error(provider: Provider, status: reqwest::StatusCode) -> FetchError {
    FetchError::Http(
        provider,
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown").to_string(),
    )
}
