//! Provider A: the Jikan REST API (MyAnimeList mirror).
//!
//! Jikan only knows weekly broadcast text in JST, so its records feed the
//! text path of the reconciler. Listings keep only titles that have a
//! broadcast string.

use super::{NormalizedPage, PageInfo, PageQuery, ProviderClient, Season};
use crate::cache::{CacheConfig, ResponseCache};
use crate::clock::Clock;
use crate::errors::{FetchError, Provider};
use crate::parser::ScoreScale;
use crate::rate_limit::RateLimiter;
use crate::reconcile::SourceRecord;
use crate::storage::KeyValueStore;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const BASE_URL: &str = "https://api.jikan.moe/v4";
/// Jikan allows roughly two requests per second
pub const RATE_LIMIT: Duration = Duration::from_millis(500);
pub const CACHE_STORAGE_KEY: &str = "anime-calendar:jikan-cache";
pub const RATE_LIMIT_KEY: &str = "anime-calendar:jikan-last-request";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JikanResponse<T> {
    pub data: T,
    pub pagination: Option<JikanPagination>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JikanPagination {
    #[serde(default)]
    pub last_visible_page: u32,
    #[serde(default)]
    pub has_next_page: bool,
    pub current_page: Option<u32>,
    pub items: Option<JikanItems>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JikanItems {
    pub count: u32,
    pub total: u32,
    pub per_page: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JikanAnime {
    pub mal_id: u32,
    pub title: String,
    pub title_english: Option<String>,
    pub title_japanese: Option<String>,
    pub images: Option<JikanImages>,
    pub synopsis: Option<String>,
    pub broadcast: Option<JikanBroadcast>,
    pub url: Option<String>,
    pub score: Option<f64>,
    pub episodes: Option<u32>,
    pub status: Option<String>,
    /// e.g. "24 min per ep"
    pub duration: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JikanImages {
    pub jpg: Option<JikanImageSet>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JikanImageSet {
    pub image_url: Option<String>,
    pub small_image_url: Option<String>,
    pub large_image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JikanBroadcast {
    pub day: Option<String>,
    pub time: Option<String>,
    pub timezone: Option<String>,
    /// e.g. "Saturdays at 01:00 (JST)"
    pub string: Option<String>,
}

impl JikanAnime {
    pub fn broadcast_text(&self) -> Option<&str> {
        self.broadcast
            .as_ref()
            .and_then(|b| b.string.as_deref())
            .filter(|s| !s.trim().is_empty())
    }

    pub fn into_record(self) -> SourceRecord {
        let broadcast_text = self.broadcast_text().map(str::to_string);
        let image_url = self
            .images
            .and_then(|i| i.jpg)
            .and_then(|jpg| jpg.image_url.or(jpg.large_image_url));

        SourceRecord {
            identity_key: Some(self.mal_id),
            title: self.title,
            english_title: self.title_english.filter(|t| !t.is_empty()),
            synopsis: self.synopsis.filter(|s| !s.is_empty()),
            image_url,
            url: self.url,
            status: self.status,
            episodes: self.episodes,
            duration_text: self.duration,
            broadcast_text,
            next_airing_epoch: None,
            next_episode: None,
            score_raw: self.score,
            score_scale: ScoreScale::Ten,
        }
    }
}

impl JikanPagination {
    fn page_info(&self, requested: u32) -> PageInfo {
        PageInfo {
            current_page: self.current_page.unwrap_or(requested),
            has_next_page: self.has_next_page,
            last_page: self.last_visible_page.max(1),
            total: self.items.as_ref().map(|i| i.total).unwrap_or(0),
        }
    }
}

pub struct JikanClient {
    base_url: String,
    http: reqwest::Client,
    cache: ResponseCache,
    limiter: RateLimiter,
    clock: Arc<dyn Clock>,
}

impl JikanClient {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self::with_base_url(BASE_URL, store, clock)
    }

    pub fn with_base_url(
        base_url: &str,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache_config = CacheConfig::new(CACHE_STORAGE_KEY);
        Self {
            base_url: super::trim_base_url(base_url),
            http: super::http_client(),
            cache: ResponseCache::new(cache_config, store.clone(), clock.clone()),
            limiter: RateLimiter::new(RATE_LIMIT, RATE_LIMIT_KEY, store, clock.clone()),
            clock,
        }
    }

    /// GET `path`; `Ok(None)` on 404.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        let permit = self.limiter.acquire().await;
        debug!(%url, "jikan request");

        let resp = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| super::transport_error(Provider::Jikan, e))?;
        permit.release();

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = super::retry_after(resp.headers());
            return Err(FetchError::RateLimited(Provider::Jikan, retry_after));
        }
        if !status.is_success() {
            return Err(super::status_error(Provider::Jikan, status));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| super::transport_error(Provider::Jikan, e))?;
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| FetchError::Decode(Provider::Jikan, e.to_string()))
    }
}

#[async_trait]
impl ProviderClient for JikanClient {
    fn provider(&self) -> Provider {
        Provider::Jikan
    }

    fn clear_cache(&self) {
        self.cache.clear();
    }

    async fn fetch_page(&self, query: &PageQuery, page: u32) -> Result<NormalizedPage, FetchError> {
        if query.is_blank() {
            return Ok(NormalizedPage::empty());
        }
        let page = page.max(1);

        let (season, year) = Season::current(self.clock.now());
        let key = super::cache_key(query, season, year, page);
        if let Some(cached) = self.cache.get::<NormalizedPage>(&key) {
            return Ok(cached);
        }

        let response: Option<JikanResponse<Vec<JikanAnime>>> = match query {
            PageQuery::Seasonal => {
                self.get_json("/seasons/now", &[("page", page.to_string())])
                    .await?
            }
            PageQuery::Search(text) => {
                let params = [
                    ("q", text.trim().to_string()),
                    ("status", "airing".to_string()),
                    ("order_by", "popularity".to_string()),
                    ("page", page.to_string()),
                ];
                self.get_json("/anime", &params).await?
            }
        };
        let Some(response) = response else {
            return Ok(NormalizedPage::empty());
        };

        let page_info = response
            .pagination
            .as_ref()
            .map(|p| p.page_info(page))
            .unwrap_or_default();
        let fetched = response.data.len();
        let records: Vec<SourceRecord> = response
            .data
            .into_iter()
            .filter(|anime| anime.broadcast_text().is_some())
            .map(JikanAnime::into_record)
            .collect();
        debug!(fetched, kept = records.len(), "jikan page fetched");

        let normalized = NormalizedPage { records, page_info };
        self.cache.insert(&key, &normalized);
        Ok(normalized)
    }

    async fn fetch_by_id(&self, identity_key: u32) -> Result<Option<SourceRecord>, FetchError> {
        let key = super::by_id_cache_key(identity_key);
        if let Some(cached) = self.cache.get::<Option<SourceRecord>>(&key) {
            return Ok(cached);
        }

        let response: Option<JikanResponse<JikanAnime>> = self
            .get_json(&format!("/anime/{}", identity_key), &[])
            .await?;
        let record = response.map(|r| r.data.into_record());
        self.cache.insert(&key, &record);
        Ok(record)
    }
}
