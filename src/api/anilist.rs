//! Provider B: the AniList GraphQL API.
//!
//! AniList reports an absolute next-airing timestamp per title, which makes
//! it the preferred schedule source. Only media carrying a MyAnimeList id
//! can be joined with Provider A, so listings drop everything else.

use super::{NormalizedPage, PageInfo, PageQuery, ProviderClient, RetryPolicy, Season, PER_PAGE};
use crate::cache::{CacheConfig, ResponseCache};
use crate::clock::Clock;
use crate::errors::{FetchError, Provider};
use crate::parser::{self, ScoreScale};
use crate::rate_limit::RateLimiter;
use crate::reconcile::{catalog_url, SourceRecord};
use crate::storage::KeyValueStore;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const ENDPOINT: &str = "https://graphql.anilist.co";
pub const RATE_LIMIT: Duration = Duration::from_millis(700);
pub const CACHE_STORAGE_KEY: &str = "anime-calendar:anilist-cache";
pub const RATE_LIMIT_KEY: &str = "anime-calendar:anilist-last-request";

const MEDIA_FIELDS: &str = r#"
    id
    idMal
    title { romaji english native }
    description
    coverImage { large medium }
    duration
    episodes
    status
    averageScore
    nextAiringEpisode { episode airingAt }
"#;

const PAGE_INFO_FIELDS: &str = "pageInfo { hasNextPage total currentPage lastPage }";

static SEASONAL_QUERY: Lazy<String> = Lazy::new(|| {
    format!(
        "query SeasonalAnime($season: MediaSeason!, $year: Int!, $page: Int, $perPage: Int = 25) {{
  Page(page: $page, perPage: $perPage) {{
    {}
    media(season: $season, seasonYear: $year, type: ANIME, status: RELEASING, sort: POPULARITY_DESC) {{ {} }}
  }}
}}",
        PAGE_INFO_FIELDS, MEDIA_FIELDS
    )
});

static SEARCH_QUERY: Lazy<String> = Lazy::new(|| {
    format!(
        "query SearchAnime($search: String!, $page: Int, $perPage: Int = 25) {{
  Page(page: $page, perPage: $perPage) {{
    {}
    media(search: $search, type: ANIME, status: RELEASING, sort: POPULARITY_DESC) {{ {} }}
  }}
}}",
        PAGE_INFO_FIELDS, MEDIA_FIELDS
    )
});

static BY_MAL_ID_QUERY: Lazy<String> = Lazy::new(|| {
    format!(
        "query GetAnimeByMalId($malId: Int!) {{
  Media(idMal: $malId, type: ANIME) {{ {} }}
}}",
        MEDIA_FIELDS
    )
});

#[derive(Debug, Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
    variables: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageResponse {
    pub data: PageData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageData {
    #[serde(rename = "Page")]
    pub page: AniListPage,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AniListPage {
    pub page_info: AniListPageInfo,
    #[serde(default)]
    pub media: Vec<AniListMedia>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AniListPageInfo {
    #[serde(default)]
    pub has_next_page: bool,
    pub total: Option<u32>,
    pub current_page: Option<u32>,
    pub last_page: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaResponse {
    pub data: Option<MediaData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaData {
    #[serde(rename = "Media")]
    pub media: Option<AniListMedia>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AniListMedia {
    pub id: u32,
    pub id_mal: Option<u32>,
    pub title: AniListTitle,
    pub description: Option<String>,
    pub cover_image: Option<AniListCoverImage>,
    /// Minutes per episode
    pub duration: Option<u32>,
    pub episodes: Option<u32>,
    pub status: Option<String>,
    /// 0-100
    pub average_score: Option<u32>,
    pub next_airing_episode: Option<AniListAiringEpisode>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AniListTitle {
    pub romaji: Option<String>,
    pub english: Option<String>,
    pub native: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AniListCoverImage {
    pub large: Option<String>,
    pub medium: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AniListAiringEpisode {
    pub episode: u32,
    /// Unix seconds
    pub airing_at: i64,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

impl AniListMedia {
    /// Normalize into a [`SourceRecord`]; media without a MyAnimeList id
    /// cannot be matched and yield `None`.
    pub fn into_record(self) -> Option<SourceRecord> {
        let Some(mal_id) = self.id_mal.filter(|id| *id > 0) else {
            debug!(
                anilist_id = self.id,
                title = ?self.title.romaji,
                "skipping media without MAL id"
            );
            return None;
        };

        let title = non_empty(self.title.romaji)
            .or_else(|| non_empty(self.title.native))
            .unwrap_or_else(|| "Unknown".to_string());
        let image_url = self.cover_image.and_then(|c| non_empty(c.medium).or(non_empty(c.large)));
        let duration_text = self
            .duration
            .and_then(|minutes| parser::duration_text(parser::plausible_minutes(minutes)));

        Some(SourceRecord {
            identity_key: Some(mal_id),
            title,
            english_title: non_empty(self.title.english),
            synopsis: parser::sanitize_synopsis(self.description.as_deref()),
            image_url,
            url: Some(catalog_url(mal_id)),
            status: non_empty(self.status),
            episodes: self.episodes,
            duration_text,
            broadcast_text: None,
            next_airing_epoch: self.next_airing_episode.map(|n| n.airing_at),
            next_episode: self.next_airing_episode.map(|n| n.episode),
            score_raw: self.average_score.map(f64::from),
            score_scale: ScoreScale::Hundred,
        })
    }
}

impl AniListPageInfo {
    fn page_info(&self, requested: u32) -> PageInfo {
        PageInfo {
            current_page: self.current_page.unwrap_or(requested),
            has_next_page: self.has_next_page,
            last_page: self.last_page.unwrap_or(1).max(1),
            total: self.total.unwrap_or(0),
        }
    }
}

pub struct AniListClient {
    endpoint: String,
    http: reqwest::Client,
    cache: ResponseCache,
    limiter: RateLimiter,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl AniListClient {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self::with_endpoint(ENDPOINT, store, clock)
    }

    pub fn with_endpoint(
        endpoint: &str,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache_config = CacheConfig::new(CACHE_STORAGE_KEY);
        Self {
            endpoint: super::trim_base_url(endpoint),
            http: super::http_client(),
            cache: ResponseCache::new(cache_config, store.clone(), clock.clone()),
            limiter: RateLimiter::new(RATE_LIMIT, RATE_LIMIT_KEY, store, clock.clone()),
            retry: RetryPolicy::default(),
            clock,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// POST a GraphQL query, retrying throttled and transient failures.
    /// `Ok(None)` when AniList answers 404 (unknown media).
    async fn request<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<Option<T>, FetchError> {
        let body = GraphQlRequest { query, variables };
        let mut attempt = 0;

        loop {
            let permit = self.limiter.acquire().await;
            let sent = self
                .http
                .post(&self.endpoint)
                .header(ACCEPT, "application/json")
                .json(&body)
                .send()
                .await;
            permit.release();

            let resp = match sent {
                Ok(resp) => resp,
                Err(e) if attempt < self.retry.max_retries => {
                    warn!(attempt, error = %e, "anilist request failed, retrying");
                    attempt += 1;
                    continue;
                }
                Err(e) => return Err(super::transport_error(Provider::AniList, e)),
            };

            let status = resp.status();
            let exhausted = resp
                .headers()
                .get("X-RateLimit-Remaining")
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim() == "0")
                .unwrap_or(false);

            if status == StatusCode::TOO_MANY_REQUESTS || exhausted {
                let retry_after = super::retry_after(resp.headers());
                if attempt < self.retry.max_retries {
                    let delay = self.retry.delay_for(attempt, retry_after);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "anilist throttled, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                return Err(FetchError::RateLimited(Provider::AniList, retry_after));
            }

            if status == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if status.is_server_error() && attempt < self.retry.max_retries {
                warn!(attempt, %status, "anilist server error, retrying");
                attempt += 1;
                continue;
            }
            if !status.is_success() {
                return Err(super::status_error(Provider::AniList, status));
            }

            let text = resp
                .text()
                .await
                .map_err(|e| super::transport_error(Provider::AniList, e))?;
            return serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| FetchError::Decode(Provider::AniList, e.to_string()));
        }
    }
}

#[async_trait]
impl ProviderClient for AniListClient {
    fn provider(&self) -> Provider {
        Provider::AniList
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

        let (graphql, variables) = match query {
            PageQuery::Seasonal => (
                SEASONAL_QUERY.as_str(),
                serde_json::json!({
                    "season": season,
                    "year": year,
                    "page": page,
                    "perPage": PER_PAGE,
                }),
            ),
            PageQuery::Search(text) => (
                SEARCH_QUERY.as_str(),
                serde_json::json!({ "search": text.trim(), "page": page, "perPage": PER_PAGE }),
            ),
        };

        let Some(response) = self.request::<PageResponse>(graphql, variables).await? else {
            return Ok(NormalizedPage::empty());
        };

        let page_info = response.data.page.page_info.page_info(page);
        let records: Vec<SourceRecord> = response
            .data
            .page
            .media
            .into_iter()
            .filter(|m| m.next_airing_episode.is_some())
            .filter_map(AniListMedia::into_record)
            .collect();
        debug!(kept = records.len(), "anilist page fetched");

        let normalized = NormalizedPage { records, page_info };
        self.cache.insert(&key, &normalized);
        Ok(normalized)
    }

    async fn fetch_by_id(&self, identity_key: u32) -> Result<Option<SourceRecord>, FetchError> {
        let key = super::by_id_cache_key(identity_key);
        if let Some(cached) = self.cache.get::<Option<SourceRecord>>(&key) {
            return Ok(cached);
        }

        let variables = serde_json::json!({ "malId": identity_key });
        let response = self
            .request::<MediaResponse>(BY_MAL_ID_QUERY.as_str(), variables)
            .await?;
        let record = response
            .and_then(|r| r.data)
            .and_then(|d| d.media)
            .and_then(AniListMedia::into_record);
        self.cache.insert(&key, &record);
        Ok(record)
    }
}
