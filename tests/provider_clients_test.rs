use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anime_season_lib::api::{AniListClient, JikanClient, PageQuery, ProviderClient, RetryPolicy};
use anime_season_lib::clock::{Clock, SystemClock};
use anime_season_lib::errors::{FetchError, Provider};
use anime_season_lib::storage::{KeyValueStore, MemoryStore};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn collaborators() -> (Arc<MemoryStore>, Arc<dyn Clock>) {
    (Arc::new(MemoryStore::new()), Arc::new(SystemClock))
}

fn jikan_anime(id: u32, title: &str, broadcast: Option<&str>) -> serde_json::Value {
    json!({
        "mal_id": id,
        "url": format!("https://myanimelist.net/anime/{}", id),
        "images": { "jpg": { "image_url": format!("https://cdn/{}.jpg", id) } },
        "title": title,
        "title_english": null,
        "episodes": 12,
        "status": "Currently Airing",
        "duration": "23 min per ep",
        "score": 7.9,
        "synopsis": "Synopsis",
        "broadcast": { "day": null, "time": null, "timezone": null, "string": broadcast }
    })
}

fn anilist_media(id: u32, id_mal: Option<u32>, airing_at: Option<i64>) -> serde_json::Value {
    json!({
        "id": id,
        "idMal": id_mal,
        "title": { "romaji": format!("Romaji {}", id), "english": null, "native": null },
        "description": "<b>Bold</b> plot",
        "coverImage": { "large": null, "medium": "https://img/m.jpg" },
        "duration": 24,
        "episodes": 12,
        "status": "RELEASING",
        "averageScore": 81,
        "nextAiringEpisode": airing_at.map(|at| json!({ "episode": 3, "airingAt": at }))
    })
}

fn anilist_page(media: Vec<serde_json::Value>) -> serde_json::Value {
    json!({
        "data": {
            "Page": {
                "pageInfo": { "hasNextPage": true, "total": 60, "currentPage": 1, "lastPage": 3 },
                "media": media
            }
        }
    })
}

#[tokio::test]
async fn test_jikan_seasonal_keeps_titles_with_broadcast_and_caches() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/seasons/now"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                jikan_anime(1, "Weekly", Some("Saturdays at 01:00 (JST)")),
                jikan_anime(2, "Movie", None)
            ],
            "pagination": {
                "last_visible_page": 2,
                "has_next_page": true,
                "current_page": 1,
                "items": { "count": 2, "total": 30, "per_page": 25 }
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (store, clock) = collaborators();
    let client = JikanClient::with_base_url(&server.uri(), store.clone(), clock);

    let page = client.fetch_page(&PageQuery::Seasonal, 1).await.expect("page");
    assert_eq!(page.records.len(), 1);
    assert_eq!(page.records[0].identity_key, Some(1));
    assert_eq!(page.records[0].broadcast_text.as_deref(), Some("Saturdays at 01:00 (JST)"));
    assert!(page.page_info.has_next_page);
    assert_eq!(page.page_info.total, 30);

    // Served from cache; the mock expects exactly one request
    let again = client.fetch_page(&PageQuery::Seasonal, 1).await.expect("cached page");
    assert_eq!(again, page);
    assert!(store.get("anime-calendar:jikan-cache").is_some());
    assert!(store.get("anime-calendar:jikan-last-request").is_some());
}

#[tokio::test]
async fn test_jikan_search_sends_filters_and_blank_query_skips_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/anime"))
        .and(query_param("q", "frieren"))
        .and(query_param("status", "airing"))
        .and(query_param("order_by", "popularity"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [jikan_anime(52991, "Sousou no Frieren", Some("Fridays at 23:00 (JST)"))]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (store, clock) = collaborators();
    let client = JikanClient::with_base_url(&server.uri(), store, clock);

    let page = client
        .fetch_page(&PageQuery::Search("frieren".into()), 1)
        .await
        .expect("search");
    assert_eq!(page.records.len(), 1);
    assert!(!page.page_info.has_next_page);

    let blank = client.fetch_page(&PageQuery::Search("  ".into()), 1).await.expect("blank");
    assert!(blank.records.is_empty());
}

#[tokio::test]
async fn test_jikan_by_id_and_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/anime/52991"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": jikan_anime(52991, "Sousou no Frieren", Some("Fridays at 23:00 (JST)"))
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/anime/404"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/anime/500"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/anime/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let (store, clock) = collaborators();
    let client = JikanClient::with_base_url(&server.uri(), store, clock);

    let found = client.fetch_by_id(52991).await.expect("lookup");
    assert_eq!(found.map(|r| r.title), Some("Sousou no Frieren".to_string()));
    assert_eq!(client.fetch_by_id(404).await.expect("missing"), None);

    match client.fetch_by_id(500).await {
        Err(FetchError::Http(Provider::Jikan, 500, _)) => {}
        other => panic!("expected http error, got {:?}", other),
    }
    match client.fetch_by_id(1).await {
        Err(FetchError::Decode(Provider::Jikan, _)) => {}
        other => panic!("expected decode error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_anilist_seasonal_drops_unmatchable_media() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "variables": { "page": 1, "perPage": 25 } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(anilist_page(vec![
            anilist_media(10, Some(100), Some(1_792_771_200)),
            anilist_media(11, None, Some(1_792_771_200)),
            anilist_media(12, Some(120), None),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let (store, clock) = collaborators();
    let client = AniListClient::with_endpoint(&server.uri(), store.clone(), clock);

    let page = client.fetch_page(&PageQuery::Seasonal, 1).await.expect("page");
    assert_eq!(page.records.len(), 1);
    let record = &page.records[0];
    assert_eq!(record.identity_key, Some(100));
    assert_eq!(record.next_airing_epoch, Some(1_792_771_200));
    assert_eq!(record.synopsis.as_deref(), Some("Bold plot"));
    assert_eq!(record.duration_text.as_deref(), Some("24 min"));
    assert_eq!(page.page_info.last_page, 3);

    client.fetch_page(&PageQuery::Seasonal, 1).await.expect("cached");
    assert!(store.get("anime-calendar:anilist-cache").is_some());
}

#[tokio::test]
async fn test_anilist_retries_after_throttle() {
    let server = MockServer::start().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    Mock::given(method("POST"))
        .respond_with(move |_req: &Request| -> ResponseTemplate {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                ResponseTemplate::new(429).insert_header("Retry-After", "0")
            } else {
                ResponseTemplate::new(200).set_body_json(anilist_page(vec![anilist_media(
                    10,
                    Some(100),
                    Some(1_792_771_200),
                )]))
            }
        })
        .expect(2)
        .mount(&server)
        .await;

    let (store, clock) = collaborators();
    let client = AniListClient::with_endpoint(&server.uri(), store, clock);

    let page = client
        .fetch_page(&PageQuery::Search("frieren".into()), 1)
        .await
        .expect("page after retry");
    assert_eq!(page.records.len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_anilist_gives_up_when_still_throttled() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-RateLimit-Remaining", "0")
                .set_body_json(anilist_page(vec![])),
        )
        .expect(3)
        .mount(&server)
        .await;

    let (store, clock) = collaborators();
    let client = AniListClient::with_endpoint(&server.uri(), store, clock)
        .with_retry_policy(RetryPolicy {
            max_retries: 2,
            base_delay: Duration::ZERO,
        });

    match client.fetch_page(&PageQuery::Seasonal, 1).await {
        Err(FetchError::RateLimited(Provider::AniList, None)) => {}
        other => panic!("expected rate limit error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_anilist_by_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "variables": { "malId": 100 } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "Media": anilist_media(10, Some(100), Some(1_792_771_200)) }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "variables": { "malId": 404 } })))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "errors": [{ "message": "Not Found.", "status": 404 }],
            "data": { "Media": null }
        })))
        .mount(&server)
        .await;

    let (store, clock) = collaborators();
    let client = AniListClient::with_endpoint(&server.uri(), store, clock);

    let record = client.fetch_by_id(100).await.expect("lookup").expect("record");
    assert_eq!(record.next_episode, Some(3));
    assert_eq!(client.fetch_by_id(404).await.expect("missing"), None);
}

#[tokio::test]
async fn test_clear_cache_forces_a_fresh_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/anime"))
        .and(query_param("q", "frieren"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [jikan_anime(52991, "Sousou no Frieren", Some("Fridays at 23:00 (JST)"))]
        })))
        .expect(2)
        .mount(&server)
        .await;

    let (store, clock) = collaborators();
    let client = JikanClient::with_base_url(&server.uri(), store, clock);

    // Surrounding whitespace shares the cache entry
    client.fetch_page(&PageQuery::Search("frieren".into()), 1).await.expect("first");
    client.fetch_page(&PageQuery::Search(" frieren ".into()), 1).await.expect("cached");

    client.clear_cache();
    client.fetch_page(&PageQuery::Search("frieren".into()), 1).await.expect("refetched");
}
