//! Orchestration over both providers.
//!
//! The app fetches Provider A and Provider B concurrently, reconciles the
//! results, and renders them through one [`RenderPass`].

use crate::api::{AniListClient, JikanClient, PageInfo, PageQuery, ProviderClient};
use crate::clock::{Clock, SystemClock};
use crate::errors::FetchError;
use crate::reconcile::{reconcile, ReconciledTitle, SourceRecord};
use crate::schedule::{
    CalendarEventOccurrence, CalendarRecurrenceRule, RenderPass, WeekLayout,
};
use crate::storage::KeyValueStore;
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Reconciled titles for one page request
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub titles: Vec<ReconciledTitle>,
    pub provider_a_page: PageInfo,
    pub provider_b_page: PageInfo,
    /// Provider failures that were tolerated because the other provider answered
    pub failures: Vec<FetchError>,
}

impl Catalog {
    pub fn has_next_page(&self) -> bool {
        self.provider_a_page.has_next_page || self.provider_b_page.has_next_page
    }
}

/// Everything a renderer needs for one pass
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleView {
    pub zone: String,
    pub occurrences: Vec<CalendarEventOccurrence>,
    pub rules: Vec<CalendarRecurrenceRule>,
    /// Rule id -> on air right now
    pub live: HashMap<String, bool>,
}

pub struct App {
    provider_a: Arc<dyn ProviderClient>,
    provider_b: Arc<dyn ProviderClient>,
    clock: Arc<dyn Clock>,
}

impl App {
    pub fn new(
        provider_a: Arc<dyn ProviderClient>,
        provider_b: Arc<dyn ProviderClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            provider_a,
            provider_b,
            clock,
        }
    }

    /// Jikan and AniList against their public endpoints.
    pub fn with_store(store: Arc<dyn KeyValueStore>) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self::new(
            Arc::new(JikanClient::new(store.clone(), clock.clone())),
            Arc::new(AniListClient::new(store, clock.clone())),
            clock,
        )
    }

    /// Drop every cached provider response.
    pub fn clear_caches(&self) {
        self.provider_a.clear_cache();
        self.provider_b.clear_cache();
        info!("provider caches cleared");
    }

    /// Snapshot "now" for the given viewer zone.
    pub fn render_pass(&self, zone: Tz) -> RenderPass {
        RenderPass::capture(self.clock.as_ref(), zone)
    }

    /// Fetch one page from both providers and reconcile it.
    ///
    /// One provider failing is tolerated; the error is only returned when
    /// neither answered.
    pub async fn load_catalog(&self, query: &PageQuery, page: u32) -> Result<Catalog, FetchError> {
        let (a, b) = futures::join!(
            self.provider_a.fetch_page(query, page),
            self.provider_b.fetch_page(query, page)
        );

        let mut catalog = Catalog::default();
        let (records_a, records_b) = match (a, b) {
            (Err(e), Err(_)) => return Err(e),
            (Ok(a), Ok(b)) => {
                catalog.provider_a_page = a.page_info;
                catalog.provider_b_page = b.page_info;
                (a.records, b.records)
            }
            (Ok(a), Err(e)) | (Err(e), Ok(a)) => {
                warn!(
                    provider = %e.provider(),
                    error = %e,
                    "provider unavailable, continuing with one source"
                );
                let records = a.records;
                if e.provider() == self.provider_a.provider() {
                    catalog.provider_b_page = a.page_info;
                    catalog.failures.push(e);
                    (Vec::new(), records)
                } else {
                    catalog.provider_a_page = a.page_info;
                    catalog.failures.push(e);
                    (records, Vec::new())
                }
            }
        };

        catalog.titles = reconcile(&records_a, &records_b);
        info!(
            provider_a = records_a.len(),
            provider_b = records_b.len(),
            reconciled = catalog.titles.len(),
            "catalog loaded"
        );
        Ok(catalog)
    }

    /// Look one title up in both providers.
    pub async fn lookup(&self, identity_key: u32) -> Option<ReconciledTitle> {
        let (a, b) = futures::join!(
            self.provider_a.fetch_by_id(identity_key),
            self.provider_b.fetch_by_id(identity_key)
        );
        let a = collect_lookup(identity_key, a);
        let b = collect_lookup(identity_key, b);
        reconcile(&a, &b).into_iter().next()
    }

    /// Selected titles in selection order.
    ///
    /// Titles found in the seasonal catalog are taken from it; the rest are
    /// looked up one by one. Ids neither provider can schedule are skipped.
    pub async fn load_selected(&self, selected: &[u32]) -> Vec<ReconciledTitle> {
        if selected.is_empty() {
            return Vec::new();
        }

        let seasonal = match self.load_catalog(&PageQuery::Seasonal, 1).await {
            Ok(catalog) => catalog.titles,
            Err(e) => {
                warn!(error = %e, "seasonal catalog unavailable, looking titles up individually");
                Vec::new()
            }
        };
        let mut by_key: HashMap<u32, ReconciledTitle> =
            seasonal.into_iter().map(|t| (t.identity_key, t)).collect();

        let mut titles = Vec::with_capacity(selected.len());
        for &key in selected {
            let title = match by_key.remove(&key) {
                Some(title) => Some(title),
                None => self.lookup(key).await,
            };
            match title {
                Some(title) => titles.push(title),
                None => warn!(identity_key = key, "selected title has no schedule, skipping"),
            }
        }
        titles
    }
}

fn collect_lookup(
    identity_key: u32,
    result: Result<Option<SourceRecord>, FetchError>,
) -> Vec<SourceRecord> {
    match result {
        Ok(record) => record.into_iter().collect(),
        Err(e) => {
            warn!(identity_key, provider = %e.provider(), error = %e, "lookup failed");
            Vec::new()
        }
    }
}

/// Render titles through one pass: fixed occurrences for the current week,
/// recurrence rules, and their live status. Slots before the layout's first
/// hour are left out of both.
pub fn build_schedule(
    pass: &RenderPass,
    titles: &[ReconciledTitle],
    layout: WeekLayout,
) -> ScheduleView {
    let occurrences = pass.week_occurrences(titles, layout);
    let mut rules = pass.recurrence_rules(titles);
    rules.retain(|rule| layout.shows(rule.start_time));
    let live = pass.live_status(&rules);
    ScheduleView {
        zone: pass.zone().name().to_string(),
        occurrences,
        rules,
        live,
    }
}
