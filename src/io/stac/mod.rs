//! Catalog query: STAC item search with paging, retry and asset signing.
//!
//! `CatalogService` is the seam between the paging logic in this module and the
//! HTTP client; `collect_scenes` pages through a search until the catalog is
//! exhausted or the item cap is reached.
pub mod client;
pub mod models;

pub use client::{StacCatalog, StacClient};
pub use models::{StacItem, StacItemCollection, StacLink, StacSearchParams};

use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::types::{BoundingBox, Scene};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("network error: {0}")]
    Network(String),
    #[error("catalog returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("invalid catalog response: {0}")]
    Parse(String),
    #[error("asset signing failed: {0}")]
    Auth(String),
    #[error("giving up after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<CatalogError>,
    },
}

impl CatalogError {
    /// Timeouts, connection failures, 429 and 5xx are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            CatalogError::Network(_) => true,
            CatalogError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// One request/response exchange with a STAC API
pub trait CatalogService {
    fn search(&self, params: &StacSearchParams) -> Result<StacItemCollection, CatalogError>;

    /// Follow a `next` link of a previous page
    fn follow_next(
        &self,
        link: &StacLink,
        params: &StacSearchParams,
    ) -> Result<StacItemCollection, CatalogError>;

    /// Fetch a single item document by URL
    fn fetch_item(&self, url: &str) -> Result<StacItem, CatalogError>;

    /// Make an asset href readable; identity for open catalogs
    fn sign_href(&self, href: &str) -> Result<String, CatalogError> {
        Ok(href.to_string())
    }
}

/// Retry budget with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): base, 2·base, 4·base, ...
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    /// Run `op`, retrying transient failures until the budget is spent.
    pub fn run<T, F>(&self, what: &str, mut op: F) -> Result<T, CatalogError>
    where
        F: FnMut() -> Result<T, CatalogError>,
    {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) if attempt >= self.max_retries => {
                    return Err(CatalogError::RetriesExhausted {
                        attempts: attempt + 1,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    attempt += 1;
                    let delay = self.delay(attempt);
                    warn!("{} failed ({}); retry {} in {:?}", what, e, attempt, delay);
                    thread::sleep(delay);
                }
            }
        }
    }
}

/// What to search for
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub aoi: BoundingBox,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub collection: String,
    pub max_cloud_cover: Option<f64>,
    pub max_items: Option<usize>,
}

/// Paging behavior
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PagingOptions {
    pub page_size: u32,
    pub page_delay: Duration,
    pub retry: RetryPolicy,
    pub sign_assets: bool,
}

impl Default for PagingOptions {
    fn default() -> Self {
        Self {
            page_size: 100,
            page_delay: Duration::from_millis(200),
            retry: RetryPolicy::default(),
            sign_assets: true,
        }
    }
}

impl SearchQuery {
    pub fn to_params(&self, page_size: u32) -> StacSearchParams {
        let mut params = StacSearchParams::new()
            .bbox(&self.aoi)
            .datetime(&self.start, &self.end)
            .collection(&self.collection)
            .limit(page_size);
        if let Some(max) = self.max_cloud_cover {
            params = params.max_cloud_cover(max);
        }
        params
    }

    fn accepts(&self, scene: &Scene) -> bool {
        match (self.max_cloud_cover, scene.cloud_cover) {
            (Some(max), Some(cc)) => cc < max,
            _ => true,
        }
    }
}

/// Page through a search and convert the items into scenes sorted by acquisition time.
pub fn collect_scenes(
    service: &dyn CatalogService,
    query: &SearchQuery,
    options: &PagingOptions,
) -> Result<Vec<Scene>, CatalogError> {
    let params = query.to_params(options.page_size);
    let cap = query.max_items.unwrap_or(usize::MAX);
    let mut scenes: Vec<Scene> = Vec::new();
    let mut page = options.retry.run("STAC search", || service.search(&params))?;
    let mut pages = 1;
    loop {
        for item in &page.features {
            if scenes.len() >= cap {
                break;
            }
            let mut scene = item.to_scene()?;
            if !query.accepts(&scene) {
                debug!("Skipping {}: cloud cover {:?}", scene.id, scene.cloud_cover);
                continue;
            }
            sign_scene(service, &mut scene, options)?;
            scenes.push(scene);
        }
        let next = match page.next_link() {
            Some(link) if scenes.len() < cap && !page.features.is_empty() => link.clone(),
            _ => break,
        };
        thread::sleep(options.page_delay);
        page = options
            .retry
            .run("STAC pagination", || service.follow_next(&next, &params))?;
        pages += 1;
    }
    scenes.sort_by(|a, b| a.datetime.cmp(&b.datetime));
    info!(
        "Catalog returned {} scene(s) in {} page(s) for {}",
        scenes.len(),
        pages,
        query.collection
    );
    Ok(scenes)
}

fn sign_scene(
    service: &dyn CatalogService,
    scene: &mut Scene,
    options: &PagingOptions,
) -> Result<(), CatalogError> {
    if !options.sign_assets {
        return Ok(());
    }
    for asset in scene.assets.values_mut() {
        let signed = options
            .retry
            .run("asset signing", || service.sign_href(&asset.href))?;
        asset.href = signed;
    }
    Ok(())
}

/// Fetch one item by URL and convert it into a (signed) scene.
pub fn fetch_scene(
    service: &dyn CatalogService,
    url: &str,
    options: &PagingOptions,
) -> Result<Scene, CatalogError> {
    let item = options.retry.run("STAC item", || service.fetch_item(url))?;
    let mut scene = item.to_scene()?;
    sign_scene(service, &mut scene, options)?;
    info!("Fetched item {} acquired {}", scene.id, scene.datetime);
    Ok(scene)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    struct FakeCatalog {
        pages: RefCell<VecDeque<Result<StacItemCollection, CatalogError>>>,
        calls: Cell<usize>,
    }

    impl FakeCatalog {
        fn new(pages: Vec<Result<StacItemCollection, CatalogError>>) -> Self {
            Self {
                pages: RefCell::new(pages.into()),
                calls: Cell::new(0),
            }
        }

        fn next(&self) -> Result<StacItemCollection, CatalogError> {
            self.calls.set(self.calls.get() + 1);
            self.pages
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(CatalogError::Parse("no more pages".into())))
        }
    }

    impl CatalogService for FakeCatalog {
        fn search(&self, _: &StacSearchParams) -> Result<StacItemCollection, CatalogError> {
            self.next()
        }

        fn follow_next(&self, _: &StacLink, _: &StacSearchParams) -> Result<StacItemCollection, CatalogError> {
            self.next()
        }

        fn fetch_item(&self, _: &str) -> Result<StacItem, CatalogError> {
            self.next()?
                .features
                .into_iter()
                .next()
                .ok_or_else(|| CatalogError::Http {
                    status: 404,
                    body: "no such item".into(),
                })
        }

        fn sign_href(&self, href: &str) -> Result<String, CatalogError> {
            Ok(format!("{}?signed", href))
        }
    }

    fn page(ids: &[(&str, &str, f64)], has_next: bool) -> StacItemCollection {
        let features: Vec<serde_json::Value> = ids
            .iter()
            .map(|(id, dt, cc)| {
                serde_json::json!({
                    "id": id,
                    "properties": {"datetime": dt, "eo:cloud_cover": cc},
                    "assets": {}
                })
            })
            .collect();
        let links = if has_next {
            serde_json::json!([{"rel": "next", "href": "https://example.com/search?page=2"}])
        } else {
            serde_json::json!([])
        };
        serde_json::from_value(serde_json::json!({
            "type": "FeatureCollection",
            "features": features,
            "links": links
        }))
        .unwrap()
    }

    fn query(max_items: Option<usize>) -> SearchQuery {
        SearchQuery {
            aoi: BoundingBox::new(10.0, 45.0, 11.0, 46.0).unwrap(),
            start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap(),
            collection: "sentinel-2-l2a".into(),
            max_cloud_cover: Some(25.0),
            max_items,
        }
    }

    fn fast() -> PagingOptions {
        PagingOptions {
            page_delay: Duration::ZERO,
            retry: RetryPolicy {
                max_retries: 2,
                base_delay: Duration::ZERO,
            },
            ..Default::default()
        }
    }

    #[test]
    fn pages_until_exhausted_and_sorts() {
        let svc = FakeCatalog::new(vec![
            Ok(page(&[("b", "2024-02-10T10:00:00Z", 1.0)], true)),
            Ok(page(&[("a", "2024-01-05T10:00:00Z", 2.0), ("c", "2024-01-20T10:00:00Z", 90.0)], false)),
        ]);
        let scenes = collect_scenes(&svc, &query(None), &fast()).unwrap();
        let ids: Vec<_> = scenes.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(svc.calls.get(), 2);
    }

    #[test]
    fn max_items_caps_paging() {
        let svc = FakeCatalog::new(vec![
            Ok(page(&[("a", "2024-01-05T10:00:00Z", 1.0), ("b", "2024-01-06T10:00:00Z", 1.0)], true)),
            Ok(page(&[("c", "2024-01-07T10:00:00Z", 1.0)], false)),
        ]);
        let scenes = collect_scenes(&svc, &query(Some(1)), &fast()).unwrap();
        assert_eq!(scenes.len(), 1);
        assert_eq!(svc.calls.get(), 1);
    }

    #[test]
    fn transient_errors_are_retried() {
        let svc = FakeCatalog::new(vec![
            Err(CatalogError::Http {
                status: 503,
                body: String::new(),
            }),
            Err(CatalogError::Network("timeout".into())),
            Ok(page(&[("a", "2024-01-05T10:00:00Z", 1.0)], false)),
        ]);
        let scenes = collect_scenes(&svc, &query(None), &fast()).unwrap();
        assert_eq!(scenes.len(), 1);
        assert_eq!(svc.calls.get(), 3);
    }

    #[test]
    fn exhausted_budget_is_fatal() {
        let svc = FakeCatalog::new(vec![
            Err(CatalogError::Http { status: 429, body: String::new() }),
            Err(CatalogError::Http { status: 429, body: String::new() }),
            Err(CatalogError::Http { status: 429, body: String::new() }),
        ]);
        let err = collect_scenes(&svc, &query(None), &fast()).unwrap_err();
        assert!(matches!(err, CatalogError::RetriesExhausted { attempts: 3, .. }));
    }

    #[test]
    fn client_errors_are_not_retried() {
        let svc = FakeCatalog::new(vec![Err(CatalogError::Http {
            status: 400,
            body: "bad bbox".into(),
        })]);
        assert!(collect_scenes(&svc, &query(None), &fast()).is_err());
        assert_eq!(svc.calls.get(), 1);
    }

    #[test]
    fn single_item_is_fetched_with_retry_and_signed() {
        let item: StacItemCollection = serde_json::from_value(serde_json::json!({
            "type": "FeatureCollection",
            "features": [{
                "id": "S2B_32TNR_20240105",
                "properties": {"datetime": "2024-01-05T10:14:09Z", "proj:epsg": 32632},
                "assets": {"red": {
                    "href": "https://example.com/B04.tif",
                    "eo:bands": [{"common_name": "red"}]
                }}
            }]
        }))
        .unwrap();
        let svc = FakeCatalog::new(vec![Err(CatalogError::Network("reset".into())), Ok(item)]);
        let scene = fetch_scene(&svc, "https://example.com/items/S2B_32TNR_20240105", &fast()).unwrap();
        assert_eq!(scene.id, "S2B_32TNR_20240105");
        assert_eq!(scene.epsg, Some(32632));
        assert_eq!(scene.assets["red"].href, "https://example.com/B04.tif?signed");
        assert_eq!(svc.calls.get(), 2);

        let missing = FakeCatalog::new(vec![Ok(page(&[], false))]);
        let err = fetch_scene(&missing, "https://example.com/items/nope", &fast()).unwrap_err();
        assert!(matches!(err, CatalogError::Http { status: 404, .. }));
    }

    #[test]
    fn backoff_doubles() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay(1), Duration::from_millis(500));
        assert_eq!(p.delay(3), Duration::from_millis(2000));
    }
}
