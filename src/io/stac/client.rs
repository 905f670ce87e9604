//! Blocking STAC client for Planetary Computer, Earth Search and custom endpoints.
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::models::{StacItem, StacItemCollection, StacLink, StacSearchParams};
use super::{CatalogError, CatalogService};

const PC_SIGN_URL: &str = "https://planetarycomputer.microsoft.com/api/sas/v1/sign";

/// Well-known STAC catalogs plus custom endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StacCatalog {
    PlanetaryComputer,
    EarthSearch,
    /// Any STAC API root URL
    Custom(String),
}

impl StacCatalog {
    /// Full `POST /search` URL for this catalog.
    pub fn search_url(&self) -> String {
        match self {
            Self::PlanetaryComputer => {
                "https://planetarycomputer.microsoft.com/api/stac/v1/search".to_string()
            }
            Self::EarthSearch => "https://earth-search.aws.element84.com/v1/search".to_string(),
            Self::Custom(base) => {
                let base = base.trim_end_matches('/');
                if base.ends_with("/search") {
                    base.to_string()
                } else {
                    format!("{}/search", base)
                }
            }
        }
    }

    /// `pc`/`planetary-computer`, `es`/`earth-search`, anything else is a URL.
    pub fn from_str_or_url(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pc" | "planetary-computer" | "planetarycomputer" => Self::PlanetaryComputer,
            "es" | "earth-search" | "earthsearch" => Self::EarthSearch,
            _ => Self::Custom(s.to_string()),
        }
    }

    /// Whether asset hrefs need SAS token signing.
    pub fn needs_signing(&self) -> bool {
        matches!(self, Self::PlanetaryComputer)
    }
}

/// Body for a POST `next` link: the link body alone, or merged over the original request.
pub fn next_body(link: &StacLink, original: &StacSearchParams) -> Result<Value, CatalogError> {
    let mut base =
        serde_json::to_value(original).map_err(|e| CatalogError::Parse(format!("serializing params: {e}")))?;
    match (&link.body, link.merge.unwrap_or(false)) {
        (Some(body), true) => {
            if let (Some(base_obj), Some(link_obj)) = (base.as_object_mut(), body.as_object()) {
                for (k, v) in link_obj {
                    base_obj.insert(k.clone(), v.clone());
                }
            }
            Ok(base)
        }
        (Some(body), false) => Ok(body.clone()),
        (None, _) => Ok(base),
    }
}

/// Blocking client for STAC Item Search.
pub struct StacClient {
    catalog: StacCatalog,
    client: Client,
}

impl StacClient {
    pub fn new(catalog: StacCatalog, timeout: Duration) -> Result<Self, CatalogError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("cloudmosaic/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CatalogError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { catalog, client })
    }

    pub fn catalog(&self) -> &StacCatalog {
        &self.catalog
    }

    fn read_json<T: DeserializeOwned>(resp: reqwest::Result<Response>) -> Result<T, CatalogError> {
        let resp = resp.map_err(|e| CatalogError::Network(format!("request failed: {e}")))?;
        let status = resp.status();
        let body = resp
            .text()
            .map_err(|e| CatalogError::Network(format!("reading response body: {e}")))?;
        if !status.is_success() {
            return Err(CatalogError::Http {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }
        serde_json::from_str(&body).map_err(|e| CatalogError::Parse(format!("parsing STAC response: {e}")))
    }
}

impl CatalogService for StacClient {
    fn search(&self, params: &StacSearchParams) -> Result<StacItemCollection, CatalogError> {
        let url = self.catalog.search_url();
        debug!("POST {}", url);
        Self::read_json(self.client.post(&url).json(params).send())
    }

    fn follow_next(
        &self,
        link: &StacLink,
        params: &StacSearchParams,
    ) -> Result<StacItemCollection, CatalogError> {
        let method = link.method.as_deref().unwrap_or("GET").to_uppercase();
        debug!("{} {}", method, link.href);
        if method == "POST" {
            let body = next_body(link, params)?;
            Self::read_json(self.client.post(&link.href).json(&body).send())
        } else {
            Self::read_json(self.client.get(&link.href).send())
        }
    }

    fn fetch_item(&self, url: &str) -> Result<StacItem, CatalogError> {
        debug!("GET {}", url);
        Self::read_json(self.client.get(url).send())
    }

    fn sign_href(&self, href: &str) -> Result<String, CatalogError> {
        if !self.catalog.needs_signing() || !href.starts_with("http") {
            return Ok(href.to_string());
        }
        let resp = self
            .client
            .get(PC_SIGN_URL)
            .query(&[("href", href)])
            .send()
            .map_err(|e| CatalogError::Network(format!("PC sign request failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(CatalogError::Http {
                status: status.as_u16(),
                body: resp.text().unwrap_or_default().chars().take(300).collect(),
            });
        }
        let body: Value = resp
            .json()
            .map_err(|e| CatalogError::Auth(format!("parsing PC sign response: {e}")))?;
        body["href"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| CatalogError::Auth("PC sign response missing 'href' field".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_search_urls() {
        assert_eq!(
            StacCatalog::EarthSearch.search_url(),
            "https://earth-search.aws.element84.com/v1/search"
        );
        assert_eq!(
            StacCatalog::Custom("https://example.com/stac/".into()).search_url(),
            "https://example.com/stac/search"
        );
        assert_eq!(
            StacCatalog::Custom("https://example.com/stac/search".into()).search_url(),
            "https://example.com/stac/search"
        );
    }

    #[test]
    fn shorthands_and_signing() {
        assert_eq!(StacCatalog::from_str_or_url("pc"), StacCatalog::PlanetaryComputer);
        assert_eq!(StacCatalog::from_str_or_url("earth-search"), StacCatalog::EarthSearch);
        assert!(StacCatalog::PlanetaryComputer.needs_signing());
        assert!(!StacCatalog::Custom("https://My-Stac.example".into()).needs_signing());
        assert_eq!(
            StacCatalog::from_str_or_url("https://My-Stac.example"),
            StacCatalog::Custom("https://My-Stac.example".into())
        );
    }

    #[test]
    fn next_body_merges_over_original() {
        let original = StacSearchParams::new().collection("sentinel-2-l2a").limit(50);
        let link: StacLink = serde_json::from_value(serde_json::json!({
            "rel": "next", "href": "https://x/search", "method": "POST",
            "body": {"token": "next:abc"}, "merge": true
        }))
        .unwrap();
        let body = next_body(&link, &original).unwrap();
        assert_eq!(body["token"], "next:abc");
        assert_eq!(body["limit"], 50);

        let replace: StacLink = serde_json::from_value(serde_json::json!({
            "rel": "next", "href": "https://x/search", "method": "POST", "body": {"token": "t"}
        }))
        .unwrap();
        let body = next_body(&replace, &original).unwrap();
        assert!(body.get("limit").is_none());
    }
}
