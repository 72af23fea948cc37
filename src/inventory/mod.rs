//! Stock-accounting API client: the catalog that maps offer identifiers to
//! human product names and purchase prices.
//!
//! The upstream is aggressively rate limited and the catalog barely changes
//! within a run window, so the full catalog is cached on disk with a TTL.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::engine::normalize;
use crate::seller::client::truncate_for_log;

const PAGE_LIMIT: usize = 1000;
const RETRY_ATTEMPTS: u32 = 8;
/// Rate-limit hints the upstream sends with a 429, in milliseconds.
const RETRY_INTERVAL_HEADERS: [&str; 2] =
    ["X-Lognex-Retry-TimeInterval", "X-Lognex-Retry-After"];

/// One catalog row: what the sheet shows next to an offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    /// Purchase price in major units (upstream stores minor units).
    pub buy_price: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct InventoryClient {
    base_url: String,
    http: Client,
    token: String,
}

impl InventoryClient {
    pub fn new(base_url: Option<&str>, token: &str) -> Result<Self> {
        let base_url = base_url
            .unwrap_or("https://api.moysklad.ru/api/remap/1.2")
            .trim_end_matches('/')
            .to_string();
        let http = Client::builder()
            .user_agent("offersync/0.1")
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            base_url,
            http,
            token: token.to_string(),
        })
    }

    async fn get_json(&self, path: &str, params: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);

        for attempt in 1..=RETRY_ATTEMPTS {
            let sent = self
                .http
                .get(&url)
                .bearer_auth(&self.token)
                .header("Accept", "application/json;charset=utf-8")
                .query(params)
                .send()
                .await;

            let resp = match sent {
                Ok(resp) => resp,
                Err(err) if err.is_timeout() || err.is_connect() => {
                    let delay = Duration::from_secs_f64((2.0 * f64::from(attempt)).min(30.0));
                    warn!(%path, %err, ?delay, attempt, "inventory network error, retrying");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(err) => return Err(anyhow!("inventory {path} request failed: {err}")),
            };

            let status = resp.status();
            if status.is_success() {
                return Ok(resp.json().await?);
            }

            if status.as_u16() == 429 {
                let delay = retry_after(resp.headers())
                    .unwrap_or_else(|| Duration::from_secs_f64((2.0 * f64::from(attempt)).min(30.0)));
                warn!(%path, ?delay, attempt, "inventory rate limited");
                tokio::time::sleep(delay).await;
                continue;
            }
            if status.is_server_error() {
                let delay = Duration::from_secs_f64((2.0 * f64::from(attempt)).min(30.0));
                warn!(%path, %status, ?delay, attempt, "inventory server error, retrying");
                tokio::time::sleep(delay).await;
                continue;
            }

            let body = truncate_for_log(resp.text().await.unwrap_or_default(), 2000);
            return Err(anyhow!("inventory {path} failed: {status} body={body}"));
        }

        Err(anyhow!(
            "inventory {path} failed after {RETRY_ATTEMPTS} attempts"
        ))
    }

    /// Page through an entity listing via limit/offset until a short page.
    pub async fn list_all(&self, path: &str, filter: Option<&str>) -> Result<Vec<Value>> {
        let mut rows: Vec<Value> = Vec::new();
        let mut offset = 0usize;
        loop {
            let mut params = vec![
                ("limit", PAGE_LIMIT.to_string()),
                ("offset", offset.to_string()),
            ];
            if let Some(f) = filter {
                params.push(("filter", f.to_string()));
            }
            let data = self.get_json(path, &params).await?;
            let page = data
                .get("rows")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let fetched = page.len();
            rows.extend(page);
            if fetched < PAGE_LIMIT {
                break;
            }
            offset += PAGE_LIMIT;
        }
        Ok(rows)
    }

    /// Full catalog keyed by canonical offer identifier: live products and
    /// bundles, archived rows excluded, products winning over bundles when an
    /// article appears in both.
    pub async fn fetch_catalog(&self) -> Result<HashMap<String, CatalogEntry>> {
        let products = self.list_all("/entity/product", Some("archived=false")).await?;
        let bundles = self.list_all("/entity/bundle", Some("archived=false")).await?;

        let mut catalog: HashMap<String, CatalogEntry> = HashMap::new();
        for row in products.iter().chain(bundles.iter()) {
            let Some(article) = row.get("article").and_then(Value::as_str) else {
                continue;
            };
            let key = normalize(article);
            if key.is_empty() {
                continue;
            }
            catalog.entry(key).or_insert_with(|| catalog_entry(row));
        }
        debug!(entries = catalog.len(), "inventory catalog fetched");
        Ok(catalog)
    }
}

fn catalog_entry(row: &Value) -> CatalogEntry {
    CatalogEntry {
        name: row
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        buy_price: row
            .get("buyPrice")
            .and_then(|p| p.get("value"))
            .and_then(Value::as_f64)
            .map(|minor| minor / 100.0),
    }
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    for name in RETRY_INTERVAL_HEADERS {
        if let Some(ms) = headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok())
        {
            return Some(Duration::from_secs_f64((ms / 1000.0).max(1.0)));
        }
    }
    None
}

/// TTL'd on-disk snapshot of the catalog map.
#[derive(Debug, Clone)]
pub struct CatalogCache {
    path: PathBuf,
    ttl: Duration,
}

impl CatalogCache {
    pub fn new(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            path: path.into(),
            ttl,
        }
    }

    pub fn load(&self) -> Option<HashMap<String, CatalogEntry>> {
        let meta = std::fs::metadata(&self.path).ok()?;
        let age = meta.modified().ok()?.elapsed().ok()?;
        if age > self.ttl {
            return None;
        }
        let text = std::fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&text).ok()
    }

    /// Best effort: a failed cache write only costs the next run a re-fetch.
    pub fn store(&self, catalog: &HashMap<String, CatalogEntry>) {
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string(catalog) {
            Ok(text) => {
                if let Err(err) = std::fs::write(&self.path, text) {
                    warn!(path = %self.path.display(), %err, "catalog cache write failed");
                }
            }
            Err(err) => warn!(%err, "catalog cache serialize failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn catalog_entry_converts_minor_units() {
        let row = json!({"name": "Lamp", "buyPrice": {"value": 129900.0}});
        let entry = catalog_entry(&row);
        assert_eq!(entry.name, "Lamp");
        assert_eq!(entry.buy_price, Some(1299.0));
    }

    #[test]
    fn catalog_entry_without_price() {
        let entry = catalog_entry(&json!({"name": "Lamp"}));
        assert_eq!(entry.buy_price, None);
    }

    #[test]
    fn cache_roundtrip_and_ttl() {
        let path = std::env::temp_dir().join(format!(
            "offersync-cache-test-{}.json",
            std::process::id()
        ));
        let cache = CatalogCache::new(&path, Duration::from_secs(60));
        let mut catalog = HashMap::new();
        catalog.insert(
            "22".to_string(),
            CatalogEntry {
                name: "Lamp".into(),
                buy_price: Some(10.0),
            },
        );
        cache.store(&catalog);
        assert_eq!(cache.load(), Some(catalog.clone()));

        std::thread::sleep(Duration::from_millis(10));
        let expired = CatalogCache::new(&path, Duration::from_millis(1));
        assert_eq!(expired.load(), None);

        let _ = std::fs::remove_file(&path);
    }
}
