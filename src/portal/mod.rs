//! Seller-portal analytics via browser-cookie replay.
//!
//! The delivery-tariff chart has no public API; the portal only serves it to
//! a logged-in browser session. An operator exports `cookies.txt` from their
//! browser and this client replays the relevant cookies with the headers the
//! portal's frontend would send.

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

const DELIVERY_CHART_PATH: &str =
    "/api/site/seller-analytics/average-delivery-time/dynamic-chart";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
}

/// Parse Netscape-format `cookies.txt`: 7 tab-separated fields per line,
/// `#` comments and malformed lines skipped.
pub fn parse_netscape_cookies(text: &str) -> Vec<PortalCookie> {
    let mut out = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() != 7 {
            continue;
        }
        let [domain, _flag, path, secure, _expiry, name, value] = parts[..] else {
            continue;
        };
        out.push(PortalCookie {
            name: name.to_string(),
            value: value.to_string(),
            domain: domain.to_string(),
            path: path.to_string(),
            secure: secure.eq_ignore_ascii_case("TRUE"),
        });
    }
    out
}

/// Latest point of the delivery-time chart. Values come back in percent
/// basis points; the caller divides by 100 before writing the sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryMetrics {
    pub date: String,
    pub average_delivery_time: Option<f64>,
    pub tariff_value: Option<f64>,
    pub fee: Option<f64>,
}

pub struct PortalClient {
    http: Client,
    base_url: String,
    cookie_header: String,
    company_id: String,
}

impl PortalClient {
    pub fn new(cookies_file: &Path, company_id: &str, base_url: Option<&str>) -> Result<Self> {
        let base_url = base_url
            .unwrap_or("https://seller.ozon.ru")
            .trim_end_matches('/')
            .to_string();
        let text = std::fs::read_to_string(cookies_file)
            .with_context(|| format!("reading cookies file {}", cookies_file.display()))?;
        let host = url::Url::parse(&base_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .ok_or_else(|| anyhow!("portal base url has no host: {base_url}"))?;
        // suffix-match so ".ozon.ru" cookies apply to "seller.ozon.ru"
        let cookie_header = parse_netscape_cookies(&text)
            .into_iter()
            .filter(|c| {
                let d = c.domain.trim_start_matches('.');
                host == d || host.ends_with(&format!(".{d}"))
            })
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ");
        if cookie_header.is_empty() {
            anyhow::bail!("no cookies in {} match host {host}", cookies_file.display());
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            base_url,
            cookie_header,
            company_id: company_id.to_string(),
        })
    }

    pub async fn latest_delivery_metrics(&self) -> Result<DeliveryMetrics> {
        let url = format!("{}{}?__rr=3", self.base_url, DELIVERY_CHART_PATH);
        let resp = self
            .http
            .get(&url)
            .header("Accept", "application/json, text/plain, */*")
            .header("Cookie", &self.cookie_header)
            .header("x-o3-app-name", "seller-ui")
            .header("x-o3-language", "ru")
            .header("x-o3-company-id", &self.company_id)
            .header("x-o3-page-type", "analytics_metrics")
            .header("Referer", format!("{}/app/analytics", self.base_url))
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            let body = crate::seller::client::truncate_for_log(text, 200);
            anyhow::bail!("portal chart failed: {status} body={body}");
        }

        let body: Value = serde_json::from_str(&text).context("portal chart is not JSON")?;
        if let Some(err) = body.get("error") {
            anyhow::bail!("portal chart error: {err}");
        }

        latest_point(&body).ok_or_else(|| anyhow!("no dated tariff points in portal response"))
    }
}

/// The chart nests its series unpredictably; collect every object carrying a
/// date plus tariff/delivery fields, wherever it sits, and keep the newest.
fn latest_point(body: &Value) -> Option<DeliveryMetrics> {
    let mut points: Vec<&Value> = Vec::new();
    collect_points(body, &mut points);
    points.sort_by_key(|p| p.get("date").and_then(Value::as_str).unwrap_or(""));
    let last = points.last()?;
    debug!(points = points.len(), "portal chart points collected");

    let tariff = last.get("tariff");
    Some(DeliveryMetrics {
        date: last
            .get("date")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        average_delivery_time: last.get("averageDeliveryTime").and_then(Value::as_f64),
        tariff_value: tariff
            .and_then(|t| t.get("tariffValue"))
            .and_then(Value::as_f64),
        fee: tariff.and_then(|t| t.get("fee")).and_then(Value::as_f64),
    })
}

fn collect_points<'a>(node: &'a Value, out: &mut Vec<&'a Value>) {
    match node {
        Value::Object(obj) => {
            if obj.contains_key("date")
                && (obj.contains_key("tariff") || obj.contains_key("averageDeliveryTime"))
            {
                out.push(node);
            }
            for child in obj.values() {
                collect_points(child, out);
            }
        }
        Value::Array(arr) => {
            for child in arr {
                collect_points(child, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_netscape_lines_and_skips_noise() {
        let text = "# Netscape HTTP Cookie File\n\
                    .ozon.ru\tTRUE\t/\tTRUE\t0\tsession\tabc\n\
                    broken line\n\
                    seller.ozon.ru\tFALSE\t/\tFALSE\t0\txsrf\tdef\n";
        let cookies = parse_netscape_cookies(text);
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies[0].name, "session");
        assert!(cookies[0].secure);
        assert_eq!(cookies[1].domain, "seller.ozon.ru");
        assert!(!cookies[1].secure);
    }

    #[test]
    fn picks_the_latest_dated_point() {
        let body = json!({
            "chart": {"series": [
                {"date": "2026-01-10", "tariff": {"tariffValue": 35.0, "fee": 3.0}},
                {"date": "2026-01-15", "averageDeliveryTime": 37.0,
                 "tariff": {"tariffValue": 40.0, "fee": 2.0}},
                {"unrelated": true}
            ]}
        });
        let m = latest_point(&body).unwrap();
        assert_eq!(m.date, "2026-01-15");
        assert_eq!(m.tariff_value, Some(40.0));
        assert_eq!(m.fee, Some(2.0));
        assert_eq!(m.average_delivery_time, Some(37.0));
    }

    #[test]
    fn no_points_means_none() {
        assert_eq!(latest_point(&json!({"ok": true})), None);
    }
}
