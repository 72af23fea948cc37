use std::time::Duration;

use anyhow::{anyhow, Result};
use rand::Rng;
use reqwest::Client;
use serde_json::Value;
use tracing::warn;

pub(crate) fn truncate_for_log(mut s: String, max_len: usize) -> String {
    if s.len() > max_len {
        let mut cut = max_len;
        while cut > 0 && !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push_str("…");
    }
    s
}

/// Credentials for one seller cabinet. Several cabinets can point at the same
/// spreadsheet; the label is what distinguishes their rows.
#[derive(Debug, Clone)]
pub struct SellerAccount {
    pub label: String,
    pub client_id: String,
    pub api_key: String,
}

/// Seller API client for one cabinet.
///
/// All endpoints are POST-with-JSON behind `Client-Id`/`Api-Key` headers.
/// 429 and 5xx responses are retried with exponential backoff plus jitter;
/// anything else surfaces as an error with a truncated response body.
#[derive(Debug, Clone)]
pub struct SellerClient {
    base_url: String,
    http: Client,
    account: SellerAccount,
}

const RETRY_ATTEMPTS: u32 = 5;

impl SellerClient {
    pub fn new(base_url: Option<&str>, account: SellerAccount) -> Result<Self> {
        let base_url = base_url
            .unwrap_or("https://api-seller.ozon.ru")
            .trim_end_matches('/')
            .to_string();
        let http = Client::builder()
            .user_agent("offersync/0.1")
            .timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self {
            base_url,
            http,
            account,
        })
    }

    pub fn label(&self) -> &str {
        &self.account.label
    }

    pub async fn post_json(&self, path: &str, payload: &Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);

        for attempt in 1..=RETRY_ATTEMPTS {
            let sent = self
                .http
                .post(&url)
                .header("Client-Id", &self.account.client_id)
                .header("Api-Key", &self.account.api_key)
                .header("Accept", "application/json")
                .json(payload)
                .send()
                .await;

            let resp = match sent {
                Ok(resp) => resp,
                Err(err) => {
                    if attempt == RETRY_ATTEMPTS {
                        return Err(anyhow!("seller {path} request failed: {err}"));
                    }
                    let delay = backoff_delay(attempt);
                    warn!(cab = %self.account.label, %path, %err, ?delay, "seller request error, retrying");
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            let status = resp.status();
            if status.is_success() {
                return Ok(resp.json().await?);
            }

            let retryable = status.as_u16() == 429 || status.is_server_error();
            if retryable && attempt < RETRY_ATTEMPTS {
                let delay = backoff_delay(attempt);
                warn!(cab = %self.account.label, %path, %status, ?delay, "seller API throttled, retrying");
                tokio::time::sleep(delay).await;
                continue;
            }

            let body = truncate_for_log(resp.text().await.unwrap_or_default(), 2000);
            return Err(anyhow!("seller {path} failed: {status} body={body}"));
        }

        unreachable!("retry loop always returns")
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let base = 300u64.saturating_mul(1 << attempt.min(6));
    let jitter = rand::thread_rng().gen_range(0..250);
    Duration::from_millis(base.min(30_000) + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_stays_bounded() {
        for attempt in 1..10 {
            let d = backoff_delay(attempt);
            assert!(d >= Duration::from_millis(300));
            assert!(d <= Duration::from_millis(30_250));
        }
    }

    #[test]
    fn truncates_long_bodies() {
        let s = "x".repeat(5000);
        let out = truncate_for_log(s, 100);
        assert!(out.len() < 110);
        assert!(out.ends_with('…'));
    }
}
