//! Service-account OAuth for the spreadsheet API: sign a short-lived RS256
//! assertion with the account's private key, trade it for an access token,
//! cache the token until just before it expires.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

const SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// Refresh this long before the reported expiry.
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

pub struct TokenProvider {
    key: ServiceAccountKey,
    signing_key: EncodingKey,
    http: Client,
    cached: Mutex<Option<(String, DateTime<Utc>)>>,
}

impl TokenProvider {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading service account key {}", path.display()))?;
        let key: ServiceAccountKey =
            serde_json::from_str(&text).context("parsing service account key JSON")?;
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .context("parsing service account private key PEM")?;
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            key,
            signing_key,
            http,
            cached: Mutex::new(None),
        })
    }

    pub async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some((token, expires_at)) = cached.as_ref() {
            if Utc::now() < *expires_at {
                return Ok(token.clone());
            }
        }

        let token_uri = self.key.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);
        let now = Utc::now().timestamp();
        let claims = Claims {
            iss: &self.key.client_email,
            scope: SCOPE,
            aud: token_uri,
            iat: now,
            exp: now + 3600,
        };
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .context("signing token assertion")?;

        let resp = self
            .http
            .post(token_uri)
            .form(&[("grant_type", GRANT_TYPE), ("assertion", &assertion)])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("token exchange failed: {status} body={body}");
        }
        let token: TokenResponse = resp.json().await?;

        let expires_at = Utc::now()
            + chrono::Duration::seconds(token.expires_in as i64 - EXPIRY_MARGIN_SECS);
        debug!(account = %self.key.client_email, %expires_at, "sheets access token refreshed");
        *cached = Some((token.access_token.clone(), expires_at));
        Ok(token.access_token)
    }
}
