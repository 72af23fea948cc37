use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::auth::TokenProvider;

const BASE_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";

/// Plain values client for one spreadsheet: range reads, USER_ENTERED
/// writes, clears. No formatting — the sheet belongs to humans.
pub struct SheetsClient {
    http: Client,
    auth: TokenProvider,
    spreadsheet_id: String,
    base_url: String,
}

impl SheetsClient {
    pub fn new(auth: TokenProvider, spreadsheet_id: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            auth,
            spreadsheet_id: spreadsheet_id.to_string(),
            base_url: BASE_URL.to_string(),
        })
    }

    /// `.../values/{range}` URL with the range percent-encoded as one path
    /// segment (sheet titles routinely contain spaces and quotes).
    fn values_url(&self, range: &str, suffix: Option<&str>) -> Result<Url> {
        let mut url = Url::parse(&self.base_url).context("bad sheets base url")?;
        let segment = match suffix {
            Some(s) => format!("{range}{s}"),
            None => range.to_string(),
        };
        url.path_segments_mut()
            .map_err(|_| anyhow!("sheets base url cannot be a base"))?
            .push(&self.spreadsheet_id)
            .push("values")
            .push(&segment);
        Ok(url)
    }

    pub async fn values_get(&self, range: &str) -> Result<Vec<Vec<String>>> {
        let token = self.auth.access_token().await?;
        let url = self.values_url(range, None)?;
        let resp = self.http.get(url).bearer_auth(token).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("sheets get {range} failed: {status} body={body}");
        }
        let body: Value = resp.json().await?;
        let rows = body
            .get("values")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(rows
            .into_iter()
            .map(|row| {
                row.as_array()
                    .map(|cells| cells.iter().map(cell_to_string).collect())
                    .unwrap_or_default()
            })
            .collect())
    }

    /// Write a rectangular block with USER_ENTERED semantics (the sheet
    /// parses numbers and dates the way a typing user would get).
    pub async fn values_update(&self, range: &str, values: Vec<Vec<Value>>) -> Result<()> {
        let token = self.auth.access_token().await?;
        let mut url = self.values_url(range, None)?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED");
        let body = json!({
            "range": range,
            "majorDimension": "ROWS",
            "values": values,
        });
        let resp = self
            .http
            .put(url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("sheets update {range} failed: {status} body={body}");
        }
        debug!(%range, "sheet range updated");
        Ok(())
    }

    pub async fn values_clear(&self, range: &str) -> Result<()> {
        let token = self.auth.access_token().await?;
        let url = self.values_url(range, Some(":clear"))?;
        let resp = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&json!({}))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("sheets clear {range} failed: {status} body={body}");
        }
        Ok(())
    }

    /// One column from `start_row` down, padded rows flattened to strings.
    pub async fn col_values(&self, sheet: &str, col: &str, start_row: u32) -> Result<Vec<String>> {
        let range = a1(sheet, &format!("{col}{start_row}:{col}"));
        let rows = self.values_get(&range).await?;
        Ok(rows
            .into_iter()
            .map(|row| row.into_iter().next().unwrap_or_default())
            .collect())
    }
}

fn cell_to_string(cell: &Value) -> String {
    match cell {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Quote the sheet title into an A1 reference; embedded quotes double.
pub fn a1(sheet: &str, range: &str) -> String {
    format!("'{}'!{}", sheet.replace('\'', "''"), range)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a1_quotes_sheet_titles() {
        assert_eq!(a1("Orders", "E2:H10"), "'Orders'!E2:H10");
        assert_eq!(a1("Jan '26", "A1"), "'Jan ''26'!A1");
    }

    #[test]
    fn cells_flatten_to_strings() {
        assert_eq!(cell_to_string(&serde_json::json!("x")), "x");
        assert_eq!(cell_to_string(&serde_json::json!(12.5)), "12.5");
        assert_eq!(cell_to_string(&Value::Null), "");
    }
}
