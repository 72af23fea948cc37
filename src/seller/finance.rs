//! Finance-transaction fetch: the paginated, time-windowed record stream the
//! aggregation engine consumes.

use anyhow::Result;
use chrono::{Duration, NaiveDate};
use serde_json::{json, Value};
use tracing::debug;

use super::client::SellerClient;

const TRANSACTIONS_PATH: &str = "/v3/finance/transaction/list";
const PAGE_SIZE: usize = 1000;
/// The endpoint refuses windows longer than 30 days.
const MAX_WINDOW_DAYS: i64 = 30;

/// Fetch every transaction in `[from, to)`, chunked into 30-day requests and
/// paged within each chunk. Returns raw operations; filtering and extraction
/// are the engine's job.
pub async fn fetch_transactions(
    client: &SellerClient,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<Value>> {
    let mut ops: Vec<Value> = Vec::new();

    for (chunk_from, chunk_to) in date_chunks(from, to, MAX_WINDOW_DAYS) {
        let mut page: u32 = 1;
        loop {
            let payload = json!({
                "filter": {
                    "date": {"from": iso_day_start(chunk_from), "to": iso_day_start(chunk_to)},
                    "operation_type": [],
                    "posting_number": "",
                    "transaction_type": "all",
                },
                "page": page,
                "page_size": PAGE_SIZE,
            });
            let resp = client.post_json(TRANSACTIONS_PATH, &payload).await?;
            let result = resp.get("result").cloned().unwrap_or(Value::Null);
            let page_ops = operations_array(&result);
            let fetched = page_ops.len();
            ops.extend(page_ops.into_iter().filter(|op| op.is_object()));

            if !has_more(&result, page, fetched) {
                break;
            }
            page += 1;
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }

    debug!(cab = client.label(), %from, %to, count = ops.len(), "transactions fetched");
    Ok(ops)
}

/// Decide whether an operation looks like a customer payment.
///
/// The operation-name field itself drifts between API versions, so the check
/// runs over a list of aliases. Acquiring fees mention the customer too and
/// are explicitly not payments.
pub fn is_customer_payment(op: &Value) -> bool {
    let name = ["operation_type_name", "type_name", "operation_name", "name"]
        .iter()
        .filter_map(|k| op.get(*k).and_then(Value::as_str))
        .find(|s| !s.trim().is_empty())
        .unwrap_or("")
        .to_lowercase();

    if name.contains("эквайр") || name.contains("acquiring") {
        return false;
    }
    if name.contains("покупател") && name.contains("оплат") {
        return true;
    }
    if name.contains("customer") && name.contains("payment") {
        return true;
    }
    name.contains("payment from customer") || name.contains("customer paid")
}

/// Split `[from, to)` into half-open windows of at most `days` days.
pub fn date_chunks(from: NaiveDate, to: NaiveDate, days: i64) -> Vec<(NaiveDate, NaiveDate)> {
    let mut out = Vec::new();
    let mut cur = from;
    while cur < to {
        let next = std::cmp::min(cur + Duration::days(days), to);
        out.push((cur, next));
        cur = next;
    }
    out
}

fn iso_day_start(d: NaiveDate) -> String {
    format!("{}T00:00:00Z", d.format("%Y-%m-%d"))
}

/// The operations array has moved between keys across API versions.
fn operations_array(result: &Value) -> Vec<Value> {
    for key in ["operations", "operation", "transactions"] {
        if let Some(arr) = result.get(key).and_then(Value::as_array) {
            return arr.clone();
        }
    }
    Vec::new()
}

/// Pagination signal also varies: explicit `has_next`, a `page_count` total,
/// or nothing at all — in which case a full page means "probably more".
fn has_more(result: &Value, page: u32, fetched: usize) -> bool {
    if let Some(has_next) = result.get("has_next").and_then(Value::as_bool) {
        return has_next;
    }
    if let Some(page_count) = result.get("page_count").and_then(Value::as_i64) {
        if page_count > 0 {
            return i64::from(page) < page_count;
        }
    }
    fetched == PAGE_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn chunks_cover_the_window_without_overlap() {
        let chunks = date_chunks(date("2026-01-01"), date("2026-03-15"), 30);
        assert_eq!(chunks.first().unwrap().0, date("2026-01-01"));
        assert_eq!(chunks.last().unwrap().1, date("2026-03-15"));
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
        }
        for (from, to) in &chunks {
            assert!(*to - *from <= Duration::days(30));
        }
    }

    #[test]
    fn empty_window_yields_no_chunks() {
        assert!(date_chunks(date("2026-01-01"), date("2026-01-01"), 30).is_empty());
    }

    #[test]
    fn has_next_flag_wins() {
        assert!(has_more(&json!({"has_next": true}), 1, 0));
        assert!(!has_more(&json!({"has_next": false}), 1, PAGE_SIZE));
    }

    #[test]
    fn page_count_fallback() {
        assert!(has_more(&json!({"page_count": 3}), 1, 10));
        assert!(!has_more(&json!({"page_count": 3}), 3, 10));
    }

    #[test]
    fn full_page_fallback_when_nothing_else_is_present() {
        assert!(has_more(&json!({}), 1, PAGE_SIZE));
        assert!(!has_more(&json!({}), 1, PAGE_SIZE - 1));
    }

    #[test]
    fn recognizes_customer_payments_in_both_languages() {
        assert!(is_customer_payment(
            &json!({"operation_type_name": "Оплата покупателем"})
        ));
        assert!(is_customer_payment(
            &json!({"type_name": "Payment from customer"})
        ));
        assert!(!is_customer_payment(
            &json!({"name": "Оплата эквайринга"})
        ));
        assert!(!is_customer_payment(&json!({"name": "acquiring fee"})));
        assert!(!is_customer_payment(&json!({"name": "delivery charge"})));
    }
}
