//! Product catalog, pricing and price-push endpoints.

use std::collections::HashMap;

use anyhow::Result;
use serde_json::{json, Value};
use tracing::debug;

use crate::engine::normalize;

use super::client::SellerClient;

const PRODUCT_LIST_PATH: &str = "/v3/product/list";
const PRODUCT_INFO_PATH: &str = "/v3/product/info/list";
const PRICES_PATH: &str = "/v5/product/info/prices";
const IMPORT_PRICES_PATH: &str = "/v1/product/import/prices";
const CATEGORY_TREE_PATH: &str = "/v1/description-category/tree";

const INFO_BATCH: usize = 50;
const PRICE_BATCH: usize = 1000;

/// Full product listing for the cabinet, paged over the `last_id` cursor.
pub async fn fetch_product_list(client: &SellerClient) -> Result<Vec<Value>> {
    let mut items: Vec<Value> = Vec::new();
    let mut last_id = String::new();
    loop {
        let payload = json!({
            "filter": {"visibility": "ALL"},
            "last_id": last_id,
            "limit": 1000,
        });
        let resp = client.post_json(PRODUCT_LIST_PATH, &payload).await?;
        let result = resp.get("result").cloned().unwrap_or(Value::Null);
        let page = result
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if page.is_empty() {
            break;
        }
        items.extend(page);

        let next = result
            .get("last_id")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        if next.is_empty() || next == last_id {
            break;
        }
        last_id = next;
    }
    debug!(cab = client.label(), count = items.len(), "product list fetched");
    Ok(items)
}

/// `{offer identifier -> internal sku}` for the given identifiers.
/// Both the raw and canonical spellings key the map, so either form hits.
pub async fn fetch_offer_to_sku(
    client: &SellerClient,
    offer_ids: &[String],
) -> Result<HashMap<String, i64>> {
    let mut out: HashMap<String, i64> = HashMap::new();

    // dedupe raw + canonical spellings, preserving order
    let mut uniq: Vec<String> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for raw in offer_ids {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        for candidate in [trimmed.to_string(), normalize(trimmed)] {
            if !candidate.is_empty() && seen.insert(candidate.clone()) {
                uniq.push(candidate);
            }
        }
    }

    for batch in uniq.chunks(PRICE_BATCH) {
        let payload = json!({
            "filter": {"offer_id": batch},
            "limit": batch.len(),
        });
        let resp = client.post_json(PRODUCT_INFO_PATH, &payload).await?;
        for item in info_items(&resp) {
            let offer = item.get("offer_id").and_then(Value::as_str).unwrap_or("");
            let sku = item.get("sku").and_then(Value::as_i64).unwrap_or(0);
            if offer.is_empty() || sku == 0 {
                continue;
            }
            out.insert(offer.trim().to_string(), sku);
            out.insert(normalize(offer), sku);
        }
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    }
    Ok(out)
}

/// Product info keyed by canonical offer identifier, fetched by internal
/// product id in small batches.
pub async fn fetch_product_info(
    client: &SellerClient,
    product_ids: &[i64],
) -> Result<HashMap<String, Value>> {
    let mut out = HashMap::new();
    for batch in product_ids.chunks(INFO_BATCH) {
        let ids: Vec<String> = batch.iter().map(|id| id.to_string()).collect();
        let payload = json!({"product_id": ids});
        let resp = client.post_json(PRODUCT_INFO_PATH, &payload).await?;
        for item in info_items(&resp) {
            if let Some(offer) = item.get("offer_id").and_then(Value::as_str) {
                let key = normalize(offer);
                if !key.is_empty() {
                    out.insert(key, item.clone());
                }
            }
        }
    }
    Ok(out)
}

/// Price objects keyed by canonical offer identifier.
pub async fn fetch_prices_by_offer(
    client: &SellerClient,
    offer_ids: &[String],
) -> Result<HashMap<String, Value>> {
    let mut out = HashMap::new();
    if offer_ids.is_empty() {
        return Ok(out);
    }
    for batch in offer_ids.chunks(PRICE_BATCH) {
        let payload = json!({
            "filter": {"offer_id": batch},
            "last_id": "",
            "limit": PRICE_BATCH,
        });
        let resp = client.post_json(PRICES_PATH, &payload).await?;
        let items = resp
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for item in items {
            let offer = item.get("offer_id").and_then(Value::as_str).unwrap_or("");
            let key = normalize(offer);
            if key.is_empty() {
                continue;
            }
            let price = item.get("price").cloned().unwrap_or(Value::Null);
            out.insert(key, price);
        }
    }
    Ok(out)
}

/// One price push for one offer. `None` fields are left untouched upstream.
#[derive(Debug, Clone, Default)]
pub struct PriceUpdate {
    pub offer_id: String,
    pub price: Option<f64>,
    pub old_price: Option<f64>,
    pub min_price: Option<f64>,
}

impl PriceUpdate {
    pub fn is_empty(&self) -> bool {
        self.price.is_none() && self.old_price.is_none() && self.min_price.is_none()
    }
}

/// Push price changes back to the marketplace. Offers with nothing to send
/// are skipped; an entirely empty push is a no-op, not an error.
pub async fn import_prices(client: &SellerClient, updates: &[PriceUpdate]) -> Result<usize> {
    let mut prices: Vec<Value> = Vec::new();
    for update in updates {
        let offer_id = normalize(&update.offer_id);
        if offer_id.is_empty() || update.is_empty() {
            continue;
        }
        let mut row = json!({"offer_id": offer_id});
        if let Some(p) = update.price {
            row["price"] = Value::String(fmt_price(p));
        }
        if let Some(p) = update.old_price {
            row["old_price"] = Value::String(fmt_price(p));
        }
        if let Some(p) = update.min_price {
            row["min_price"] = Value::String(fmt_price(p));
        }
        prices.push(row);
    }

    if prices.is_empty() {
        return Ok(0);
    }
    let count = prices.len();
    client
        .post_json(IMPORT_PRICES_PATH, &json!({"prices": prices}))
        .await?;
    Ok(count)
}

/// The import endpoint wants prices as strings; sheets hold `2937` and
/// `2937.0` interchangeably, so integral values go out without decimals.
pub fn fmt_price(value: f64) -> String {
    if (value - value.round()).abs() < 1e-9 {
        format!("{}", value.round() as i64)
    } else {
        format!("{value:.2}")
    }
}

/// `(category id -> name, type id -> name)` maps pulled out of the category
/// tree by a full recursive walk — the nesting depth is not documented.
pub async fn fetch_category_maps(
    client: &SellerClient,
) -> Result<(HashMap<i64, String>, HashMap<i64, String>)> {
    let resp = client
        .post_json(CATEGORY_TREE_PATH, &json!({"language": "RU"}))
        .await?;

    let mut categories = HashMap::new();
    let mut types = HashMap::new();
    walk_tree(&resp, &mut categories, &mut types);
    Ok((categories, types))
}

fn walk_tree(node: &Value, categories: &mut HashMap<i64, String>, types: &mut HashMap<i64, String>) {
    match node {
        Value::Object(obj) => {
            if let (Some(id), Some(name)) = (
                obj.get("description_category_id").and_then(Value::as_i64),
                obj.get("category_name").and_then(Value::as_str),
            ) {
                categories.insert(id, name.to_string());
            }
            if let (Some(id), Some(name)) = (
                obj.get("type_id").and_then(Value::as_i64),
                obj.get("type_name").and_then(Value::as_str),
            ) {
                types.insert(id, name.to_string());
            }
            for child in obj.values() {
                walk_tree(child, categories, types);
            }
        }
        Value::Array(arr) => {
            for child in arr {
                walk_tree(child, categories, types);
            }
        }
        _ => {}
    }
}

/// The info endpoint wrapped its items in `result` for a while, then stopped.
fn info_items(resp: &Value) -> Vec<Value> {
    resp.get("result")
        .and_then(|r| r.get("items"))
        .or_else(|| resp.get("items"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integral_prices_lose_the_decimals() {
        assert_eq!(fmt_price(2937.0), "2937");
        assert_eq!(fmt_price(2937.000000001), "2937");
        assert_eq!(fmt_price(2937.5), "2937.50");
    }

    #[test]
    fn category_walk_finds_nested_nodes() {
        let tree = json!({
            "result": [{
                "description_category_id": 10,
                "category_name": "Toys",
                "children": [{
                    "type_id": 77,
                    "type_name": "Puzzle",
                    "description_category_id": 11,
                    "category_name": "Puzzles"
                }]
            }]
        });
        let mut categories = HashMap::new();
        let mut types = HashMap::new();
        walk_tree(&tree, &mut categories, &mut types);
        assert_eq!(categories.get(&10).map(String::as_str), Some("Toys"));
        assert_eq!(categories.get(&11).map(String::as_str), Some("Puzzles"));
        assert_eq!(types.get(&77).map(String::as_str), Some("Puzzle"));
    }

    #[test]
    fn info_items_handles_both_wrappers() {
        let wrapped = json!({"result": {"items": [{"offer_id": "1"}]}});
        let bare = json!({"items": [{"offer_id": "2"}]});
        assert_eq!(info_items(&wrapped).len(), 1);
        assert_eq!(info_items(&bare).len(), 1);
    }

    #[test]
    fn empty_update_is_skipped() {
        let update = PriceUpdate {
            offer_id: "00022".into(),
            ..Default::default()
        };
        assert!(update.is_empty());
    }
}
