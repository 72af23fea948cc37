//! Price sync job. The sheet is the source of truth for products it already
//! lists; the marketplace is the source for products that are new to the
//! sheet. Optionally pushes changed sheet prices back to the marketplace.

use std::collections::HashMap;

use anyhow::Result;
use itertools::Itertools;
use serde_json::Value;
use tracing::{info, warn};

use crate::engine::normalize;
use crate::inventory::CatalogEntry;
use crate::seller::{products, SellerClient};
use crate::sheets::{a1, SheetsClient};

use super::{AppConfig, Outcome};

/// Prices differing by less than a kopeck are the same price.
const PRICE_EPS: f64 = 0.01;

const HEADER: [&str; 10] = [
    "Cabinet",
    "Category",
    "Type",
    "Product name",
    "offer_id",
    "Buy price",
    "Old price",
    "Min price",
    "Your price",
    "Buyer price",
];

// fixed sheet layout: A=cabinet, E=offer_id, G..I=the three seller prices
const CAB_COL: usize = 0;
const OFFER_COL: usize = 4;
const OLD_COL: usize = 6;
const MIN_COL: usize = 7;
const YOUR_COL: usize = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct ExistingPrices {
    old_price: Option<f64>,
    min_price: Option<f64>,
    your_price: Option<f64>,
}

#[derive(Debug, Clone, Default)]
struct PriceRow {
    cab: String,
    category: String,
    type_name: String,
    name: String,
    offer_id: String,
    buy_price: Option<f64>,
    old_price: Option<f64>,
    min_price: Option<f64>,
    your_price: Option<f64>,
    buyer_price: Option<f64>,
}

pub async fn run(cfg: &AppConfig) -> Result<Outcome> {
    let sheets = cfg.sheets_client()?;
    let ws = &cfg.prices_worksheet;

    let existing = read_existing(&sheets, ws).await?;
    info!(known = existing.len(), "existing sheet prices loaded");

    let catalog = load_catalog(cfg).await?;

    let mut rows: Vec<PriceRow> = Vec::new();
    for client in cfg.seller_clients()? {
        info!(cab = client.label(), "syncing cabinet");
        rows.extend(
            build_rows_for_cabinet(&client, cfg, &existing, &catalog).await?,
        );
    }

    if rows.is_empty() {
        warn!("no products in any cabinet");
        return Ok(Outcome::NothingToDo);
    }

    let sorted: Vec<PriceRow> = rows
        .into_iter()
        .sorted_by_key(|r| {
            (
                r.category.to_lowercase(),
                r.type_name.to_lowercase(),
                r.name.to_lowercase(),
                r.offer_id.clone(),
            )
        })
        .collect();

    let mut values: Vec<Vec<Value>> = Vec::with_capacity(sorted.len() + 1);
    values.push(HEADER.iter().map(|h| Value::from(*h)).collect());
    for row in &sorted {
        values.push(row_cells(row));
    }

    sheets.values_clear(&a1(ws, "A1:J")).await?;
    let range = a1(ws, &format!("A1:J{}", values.len()));
    sheets.values_update(&range, values).await?;

    info!(rows = sorted.len(), worksheet = %ws, "price sheet rewritten");
    Ok(Outcome::Completed { rows: sorted.len() })
}

async fn load_catalog(cfg: &AppConfig) -> Result<HashMap<String, CatalogEntry>> {
    let Some(client) = cfg.inventory_client()? else {
        warn!("no inventory token configured; names and buy prices stay empty");
        return Ok(HashMap::new());
    };
    let cache = cfg.catalog_cache();
    if let Some(cached) = cache.load() {
        info!(entries = cached.len(), "inventory catalog from cache");
        return Ok(cached);
    }
    let catalog = client.fetch_catalog().await?;
    cache.store(&catalog);
    Ok(catalog)
}

async fn read_existing(
    sheets: &SheetsClient,
    ws: &str,
) -> Result<HashMap<(String, String), ExistingPrices>> {
    let rows = sheets.values_get(&a1(ws, "A2:J")).await?;
    let mut out = HashMap::new();
    for row in rows {
        let cell = |idx: usize| row.get(idx).map(String::as_str).unwrap_or("");
        let cab = cell(CAB_COL).trim().to_string();
        let offer_id = normalize(cell(OFFER_COL));
        if cab.is_empty() || offer_id.is_empty() {
            continue;
        }
        out.insert(
            (cab, offer_id),
            ExistingPrices {
                old_price: cell_to_number(cell(OLD_COL)),
                min_price: cell_to_number(cell(MIN_COL)),
                your_price: cell_to_number(cell(YOUR_COL)),
            },
        );
    }
    Ok(out)
}

async fn build_rows_for_cabinet(
    client: &SellerClient,
    cfg: &AppConfig,
    existing: &HashMap<(String, String), ExistingPrices>,
    catalog: &HashMap<String, CatalogEntry>,
) -> Result<Vec<PriceRow>> {
    let cab = client.label().to_string();

    let listing = products::fetch_product_list(client).await?;
    let offer_ids: Vec<String> = listing
        .iter()
        .filter_map(|it| it.get("offer_id").and_then(Value::as_str))
        .map(normalize)
        .filter(|s| !s.is_empty())
        .collect();
    let product_ids: Vec<i64> = listing
        .iter()
        .filter_map(|it| it.get("product_id").and_then(Value::as_i64))
        .collect();

    let info = products::fetch_product_info(client, &product_ids).await?;

    let (listed, new_offers): (Vec<String>, Vec<String>) = offer_ids
        .iter()
        .cloned()
        .partition(|oid| existing.contains_key(&(cab.clone(), oid.clone())));

    if cfg.push_prices && !listed.is_empty() {
        push_changed_prices(client, &cab, &listed, existing).await?;
    }

    // marketplace prices only for products the sheet doesn't own yet;
    // the buyer price is always current
    let prices_new = products::fetch_prices_by_offer(client, &new_offers).await?;
    let prices_all = products::fetch_prices_by_offer(client, &offer_ids).await?;
    let (category_map, type_map) = products::fetch_category_maps(client).await?;

    let mut rows = Vec::with_capacity(offer_ids.len());
    for oid in offer_ids {
        let key = (cab.clone(), oid.clone());
        let item_info = info.get(&oid);

        let category = item_info
            .and_then(|it| it.get("description_category_id").and_then(Value::as_i64))
            .and_then(|id| category_map.get(&id).cloned())
            .unwrap_or_default();
        let type_name = item_info
            .and_then(|it| it.get("type_id").and_then(Value::as_i64))
            .and_then(|id| type_map.get(&id).cloned())
            .unwrap_or_default();

        let cat_entry = catalog.get(&oid);
        let name = cat_entry.map(|c| c.name.clone()).unwrap_or_default();
        let buy_price = cat_entry.and_then(|c| c.buy_price);

        let (old_price, min_price, your_price) = match existing.get(&key) {
            Some(sheet) => (sheet.old_price, sheet.min_price, sheet.your_price),
            None => {
                let fresh = prices_new.get(&oid);
                (
                    money_field(fresh, "old_price"),
                    money_field(fresh, "min_price"),
                    money_field(fresh, "marketing_seller_price"),
                )
            }
        };
        let buyer_price = money_field(prices_all.get(&oid), "price");

        rows.push(PriceRow {
            cab: cab.clone(),
            category,
            type_name,
            name,
            offer_id: oid,
            buy_price,
            old_price,
            min_price,
            your_price,
            buyer_price,
        });
    }
    Ok(rows)
}

/// Push sheet prices for already-listed offers, but only the fields that
/// actually differ from what the marketplace currently has.
async fn push_changed_prices(
    client: &SellerClient,
    cab: &str,
    listed: &[String],
    existing: &HashMap<(String, String), ExistingPrices>,
) -> Result<()> {
    let current = products::fetch_prices_by_offer(client, listed).await?;

    let mut updates = Vec::new();
    for oid in listed {
        let sheet = existing
            .get(&(cab.to_string(), oid.clone()))
            .copied()
            .unwrap_or_default();
        let market = current.get(oid);

        let mut update = products::PriceUpdate {
            offer_id: oid.clone(),
            ..Default::default()
        };
        if price_changed(sheet.old_price, money_field(market, "old_price")) {
            update.old_price = sheet.old_price;
        }
        if price_changed(sheet.min_price, money_field(market, "min_price")) {
            update.min_price = sheet.min_price;
        }
        if price_changed(sheet.your_price, money_field(market, "marketing_seller_price")) {
            update.price = sheet.your_price;
        }
        if !update.is_empty() {
            updates.push(update);
        }
    }

    if updates.is_empty() {
        info!(cab, total = listed.len(), "no price changes to push");
        return Ok(());
    }
    match products::import_prices(client, &updates).await {
        Ok(pushed) => info!(cab, pushed, total = listed.len(), "pushed changed prices"),
        // a failed push must not lose the sheet rewrite
        Err(err) => warn!(cab, %err, "price push failed"),
    }
    Ok(())
}

/// Changed means: both sides have a value and they differ by more than the
/// tolerance. A blank on either side never pushes.
fn price_changed(sheet: Option<f64>, market: Option<f64>) -> bool {
    match (sheet, market) {
        (Some(a), Some(b)) => (a - b).abs() > PRICE_EPS,
        _ => false,
    }
}

fn money_field(price: Option<&Value>, key: &str) -> Option<f64> {
    let v = price?.get(key)?;
    if let Some(n) = v.as_f64() {
        return Some(n);
    }
    v.as_str()?.trim().parse().ok()
}

fn cell_to_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{00A0}')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse().ok()
}

fn row_cells(row: &PriceRow) -> Vec<Value> {
    fn price_cell(v: Option<f64>) -> Value {
        v.map(Value::from).unwrap_or_else(|| Value::from(""))
    }
    vec![
        Value::from(row.cab.as_str()),
        Value::from(row.category.as_str()),
        Value::from(row.type_name.as_str()),
        Value::from(row.name.as_str()),
        // leading apostrophe keeps the sheet from renumbering the code
        Value::from(format!("'{}", row.offer_id)),
        price_cell(row.buy_price),
        price_cell(row.old_price),
        price_cell(row.min_price),
        price_cell(row.your_price),
        price_cell(row.buyer_price),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cell_numbers_tolerate_spaces_and_commas() {
        assert_eq!(cell_to_number("1 299"), Some(1299.0));
        assert_eq!(cell_to_number("1\u{00A0}299,50"), Some(1299.5));
        assert_eq!(cell_to_number(""), None);
        assert_eq!(cell_to_number("n/a"), None);
    }

    #[test]
    fn price_change_respects_tolerance() {
        assert!(!price_changed(Some(100.0), Some(100.005)));
        assert!(price_changed(Some(100.0), Some(100.5)));
        assert!(!price_changed(None, Some(100.0)));
        assert!(!price_changed(Some(100.0), None));
    }

    #[test]
    fn money_field_reads_numbers_and_strings() {
        let price = json!({"old_price": "129.90", "price": 99.0});
        assert_eq!(money_field(Some(&price), "old_price"), Some(129.9));
        assert_eq!(money_field(Some(&price), "price"), Some(99.0));
        assert_eq!(money_field(Some(&price), "min_price"), None);
        assert_eq!(money_field(None, "price"), None);
    }

    #[test]
    fn offer_cell_is_written_as_text() {
        let row = PriceRow {
            offer_id: "00022".into(),
            ..Default::default()
        };
        assert_eq!(row_cells(&row)[4], Value::from("'00022"));
    }
}
