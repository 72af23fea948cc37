//! Orders metrics job: trailing 90-day and 7-day customer-payment averages
//! per offer, written next to the sheet's identifier column.

use anyhow::Result;
use chrono::{Duration, Utc};
use serde_json::Value;
use tracing::{info, warn};

use crate::engine::{self, Aggregate, ExtractStats, OutputRow, SkuIndex};
use crate::seller::{finance, products, SellerClient};
use crate::sheets::a1;

use super::{AppConfig, Outcome};

const WIDE_DAYS: i64 = 90;
const NARROW_DAYS: i64 = 7;
/// Identifier column and first data row are fixed by the sheet's layout.
const OFFER_COL: &str = "D";
const START_ROW: u32 = 2;

const METRIC_HEADERS: [&str; 4] = [
    "Qty (90d)",
    "Avg paid (90d)",
    "Qty (7d)",
    "Avg paid (7d)",
];

pub async fn run(cfg: &AppConfig) -> Result<Outcome> {
    cfg.policy.validate()?;
    let sheets = cfg.sheets_client()?;
    let ws = &cfg.orders_worksheet;

    sheets
        .values_update(
            &a1(ws, "E1:H1"),
            vec![METRIC_HEADERS.iter().map(|h| Value::from(*h)).collect()],
        )
        .await?;

    let raw_offers = sheets.col_values(ws, OFFER_COL, START_ROW).await?;
    if raw_offers.iter().all(|s| s.trim().is_empty()) {
        warn!(worksheet = %ws, "identifier column is empty, nothing to aggregate onto");
        return Ok(Outcome::NothingToDo);
    }

    let clients = cfg.seller_clients()?;

    // internal key -> identifier, merged across cabinets (first wins: the
    // same article listed in both cabinets means the same product)
    let mut index = SkuIndex::new();
    for client in &clients {
        let pairs = products::fetch_offer_to_sku(client, &raw_offers).await?;
        for (offer, sku) in pairs {
            index.insert(sku, &offer);
        }
    }
    info!(skus = index.len(), "sku index built");

    let today = Utc::now().date_naive();
    let to = today + Duration::days(1);
    let mut stats = ExtractStats::default();

    let wide = aggregate_window(&clients, cfg, &mut index, today - Duration::days(WIDE_DAYS), to, &mut stats)
        .await?;
    let narrow =
        aggregate_window(&clients, cfg, &mut index, today - Duration::days(NARROW_DAYS), to, &mut stats)
            .await?;

    info!(
        records = stats.records,
        line_items = stats.line_items,
        dropped_no_identifier = stats.dropped_no_identifier,
        dropped_no_quantity = stats.dropped_no_quantity,
        rejected_currency = stats.rejected_currency,
        wide_identifiers = wide.len(),
        narrow_identifiers = narrow.len(),
        "aggregation finished"
    );

    let metrics = engine::derive(&wide, &narrow, cfg.policy.rounding);
    let rows = engine::project(&raw_offers, &metrics);

    let values: Vec<Vec<Value>> = rows.iter().map(row_cells).collect();
    let range = a1(
        ws,
        &format!("E{}:H{}", START_ROW, START_ROW as usize + rows.len() - 1),
    );
    sheets.values_update(&range, values).await?;

    if metrics.is_empty() {
        warn!("no extractable identifiers in any window; wrote empty metrics");
        return Ok(Outcome::NothingToDo);
    }
    Ok(Outcome::Completed { rows: rows.len() })
}

/// One aggregate over `[from, to)` across every cabinet. Each cabinet folds
/// into its own accumulator; cabinet totals combine afterwards, so fetch
/// order between cabinets cannot change the result.
async fn aggregate_window(
    clients: &[SellerClient],
    cfg: &AppConfig,
    index: &mut SkuIndex,
    from: chrono::NaiveDate,
    to: chrono::NaiveDate,
    stats: &mut ExtractStats,
) -> Result<Aggregate> {
    let mut total = Aggregate::new();
    for client in clients {
        let ops = finance::fetch_transactions(client, from, to).await?;
        let mut acc = Aggregate::new();
        for op in &ops {
            if !finance::is_customer_payment(op) {
                continue;
            }
            // product listings inside the record may carry identifier pairs
            // the info endpoint didn't know about
            index.absorb_record(op, &cfg.policy.aliases);
            engine::fold_record(&mut acc, op, index, &cfg.policy, stats);
        }
        info!(cab = client.label(), %from, %to, identifiers = acc.len(), "cabinet window aggregated");
        total.combine(acc);
    }
    Ok(total)
}

fn row_cells(row: &OutputRow) -> Vec<Value> {
    fn int_cell(v: Option<i64>) -> Value {
        v.map(Value::from).unwrap_or_else(|| Value::from(""))
    }
    fn avg_cell(v: Option<f64>) -> Value {
        v.map(Value::from).unwrap_or_else(|| Value::from(""))
    }
    vec![
        int_cell(row.wide_qty),
        avg_cell(row.wide_avg),
        int_cell(row.narrow_qty),
        avg_cell(row.narrow_avg),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undefined_metrics_render_as_empty_cells() {
        let row = OutputRow {
            wide_qty: Some(0),
            wide_avg: None,
            narrow_qty: Some(0),
            narrow_avg: None,
        };
        let cells = row_cells(&row);
        assert_eq!(cells[0], Value::from(0));
        assert_eq!(cells[1], Value::from(""));
        assert_eq!(cells[3], Value::from(""));
    }

    #[test]
    fn blank_rows_render_fully_empty() {
        let cells = row_cells(&OutputRow::default());
        assert!(cells.iter().all(|c| *c == Value::from("")));
    }

    #[test]
    fn defined_metrics_render_as_numbers() {
        let row = OutputRow {
            wide_qty: Some(2),
            wide_avg: Some(50.0),
            narrow_qty: Some(0),
            narrow_avg: Some(50.0),
        };
        let cells = row_cells(&row);
        assert_eq!(cells[1], Value::from(50.0));
        assert_eq!(cells[2], Value::from(0));
    }
}
