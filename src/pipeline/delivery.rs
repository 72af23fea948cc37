//! Delivery-tariff job: once a day, pull the latest tariff/fee percentages
//! from the seller portal and stamp them down the sheet's two share columns.

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{info, warn};

use crate::lock::daily_lock;
use crate::portal::PortalClient;
use crate::sheets::a1;

use super::{AppConfig, Outcome};

const HEADER_ROW: u32 = 2;
const DATA_START_ROW: u32 = 3;

pub async fn run(cfg: &AppConfig) -> Result<Outcome> {
    if !daily_lock(&cfg.delivery_lock)? {
        info!("delivery metrics already fetched today");
        return Ok(Outcome::Skipped {
            reason: "already ran today".to_string(),
        });
    }

    let company_id = cfg
        .portal_company_id
        .as_deref()
        .context("PORTAL_COMPANY_ID is required for the delivery job")?;
    let portal = PortalClient::new(&cfg.cookies_file, company_id, cfg.portal_base.as_deref())?;
    let metrics = portal.latest_delivery_metrics().await?;
    info!(?metrics, "portal delivery metrics");

    // the portal reports basis points of a percent
    let logistics_share = metrics.tariff_value.unwrap_or(0.0) / 100.0;
    let price_share = metrics.fee.unwrap_or(0.0) / 100.0;

    let sheets = cfg.sheets_client()?;
    let ws = &cfg.orders_worksheet;

    let col_a = sheets.col_values(ws, "A", 1).await?;
    let last_row = col_a.len() as u32;
    if last_row < DATA_START_ROW {
        warn!(worksheet = %ws, rows = last_row, "no data rows to stamp");
        return Ok(Outcome::NothingToDo);
    }

    sheets
        .values_update(
            &a1(ws, &format!("R{HEADER_ROW}:S{HEADER_ROW}")),
            vec![vec![Value::from("% logistics"), Value::from("% of price")]],
        )
        .await?;

    let nrows = (last_row - DATA_START_ROW + 1) as usize;
    let values: Vec<Vec<Value>> = (0..nrows)
        .map(|_| vec![Value::from(logistics_share), Value::from(price_share)])
        .collect();
    sheets
        .values_update(&a1(ws, &format!("R{DATA_START_ROW}:S{last_row}")), values)
        .await?;

    info!(rows = nrows, logistics_share, price_share, "delivery shares written");
    Ok(Outcome::Completed { rows: nrows })
}
