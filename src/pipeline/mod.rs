//! Job orchestrators: wire the API clients to the engine and the sheet.

pub mod delivery;
pub mod orders;
pub mod prices;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::engine::EnginePolicy;
use crate::engine::{AllocationMode, CurrencyPolicy, MissingQuantity, Rounding};
use crate::inventory::{CatalogCache, InventoryClient};
use crate::seller::{SellerAccount, SellerClient};
use crate::sheets::{SheetsClient, TokenProvider};
use crate::util::env::{env_flag, env_opt, env_parse, env_req};

/// How a job run ended. `NothingToDo` and `Skipped` are success states —
/// the scheduler retries tomorrow either way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum Outcome {
    Completed { rows: usize },
    NothingToDo,
    Skipped { reason: String },
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Completed { rows } => write!(f, "completed ({rows} rows)"),
            Outcome::NothingToDo => write!(f, "nothing to do"),
            Outcome::Skipped { reason } => write!(f, "skipped: {reason}"),
        }
    }
}

/// Everything the jobs read from the environment, resolved and validated
/// once at startup.
pub struct AppConfig {
    pub spreadsheet_id: String,
    pub service_account_json: String,
    pub orders_worksheet: String,
    pub prices_worksheet: String,
    pub accounts: Vec<SellerAccount>,
    pub seller_api_base: Option<String>,
    pub inventory_token: Option<String>,
    pub inventory_api_base: Option<String>,
    pub inventory_cache_path: PathBuf,
    pub inventory_cache_ttl: Duration,
    pub push_prices: bool,
    pub policy: EnginePolicy,
    pub cookies_file: PathBuf,
    pub portal_company_id: Option<String>,
    pub portal_base: Option<String>,
    pub delivery_lock: PathBuf,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        crate::util::env::preflight_check(
            "offersync",
            &[
                "SPREADSHEET_ID",
                "GOOGLE_SERVICE_ACCOUNT_JSON",
                "SELLER_CLIENT_ID_1",
                "SELLER_API_KEY_1",
            ],
            &[
                "SPREADSHEET_ID",
                "ORDERS_WORKSHEET",
                "PRICES_WORKSHEET",
                "SELLER_CLIENT_ID_1",
                "SELLER_CLIENT_ID_2",
                "INVENTORY_TOKEN",
                "PUSH_PRICES",
                "ACCEPTED_CURRENCY",
                "ALLOCATION_MODE",
                "MISSING_QUANTITY",
                "ROUNDING",
            ],
        )?;

        let mut accounts = vec![SellerAccount {
            label: "Cab1".to_string(),
            client_id: env_req("SELLER_CLIENT_ID_1")?,
            api_key: env_req("SELLER_API_KEY_1")?,
        }];
        if let (Some(client_id), Some(api_key)) =
            (env_opt("SELLER_CLIENT_ID_2"), env_opt("SELLER_API_KEY_2"))
        {
            accounts.push(SellerAccount {
                label: "Cab2".to_string(),
                client_id,
                api_key,
            });
        }

        let mut aliases = crate::engine::FieldAliases::default();
        if let Some(list) = env_list("QUANTITY_FIELDS") {
            aliases.quantity = list;
        }
        if let Some(list) = env_list("AMOUNT_FIELDS") {
            aliases.amount = list;
        }

        let policy = EnginePolicy {
            currency: CurrencyPolicy::new(
                &env_opt("ACCEPTED_CURRENCY").unwrap_or_else(|| "RUB".to_string()),
            ),
            allocation: parse_env("ALLOCATION_MODE", AllocationMode::PerItem)?,
            missing_quantity: parse_env("MISSING_QUANTITY", MissingQuantity::DefaultsToOne)?,
            rounding: parse_env("ROUNDING", Rounding::HalfUp)?,
            aliases,
        };
        policy.validate()?;

        Ok(Self {
            spreadsheet_id: env_req("SPREADSHEET_ID")?,
            service_account_json: env_req("GOOGLE_SERVICE_ACCOUNT_JSON")?,
            orders_worksheet: env_opt("ORDERS_WORKSHEET").unwrap_or_else(|| "Orders".to_string()),
            prices_worksheet: env_opt("PRICES_WORKSHEET").unwrap_or_else(|| "Prices".to_string()),
            accounts,
            seller_api_base: env_opt("SELLER_API_BASE"),
            inventory_token: env_opt("INVENTORY_TOKEN"),
            inventory_api_base: env_opt("INVENTORY_API_BASE"),
            inventory_cache_path: env_opt("INVENTORY_CACHE_PATH")
                .unwrap_or_else(|| ".cache/catalog.json".to_string())
                .into(),
            inventory_cache_ttl: Duration::from_secs(env_parse(
                "INVENTORY_CACHE_TTL_SECONDS",
                900u64,
            )),
            push_prices: env_flag("PUSH_PRICES", false),
            policy,
            cookies_file: env_opt("COOKIES_FILE")
                .unwrap_or_else(|| "cookies.txt".to_string())
                .into(),
            portal_company_id: env_opt("PORTAL_COMPANY_ID"),
            portal_base: env_opt("PORTAL_BASE"),
            delivery_lock: env_opt("DELIVERY_LOCK_FILE")
                .unwrap_or_else(|| "/var/lib/offersync/avg_delivery.lock".to_string())
                .into(),
        })
    }

    pub fn sheets_client(&self) -> Result<SheetsClient> {
        let auth = TokenProvider::from_file(&self.service_account_json)?;
        SheetsClient::new(auth, &self.spreadsheet_id)
    }

    pub fn seller_clients(&self) -> Result<Vec<SellerClient>> {
        self.accounts
            .iter()
            .map(|acc| SellerClient::new(self.seller_api_base.as_deref(), acc.clone()))
            .collect()
    }

    pub fn inventory_client(&self) -> Result<Option<InventoryClient>> {
        match self.inventory_token.as_deref() {
            Some(token) => Ok(Some(InventoryClient::new(
                self.inventory_api_base.as_deref(),
                token,
            )?)),
            None => Ok(None),
        }
    }

    pub fn catalog_cache(&self) -> CatalogCache {
        CatalogCache::new(&self.inventory_cache_path, self.inventory_cache_ttl)
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr<Err = anyhow::Error>,
{
    match env_opt(key) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("bad value for {key}")),
        None => Ok(default),
    }
}

/// Comma-separated alias override, e.g. `AMOUNT_FIELDS=amount,paid,sum`.
fn env_list(key: &str) -> Option<Vec<String>> {
    let raw = env_opt(key)?;
    let list: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    (!list.is_empty()).then_some(list)
}
