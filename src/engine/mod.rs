//! Identifier-keyed aggregation engine.
//!
//! Turns heterogeneous, paginated, multi-account financial records into
//! per-product metrics: normalize identifiers, extract line items, filter by
//! currency, fold into per-window aggregates, derive averages with a
//! narrow-to-wide fallback, and project the result back onto the sheet's row
//! order. Pure and synchronous — all fetching and writing lives with the
//! callers, which is what keeps page/account arrival order irrelevant here.

pub mod aggregate;
pub mod extract;
pub mod filter;
pub mod ident;
pub mod metrics;
pub mod project;

use anyhow::Result;
use serde_json::Value;

pub use aggregate::{allocate_proportional, Aggregate, AllocationMode, Totals};
pub use extract::{ExtractStats, FieldAliases, LineItem, MissingQuantity, SkuIndex};
pub use filter::CurrencyPolicy;
pub use ident::normalize;
pub use metrics::{derive, round2, Rounding, WindowMetric};
pub use project::{project, OutputRow};

/// Everything variable about one aggregation run, fixed up front.
///
/// Validated before the first record is touched so a bad configuration fails
/// the run at startup instead of halfway through a paginated fetch.
#[derive(Debug, Clone)]
pub struct EnginePolicy {
    pub currency: CurrencyPolicy,
    pub allocation: AllocationMode,
    pub missing_quantity: MissingQuantity,
    pub rounding: Rounding,
    pub aliases: FieldAliases,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self {
            currency: CurrencyPolicy::new("RUB"),
            allocation: AllocationMode::PerItem,
            missing_quantity: MissingQuantity::DefaultsToOne,
            rounding: Rounding::HalfUp,
            aliases: FieldAliases::default(),
        }
    }
}

impl EnginePolicy {
    pub fn validate(&self) -> Result<()> {
        if self.currency.accepted_code().is_empty() {
            anyhow::bail!("accepted currency code must not be blank");
        }
        if self.aliases.item_paths.is_empty() {
            anyhow::bail!("at least one line-item location is required");
        }
        if self.aliases.quantity.is_empty() || self.aliases.amount.is_empty() {
            anyhow::bail!("quantity and amount alias lists must not be empty");
        }
        if self.aliases.identifier.is_empty() && self.aliases.internal_key.is_empty() {
            anyhow::bail!("no way to resolve identifiers: both alias lists are empty");
        }
        Ok(())
    }
}

/// Extract, filter and fold one raw record into a caller-owned aggregate.
///
/// In proportional mode the record-level amount is split by quantity share
/// and per-item amounts are ignored; the two money granularities never mix
/// within a run.
pub fn fold_record(
    agg: &mut Aggregate,
    record: &Value,
    index: &SkuIndex,
    policy: &EnginePolicy,
    stats: &mut ExtractStats,
) {
    let mut items = extract::extract(
        record,
        &policy.aliases,
        index,
        policy.missing_quantity,
        stats,
    );

    items.retain(|item| {
        if policy.currency.accepts(item.currency.as_deref()) {
            true
        } else {
            stats.rejected_currency += 1;
            false
        }
    });

    if policy.allocation == AllocationMode::Proportional {
        let total = extract::record_amount(record, &policy.aliases).unwrap_or(0.0);
        allocate_proportional(total, &mut items);
    }

    for item in &items {
        agg.fold(item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn two_accounts_one_identifier_fallback_end_to_end() {
        let policy = EnginePolicy::default();
        policy.validate().unwrap();
        let index = SkuIndex::new();
        let mut stats = ExtractStats::default();

        // each account reports one paid unit of offer "7" in the wide window
        let record = json!({
            "items": [{"offer_id": "7", "quantity": 1, "amount": 50.0}]
        });

        let mut wide_acc1 = Aggregate::new();
        let mut wide_acc2 = Aggregate::new();
        fold_record(&mut wide_acc1, &record, &index, &policy, &mut stats);
        fold_record(&mut wide_acc2, &record, &index, &policy, &mut stats);

        let mut wide = Aggregate::new();
        wide.combine(wide_acc1);
        wide.combine(wide_acc2);
        let narrow = Aggregate::new();

        let metrics = derive(&wide, &narrow, policy.rounding);
        let rows = project(&["7".to_string()], &metrics);

        assert_eq!(rows[0].wide_qty, Some(2));
        assert_eq!(rows[0].wide_avg, Some(50.0));
        assert_eq!(rows[0].narrow_qty, Some(0));
        assert_eq!(rows[0].narrow_avg, Some(50.0));
    }

    #[test]
    fn foreign_currency_never_reaches_the_aggregate() {
        let policy = EnginePolicy::default();
        let mut stats = ExtractStats::default();
        let record = json!({
            "items": [
                {"offer_id": "1", "quantity": 1, "amount": 10.0, "currency_code": "USD"},
                {"offer_id": "2", "quantity": 1, "amount": 20.0}
            ]
        });

        let mut agg = Aggregate::new();
        fold_record(&mut agg, &record, &SkuIndex::new(), &policy, &mut stats);

        assert_eq!(agg.get("1"), None);
        assert_eq!(agg.get("2").unwrap().amount, 20.0);
        assert_eq!(stats.rejected_currency, 1);
    }

    #[test]
    fn proportional_mode_splits_the_record_total() {
        let policy = EnginePolicy {
            allocation: AllocationMode::Proportional,
            ..EnginePolicy::default()
        };
        let mut stats = ExtractStats::default();
        // per-item prices present but ignored: the record total is the money
        let record = json!({
            "amount": 300.0,
            "items": [
                {"offer_id": "a", "quantity": 1, "price": 999.0},
                {"offer_id": "b", "quantity": 2, "price": 999.0}
            ]
        });

        let mut agg = Aggregate::new();
        fold_record(&mut agg, &record, &SkuIndex::new(), &policy, &mut stats);

        assert_eq!(agg.get("a").unwrap().amount, 100.0);
        assert_eq!(agg.get("b").unwrap().amount, 200.0);
    }

    #[test]
    fn blank_accepted_currency_fails_validation() {
        let policy = EnginePolicy {
            currency: CurrencyPolicy::new("  "),
            ..EnginePolicy::default()
        };
        assert!(policy.validate().is_err());
    }
}
