use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::extract::LineItem;

/// How record-level money maps onto line items.
///
/// `PerItem` sources carry an amount on every line item. `Proportional`
/// sources record money once per whole record (e.g. one payable total for an
/// order with several products); the total is split across the record's items
/// by quantity share before folding. A run uses exactly one mode — mixing the
/// two silently would double-count or zero out money depending on the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AllocationMode {
    PerItem,
    Proportional,
}

impl std::str::FromStr for AllocationMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per-item" | "per_item" | "item" => Ok(Self::PerItem),
            "proportional" => Ok(Self::Proportional),
            other => anyhow::bail!("unknown allocation mode: {other:?}"),
        }
    }
}

/// Running totals for one identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Totals {
    pub quantity: i64,
    pub amount: f64,
}

/// Per-identifier running totals over one record stream.
///
/// Built by `fold`ing line items in, or by `combine`ing whole aggregates from
/// other pages/accounts. Combination is key-wise addition, so it is
/// commutative and associative: folding item by item, page by page, or
/// account by account all land on the same totals for the same record set.
/// That property is what makes upstream fetch order irrelevant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregate {
    totals: BTreeMap<String, Totals>,
}

impl Aggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one line item. Empty identifiers are the caller's bug to avoid;
    /// they are skipped here rather than poisoning the keyspace.
    pub fn fold(&mut self, item: &LineItem) {
        if item.identifier.is_empty() {
            return;
        }
        let entry = self.totals.entry(item.identifier.clone()).or_default();
        entry.quantity += item.quantity;
        entry.amount += item.amount;
    }

    /// Key-wise sum of another aggregate into this one.
    pub fn combine(&mut self, other: Aggregate) {
        for (identifier, totals) in other.totals {
            let entry = self.totals.entry(identifier).or_default();
            entry.quantity += totals.quantity;
            entry.amount += totals.amount;
        }
    }

    pub fn get(&self, identifier: &str) -> Option<Totals> {
        self.totals.get(identifier).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Totals)> {
        self.totals.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.totals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }
}

/// Split a record-level amount across its line items by quantity share.
///
/// Pre-existing per-item amounts are overwritten: in proportional mode the
/// record total is the only money that counts. A record with no resolvable
/// quantity keeps every amount at zero rather than inventing a split.
pub fn allocate_proportional(record_amount: f64, items: &mut [LineItem]) {
    let total_quantity: i64 = items.iter().map(|it| it.quantity).sum();
    if total_quantity <= 0 {
        for item in items.iter_mut() {
            item.amount = 0.0;
        }
        return;
    }
    for item in items.iter_mut() {
        item.amount = record_amount * (item.quantity as f64) / (total_quantity as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(identifier: &str, quantity: i64, amount: f64) -> LineItem {
        LineItem {
            identifier: identifier.to_string(),
            quantity,
            amount,
            currency: None,
        }
    }

    fn folded(items: &[LineItem]) -> Aggregate {
        let mut agg = Aggregate::new();
        for it in items {
            agg.fold(it);
        }
        agg
    }

    #[test]
    fn fold_accumulates_per_identifier() {
        let agg = folded(&[item("7", 1, 50.0), item("7", 2, 100.0), item("9", 1, 10.0)]);
        assert_eq!(agg.get("7"), Some(Totals { quantity: 3, amount: 150.0 }));
        assert_eq!(agg.get("9"), Some(Totals { quantity: 1, amount: 10.0 }));
        assert_eq!(agg.get("8"), None);
    }

    #[test]
    fn fold_one_at_a_time_equals_split_then_combine() {
        let items = [item("a", 1, 10.0), item("b", 2, 30.0), item("a", 3, 5.5)];

        let all_at_once = folded(&items);

        let mut head = folded(&items[..1]);
        let tail = folded(&items[1..]);
        head.combine(tail);

        assert_eq!(all_at_once, head);
    }

    #[test]
    fn combine_is_commutative_and_associative() {
        let a = folded(&[item("x", 1, 1.0), item("y", 2, 4.0)]);
        let b = folded(&[item("y", 1, 2.0), item("z", 5, 0.5)]);
        let c = folded(&[item("x", 4, 8.0)]);

        let mut ab_c = a.clone();
        ab_c.combine(b.clone());
        ab_c.combine(c.clone());

        let mut a_bc = a.clone();
        let mut bc = b.clone();
        bc.combine(c.clone());
        a_bc.combine(bc);

        let mut b_ac = b.clone();
        let mut ac = a.clone();
        ac.combine(c.clone());
        b_ac.combine(ac);

        assert_eq!(ab_c, a_bc);
        assert_eq!(ab_c, b_ac);
    }

    #[test]
    fn proportional_split_follows_quantity_share() {
        let mut items = vec![item("a", 1, 0.0), item("b", 2, 0.0)];
        allocate_proportional(300.0, &mut items);
        assert_eq!(items[0].amount, 100.0);
        assert_eq!(items[1].amount, 200.0);
    }

    #[test]
    fn proportional_split_overwrites_per_item_amounts() {
        let mut items = vec![item("a", 1, 999.0), item("b", 3, 999.0)];
        allocate_proportional(100.0, &mut items);
        assert_eq!(items[0].amount, 25.0);
        assert_eq!(items[1].amount, 75.0);
    }

    #[test]
    fn proportional_split_with_zero_quantity_zeroes_amounts() {
        let mut items = vec![item("a", 0, 5.0)];
        allocate_proportional(300.0, &mut items);
        assert_eq!(items[0].amount, 0.0);
    }
}
