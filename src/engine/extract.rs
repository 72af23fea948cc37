use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ident::normalize;

/// One (identifier, quantity, amount, currency) tuple pulled out of a raw
/// record. Transient: produced, filtered, folded, gone.
#[derive(Debug, Clone, PartialEq)]
pub struct LineItem {
    pub identifier: String,
    pub quantity: i64,
    pub amount: f64,
    pub currency: Option<String>,
}

/// What to do with a line item whose quantity cannot be resolved.
///
/// Upstream schema drift means some sources omit the quantity entirely. A
/// record that names a product at all usually implies one unit, but a few
/// reconciliations want those rows gone instead. One rule per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissingQuantity {
    DefaultsToOne,
    Excluded,
}

impl std::str::FromStr for MissingQuantity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "one" | "default-one" | "defaults-to-one" => Ok(Self::DefaultsToOne),
            "exclude" | "excluded" | "drop" => Ok(Self::Excluded),
            other => anyhow::bail!("unknown missing-quantity rule: {other:?}"),
        }
    }
}

/// Ordered accessor lists per field, tried in sequence, first hit wins.
///
/// Upstream payload shapes drift between API versions: line items move
/// between nested locations and the same monetary value shows up under
/// different names. Keeping the alias order as data (instead of cascading
/// conditionals) lets the lists be extended and tested on their own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldAliases {
    /// Dotted paths to the line-item array, e.g. `posting.items`.
    pub item_paths: Vec<String>,
    /// Direct identifier fields on a line item.
    pub identifier: Vec<String>,
    /// Internal numeric product key fields, resolved through a `SkuIndex`.
    pub internal_key: Vec<String>,
    pub quantity: Vec<String>,
    pub amount: Vec<String>,
    /// Currency code fields, looked up on the item first, then the record.
    pub currency: Vec<String>,
}

impl Default for FieldAliases {
    fn default() -> Self {
        Self {
            item_paths: vec![
                "posting.items".into(),
                "posting.products".into(),
                "items".into(),
                "products".into(),
            ],
            identifier: vec!["offer_id".into(), "article".into()],
            internal_key: vec![
                "sku".into(),
                "product_id".into(),
                "offer_sku".into(),
                "id".into(),
            ],
            quantity: vec!["quantity".into(), "qty".into(), "count".into()],
            amount: vec![
                "amount".into(),
                "price".into(),
                "value".into(),
                "customer_price".into(),
                "paid".into(),
                "sum".into(),
            ],
            currency: vec!["currency_code".into(), "currency".into()],
        }
    }
}

/// Side-loaded `{internal key -> canonical identifier}` map.
///
/// Financial lines often carry only an internal numeric product key while the
/// identifier lives in a separate product listing (a sibling array in the
/// same record, or a product-info endpoint). First registration wins, so
/// merging indexes from several accounts keeps the earlier account's mapping
/// for overlapping keys.
#[derive(Debug, Clone, Default)]
pub struct SkuIndex {
    map: HashMap<i64, String>,
}

impl SkuIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: i64, raw_identifier: &str) {
        if key == 0 {
            return;
        }
        let identifier = normalize(raw_identifier);
        if identifier.is_empty() {
            return;
        }
        self.map.entry(key).or_insert(identifier);
    }

    pub fn get(&self, key: i64) -> Option<&str> {
        self.map.get(&key).map(|s| s.as_str())
    }

    /// Harvest `(internal key, identifier)` pairs from the record's own item
    /// arrays — product listings that name both sit next to financial lines
    /// that name only the key.
    pub fn absorb_record(&mut self, record: &Value, aliases: &FieldAliases) {
        for item in iter_items(record, aliases) {
            let Some(key) = first_i64(item, &aliases.internal_key) else {
                continue;
            };
            if let Some(raw) = first_str(item, &aliases.identifier) {
                self.insert(key, raw);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Counters for the data the extractor intentionally loses.
///
/// Upstream data is inconsistent enough that dropping an unmatched line item
/// is routine, not exceptional — but the run should be able to say how much
/// it dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExtractStats {
    pub records: u64,
    pub line_items: u64,
    pub dropped_no_identifier: u64,
    pub dropped_no_quantity: u64,
    pub rejected_currency: u64,
}

/// Pull zero or more line items out of one raw record.
///
/// Never fails: a malformed record simply yields fewer (or no) items, with
/// the losses counted in `stats`.
pub fn extract(
    record: &Value,
    aliases: &FieldAliases,
    index: &SkuIndex,
    missing_quantity: MissingQuantity,
    stats: &mut ExtractStats,
) -> Vec<LineItem> {
    stats.records += 1;
    let record_currency = first_str(record, &aliases.currency).map(|s| s.to_string());

    let mut out = Vec::new();
    for item in iter_items(record, aliases) {
        let Some(identifier) = resolve_identifier(item, aliases, index) else {
            stats.dropped_no_identifier += 1;
            continue;
        };

        let quantity = match resolve_quantity(item, aliases) {
            Some(q) => q,
            None => match missing_quantity {
                MissingQuantity::DefaultsToOne => 1,
                MissingQuantity::Excluded => {
                    stats.dropped_no_quantity += 1;
                    continue;
                }
            },
        };

        let amount = resolve_amount(item, aliases).unwrap_or(0.0);
        let currency = first_str(item, &aliases.currency)
            .map(|s| s.to_string())
            .or_else(|| record_currency.clone());

        stats.line_items += 1;
        out.push(LineItem {
            identifier,
            quantity,
            amount,
            currency,
        });
    }
    out
}

/// Record-level money for proportional allocation: the amount alias list
/// applied to the record root instead of a line item.
pub fn record_amount(record: &Value, aliases: &FieldAliases) -> Option<f64> {
    resolve_amount(record, aliases)
}

/// First item-array location that yields a non-empty array wins.
fn iter_items<'a>(record: &'a Value, aliases: &FieldAliases) -> impl Iterator<Item = &'a Value> {
    let arr = aliases
        .item_paths
        .iter()
        .filter_map(|path| lookup_path(record, path).and_then(Value::as_array))
        .find(|arr| !arr.is_empty());
    arr.into_iter()
        .flatten()
        .filter(|item| item.is_object())
}

fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = value;
    for seg in path.split('.') {
        cur = cur.get(seg)?;
    }
    Some(cur)
}

fn resolve_identifier(item: &Value, aliases: &FieldAliases, index: &SkuIndex) -> Option<String> {
    if let Some(raw) = first_str(item, &aliases.identifier) {
        let identifier = normalize(raw);
        if !identifier.is_empty() {
            return Some(identifier);
        }
    }
    let key = first_i64(item, &aliases.internal_key)?;
    index.get(key).map(|s| s.to_string())
}

/// First alias with a positive parseable value wins; zero or garbage falls
/// through to the next alias.
fn resolve_quantity(item: &Value, aliases: &FieldAliases) -> Option<i64> {
    aliases
        .quantity
        .iter()
        .filter_map(|k| item.get(k).and_then(value_as_i64))
        .find(|q| *q > 0)
}

fn resolve_amount(item: &Value, aliases: &FieldAliases) -> Option<f64> {
    if let Some(v) = aliases
        .amount
        .iter()
        .filter_map(|k| item.get(k).and_then(value_as_f64))
        .next()
    {
        return Some(v);
    }
    // Some shapes bury the money one level down: {"money": {"amount": ...}}
    let money = item.get("money")?;
    aliases
        .amount
        .iter()
        .filter_map(|k| money.get(k).and_then(value_as_f64))
        .next()
}

fn first_str<'a>(value: &'a Value, keys: &[String]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| value.get(k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

fn first_i64(value: &Value, keys: &[String]) -> Option<i64> {
    keys.iter()
        .filter_map(|k| value.get(k).and_then(value_as_i64))
        .find(|v| *v != 0)
}

/// Numbers arrive as numbers or as strings with either decimal separator.
/// Anything unparseable counts as absent, never as an error.
pub(crate) fn value_as_f64(v: &Value) -> Option<f64> {
    if let Some(n) = v.as_f64() {
        return Some(n);
    }
    if let Some(s) = v.as_str() {
        return s.trim().replace(',', ".").parse::<f64>().ok();
    }
    None
}

pub(crate) fn value_as_i64(v: &Value) -> Option<i64> {
    if let Some(n) = v.as_i64() {
        return Some(n);
    }
    value_as_f64(v).map(|f| f as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn extract_all(record: &Value, index: &SkuIndex) -> (Vec<LineItem>, ExtractStats) {
        let mut stats = ExtractStats::default();
        let items = extract(
            record,
            &FieldAliases::default(),
            index,
            MissingQuantity::DefaultsToOne,
            &mut stats,
        );
        (items, stats)
    }

    #[test]
    fn reads_items_from_nested_posting() {
        let record = json!({
            "posting": {"items": [{"offer_id": "00512", "quantity": 2, "amount": 100.0}]}
        });
        let (items, stats) = extract_all(&record, &SkuIndex::new());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].identifier, "512");
        assert_eq!(items[0].quantity, 2);
        assert_eq!(items[0].amount, 100.0);
        assert_eq!(stats.line_items, 1);
    }

    #[test]
    fn first_nonempty_item_location_wins() {
        let record = json!({
            "posting": {"items": []},
            "items": [{"offer_id": "7", "qty": 1, "price": 50}],
            "products": [{"offer_id": "ignored", "qty": 9, "price": 1}]
        });
        let (items, _) = extract_all(&record, &SkuIndex::new());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].identifier, "7");
        assert_eq!(items[0].amount, 50.0);
    }

    #[test]
    fn quantity_aliases_skip_zero_and_garbage() {
        let record = json!({
            "items": [{"offer_id": "1", "quantity": 0, "qty": "junk", "count": 3, "amount": 9}]
        });
        let (items, _) = extract_all(&record, &SkuIndex::new());
        assert_eq!(items[0].quantity, 3);
    }

    #[test]
    fn missing_quantity_defaults_to_one() {
        let record = json!({"items": [{"offer_id": "1", "amount": 10}]});
        let (items, _) = extract_all(&record, &SkuIndex::new());
        assert_eq!(items[0].quantity, 1);
    }

    #[test]
    fn missing_quantity_can_exclude_instead() {
        let record = json!({"items": [{"offer_id": "1", "amount": 10}]});
        let mut stats = ExtractStats::default();
        let items = extract(
            &record,
            &FieldAliases::default(),
            &SkuIndex::new(),
            MissingQuantity::Excluded,
            &mut stats,
        );
        assert!(items.is_empty());
        assert_eq!(stats.dropped_no_quantity, 1);
    }

    #[test]
    fn amount_falls_back_through_aliases_and_money_object() {
        let record = json!({
            "items": [
                {"offer_id": "1", "quantity": 1, "customer_price": "12,50"},
                {"offer_id": "2", "quantity": 1, "money": {"value": 7.5}},
                {"offer_id": "3", "quantity": 1}
            ]
        });
        let (items, _) = extract_all(&record, &SkuIndex::new());
        assert_eq!(items[0].amount, 12.5);
        assert_eq!(items[1].amount, 7.5);
        // no resolvable amount keeps the item with zero money
        assert_eq!(items[2].amount, 0.0);
    }

    #[test]
    fn internal_key_resolves_through_index() {
        let mut index = SkuIndex::new();
        index.insert(9001, "00022");
        let record = json!({
            "items": [
                {"sku": 9001, "quantity": 1, "amount": 5},
                {"sku": 9002, "quantity": 1, "amount": 5}
            ]
        });
        let (items, stats) = extract_all(&record, &index);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].identifier, "22");
        assert_eq!(stats.dropped_no_identifier, 1);
    }

    #[test]
    fn sibling_product_array_feeds_the_index() {
        let mut index = SkuIndex::new();
        let listing = json!({
            "products": [{"sku": 31, "offer_id": "0007"}]
        });
        index.absorb_record(&listing, &FieldAliases::default());
        assert_eq!(index.get(31), Some("7"));

        let financial = json!({"items": [{"sku": 31, "quantity": 2, "amount": 80}]});
        let (items, _) = extract_all(&financial, &index);
        assert_eq!(items[0].identifier, "7");
    }

    #[test]
    fn first_index_registration_wins() {
        let mut index = SkuIndex::new();
        index.insert(5, "A");
        index.insert(5, "B");
        assert_eq!(index.get(5), Some("A"));
    }

    #[test]
    fn currency_comes_from_item_then_record() {
        let record = json!({
            "currency_code": "USD",
            "items": [
                {"offer_id": "1", "quantity": 1, "amount": 1, "currency_code": "RUB"},
                {"offer_id": "2", "quantity": 1, "amount": 1}
            ]
        });
        let (items, _) = extract_all(&record, &SkuIndex::new());
        assert_eq!(items[0].currency.as_deref(), Some("RUB"));
        assert_eq!(items[1].currency.as_deref(), Some("USD"));
    }

    #[test]
    fn record_without_items_yields_nothing() {
        let record = json!({"operation_type": "whatever"});
        let (items, stats) = extract_all(&record, &SkuIndex::new());
        assert!(items.is_empty());
        assert_eq!(stats.records, 1);
        assert_eq!(stats.line_items, 0);
    }

    #[test]
    fn record_amount_reads_the_record_root() {
        let record = json!({"amount": "300", "items": [{"offer_id": "1", "quantity": 1}]});
        assert_eq!(
            record_amount(&record, &FieldAliases::default()),
            Some(300.0)
        );
    }
}
