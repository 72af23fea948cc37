use std::collections::BTreeMap;

use super::ident::normalize;
use super::metrics::WindowMetric;

/// One output row, positionally aligned with the caller's identifier list.
///
/// `None` fields render as empty cells. A fully-`None` row is the blank row
/// emitted for an empty identifier slot (unused sheet rows stay untouched).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OutputRow {
    pub wide_qty: Option<i64>,
    pub wide_avg: Option<f64>,
    pub narrow_qty: Option<i64>,
    pub narrow_avg: Option<f64>,
}

impl OutputRow {
    pub fn is_blank(&self) -> bool {
        *self == Self::default()
    }
}

/// Map derived metrics back onto the sheet's identifier column.
///
/// Output order and length match `ordered_identifiers` exactly — the sheet
/// writer maps this 1:1 onto a fixed column range, so a length mismatch is a
/// bug here, not a data condition.
pub fn project(
    ordered_identifiers: &[String],
    metrics: &BTreeMap<String, WindowMetric>,
) -> Vec<OutputRow> {
    let rows: Vec<OutputRow> = ordered_identifiers
        .iter()
        .map(|raw| {
            if raw.trim().is_empty() {
                return OutputRow::default();
            }
            let key = normalize(raw);
            if key.is_empty() {
                return OutputRow::default();
            }
            match metrics.get(&key) {
                Some(m) => OutputRow {
                    wide_qty: Some(m.wide_qty),
                    wide_avg: m.wide_avg,
                    narrow_qty: Some(m.narrow_qty),
                    narrow_avg: m.narrow_avg,
                },
                // known row, no data: zero quantities, undefined averages
                None => OutputRow {
                    wide_qty: Some(0),
                    wide_avg: None,
                    narrow_qty: Some(0),
                    narrow_avg: None,
                },
            }
        })
        .collect();

    assert_eq!(
        rows.len(),
        ordered_identifiers.len(),
        "projection must stay positionally aligned with the identifier column"
    );
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(wide_qty: i64, wide_avg: f64) -> WindowMetric {
        WindowMetric {
            wide_qty,
            wide_avg: Some(wide_avg),
            narrow_qty: 0,
            narrow_avg: Some(wide_avg),
        }
    }

    #[test]
    fn alignment_blanks_and_duplicates() {
        let ordered = vec![
            "A".to_string(),
            "".to_string(),
            "B".to_string(),
            "A".to_string(),
        ];
        let mut metrics = BTreeMap::new();
        metrics.insert("A".to_string(), metric(2, 50.0));
        metrics.insert("B".to_string(), metric(1, 10.0));

        let rows = project(&ordered, &metrics);
        assert_eq!(rows.len(), 4);
        assert!(rows[1].is_blank());
        assert_eq!(rows[0], rows[3]);
        assert_eq!(rows[0].wide_qty, Some(2));
    }

    #[test]
    fn unknown_identifier_gets_zero_quantities_and_empty_averages() {
        let ordered = vec!["MISSING".to_string()];
        let rows = project(&ordered, &BTreeMap::new());
        assert_eq!(rows[0].wide_qty, Some(0));
        assert_eq!(rows[0].wide_avg, None);
        assert_eq!(rows[0].narrow_qty, Some(0));
        assert_eq!(rows[0].narrow_avg, None);
        assert!(!rows[0].is_blank());
    }

    #[test]
    fn raw_identifiers_are_normalized_before_lookup() {
        let ordered = vec!["'00022".to_string()];
        let mut metrics = BTreeMap::new();
        metrics.insert("22".to_string(), metric(4, 9.99));
        let rows = project(&ordered, &metrics);
        assert_eq!(rows[0].wide_qty, Some(4));
    }
}
