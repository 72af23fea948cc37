use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::aggregate::Aggregate;

/// Half-rounding rule for monetary averages. Applied exactly once, at
/// derivation — never to raw amounts or allocation splits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rounding {
    HalfUp,
    HalfEven,
}

impl std::str::FromStr for Rounding {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "half-up" | "half_up" | "up" => Ok(Self::HalfUp),
            "half-even" | "half_even" | "even" | "bankers" => Ok(Self::HalfEven),
            other => anyhow::bail!("unknown rounding rule: {other:?}"),
        }
    }
}

pub fn round2(value: f64, rounding: Rounding) -> f64 {
    let scaled = value * 100.0;
    let rounded = match rounding {
        Rounding::HalfUp => scaled.round(),
        Rounding::HalfEven => scaled.round_ties_even(),
    };
    rounded / 100.0
}

/// Per-identifier output of the windowed derivation.
///
/// `None` averages mean "no data", which the sheet renders as an empty cell.
/// An average of exactly `0.00` is a different, valid outcome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WindowMetric {
    pub wide_qty: i64,
    pub wide_avg: Option<f64>,
    pub narrow_qty: i64,
    pub narrow_avg: Option<f64>,
}

/// Derive average-per-unit metrics from a wide-window and a narrow-window
/// aggregate over the same identifier space.
///
/// The narrow window is normally a subset of the wide one, but the two are
/// fetched independently and may race a window boundary; identifiers seen
/// only narrow are still derived rather than treated as an error. When the
/// narrow window has no units, its average falls back to the wide one — a
/// product that sold nothing this week still shows its long-run price.
pub fn derive(
    wide: &Aggregate,
    narrow: &Aggregate,
    rounding: Rounding,
) -> BTreeMap<String, WindowMetric> {
    let mut out = BTreeMap::new();

    for (identifier, totals) in wide.iter() {
        let wide_avg = (totals.quantity > 0).then(|| round2(totals.amount / totals.quantity as f64, rounding));
        out.insert(
            identifier.to_string(),
            WindowMetric {
                wide_qty: totals.quantity,
                wide_avg,
                narrow_qty: 0,
                narrow_avg: wide_avg,
            },
        );
    }

    for (identifier, totals) in narrow.iter() {
        let narrow_avg = (totals.quantity > 0).then(|| round2(totals.amount / totals.quantity as f64, rounding));
        let entry = out.entry(identifier.to_string()).or_insert(WindowMetric {
            wide_qty: 0,
            wide_avg: None,
            narrow_qty: 0,
            narrow_avg: None,
        });
        entry.narrow_qty = totals.quantity;
        if narrow_avg.is_some() {
            entry.narrow_avg = narrow_avg;
        }
        // else keep the wide fallback already in place (None when wide had no units)
    }

    out
}
