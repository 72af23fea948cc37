use serde::{Deserialize, Serialize};

/// Which currency counts toward the aggregates.
///
/// A missing or blank currency code is accepted: most records simply omit the
/// field and mean the account's settlement currency. A present code has to
/// match the accepted one (case-insensitive) or the line item is dropped
/// before it ever reaches an aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyPolicy {
    accepted: String,
}

impl CurrencyPolicy {
    pub fn new(accepted_code: &str) -> Self {
        Self {
            accepted: accepted_code.trim().to_ascii_uppercase(),
        }
    }

    pub fn accepted_code(&self) -> &str {
        &self.accepted
    }

    pub fn accepts(&self, currency: Option<&str>) -> bool {
        match currency {
            None => true,
            Some(code) if code.trim().is_empty() => true,
            Some(code) => code.trim().eq_ignore_ascii_case(&self.accepted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_currency_is_accepted() {
        let policy = CurrencyPolicy::new("RUB");
        assert!(policy.accepts(None));
        assert!(policy.accepts(Some("")));
        assert!(policy.accepts(Some("  ")));
    }

    #[test]
    fn matching_is_case_insensitive() {
        let policy = CurrencyPolicy::new("RUB");
        assert!(policy.accepts(Some("RUB")));
        assert!(policy.accepts(Some("rub")));
        assert!(policy.accepts(Some(" Rub ")));
    }

    #[test]
    fn foreign_currency_is_rejected() {
        let policy = CurrencyPolicy::new("RUB");
        assert!(!policy.accepts(Some("USD")));
        assert!(!policy.accepts(Some("eur")));
    }
}
