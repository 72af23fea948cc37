/// Canonical form of a product/offer code used as the aggregation key.
///
/// Sheets store codes as text (often with a leading apostrophe to stop the
/// spreadsheet from eating zeros), while the marketplace returns them both
/// zero-padded and bare. Collapsing all of those onto one form is what lets
/// lookups between the sheet column and API records actually hit.
///
/// Rules:
/// - trim surrounding whitespace and a leading `'` text marker
/// - all-digit tokens lose their leading zeros ("00512" -> "512", "000" -> "0")
/// - anything else passes through trimmed and otherwise untouched
///
/// The empty string is never a valid key; callers skip it.
pub fn normalize(raw: &str) -> String {
    let trimmed = raw.trim().trim_start_matches('\'').trim();
    if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        let stripped = trimmed.trim_start_matches('0');
        if stripped.is_empty() {
            "0".to_string()
        } else {
            stripped.to_string()
        }
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_leading_zeros_from_numeric_codes() {
        assert_eq!(normalize("00512"), "512");
        assert_eq!(normalize("512"), "512");
        assert_eq!(normalize("000"), "0");
    }

    #[test]
    fn leaves_alphanumeric_codes_alone() {
        assert_eq!(normalize("abc123"), "abc123");
        assert_eq!(normalize("  AB-07 "), "AB-07");
    }

    #[test]
    fn drops_sheet_text_marker() {
        assert_eq!(normalize("'00022"), "22");
        assert_eq!(normalize("' SKU-1"), "SKU-1");
    }

    #[test]
    fn empty_and_whitespace_normalize_to_empty() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   "), "");
        assert_eq!(normalize("'"), "");
    }

    #[test]
    fn idempotent() {
        for s in ["00512", "512", "abc123", "", "  7 ", "'0001", "A 1"] {
            let once = normalize(s);
            assert_eq!(normalize(&once), once);
        }
    }
}
