//! Invoice numbering.

use chrono::{DateTime, Utc};

/// `yyMMddHHmmss`. Unlike SKUs, invoice numbers include minutes.
pub const INVOICE_TIMESTAMP_FORMAT: &str = "%y%m%d%H%M%S";

/// `{storeCode}{yyMMddHHmmss}`.
///
/// Two checkouts of the same store within one second collide; the unique
/// constraint on invoice numbers catches it and checkout retries.
pub fn generate_invoice_number(store_code: &str, at: DateTime<Utc>) -> String {
    format!("{store_code}{}", at.format(INVOICE_TIMESTAMP_FORMAT))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn invoice_number_includes_minutes() {
        let at = Utc.with_ymd_and_hms(2026, 3, 7, 14, 25, 9).unwrap();
        assert_eq!(generate_invoice_number("STR", at), "STR260307142509");
    }
}
