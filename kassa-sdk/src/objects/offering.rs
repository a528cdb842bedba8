use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A conversion offering as published by a counterparty on
/// `GET {endpoint}/offerings`.
///
/// Currency codes are carried as plain strings: counterparties may list
/// pairs the platform does not support, and those are filtered out by the
/// consumer rather than rejected at parse time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedOffering {
    pub id: String,
    pub payin_currency: String,
    pub payout_currency: String,
    /// Units of payout currency per unit of payin currency.
    pub rate: Decimal,
    /// Flat fee charged by the counterparty, in the payin currency.
    #[serde(default)]
    pub fee: Decimal,
    /// Estimated settlement time in seconds.
    #[serde(default)]
    pub settlement_secs: i64,
    #[serde(default)]
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn missing_optional_fields_default() {
        let json = r#"{"id":"off_1","payin_currency":"USD","payout_currency":"EUR","rate":"0.92"}"#;
        let offering: PublishedOffering = serde_json::from_str(json).unwrap();
        assert_eq!(offering.rate, dec!(0.92));
        assert_eq!(offering.fee, Decimal::ZERO);
        assert_eq!(offering.settlement_secs, 0);
        assert!(offering.description.is_none());
    }
}
