//! Pricing a chosen chain.

use super::ExchangeError;
use super::paths::CatalogOffering;
use crate::config::CurrencySettings;
use crate::entities::Currency;
use rust_decimal::Decimal;
use serde::Serialize;

/// Expected amounts for one hop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HopQuote {
    pub offering_id: String,
    pub counterparty_id: String,
    pub payin_currency: Currency,
    pub payout_currency: Currency,
    pub rate: Decimal,
    pub fee: Decimal,
    pub payin_amount: Decimal,
    pub payout_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExchangeQuote {
    pub payin_currency: Currency,
    pub payout_currency: Currency,
    pub payin_amount: Decimal,
    pub payout_amount: Decimal,
    pub platform_fee: Decimal,
    pub provider_fee: Decimal,
    /// What is debited from the user: `payin_amount + platform_fee`.
    pub total_payin_amount: Decimal,
    pub rate: Decimal,
    pub settlement_secs: i64,
    pub hops: Vec<HopQuote>,
}

/// Price `payin_amount` through `offerings`, in order.
///
/// Fails if the chain is empty or not connected hop to hop.
pub fn summarize(
    payin_amount: Decimal,
    offerings: &[CatalogOffering],
    settings: &CurrencySettings,
) -> Result<ExchangeQuote, ExchangeError> {
    if payin_amount <= Decimal::ZERO {
        return Err(ExchangeError::Validation(format!(
            "amount must be positive, got {payin_amount}"
        )));
    }
    let (Some(first), Some(last)) = (offerings.first(), offerings.last()) else {
        return Err(ExchangeError::Validation("no offerings given".into()));
    };
    for (k, pair) in offerings.windows(2).enumerate() {
        if pair[0].payout_currency != pair[1].payin_currency {
            return Err(ExchangeError::Validation(format!(
                "hop {k} pays out {} but hop {} takes {}",
                pair[0].payout_currency,
                k + 1,
                pair[1].payin_currency
            )));
        }
    }
    let mut seen = std::collections::HashSet::from([first.payin_currency]);
    if !offerings.iter().all(|o| seen.insert(o.payout_currency)) {
        return Err(ExchangeError::Validation(
            "chain visits a currency twice".into(),
        ));
    }

    let overflow = || ExchangeError::Validation("amount out of range".into());
    let mut hops = Vec::with_capacity(offerings.len());
    let mut amount = payin_amount;
    let mut rate = Decimal::ONE;
    let mut provider_fee = Decimal::ZERO;
    let mut settlement_secs = 0i64;
    for o in offerings {
        let payout = amount.checked_mul(o.rate).ok_or_else(overflow)?;
        hops.push(HopQuote {
            offering_id: o.id.clone(),
            counterparty_id: o.counterparty_id.clone(),
            payin_currency: o.payin_currency,
            payout_currency: o.payout_currency,
            rate: o.rate,
            fee: o.fee,
            payin_amount: amount,
            payout_amount: payout,
        });
        amount = payout;
        rate = rate.checked_mul(o.rate).ok_or_else(overflow)?;
        provider_fee += o.fee;
        settlement_secs = settlement_secs.saturating_add(o.settlement_secs);
    }

    let platform_fee = settings.platform_fee(first.payin_currency, payin_amount);
    Ok(ExchangeQuote {
        payin_currency: first.payin_currency,
        payout_currency: last.payout_currency,
        payin_amount,
        payout_amount: amount,
        platform_fee,
        provider_fee,
        total_payin_amount: payin_amount + platform_fee,
        rate,
        settlement_secs,
        hops,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn offering(id: &str, from: Currency, to: Currency, rate: Decimal) -> CatalogOffering {
        CatalogOffering {
            id: id.into(),
            counterparty_id: format!("cp-{id}"),
            payin_currency: from,
            payout_currency: to,
            rate,
            fee: dec!(0.5),
            settlement_secs: 30,
        }
    }

    #[test]
    fn cascades_amounts_and_fees() {
        let chain = [
            offering("A", Currency::Usd, Currency::Eur, dec!(0.9)),
            offering("B", Currency::Eur, Currency::Gbp, dec!(0.85)),
        ];
        let quote = summarize(dec!(100), &chain, &CurrencySettings::default()).unwrap();
        assert_eq!(quote.hops[0].payout_amount, dec!(90));
        assert_eq!(quote.hops[1].payin_amount, dec!(90));
        assert_eq!(quote.payout_amount, dec!(76.5));
        assert_eq!(quote.rate, dec!(0.765));
        assert_eq!(quote.provider_fee, dec!(1));
        // 2% of 100 USD.
        assert_eq!(quote.platform_fee, dec!(2));
        assert_eq!(quote.total_payin_amount, dec!(102));
        assert_eq!(quote.settlement_secs, 60);
    }

    #[test]
    fn rejects_disconnected_chains() {
        let chain = [
            offering("A", Currency::Usd, Currency::Eur, dec!(0.9)),
            offering("B", Currency::Gbp, Currency::Ngn, dec!(2000)),
        ];
        assert!(matches!(
            summarize(dec!(1), &chain, &CurrencySettings::default()),
            Err(ExchangeError::Validation(_))
        ));
        assert!(matches!(
            summarize(dec!(1), &[], &CurrencySettings::default()),
            Err(ExchangeError::Validation(_))
        ));
    }
}
