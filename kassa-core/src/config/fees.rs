//! Per-currency fee schedule and funding/withdrawal switches.

use crate::entities::Currency;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Fees applied to operations denominated in one currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyFees {
    /// Fraction of the exchanged amount charged as platform fee (0.02 = 2%).
    pub exchange_fee_pct: Decimal,
    #[serde(default)]
    pub min_exchange_fee: Decimal,
    pub max_exchange_fee: Decimal,
    /// Flat fee added on top of every external withdrawal.
    pub transfer_fee: Decimal,
    #[serde(default = "enabled")]
    pub withdrawal_enabled: bool,
    #[serde(default = "enabled")]
    pub funding_enabled: bool,
}

fn enabled() -> bool {
    true
}

impl CurrencyFees {
    const fn new(pct: Decimal, max_exchange_fee: Decimal, transfer_fee: Decimal) -> Self {
        Self {
            exchange_fee_pct: pct,
            min_exchange_fee: Decimal::ZERO,
            max_exchange_fee,
            transfer_fee,
            withdrawal_enabled: true,
            funding_enabled: true,
        }
    }

    /// `max(min, min(pct * amount, max))`.
    pub fn platform_fee(&self, amount: Decimal) -> Decimal {
        (self.exchange_fee_pct * amount)
            .min(self.max_exchange_fee)
            .max(self.min_exchange_fee)
    }
}

/// Fee schedule for every supported currency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrencySettings {
    fees: HashMap<Currency, CurrencyFees>,
}

impl CurrencySettings {
    pub fn new(fees: HashMap<Currency, CurrencyFees>) -> Self {
        Self { fees }
    }

    /// Defaults overlaid with the given per-currency overrides.
    pub fn with_overrides(overrides: HashMap<Currency, CurrencyFees>) -> Self {
        let mut settings = Self::default();
        settings.fees.extend(overrides);
        settings
    }

    pub fn fees(&self, currency: Currency) -> Option<&CurrencyFees> {
        self.fees.get(&currency)
    }

    /// Platform fee for exchanging `amount` out of `currency`. Zero for
    /// currencies without a schedule.
    pub fn platform_fee(&self, currency: Currency, amount: Decimal) -> Decimal {
        self.fees(currency)
            .map(|f| f.platform_fee(amount))
            .unwrap_or(Decimal::ZERO)
    }

    pub fn transfer_fee(&self, currency: Currency) -> Decimal {
        self.fees(currency)
            .map(|f| f.transfer_fee)
            .unwrap_or(Decimal::ZERO)
    }

    /// Currencies without a schedule are closed.
    pub fn withdrawal_enabled(&self, currency: Currency) -> bool {
        self.fees(currency).is_some_and(|f| f.withdrawal_enabled)
    }

    pub fn funding_enabled(&self, currency: Currency) -> bool {
        self.fees(currency).is_some_and(|f| f.funding_enabled)
    }
}

impl Default for CurrencySettings {
    fn default() -> Self {
        use Currency::*;
        // (pct, max exchange fee, transfer fee), pct in thousandths.
        let table = [
            (Usd, 20, 50, Decimal::new(2, 0)),
            (Gbp, 30, 40, Decimal::new(3, 0)),
            (Eur, 25, 45, Decimal::new(25, 1)),
            (Ngn, 50, 5000, Decimal::new(100, 0)),
            (Ghs, 40, 450, Decimal::new(15, 0)),
            (Kes, 45, 300, Decimal::new(20, 0)),
            (Zar, 45, 600, Decimal::new(25, 0)),
            (Usdc, 10, 5, Decimal::new(1, 0)),
            (Btc, 15, 30, Decimal::new(10, 0)),
            (Aud, 30, 35, Decimal::new(3, 0)),
            (Mxn, 35, 25, Decimal::new(17, 0)),
        ];
        let fees = table
            .into_iter()
            .map(|(currency, pct, max, transfer)| {
                (
                    currency,
                    CurrencyFees::new(Decimal::new(pct, 3), Decimal::from(max), transfer),
                )
            })
            .collect();
        Self { fees }
    }
}
