pub mod bank;
pub mod beneficiary;
pub mod charge;
pub mod exchange;
pub mod revenue;
pub mod transfer;
pub mod wallet;

use serde::{Deserialize, Serialize};

/// Currencies the platform holds balances in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE", type_name = "currency_code")]
pub enum Currency {
    Usd,
    Gbp,
    Eur,
    Ngn,
    Ghs,
    Kes,
    Zar,
    Usdc,
    Btc,
    Aud,
    Mxn,
}

impl Currency {
    pub const ALL: [Currency; 11] = [
        Currency::Usd,
        Currency::Gbp,
        Currency::Eur,
        Currency::Ngn,
        Currency::Ghs,
        Currency::Kes,
        Currency::Zar,
        Currency::Usdc,
        Currency::Btc,
        Currency::Aud,
        Currency::Mxn,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Gbp => "GBP",
            Currency::Eur => "EUR",
            Currency::Ngn => "NGN",
            Currency::Ghs => "GHS",
            Currency::Kes => "KES",
            Currency::Zar => "ZAR",
            Currency::Usdc => "USDC",
            Currency::Btc => "BTC",
            Currency::Aud => "AUD",
            Currency::Mxn => "MXN",
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported currency: {0}")]
pub struct UnsupportedCurrency(pub String);

impl std::str::FromStr for Currency {
    type Err = UnsupportedCurrency;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Currency::ALL
            .into_iter()
            .find(|c| c.code() == upper)
            .ok_or(UnsupportedCurrency(s.to_owned()))
    }
}

/// Payment service providers the settlement pipeline can route through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase", type_name = "provider_name")]
pub enum ProviderName {
    Paystack,
    Wise,
    Stripe,
}

impl ProviderName {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderName::Paystack => "paystack",
            ProviderName::Wise => "wise",
            ProviderName::Stripe => "stripe",
        }
    }
}

impl std::fmt::Display for ProviderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown provider: {0}")]
pub struct UnknownProvider(pub String);

impl std::str::FromStr for ProviderName {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "paystack" => Ok(ProviderName::Paystack),
            "wise" => Ok(ProviderName::Wise),
            "stripe" => Ok(ProviderName::Stripe),
            _ => Err(UnknownProvider(s.to_owned())),
        }
    }
}

/// Offset pagination for listing queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub offset: i64,
    pub limit: i64,
}

impl Page {
    pub const MAX_LIMIT: i64 = 100;

    pub fn new(offset: i64, limit: i64) -> Self {
        Self {
            offset: offset.max(0),
            limit: limit.clamp(1, Self::MAX_LIMIT),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(0, 20)
    }
}
