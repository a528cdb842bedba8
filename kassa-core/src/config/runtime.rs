//! Validated runtime configuration sections.
//!
//! These are deserializable so the server can embed them directly in its
//! TOML file format; every field has a default unless it is a credential.

use crate::entities::wallet::BalanceKey;
use crate::entities::{Currency, ProviderName};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Number of mutexes in the striped per-wallet lock table.
    pub lock_stripes: usize,
    /// How many times a mutation is retried after losing a
    /// compare-and-swap race to another process.
    pub max_commit_retries: u32,
    /// Buckets that may never go below zero.
    pub non_negative: Vec<BalanceKey>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_stripes: 256,
            max_commit_retries: 8,
            non_negative: vec![BalanceKey::Available, BalanceKey::Pending],
        }
    }
}

impl LedgerConfig {
    pub fn enforces_non_negative(&self, key: BalanceKey) -> bool {
        self.non_negative.contains(&key)
    }
}

// ---------------------------------------------------------------------------
// Settlement
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// Total attempts (initial included) made for one payout reference.
    pub max_transfer_attempts: i32,
    /// A `Pending` record the provider has never heard of is considered
    /// abandoned after this long and failed (and refunded).
    pub stale_pending_secs: i64,
    pub reconcile_interval_secs: u64,
    /// Upper bound on records re-polled per reconciliation pass.
    pub reconcile_batch: i64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            max_transfer_attempts: 3,
            stale_pending_secs: 600,
            reconcile_interval_secs: 30 * 60,
            reconcile_batch: 500,
        }
    }
}

impl SettlementConfig {
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }
}

// ---------------------------------------------------------------------------
// Exchange
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub offering_cache_ttl_secs: u64,
    pub poll_interval_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            offering_cache_ttl_secs: 60,
            poll_interval_secs: 2 * 60,
            sweep_interval_secs: 10 * 60,
        }
    }
}

impl ExchangeConfig {
    pub fn offering_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.offering_cache_ttl_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// A liquidity counterparty the router may trade with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterpartyConfig {
    pub id: String,
    pub name: String,
    pub endpoint: Url,
    /// Raw Ed25519 public key, base64.
    pub public_key: String,
}

/// The platform's own protocol identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningConfig {
    pub id: String,
    /// PKCS#8 Ed25519 private key, base64.
    pub private_key: String,
}

// ---------------------------------------------------------------------------
// Payment providers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaystackConfig {
    pub secret_key: String,
    /// Overrides the public API base URL.
    #[serde(default)]
    pub base_url: Option<Url>,
    #[serde(default = "PaystackConfig::default_currencies")]
    pub currencies: Vec<Currency>,
}

impl PaystackConfig {
    fn default_currencies() -> Vec<Currency> {
        vec![Currency::Ngn, Currency::Ghs, Currency::Kes, Currency::Zar]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WiseConfig {
    pub api_token: String,
    pub profile_id: i64,
    /// Wise's webhook signing key: PKCS#1 DER RSA public key, base64.
    pub webhook_public_key: String,
    #[serde(default)]
    pub base_url: Option<Url>,
    #[serde(default = "WiseConfig::default_currencies")]
    pub currencies: Vec<Currency>,
}

impl WiseConfig {
    fn default_currencies() -> Vec<Currency> {
        vec![
            Currency::Usd,
            Currency::Eur,
            Currency::Gbp,
            Currency::Aud,
            Currency::Mxn,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub success_url: Url,
    pub cancel_url: Url,
    #[serde(default)]
    pub base_url: Option<Url>,
    /// Payout currencies. Stripe is used for charges only unless listed.
    #[serde(default)]
    pub currencies: Vec<Currency>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub paystack: Option<PaystackConfig>,
    #[serde(default)]
    pub wise: Option<WiseConfig>,
    #[serde(default)]
    pub stripe: Option<StripeConfig>,
    /// Provider used for hosted charge sessions.
    #[serde(default)]
    pub charge_provider: Option<ProviderName>,
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// Endpoint notifications are POSTed to. Without one they are only
    /// logged.
    #[serde(default)]
    pub endpoint: Option<Url>,
    /// HMAC key for the `Kassa-Signature` header.
    #[serde(default)]
    pub secret: Option<String>,
}
