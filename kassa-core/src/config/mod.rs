//! Configuration types for Kassa.
//!
//! These types represent the validated runtime configuration shared across
//! crates. Loading and parsing the config file is handled by the server
//! crate.

mod fees;
mod runtime;
mod settings_handle;

pub use fees::{CurrencyFees, CurrencySettings};
pub use runtime::{
    CounterpartyConfig, ExchangeConfig, LedgerConfig, NotificationsConfig, PaystackConfig,
    ProvidersConfig, SettlementConfig, SigningConfig, StripeConfig, WiseConfig,
};
pub use settings_handle::SettingsHandle;
