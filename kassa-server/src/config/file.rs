//! TOML file configuration structures.
//!
//! These structs directly map to the `kassa.toml` file format. Every
//! section except `[signing]` may be omitted and falls back to defaults.

use kassa_core::config::{
    CounterpartyConfig, CurrencyFees, ExchangeConfig, LedgerConfig, NotificationsConfig,
    ProvidersConfig, SettlementConfig, SigningConfig,
};
use kassa_core::entities::Currency;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub signing: SigningConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub counterparties: Vec<CounterpartyConfig>,
    /// Per-currency overrides of the built-in fee schedule.
    #[serde(default)]
    pub fees: HashMap<Currency, CurrencyFees>,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The address and port to listen on (e.g., "0.0.0.0:8080").
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kassa_core::entities::ProviderName;
    use rust_decimal_macros::dec;

    #[test]
    fn full_config_parsing() {
        let toml_str = r#"
[server]
listen = "127.0.0.1:3000"

[signing]
id = "kassa"
private_key = "AAAA"

[settlement]
max_transfer_attempts = 5

[providers]
charge_provider = "stripe"

[providers.paystack]
secret_key = "sk_test"
currencies = ["NGN"]

[notifications]
endpoint = "https://hooks.example.com/kassa"
secret = "whsec"

[[counterparties]]
id = "alpha"
name = "Alpha Desk"
endpoint = "https://alpha.example.com/api/"
public_key = "BBBB"

[fees.USD]
exchange_fee_pct = "0.01"
max_exchange_fee = "20"
transfer_fee = "1.5"
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen.port(), 3000);
        assert_eq!(config.settlement.max_transfer_attempts, 5);
        assert_eq!(config.settlement.stale_pending_secs, 600);
        assert_eq!(
            config.providers.charge_provider,
            Some(ProviderName::Stripe)
        );
        let paystack = config.providers.paystack.unwrap();
        assert_eq!(paystack.currencies, vec![Currency::Ngn]);
        assert_eq!(config.counterparties.len(), 1);
        assert_eq!(config.fees[&Currency::Usd].transfer_fee, dec!(1.5));
        assert_eq!(config.fees[&Currency::Usd].min_exchange_fee, dec!(0));
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let toml_str = r#"
[signing]
id = "kassa"
private_key = "AAAA"
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, default_listen_addr());
        assert_eq!(config.exchange, ExchangeConfig::default());
        assert!(config.providers.paystack.is_none());
        assert!(config.counterparties.is_empty());
        assert!(config.fees.is_empty());
    }
}
