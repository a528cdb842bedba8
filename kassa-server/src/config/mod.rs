//! Configuration module for kassa-server.
//!
//! Handles loading configuration from TOML files, CLI arguments,
//! and environment variables.

pub mod file;

use crate::config::file::{FileConfig, ServerConfig};
use kassa_core::config::{
    CounterpartyConfig, CurrencyFees, CurrencySettings, ExchangeConfig, LedgerConfig,
    NotificationsConfig, ProvidersConfig, SettlementConfig, SigningConfig,
};
use kassa_core::entities::Currency;
use kassa_sdk::signature::{ProtocolSigner, decode_base64};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,
}

/// Validated configuration, split into the sections each subsystem takes.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub server: ServerConfig,
    pub signing: SigningConfig,
    pub ledger: LedgerConfig,
    pub settlement: SettlementConfig,
    pub exchange: ExchangeConfig,
    pub providers: ProvidersConfig,
    pub notifications: NotificationsConfig,
    pub counterparties: Vec<CounterpartyConfig>,
    pub fees: HashMap<Currency, CurrencyFees>,
}

impl LoadedConfig {
    /// Built-in fee schedule overlaid with the file's `[fees]` table.
    pub fn currency_settings(&self) -> CurrencySettings {
        CurrencySettings::with_overrides(self.fees.clone())
    }
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: std::path::PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    /// Create a new config loader.
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    /// Read the TOML file, apply CLI overrides and validate.
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        self.parse(&config_content)
    }

    /// Reload the configuration (used during SIGHUP).
    pub fn reload(&self) -> Result<LoadedConfig, ConfigError> {
        self.load()
    }

    fn parse(&self, content: &str) -> Result<LoadedConfig, ConfigError> {
        let mut file_config: FileConfig = toml::from_str(content)?;

        if let Some(listen) = self.listen_override {
            file_config.server.listen = listen;
        }

        validate(&file_config)?;

        Ok(LoadedConfig {
            server: file_config.server,
            signing: file_config.signing,
            ledger: file_config.ledger,
            settlement: file_config.settlement,
            exchange: file_config.exchange,
            providers: file_config.providers,
            notifications: file_config.notifications,
            counterparties: file_config.counterparties,
            fees: file_config.fees,
        })
    }
}

fn validate(config: &FileConfig) -> Result<(), ConfigError> {
    let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

    let key = decode_base64(&config.signing.private_key)
        .map_err(|e| ConfigError::ValidationError(format!("signing.private_key: {e}")))?;
    ProtocolSigner::from_pkcs8(config.signing.id.clone(), &key)
        .map_err(|e| ConfigError::ValidationError(format!("signing.private_key: {e}")))?;

    if config.ledger.lock_stripes == 0 {
        return invalid("ledger.lock_stripes must be positive".into());
    }
    if config.settlement.max_transfer_attempts < 1 {
        return invalid("settlement.max_transfer_attempts must be at least 1".into());
    }
    let intervals = [
        ("settlement.reconcile_interval_secs", config.settlement.reconcile_interval_secs),
        ("exchange.poll_interval_secs", config.exchange.poll_interval_secs),
        ("exchange.sweep_interval_secs", config.exchange.sweep_interval_secs),
    ];
    for (name, secs) in intervals {
        if secs == 0 {
            return invalid(format!("{name} must be positive"));
        }
    }

    let mut seen = HashSet::new();
    for counterparty in &config.counterparties {
        if counterparty.id == config.signing.id {
            return invalid(format!(
                "counterparty {} shares the platform's signing id",
                counterparty.id
            ));
        }
        if !seen.insert(counterparty.id.as_str()) {
            return invalid(format!("duplicate counterparty id {}", counterparty.id));
        }
        if !counterparty.endpoint.path().ends_with('/') {
            return invalid(format!(
                "counterparty {} endpoint must end with '/'",
                counterparty.id
            ));
        }
    }

    for (currency, fees) in &config.fees {
        if fees.exchange_fee_pct < Decimal::ZERO || fees.exchange_fee_pct > Decimal::ONE {
            return invalid(format!("fees.{currency}: exchange_fee_pct must be within 0..=1"));
        }
        if fees.min_exchange_fee > fees.max_exchange_fee {
            return invalid(format!(
                "fees.{currency}: min_exchange_fee exceeds max_exchange_fee"
            ));
        }
        if fees.transfer_fee < Decimal::ZERO {
            return invalid(format!("fees.{currency}: transfer_fee is negative"));
        }
    }

    Ok(())
}

/// Get the database URL from the environment.
pub fn get_database_url() -> Result<String, ConfigError> {
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn signing_section() -> String {
        let key = ProtocolSigner::generate_pkcs8().unwrap();
        format!(
            "[signing]\nid = \"kassa\"\nprivate_key = \"{}\"\n",
            fast32::base64::RFC4648_NOPAD.encode(&key)
        )
    }

    fn loader() -> ConfigLoader {
        ConfigLoader::new("kassa.toml", None)
    }

    #[test]
    fn listen_override_wins() {
        let listen: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        let loaded = ConfigLoader::new("kassa.toml", Some(listen))
            .parse(&signing_section())
            .unwrap();
        assert_eq!(loaded.server.listen, listen);
    }

    #[test]
    fn fee_overrides_extend_the_defaults() {
        let content = format!(
            "{}\n[fees.USD]\nexchange_fee_pct = \"0.01\"\nmax_exchange_fee = \"10\"\ntransfer_fee = \"0\"\n",
            signing_section()
        );
        let settings = loader().parse(&content).unwrap().currency_settings();
        assert_eq!(settings.platform_fee(Currency::Usd, dec!(100)), dec!(1));
        assert_eq!(settings.transfer_fee(Currency::Ngn), dec!(100));
    }

    #[test]
    fn rejects_bad_signing_key() {
        let content = "[signing]\nid = \"kassa\"\nprivate_key = \"bm9wZQ==\"\n";
        assert!(matches!(
            loader().parse(content),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn rejects_duplicate_counterparties() {
        let desk = "[[counterparties]]\nid = \"alpha\"\nname = \"Alpha\"\nendpoint = \"https://alpha.example.com/\"\npublic_key = \"AAAA\"\n";
        let content = format!("{}\n{desk}\n{desk}", signing_section());
        assert!(matches!(
            loader().parse(&content),
            Err(ConfigError::ValidationError(msg)) if msg.contains("duplicate")
        ));
    }

    #[test]
    fn rejects_fee_above_one() {
        let content = format!(
            "{}\n[fees.EUR]\nexchange_fee_pct = \"1.5\"\nmax_exchange_fee = \"10\"\ntransfer_fee = \"0\"\n",
            signing_section()
        );
        assert!(loader().parse(&content).is_err());
    }
}
