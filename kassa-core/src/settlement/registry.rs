//! Currency → provider routing table, built once at startup.

use super::SettlementError;
use super::provider::{PaymentProvider, ProviderError};
use super::providers::{PaystackProvider, StripeProvider, WiseProvider};
use crate::config::ProvidersConfig;
use crate::entities::{Currency, ProviderName};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderName, Arc<dyn PaymentProvider>>,
    by_currency: HashMap<Currency, ProviderName>,
    charge_provider: Option<ProviderName>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `provider` as the payout route for `currencies`. A currency
    /// already routed elsewhere is reassigned with a warning.
    pub fn register(
        mut self,
        provider: Arc<dyn PaymentProvider>,
        currencies: impl IntoIterator<Item = Currency>,
    ) -> Self {
        let name = provider.name();
        for currency in currencies {
            match self.by_currency.insert(currency, name) {
                Some(previous) if previous != name => {
                    warn!(%currency, %previous, provider = %name, "Currency rerouted to another provider");
                }
                _ => {}
            }
        }
        self.providers.insert(name, provider);
        self
    }

    pub fn with_charge_provider(mut self, name: ProviderName) -> Self {
        self.charge_provider = Some(name);
        self
    }

    /// Build adapters for every configured provider.
    pub fn from_config(config: &ProvidersConfig) -> Result<Self, ProviderError> {
        let mut registry = Self::new();
        if let Some(paystack) = &config.paystack {
            registry = registry.register(
                Arc::new(PaystackProvider::new(paystack)?),
                paystack.currencies.iter().copied(),
            );
        }
        if let Some(wise) = &config.wise {
            registry = registry.register(
                Arc::new(WiseProvider::new(wise)?),
                wise.currencies.iter().copied(),
            );
        }
        if let Some(stripe) = &config.stripe {
            registry = registry.register(
                Arc::new(StripeProvider::new(stripe)?),
                stripe.currencies.iter().copied(),
            );
        }
        registry.charge_provider = match config.charge_provider {
            Some(name) if !registry.providers.contains_key(&name) => {
                return Err(ProviderError::Config(format!(
                    "charge provider {name} is not configured"
                )));
            }
            Some(name) => Some(name),
            None if registry.providers.contains_key(&ProviderName::Stripe) => {
                Some(ProviderName::Stripe)
            }
            None => None,
        };
        info!(
            providers = registry.providers.len(),
            routed_currencies = registry.by_currency.len(),
            "Provider registry built"
        );
        Ok(registry)
    }

    pub fn get(&self, name: ProviderName) -> Option<Arc<dyn PaymentProvider>> {
        self.providers.get(&name).cloned()
    }

    pub fn provider(&self, name: ProviderName) -> Result<Arc<dyn PaymentProvider>, SettlementError> {
        self.get(name)
            .ok_or_else(|| SettlementError::UnknownProvider(name.to_string()))
    }

    pub fn for_currency(
        &self,
        currency: Currency,
    ) -> Result<Arc<dyn PaymentProvider>, SettlementError> {
        self.by_currency
            .get(&currency)
            .and_then(|name| self.get(*name))
            .ok_or(SettlementError::UnsupportedCurrency(currency))
    }

    pub fn charge_provider(&self) -> Result<Arc<dyn PaymentProvider>, SettlementError> {
        self.charge_provider
            .and_then(|name| self.get(name))
            .ok_or_else(|| SettlementError::Validation("no charge provider configured".into()))
    }
}
