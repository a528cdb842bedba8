//! Application state shared across all request handlers, and the wiring
//! that builds it.

use crate::config::LoadedConfig;
use anyhow::Context;
use kassa_core::config::{CurrencySettings, SettingsHandle};
use kassa_core::events::Notifier;
use kassa_core::exchange::{
    CounterpartyDirectory, ExchangeRouter, HttpCounterpartyClient, OfferingCatalog,
};
use kassa_core::ledger::WalletLedger;
use kassa_core::settlement::{ProviderRegistry, SettlementPipeline};
use kassa_core::store::{ExchangeStore, RevenueLedger, SettlementStore, WalletStore};
use kassa_sdk::signature::{ProtocolSigner, decode_base64};
use std::sync::Arc;

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<SettlementPipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<SettlementPipeline>) -> Self {
        Self { pipeline }
    }
}

/// The long-lived services, built once over a single store backend.
pub struct Services {
    pub pipeline: Arc<SettlementPipeline>,
    pub router: Arc<ExchangeRouter>,
}

impl Services {
    pub fn build<S>(
        store: Arc<S>,
        config: &LoadedConfig,
        settings: SettingsHandle<CurrencySettings>,
        notifier: Arc<dyn Notifier>,
    ) -> anyhow::Result<Self>
    where
        S: WalletStore + SettlementStore + ExchangeStore + RevenueLedger + 'static,
    {
        let ledger = Arc::new(WalletLedger::new(
            store.clone(),
            config.ledger.clone(),
            notifier.clone(),
        ));

        let registry = ProviderRegistry::from_config(&config.providers)
            .context("failed to configure payment providers")?;
        let pipeline = Arc::new(SettlementPipeline::new(
            ledger.clone(),
            store.clone(),
            store.clone(),
            registry,
            settings.clone(),
            config.settlement.clone(),
            notifier.clone(),
        ));

        let key = decode_base64(&config.signing.private_key)
            .context("signing.private_key is not base64")?;
        let signer = Arc::new(
            ProtocolSigner::from_pkcs8(config.signing.id.clone(), &key)
                .context("signing.private_key is not a PKCS#8 Ed25519 key")?,
        );
        let directory = CounterpartyDirectory::from_config(&config.counterparties)
            .context("failed to load counterparty directory")?;
        tracing::info!(counterparties = directory.len(), "Counterparty directory loaded");

        let client = Arc::new(HttpCounterpartyClient::new(signer.clone()));
        let catalog = Arc::new(OfferingCatalog::new(
            directory,
            client.clone(),
            config.exchange.offering_cache_ttl(),
        ));
        let router = Arc::new(ExchangeRouter::new(
            ledger,
            store.clone(),
            store,
            catalog,
            client,
            signer,
            settings,
            notifier,
        ));

        Ok(Self { pipeline, router })
    }
}
