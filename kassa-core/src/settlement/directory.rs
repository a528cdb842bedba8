//! Bank directory and dedicated funding accounts.

use super::pipeline::SettlementPipeline;
use super::provider::{ProviderError, VirtualAccountRequest};
use super::SettlementError;
use crate::entities::Currency;
use crate::entities::bank::{Bank, WalletAccount};
use crate::utils::time::now;
use tracing::{info, warn};
use uuid::Uuid;

impl SettlementPipeline {
    pub(crate) fn ensure_funding_enabled(&self, currency: Currency) -> Result<(), SettlementError> {
        if self.settings.current().funding_enabled(currency) {
            Ok(())
        } else {
            Err(SettlementError::Validation(format!(
                "funding is disabled for {currency}"
            )))
        }
    }

    pub(crate) fn ensure_withdrawal_enabled(
        &self,
        currency: Currency,
    ) -> Result<(), SettlementError> {
        if self.settings.current().withdrawal_enabled(currency) {
            Ok(())
        } else {
            Err(SettlementError::Validation(format!(
                "withdrawals are disabled for {currency}"
            )))
        }
    }

    /// Known banks, by name.
    pub async fn fetch_banks(&self, currency: Option<Currency>) -> Result<Vec<Bank>, SettlementError> {
        Ok(self.store.banks(currency).await?)
    }

    pub async fn fetch_bank(&self, id: Uuid) -> Result<Bank, SettlementError> {
        self.store
            .bank(id)
            .await?
            .ok_or_else(|| SettlementError::Validation(format!("unknown bank {id}")))
    }

    /// Pull the bank list for `currency` from its provider into the
    /// directory. Banks already known by name gain the provider's code.
    #[tracing::instrument(skip_all, fields(%currency))]
    pub async fn sync_banks(&self, currency: Currency) -> Result<Vec<Bank>, SettlementError> {
        let provider = self.registry.for_currency(currency)?;
        let listed = provider.list_banks(currency).await?;
        let provider_name = provider.name();

        let mut synced = Vec::with_capacity(listed.len());
        for bank in listed {
            let mut meta = serde_json::Map::new();
            meta.insert(provider_name.as_str().to_owned(), bank.code.into());
            let row = Bank {
                id: Uuid::now_v7(),
                currency,
                name: bank.name,
                logo: None,
                meta: serde_json::Value::Object(meta),
                created_at: now(),
                deleted_at: None,
            };
            synced.push(self.store.upsert_bank(&row).await?);
        }
        info!(provider = %provider_name, count = synced.len(), "Bank directory synced");
        Ok(synced)
    }

    /// Open a dedicated account funding the user's wallet in
    /// `request.currency`. A user holds at most one per currency; asking
    /// again returns it.
    #[tracing::instrument(skip_all, fields(user_id = %request.user_id, currency = %request.currency))]
    pub async fn create_virtual_account(
        &self,
        request: VirtualAccountRequest,
    ) -> Result<WalletAccount, SettlementError> {
        self.ensure_funding_enabled(request.currency)?;
        if let Some(existing) = self
            .store
            .wallet_account(request.user_id, request.currency)
            .await?
        {
            return Ok(existing);
        }
        if request.email.trim().is_empty() || request.name.trim().is_empty() {
            return Err(SettlementError::Validation(
                "name and email are required to open an account".into(),
            ));
        }

        let provider = self.registry.for_currency(request.currency)?;
        let wallet = self.ledger.wallet(request.user_id, request.currency).await?;
        let opened = match provider.create_virtual_account(&request).await {
            Ok(opened) => opened,
            Err(ProviderError::Unsupported) => {
                return Err(SettlementError::Validation(format!(
                    "{} cannot open accounts in {}",
                    provider.name(),
                    request.currency
                )));
            }
            Err(e) => {
                warn!(error = %e, "Virtual account creation failed");
                return Err(e.into());
            }
        };

        let account = WalletAccount {
            id: Uuid::now_v7(),
            user_id: request.user_id,
            wallet_id: wallet.id,
            currency: request.currency,
            provider: provider.name(),
            account_number: opened.account_number,
            account_name: opened.account_name,
            bank_name: opened.bank_name,
            provider_customer_id: opened.provider_customer_id,
            provider_response: opened.raw,
            created_at: now(),
        };
        let stored = self.store.insert_wallet_account(&account).await?;
        if stored.id != account.id {
            warn!(account_number = %account.account_number, "Concurrent account creation, keeping the first");
        } else {
            info!(provider = %stored.provider, "Virtual account opened");
        }
        Ok(stored)
    }

    pub async fn wallet_account(
        &self,
        user_id: Uuid,
        currency: Currency,
    ) -> Result<Option<WalletAccount>, SettlementError> {
        Ok(self.store.wallet_account(user_id, currency).await?)
    }

    pub async fn wallet_accounts(&self, user_id: Uuid) -> Result<Vec<WalletAccount>, SettlementError> {
        Ok(self.store.wallet_accounts(user_id).await?)
    }
}
