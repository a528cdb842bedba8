//! Wallet ledger.
//!
//! [`WalletLedger::mutate`] is the only code path that writes balances.
//! Every mutation appends one immutable [`WalletTransaction`] carrying the
//! wallet state before and after, in the same atomic store commit as the
//! balance update.

pub mod locks;

use crate::config::LedgerConfig;
use crate::entities::wallet::{
    BalanceKey, TransactionKind, TransactionPurpose, TransactionStatus, Wallet,
    WalletTransaction,
};
use crate::entities::{Currency, Page};
use crate::events::{Notification, Notifier};
use crate::store::{StoreError, WalletStore};
use crate::utils::time::now;
use locks::WalletLocks;
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("insufficient {key:?} balance in wallet {wallet_id}: have {balance}, need {required}")]
    InsufficientFunds {
        wallet_id: Uuid,
        key: BalanceKey,
        balance: Decimal,
        required: Decimal,
    },

    /// The amount cannot be represented, e.g. a balance would overflow.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("reference already recorded: {0}")]
    DuplicateReference(String),

    /// The compare-and-swap kept losing to other writers.
    #[error("wallet {0} is under contention, giving up")]
    Contention(Uuid),

    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateReference(reference) => LedgerError::DuplicateReference(reference),
            other => LedgerError::Store(other),
        }
    }
}

/// One requested balance mutation.
#[derive(Debug, Clone)]
pub struct MutationRequest {
    pub user_id: Uuid,
    pub currency: Currency,
    /// Principal, strictly positive. The fee is added on top.
    pub amount: Decimal,
    pub fee: Decimal,
    pub reference: String,
    pub purpose: TransactionPurpose,
    pub keys: Vec<BalanceKey>,
    pub status: TransactionStatus,
    pub description: Option<String>,
    pub note: Option<String>,
    pub meta: serde_json::Value,
}

impl MutationRequest {
    pub fn new(
        user_id: Uuid,
        currency: Currency,
        amount: Decimal,
        reference: impl Into<String>,
        purpose: TransactionPurpose,
    ) -> Self {
        Self {
            user_id,
            currency,
            amount,
            fee: Decimal::ZERO,
            reference: reference.into(),
            purpose,
            keys: vec![BalanceKey::Available],
            status: TransactionStatus::Successful,
            description: None,
            note: None,
            meta: serde_json::Value::Null,
        }
    }

    pub fn with_keys(mut self, keys: impl Into<Vec<BalanceKey>>) -> Self {
        self.keys = keys.into();
        self
    }

    pub fn with_fee(mut self, fee: Decimal) -> Self {
        self.fee = fee;
        self
    }

    pub fn with_status(mut self, status: TransactionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_note(mut self, note: Option<String>) -> Self {
        self.note = note;
        self
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = meta;
        self
    }

    fn validate(&self) -> Result<(), LedgerError> {
        if self.amount <= Decimal::ZERO {
            return Err(LedgerError::Validation(format!(
                "amount must be positive, got {}",
                self.amount
            )));
        }
        if self.fee < Decimal::ZERO {
            return Err(LedgerError::Validation(format!(
                "fee must not be negative, got {}",
                self.fee
            )));
        }
        if self.keys.is_empty() {
            return Err(LedgerError::Validation("no balance keys given".to_string()));
        }
        if self.reference.is_empty() {
            return Err(LedgerError::Validation("empty reference".to_string()));
        }
        Ok(())
    }
}

pub struct WalletLedger {
    store: Arc<dyn WalletStore>,
    locks: WalletLocks,
    config: LedgerConfig,
    notifier: Arc<dyn Notifier>,
}

impl WalletLedger {
    pub fn new(
        store: Arc<dyn WalletStore>,
        config: LedgerConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            locks: WalletLocks::new(config.lock_stripes),
            config,
            notifier,
        }
    }

    pub async fn credit(&self, request: MutationRequest) -> Result<WalletTransaction, LedgerError> {
        self.mutate(TransactionKind::Credit, request).await
    }

    /// Fails with [`LedgerError::InsufficientFunds`] if the debit would push
    /// an enforced bucket below zero.
    pub async fn debit(&self, request: MutationRequest) -> Result<WalletTransaction, LedgerError> {
        self.mutate(TransactionKind::Debit, request).await
    }

    /// Apply one mutation.
    ///
    /// The per-wallet stripe lock serializes writers in this process; the
    /// store's version compare-and-swap catches writers in other processes,
    /// in which case the wallet is re-read and the mutation recomputed.
    #[tracing::instrument(skip_all, fields(user_id = %request.user_id, currency = %request.currency, reference = %request.reference, kind = ?kind))]
    pub async fn mutate(
        &self,
        kind: TransactionKind,
        request: MutationRequest,
    ) -> Result<WalletTransaction, LedgerError> {
        request.validate()?;

        let wallet = self
            .store
            .find_or_create_wallet(request.user_id, request.currency)
            .await?;
        let _guard = self.locks.lock(wallet.id).await;

        let mut attempts = 0;
        loop {
            let current = self
                .store
                .wallet(wallet.id)
                .await?
                .ok_or_else(|| StoreError::NotFound {
                    entity: "wallet",
                    id: wallet.id.to_string(),
                })?;

            if self
                .store
                .transaction(current.id, &request.reference)
                .await?
                .is_some()
            {
                return Err(LedgerError::DuplicateReference(request.reference));
            }

            let txn = self.build_transaction(&current, kind, &request)?;
            match self
                .store
                .commit_mutation(&current, txn.wallet_state_after, &txn)
                .await
            {
                Ok(committed) => {
                    debug!(
                        wallet_id = %committed.id,
                        version = committed.version,
                        available = %committed.available_balance,
                        pending = %committed.pending_balance,
                        "Wallet mutation committed"
                    );
                    self.after_commit(&txn);
                    return Ok(txn);
                }
                Err(StoreError::Conflict(id)) => {
                    attempts += 1;
                    if attempts > self.config.max_commit_retries {
                        warn!(wallet_id = %id, attempts, "Giving up on contended wallet");
                        return Err(LedgerError::Contention(id));
                    }
                    debug!(wallet_id = %id, attempts, "Version conflict, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn build_transaction(
        &self,
        wallet: &Wallet,
        kind: TransactionKind,
        request: &MutationRequest,
    ) -> Result<WalletTransaction, LedgerError> {
        let delta = request.amount.checked_add(request.fee).ok_or_else(|| {
            LedgerError::InvalidAmount(format!(
                "{} plus fee {} overflows",
                request.amount, request.fee
            ))
        })?;
        let before = wallet.snapshot();
        let mut after = before;
        for key in &request.keys {
            let balance = after.get(*key);
            let next = match kind {
                TransactionKind::Credit => balance.checked_add(delta),
                TransactionKind::Debit => balance.checked_sub(delta),
            }
            .ok_or_else(|| {
                LedgerError::InvalidAmount(format!(
                    "applying {delta} to {key:?} balance {balance} overflows"
                ))
            })?;
            if next < Decimal::ZERO && self.config.enforces_non_negative(*key) {
                return Err(LedgerError::InsufficientFunds {
                    wallet_id: wallet.id,
                    key: *key,
                    balance,
                    required: delta,
                });
            }
            after.set(*key, next);
        }

        let created_at = now();
        Ok(WalletTransaction {
            id: Uuid::now_v7(),
            wallet_id: wallet.id,
            user_id: wallet.user_id,
            currency: wallet.currency,
            reference: request.reference.clone(),
            kind,
            purpose: request.purpose,
            amount: request.amount,
            fee: request.fee,
            status: request.status,
            description: request.description.clone(),
            note: request.note.clone(),
            wallet_state_before: before,
            wallet_state_after: after,
            meta: request.meta.clone(),
            created_at,
            completed_at: request.status.is_terminal().then_some(created_at),
        })
    }

    fn after_commit(&self, txn: &WalletTransaction) {
        if txn.kind == TransactionKind::Credit && txn.purpose == TransactionPurpose::Deposit {
            info!(user_id = %txn.user_id, reference = %txn.reference, amount = %txn.amount, "Wallet funded");
            self.notifier.notify(Notification::WalletFunded {
                user_id: txn.user_id,
                currency: txn.currency,
                amount: txn.amount,
                reference: txn.reference.clone(),
            });
        }
    }

    /// All of the user's wallets, one per supported currency.
    pub async fn fetch_wallets(&self, user_id: Uuid) -> Result<Vec<Wallet>, LedgerError> {
        let mut wallets = self.store.user_wallets(user_id).await?;
        for currency in Currency::ALL {
            if !wallets.iter().any(|w| w.currency == currency) {
                wallets.push(self.store.find_or_create_wallet(user_id, currency).await?);
            }
        }
        wallets.sort_by_key(|w| w.currency);
        Ok(wallets)
    }

    pub async fn wallet(&self, user_id: Uuid, currency: Currency) -> Result<Wallet, LedgerError> {
        Ok(self.store.find_or_create_wallet(user_id, currency).await?)
    }

    pub async fn transactions(
        &self,
        wallet_id: Uuid,
        page: Page,
    ) -> Result<Vec<WalletTransaction>, LedgerError> {
        Ok(self.store.transactions(wallet_id, page).await?)
    }

    pub async fn transaction(
        &self,
        wallet_id: Uuid,
        reference: &str,
    ) -> Result<Option<WalletTransaction>, LedgerError> {
        Ok(self.store.transaction(wallet_id, reference).await?)
    }

    /// Look up a user's entry by reference without knowing the wallet id.
    pub async fn user_transaction(
        &self,
        user_id: Uuid,
        currency: Currency,
        reference: &str,
    ) -> Result<Option<WalletTransaction>, LedgerError> {
        let wallet = self.store.find_or_create_wallet(user_id, currency).await?;
        self.transaction(wallet.id, reference).await
    }

    /// Only `status` and `completed_at` are touched. Returns whether the
    /// entry exists.
    pub async fn set_transaction_status(
        &self,
        wallet_id: Uuid,
        reference: &str,
        status: TransactionStatus,
    ) -> Result<bool, LedgerError> {
        Ok(self
            .store
            .set_transaction_status(wallet_id, reference, status)
            .await?)
    }
}
