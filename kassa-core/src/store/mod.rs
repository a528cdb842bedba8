//! Storage ports.
//!
//! Every persisted entity is reached through one of these traits. Two
//! backends implement all of them: [`memory::MemoryStore`] for tests and
//! dev mode, and [`postgres::PgStore`] for production. Both give the same
//! guarantees: reference uniqueness is enforced inside the same atomic
//! commit as the balance update, and every status transition is a
//! compare-and-swap on the current status.

pub mod memory;
pub mod postgres;

use crate::entities::bank::{Bank, WalletAccount};
use crate::entities::beneficiary::Beneficiary;
use crate::entities::charge::ChargeRecord;
use crate::entities::exchange::{
    Exchange, ExchangeStatus, Offering, OfferingStatus, OfferingUpdate,
};
use crate::entities::revenue::RevenueRecord;
use crate::entities::transfer::{ResponseLog, TransferRecord, TransferStatus};
use crate::entities::wallet::{TransactionStatus, Wallet, WalletSnapshot, WalletTransaction};
use crate::entities::{Currency, Page, ProviderName};
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The reference is already recorded for this wallet (or provider).
    #[error("reference already recorded: {0}")]
    DuplicateReference(String),

    /// The row changed since it was read.
    #[error("concurrent modification of {0}")]
    Conflict(Uuid),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
}

#[async_trait]
pub trait WalletStore: Send + Sync {
    /// Return the (user, currency) wallet, creating an empty one if absent.
    async fn find_or_create_wallet(
        &self,
        user_id: Uuid,
        currency: Currency,
    ) -> Result<Wallet, StoreError>;

    async fn wallet(&self, wallet_id: Uuid) -> Result<Option<Wallet>, StoreError>;

    async fn user_wallets(&self, user_id: Uuid) -> Result<Vec<Wallet>, StoreError>;

    async fn transaction(
        &self,
        wallet_id: Uuid,
        reference: &str,
    ) -> Result<Option<WalletTransaction>, StoreError>;

    /// Newest first.
    async fn transactions(
        &self,
        wallet_id: Uuid,
        page: Page,
    ) -> Result<Vec<WalletTransaction>, StoreError>;

    /// Atomically append `txn` and move `wallet` to `next`.
    ///
    /// Fails with [`StoreError::DuplicateReference`] if `txn.reference` is
    /// already recorded on the wallet, and with [`StoreError::Conflict`] if
    /// the stored version no longer equals `wallet.version`. Nothing is
    /// written in either case. Returns the wallet as committed.
    async fn commit_mutation(
        &self,
        wallet: &Wallet,
        next: WalletSnapshot,
        txn: &WalletTransaction,
    ) -> Result<Wallet, StoreError>;

    /// Update `status` (and `completed_at` for terminal statuses) of an
    /// existing entry. Returns whether a row was updated.
    async fn set_transaction_status(
        &self,
        wallet_id: Uuid,
        reference: &str,
        status: TransactionStatus,
    ) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait SettlementStore: Send + Sync {
    /// Fails with [`StoreError::DuplicateReference`] if (provider,
    /// reference) exists.
    async fn insert_transfer(&self, record: &TransferRecord) -> Result<(), StoreError>;

    async fn transfer(&self, id: Uuid) -> Result<Option<TransferRecord>, StoreError>;

    async fn transfer_by_reference(
        &self,
        provider: ProviderName,
        reference: &str,
    ) -> Result<Option<TransferRecord>, StoreError>;

    async fn transfer_by_psp_id(
        &self,
        provider: ProviderName,
        psp_transaction_id: &str,
    ) -> Result<Option<TransferRecord>, StoreError>;

    /// Highest attempt sharing `root_reference`.
    async fn latest_transfer_attempt(
        &self,
        provider: ProviderName,
        root_reference: &str,
    ) -> Result<Option<TransferRecord>, StoreError>;

    /// Compare-and-swap `expected` → `next`. A provided PSP id is stored
    /// alongside. Returns whether this call won.
    async fn update_transfer_status(
        &self,
        id: Uuid,
        expected: TransferStatus,
        next: TransferStatus,
        psp_transaction_id: Option<&str>,
    ) -> Result<bool, StoreError>;

    async fn append_transfer_response(
        &self,
        id: Uuid,
        log: ResponseLog,
        payload: serde_json::Value,
    ) -> Result<(), StoreError>;

    /// Stamp `refunded_at` if unset. Returns whether this call stamped it.
    async fn mark_transfer_refunded(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Records still awaiting a terminal status, oldest first.
    async fn in_flight_transfers(&self, limit: i64) -> Result<Vec<TransferRecord>, StoreError>;

    /// Failed records whose refund has not been stamped.
    async fn unrefunded_failed_transfers(
        &self,
        limit: i64,
    ) -> Result<Vec<TransferRecord>, StoreError>;

    /// Insert the charge if (provider, reference) is new; return the stored
    /// row either way.
    async fn upsert_charge(&self, charge: &ChargeRecord) -> Result<ChargeRecord, StoreError>;

    async fn update_charge_status(
        &self,
        id: Uuid,
        expected: TransferStatus,
        next: TransferStatus,
    ) -> Result<bool, StoreError>;

    async fn append_charge_response(
        &self,
        id: Uuid,
        payload: serde_json::Value,
    ) -> Result<(), StoreError>;

    /// Insert, or return the live beneficiary with the same destination.
    async fn upsert_beneficiary(&self, beneficiary: &Beneficiary)
    -> Result<Beneficiary, StoreError>;

    /// Live (not deleted) beneficiary owned by `user_id`.
    async fn beneficiary(
        &self,
        user_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Beneficiary>, StoreError>;

    async fn beneficiaries(&self, user_id: Uuid) -> Result<Vec<Beneficiary>, StoreError>;

    async fn delete_beneficiary(&self, user_id: Uuid, id: Uuid) -> Result<bool, StoreError>;

    /// Live banks, optionally of one currency, by name.
    async fn banks(&self, currency: Option<Currency>) -> Result<Vec<Bank>, StoreError>;

    async fn bank(&self, id: Uuid) -> Result<Option<Bank>, StoreError>;

    /// Insert, or merge `meta` and `logo` into the bank with the same
    /// (currency, name). Returns the stored row.
    async fn upsert_bank(&self, bank: &Bank) -> Result<Bank, StoreError>;

    async fn wallet_account(
        &self,
        user_id: Uuid,
        currency: Currency,
    ) -> Result<Option<WalletAccount>, StoreError>;

    async fn wallet_accounts(&self, user_id: Uuid) -> Result<Vec<WalletAccount>, StoreError>;

    /// Insert, or return the account already held for (user, currency).
    async fn insert_wallet_account(
        &self,
        account: &WalletAccount,
    ) -> Result<WalletAccount, StoreError>;
}

#[async_trait]
pub trait ExchangeStore: Send + Sync {
    /// Persist an exchange together with all its offerings, atomically.
    async fn create_exchange(
        &self,
        exchange: &Exchange,
        offerings: &[Offering],
    ) -> Result<(), StoreError>;

    async fn exchange(&self, id: Uuid) -> Result<Option<Exchange>, StoreError>;

    /// Newest first.
    async fn user_exchanges(&self, user_id: Uuid, page: Page)
    -> Result<Vec<Exchange>, StoreError>;

    async fn exchanges_with_status(
        &self,
        statuses: &[ExchangeStatus],
        limit: i64,
    ) -> Result<Vec<Exchange>, StoreError>;

    /// Offerings of one exchange, in hop order.
    async fn offerings(&self, exchange_id: Uuid) -> Result<Vec<Offering>, StoreError>;

    async fn offering(&self, id: Uuid) -> Result<Option<Offering>, StoreError>;

    /// Offerings a counterparty currently owns.
    async fn in_flight_offerings(&self) -> Result<Vec<Offering>, StoreError>;

    /// Cancelled offerings whose refund has not been stamped.
    async fn unrefunded_cancelled_offerings(&self) -> Result<Vec<Offering>, StoreError>;

    /// Compare-and-swap from any of `expected` to `next`.
    async fn update_exchange_status(
        &self,
        id: Uuid,
        expected: &[ExchangeStatus],
        next: ExchangeStatus,
    ) -> Result<bool, StoreError>;

    /// Compare-and-swap `expected` → `next`, writing `update` alongside.
    /// `expected == next` is allowed for field-only updates.
    async fn update_offering(
        &self,
        id: Uuid,
        expected: OfferingStatus,
        next: OfferingStatus,
        update: OfferingUpdate,
    ) -> Result<bool, StoreError>;

    async fn mark_offering_refunded(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn rate_exchange(
        &self,
        id: Uuid,
        rating: i16,
        comment: Option<String>,
    ) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait RevenueLedger: Send + Sync {
    /// Record a fee. Returns `false` if the reference was already recorded.
    async fn record(&self, revenue: &RevenueRecord) -> Result<bool, StoreError>;

    async fn revenue(&self, reference: &str) -> Result<Option<RevenueRecord>, StoreError>;
}
