use super::{
    ExchangeStore, RevenueLedger, SettlementStore, StoreError, WalletStore,
};
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
use crate::utils::time::now;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// `(offset, limit)` as slice bounds. Out-of-range values saturate.
fn page_window(page: Page) -> (usize, usize) {
    (batch_len(page.offset), batch_len(page.limit))
}

fn batch_len(n: i64) -> usize {
    usize::try_from(n.max(0)).unwrap_or(usize::MAX)
}

#[derive(Default)]
struct MemoryState {
    wallets: HashMap<Uuid, Wallet>,
    wallet_index: HashMap<(Uuid, Currency), Uuid>,
    /// Per wallet, in insertion order.
    transactions: HashMap<Uuid, Vec<WalletTransaction>>,
    transfers: HashMap<Uuid, TransferRecord>,
    charges: HashMap<Uuid, ChargeRecord>,
    beneficiaries: HashMap<Uuid, Beneficiary>,
    banks: HashMap<Uuid, Bank>,
    wallet_accounts: HashMap<(Uuid, Currency), WalletAccount>,
    exchanges: HashMap<Uuid, Exchange>,
    offerings: HashMap<Uuid, Offering>,
    revenue: HashMap<String, RevenueRecord>,
}

/// A thread-safe in-memory implementation of every store trait.
///
/// All state sits behind one `RwLock`, so each trait method is atomic with
/// respect to every other. Used by tests and by the server's `--memory`
/// mode.
#[derive(Default, Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every transfer record, for inspection in tests.
    pub async fn all_transfers(&self) -> Vec<TransferRecord> {
        let state = self.state.read().await;
        let mut records: Vec<_> = state.transfers.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.attempt.cmp(&b.attempt)));
        records
    }

    /// Every ledger entry of one user, oldest first.
    pub async fn user_transactions(&self, user_id: Uuid) -> Vec<WalletTransaction> {
        let state = self.state.read().await;
        let mut txns: Vec<_> = state
            .transactions
            .values()
            .flatten()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        txns.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        txns
    }
}

#[async_trait]
impl WalletStore for MemoryStore {
    async fn find_or_create_wallet(
        &self,
        user_id: Uuid,
        currency: Currency,
    ) -> Result<Wallet, StoreError> {
        let mut state = self.state.write().await;
        if let Some(id) = state.wallet_index.get(&(user_id, currency)).copied() {
            if let Some(wallet) = state.wallets.get(&id) {
                return Ok(wallet.clone());
            }
        }
        let wallet = Wallet::new(user_id, currency, now());
        state.wallet_index.insert((user_id, currency), wallet.id);
        state.wallets.insert(wallet.id, wallet.clone());
        Ok(wallet)
    }

    async fn wallet(&self, wallet_id: Uuid) -> Result<Option<Wallet>, StoreError> {
        Ok(self.state.read().await.wallets.get(&wallet_id).cloned())
    }

    async fn user_wallets(&self, user_id: Uuid) -> Result<Vec<Wallet>, StoreError> {
        let state = self.state.read().await;
        let mut wallets: Vec<_> = state
            .wallets
            .values()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect();
        wallets.sort_by_key(|w| w.currency);
        Ok(wallets)
    }

    async fn transaction(
        &self,
        wallet_id: Uuid,
        reference: &str,
    ) -> Result<Option<WalletTransaction>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .get(&wallet_id)
            .and_then(|txns| txns.iter().find(|t| t.reference == reference))
            .cloned())
    }

    async fn transactions(
        &self,
        wallet_id: Uuid,
        page: Page,
    ) -> Result<Vec<WalletTransaction>, StoreError> {
        let (offset, limit) = page_window(page);
        let state = self.state.read().await;
        Ok(state
            .transactions
            .get(&wallet_id)
            .map(|txns| {
                txns.iter()
                    .rev()
                    .skip(offset)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn commit_mutation(
        &self,
        wallet: &Wallet,
        next: WalletSnapshot,
        txn: &WalletTransaction,
    ) -> Result<Wallet, StoreError> {
        let mut state = self.state.write().await;
        let duplicate = state
            .transactions
            .get(&wallet.id)
            .is_some_and(|txns| txns.iter().any(|t| t.reference == txn.reference));
        if duplicate {
            return Err(StoreError::DuplicateReference(txn.reference.clone()));
        }
        let stored = state
            .wallets
            .get_mut(&wallet.id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "wallet",
                id: wallet.id.to_string(),
            })?;
        if stored.version != wallet.version {
            return Err(StoreError::Conflict(wallet.id));
        }
        stored.available_balance = next.available_balance;
        stored.pending_balance = next.pending_balance;
        stored.version += 1;
        stored.updated_at = txn.created_at;
        let committed = stored.clone();
        state
            .transactions
            .entry(wallet.id)
            .or_default()
            .push(txn.clone());
        Ok(committed)
    }

    async fn set_transaction_status(
        &self,
        wallet_id: Uuid,
        reference: &str,
        status: TransactionStatus,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let Some(txn) = state
            .transactions
            .get_mut(&wallet_id)
            .and_then(|txns| txns.iter_mut().find(|t| t.reference == reference))
        else {
            return Ok(false);
        };
        txn.status = status;
        if status.is_terminal() {
            txn.completed_at = Some(now());
        }
        Ok(true)
    }
}

#[async_trait]
impl SettlementStore for MemoryStore {
    async fn insert_transfer(&self, record: &TransferRecord) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let exists = state
            .transfers
            .values()
            .any(|t| t.provider == record.provider && t.reference == record.reference);
        if exists {
            return Err(StoreError::DuplicateReference(record.reference.clone()));
        }
        state.transfers.insert(record.id, record.clone());
        Ok(())
    }

    async fn transfer(&self, id: Uuid) -> Result<Option<TransferRecord>, StoreError> {
        Ok(self.state.read().await.transfers.get(&id).cloned())
    }

    async fn transfer_by_reference(
        &self,
        provider: ProviderName,
        reference: &str,
    ) -> Result<Option<TransferRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .transfers
            .values()
            .find(|t| t.provider == provider && t.reference == reference)
            .cloned())
    }

    async fn transfer_by_psp_id(
        &self,
        provider: ProviderName,
        psp_transaction_id: &str,
    ) -> Result<Option<TransferRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .transfers
            .values()
            .find(|t| {
                t.provider == provider
                    && t.psp_transaction_id.as_deref() == Some(psp_transaction_id)
            })
            .cloned())
    }

    async fn latest_transfer_attempt(
        &self,
        provider: ProviderName,
        root_reference: &str,
    ) -> Result<Option<TransferRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .transfers
            .values()
            .filter(|t| t.provider == provider && t.root_reference == root_reference)
            .max_by_key(|t| t.attempt)
            .cloned())
    }

    async fn update_transfer_status(
        &self,
        id: Uuid,
        expected: TransferStatus,
        next: TransferStatus,
        psp_transaction_id: Option<&str>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let Some(record) = state.transfers.get_mut(&id) else {
            return Ok(false);
        };
        if record.status != expected {
            return Ok(false);
        }
        record.status = next;
        if let Some(psp) = psp_transaction_id {
            record.psp_transaction_id = Some(psp.to_owned());
        }
        record.updated_at = now();
        Ok(true)
    }

    async fn append_transfer_response(
        &self,
        id: Uuid,
        log: ResponseLog,
        payload: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if let Some(record) = state.transfers.get_mut(&id) {
            match log {
                ResponseLog::Provider => record.provider_response.push(payload),
                ResponseLog::Webhook => record.webhook_response.push(payload),
            }
        }
        Ok(())
    }

    async fn mark_transfer_refunded(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        match state.transfers.get_mut(&id) {
            Some(record) if record.refunded_at.is_none() => {
                record.refunded_at = Some(now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn in_flight_transfers(&self, limit: i64) -> Result<Vec<TransferRecord>, StoreError> {
        let state = self.state.read().await;
        let mut records: Vec<_> = state
            .transfers
            .values()
            .filter(|t| !t.status.is_terminal())
            .cloned()
            .collect();
        records.sort_by_key(|t| t.created_at);
        records.truncate(batch_len(limit));
        Ok(records)
    }

    async fn unrefunded_failed_transfers(
        &self,
        limit: i64,
    ) -> Result<Vec<TransferRecord>, StoreError> {
        let state = self.state.read().await;
        let mut records: Vec<_> = state
            .transfers
            .values()
            .filter(|t| t.status == TransferStatus::Failed && t.refunded_at.is_none())
            .cloned()
            .collect();
        records.sort_by_key(|t| t.created_at);
        records.truncate(batch_len(limit));
        Ok(records)
    }

    async fn upsert_charge(&self, charge: &ChargeRecord) -> Result<ChargeRecord, StoreError> {
        let mut state = self.state.write().await;
        if let Some(existing) = state
            .charges
            .values()
            .find(|c| c.provider == charge.provider && c.reference == charge.reference)
        {
            return Ok(existing.clone());
        }
        state.charges.insert(charge.id, charge.clone());
        Ok(charge.clone())
    }

    async fn update_charge_status(
        &self,
        id: Uuid,
        expected: TransferStatus,
        next: TransferStatus,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        match state.charges.get_mut(&id) {
            Some(charge) if charge.status == expected => {
                charge.status = next;
                charge.updated_at = now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn append_charge_response(
        &self,
        id: Uuid,
        payload: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if let Some(charge) = state.charges.get_mut(&id) {
            charge.webhook_response.push(payload);
        }
        Ok(())
    }

    async fn upsert_beneficiary(
        &self,
        beneficiary: &Beneficiary,
    ) -> Result<Beneficiary, StoreError> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.beneficiaries.values().find(|b| {
            !b.is_deleted()
                && b.user_id == beneficiary.user_id
                && b.currency == beneficiary.currency
                && b.kind == beneficiary.kind
                && b.account_number == beneficiary.account_number
                && b.target_user_id == beneficiary.target_user_id
        }) {
            return Ok(existing.clone());
        }
        state
            .beneficiaries
            .insert(beneficiary.id, beneficiary.clone());
        Ok(beneficiary.clone())
    }

    async fn beneficiary(
        &self,
        user_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Beneficiary>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .beneficiaries
            .get(&id)
            .filter(|b| b.user_id == user_id && !b.is_deleted())
            .cloned())
    }

    async fn beneficiaries(&self, user_id: Uuid) -> Result<Vec<Beneficiary>, StoreError> {
        let state = self.state.read().await;
        let mut list: Vec<_> = state
            .beneficiaries
            .values()
            .filter(|b| b.user_id == user_id && !b.is_deleted())
            .cloned()
            .collect();
        list.sort_by_key(|b| b.created_at);
        Ok(list)
    }

    async fn delete_beneficiary(&self, user_id: Uuid, id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        match state.beneficiaries.get_mut(&id) {
            Some(b) if b.user_id == user_id && !b.is_deleted() => {
                b.deleted_at = Some(now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn banks(&self, currency: Option<Currency>) -> Result<Vec<Bank>, StoreError> {
        let state = self.state.read().await;
        let mut list: Vec<_> = state
            .banks
            .values()
            .filter(|b| b.deleted_at.is_none() && currency.is_none_or(|c| b.currency == c))
            .cloned()
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    async fn bank(&self, id: Uuid) -> Result<Option<Bank>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .banks
            .get(&id)
            .filter(|b| b.deleted_at.is_none())
            .cloned())
    }

    async fn upsert_bank(&self, bank: &Bank) -> Result<Bank, StoreError> {
        let mut state = self.state.write().await;
        let existing = state
            .banks
            .values_mut()
            .find(|b| b.currency == bank.currency && b.name == bank.name);
        match existing {
            Some(stored) => {
                if let (Some(into), Some(from)) = (stored.meta.as_object_mut(), bank.meta.as_object()) {
                    into.extend(from.iter().map(|(k, v)| (k.clone(), v.clone())));
                } else {
                    stored.meta = bank.meta.clone();
                }
                if bank.logo.is_some() {
                    stored.logo = bank.logo.clone();
                }
                Ok(stored.clone())
            }
            None => {
                state.banks.insert(bank.id, bank.clone());
                Ok(bank.clone())
            }
        }
    }

    async fn wallet_account(
        &self,
        user_id: Uuid,
        currency: Currency,
    ) -> Result<Option<WalletAccount>, StoreError> {
        let state = self.state.read().await;
        Ok(state.wallet_accounts.get(&(user_id, currency)).cloned())
    }

    async fn wallet_accounts(&self, user_id: Uuid) -> Result<Vec<WalletAccount>, StoreError> {
        let state = self.state.read().await;
        let mut list: Vec<_> = state
            .wallet_accounts
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        list.sort_by_key(|a| a.currency);
        Ok(list)
    }

    async fn insert_wallet_account(
        &self,
        account: &WalletAccount,
    ) -> Result<WalletAccount, StoreError> {
        let mut state = self.state.write().await;
        Ok(state
            .wallet_accounts
            .entry((account.user_id, account.currency))
            .or_insert_with(|| account.clone())
            .clone())
    }
}

#[async_trait]
impl ExchangeStore for MemoryStore {
    async fn create_exchange(
        &self,
        exchange: &Exchange,
        offerings: &[Offering],
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.exchanges.contains_key(&exchange.id) {
            return Err(StoreError::DuplicateReference(exchange.id.to_string()));
        }
        state.exchanges.insert(exchange.id, exchange.clone());
        for offering in offerings {
            state.offerings.insert(offering.id, offering.clone());
        }
        Ok(())
    }

    async fn exchange(&self, id: Uuid) -> Result<Option<Exchange>, StoreError> {
        Ok(self.state.read().await.exchanges.get(&id).cloned())
    }

    async fn user_exchanges(
        &self,
        user_id: Uuid,
        page: Page,
    ) -> Result<Vec<Exchange>, StoreError> {
        let state = self.state.read().await;
        let mut list: Vec<_> = state
            .exchanges
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        let (offset, limit) = page_window(page);
        Ok(list.into_iter().skip(offset).take(limit).collect())
    }

    async fn exchanges_with_status(
        &self,
        statuses: &[ExchangeStatus],
        limit: i64,
    ) -> Result<Vec<Exchange>, StoreError> {
        let state = self.state.read().await;
        let mut list: Vec<_> = state
            .exchanges
            .values()
            .filter(|e| statuses.contains(&e.status))
            .cloned()
            .collect();
        list.sort_by_key(|e| e.created_at);
        list.truncate(batch_len(limit));
        Ok(list)
    }

    async fn offerings(&self, exchange_id: Uuid) -> Result<Vec<Offering>, StoreError> {
        let state = self.state.read().await;
        let mut list: Vec<_> = state
            .offerings
            .values()
            .filter(|o| o.exchange_id == exchange_id)
            .cloned()
            .collect();
        list.sort_by_key(|o| o.hop);
        Ok(list)
    }

    async fn offering(&self, id: Uuid) -> Result<Option<Offering>, StoreError> {
        Ok(self.state.read().await.offerings.get(&id).cloned())
    }

    async fn in_flight_offerings(&self) -> Result<Vec<Offering>, StoreError> {
        let state = self.state.read().await;
        let mut list: Vec<_> = state
            .offerings
            .values()
            .filter(|o| o.status.is_in_flight())
            .cloned()
            .collect();
        list.sort_by_key(|o| o.updated_at);
        Ok(list)
    }

    async fn unrefunded_cancelled_offerings(&self) -> Result<Vec<Offering>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .offerings
            .values()
            .filter(|o| o.status == OfferingStatus::Cancelled && o.refunded_at.is_none())
            .cloned()
            .collect())
    }

    async fn update_exchange_status(
        &self,
        id: Uuid,
        expected: &[ExchangeStatus],
        next: ExchangeStatus,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        match state.exchanges.get_mut(&id) {
            Some(exchange) if expected.contains(&exchange.status) => {
                let at = now();
                exchange.status = next;
                exchange.updated_at = at;
                if next.is_terminal() {
                    exchange.completed_at = Some(at);
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_offering(
        &self,
        id: Uuid,
        expected: OfferingStatus,
        next: OfferingStatus,
        update: OfferingUpdate,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        match state.offerings.get_mut(&id) {
            Some(offering) if offering.status == expected => {
                offering.status = next;
                offering.updated_at = now();
                update.apply(offering);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_offering_refunded(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        match state.offerings.get_mut(&id) {
            Some(offering) if offering.refunded_at.is_none() => {
                offering.refunded_at = Some(now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn rate_exchange(
        &self,
        id: Uuid,
        rating: i16,
        comment: Option<String>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        match state.exchanges.get_mut(&id) {
            Some(exchange) => {
                exchange.rating = Some(rating);
                exchange.comment = comment;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl RevenueLedger for MemoryStore {
    async fn record(&self, revenue: &RevenueRecord) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        if state.revenue.contains_key(&revenue.reference) {
            return Ok(false);
        }
        state
            .revenue
            .insert(revenue.reference.clone(), revenue.clone());
        Ok(true)
    }

    async fn revenue(&self, reference: &str) -> Result<Option<RevenueRecord>, StoreError> {
        Ok(self.state.read().await.revenue.get(reference).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::wallet::{TransactionKind, TransactionPurpose};
    use rust_decimal_macros::dec;

    fn txn(wallet: &Wallet, reference: &str) -> WalletTransaction {
        WalletTransaction {
            id: Uuid::now_v7(),
            wallet_id: wallet.id,
            user_id: wallet.user_id,
            currency: wallet.currency,
            reference: reference.into(),
            kind: TransactionKind::Credit,
            purpose: TransactionPurpose::Deposit,
            amount: dec!(10),
            fee: dec!(0),
            status: TransactionStatus::Successful,
            description: None,
            note: None,
            wallet_state_before: wallet.snapshot(),
            wallet_state_after: WalletSnapshot {
                available_balance: dec!(10),
                pending_balance: dec!(0),
            },
            meta: serde_json::Value::Null,
            created_at: now(),
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn wallet_is_created_once() {
        let store = MemoryStore::new();
        let user = Uuid::now_v7();
        let a = store.find_or_create_wallet(user, Currency::Usd).await.unwrap();
        let b = store.find_or_create_wallet(user, Currency::Usd).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(store.user_wallets(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn commit_rejects_duplicate_and_stale_version() {
        let store = MemoryStore::new();
        let wallet = store
            .find_or_create_wallet(Uuid::now_v7(), Currency::Usd)
            .await
            .unwrap();
        let t = txn(&wallet, "r1");
        let committed = store
            .commit_mutation(&wallet, t.wallet_state_after, &t)
            .await
            .unwrap();
        assert_eq!(committed.version, 1);
        assert_eq!(committed.available_balance, dec!(10));

        let dup = store.commit_mutation(&committed, t.wallet_state_after, &t).await;
        assert!(matches!(dup, Err(StoreError::DuplicateReference(_))));

        let t2 = txn(&wallet, "r2");
        let stale = store.commit_mutation(&wallet, t2.wallet_state_after, &t2).await;
        assert!(matches!(stale, Err(StoreError::Conflict(_))));
    }

    #[test]
    fn page_window_saturates() {
        assert_eq!(page_window(Page::new(3, 5)), (3, 5));
        assert_eq!(batch_len(-4), 0);
        assert_eq!(
            page_window(Page {
                offset: i64::MAX,
                limit: 1
            })
            .1,
            1
        );
    }

    #[tokio::test]
    async fn revenue_reference_is_unique() {
        let store = MemoryStore::new();
        let rev = RevenueRecord::new(
            "rev_1",
            dec!(2),
            Currency::Usd,
            crate::entities::revenue::RevenueSource::WalletWithdrawal,
            serde_json::Value::Null,
        );
        assert!(store.record(&rev).await.unwrap());
        assert!(!store.record(&rev).await.unwrap());
    }

    #[tokio::test]
    async fn banks_merge_provider_codes_by_name() {
        let store = MemoryStore::new();
        let bank = |name: &str, meta: serde_json::Value| Bank {
            id: Uuid::now_v7(),
            currency: Currency::Ngn,
            name: name.into(),
            logo: None,
            meta,
            created_at: now(),
            deleted_at: None,
        };
        let first = store
            .upsert_bank(&bank("Zenith Bank", serde_json::json!({ "paystack": "057" })))
            .await
            .unwrap();
        store
            .upsert_bank(&bank("Access Bank", serde_json::json!({ "paystack": "044" })))
            .await
            .unwrap();
        let merged = store
            .upsert_bank(&bank("Zenith Bank", serde_json::json!({ "wise": "ZEIBNGLA" })))
            .await
            .unwrap();
        assert_eq!(merged.id, first.id);
        assert_eq!(merged.code_for(ProviderName::Paystack), Some("057"));
        assert_eq!(merged.code_for(ProviderName::Wise), Some("ZEIBNGLA"));

        let names: Vec<_> = store
            .banks(Some(Currency::Ngn))
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names, vec!["Access Bank", "Zenith Bank"]);
        assert!(store.banks(Some(Currency::Ghs)).await.unwrap().is_empty());
        assert_eq!(store.banks(None).await.unwrap().len(), 2);
    }
}
