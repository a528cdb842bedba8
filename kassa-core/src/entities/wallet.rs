use super::Currency;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One user's balance in one currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Wallet {
    pub id: Uuid,
    pub user_id: Uuid,
    pub currency: Currency,
    pub available_balance: Decimal,
    pub pending_balance: Decimal,
    /// Incremented on every committed mutation; used for compare-and-swap.
    pub version: i64,
    pub created_at: time::PrimitiveDateTime,
    pub updated_at: time::PrimitiveDateTime,
}

impl Wallet {
    pub fn new(user_id: Uuid, currency: Currency, now: time::PrimitiveDateTime) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id,
            currency,
            available_balance: Decimal::ZERO,
            pending_balance: Decimal::ZERO,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn snapshot(&self) -> WalletSnapshot {
        WalletSnapshot {
            available_balance: self.available_balance,
            pending_balance: self.pending_balance,
        }
    }
}

/// Balance buckets captured before and after a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WalletSnapshot {
    pub available_balance: Decimal,
    pub pending_balance: Decimal,
}

impl WalletSnapshot {
    pub fn get(&self, key: BalanceKey) -> Decimal {
        match key {
            BalanceKey::Available => self.available_balance,
            BalanceKey::Pending => self.pending_balance,
        }
    }

    pub fn set(&mut self, key: BalanceKey, value: Decimal) {
        match key {
            BalanceKey::Available => self.available_balance = value,
            BalanceKey::Pending => self.pending_balance = value,
        }
    }
}

/// Which balance bucket a mutation touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceKey {
    Available,
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase", type_name = "transaction_kind")]
pub enum TransactionKind {
    Credit,
    Debit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case", type_name = "transaction_purpose")]
pub enum TransactionPurpose {
    CurrencyExchange,
    Withdrawal,
    Deposit,
    TransferCredit,
    TransferDebit,
    PendingCurrencyExchangeCredit,
    PendingCurrencyExchangeDebit,
    Refund,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase", type_name = "transaction_status")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Successful,
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransactionStatus::Successful | TransactionStatus::Failed)
    }
}

/// An immutable ledger entry. Only `status` and `completed_at` change after
/// insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub user_id: Uuid,
    pub currency: Currency,
    pub reference: String,
    pub kind: TransactionKind,
    pub purpose: TransactionPurpose,
    /// Principal moved. The balance delta is `amount + fee`.
    pub amount: Decimal,
    pub fee: Decimal,
    pub status: TransactionStatus,
    pub description: Option<String>,
    pub note: Option<String>,
    #[sqlx(json)]
    pub wallet_state_before: WalletSnapshot,
    #[sqlx(json)]
    pub wallet_state_after: WalletSnapshot,
    pub meta: serde_json::Value,
    pub created_at: time::PrimitiveDateTime,
    pub completed_at: Option<time::PrimitiveDateTime>,
}

impl WalletTransaction {
    pub fn delta(&self) -> Decimal {
        self.amount + self.fee
    }
}
