use super::PgStore;
use crate::entities::wallet::{TransactionStatus, Wallet, WalletSnapshot, WalletTransaction};
use crate::entities::{Currency, Page};
use crate::framework::{DatabaseAccessor, DatabaseProcessor};
use crate::store::{StoreError, WalletStore};
use crate::utils::time::now;
use async_trait::async_trait;
use kanau::processor::Processor;
use sqlx::types::Json;
use uuid::Uuid;

const TRANSACTION_COLUMNS: &str = "id, wallet_id, user_id, currency, reference, kind, purpose, \
    amount, fee, status, description, note, wallet_state_before, wallet_state_after, meta, \
    created_at, completed_at";

#[derive(Debug, Clone)]
/// Append a ledger entry and move the wallet to its next state in one
/// transaction.
///
/// The entry insert runs first so that a duplicate reference is detected
/// through the `(wallet_id, reference)` unique index even when the
/// competing writer has not committed yet.
pub struct CommitWalletMutation {
    pub wallet: Wallet,
    pub next: WalletSnapshot,
    pub txn: WalletTransaction,
}

impl Processor<CommitWalletMutation> for DatabaseProcessor {
    type Output = Wallet;
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:CommitWalletMutation")]
    async fn process(&self, input: CommitWalletMutation) -> Result<Wallet, StoreError> {
        let CommitWalletMutation { wallet, next, txn } = input;
        let mut tx = self.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO wallet_transactions
                (id, wallet_id, user_id, currency, reference, kind, purpose, amount, fee,
                 status, description, note, wallet_state_before, wallet_state_after, meta,
                 created_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (wallet_id, reference) DO NOTHING
            "#,
        )
        .bind(txn.id)
        .bind(txn.wallet_id)
        .bind(txn.user_id)
        .bind(txn.currency)
        .bind(&txn.reference)
        .bind(txn.kind)
        .bind(txn.purpose)
        .bind(txn.amount)
        .bind(txn.fee)
        .bind(txn.status)
        .bind(&txn.description)
        .bind(&txn.note)
        .bind(Json(txn.wallet_state_before))
        .bind(Json(txn.wallet_state_after))
        .bind(&txn.meta)
        .bind(txn.created_at)
        .bind(txn.completed_at)
        .execute(tx.acquire())
        .await?;
        if inserted.rows_affected() == 0 {
            return Err(StoreError::DuplicateReference(txn.reference));
        }

        let committed = sqlx::query_as::<_, Wallet>(
            r#"
            UPDATE wallets
            SET available_balance = $1,
                pending_balance = $2,
                version = version + 1,
                updated_at = $3
            WHERE id = $4 AND version = $5
            RETURNING *
            "#,
        )
        .bind(next.available_balance)
        .bind(next.pending_balance)
        .bind(txn.created_at)
        .bind(wallet.id)
        .bind(wallet.version)
        .fetch_optional(tx.acquire())
        .await?
        .ok_or(StoreError::Conflict(wallet.id))?;

        tx.commit().await?;
        Ok(committed)
    }
}

#[async_trait]
impl WalletStore for PgStore {
    #[tracing::instrument(skip_all, err, name = "SQL:FindOrCreateWallet")]
    async fn find_or_create_wallet(
        &self,
        user_id: Uuid,
        currency: Currency,
    ) -> Result<Wallet, StoreError> {
        let fresh = Wallet::new(user_id, currency, now());
        sqlx::query(
            r#"
            INSERT INTO wallets
                (id, user_id, currency, available_balance, pending_balance, version,
                 created_at, updated_at)
            VALUES ($1, $2, $3, 0, 0, 0, $4, $4)
            ON CONFLICT (user_id, currency) DO NOTHING
            "#,
        )
        .bind(fresh.id)
        .bind(user_id)
        .bind(currency)
        .bind(fresh.created_at)
        .execute(&self.db.pool)
        .await?;

        let wallet = sqlx::query_as::<_, Wallet>(
            "SELECT * FROM wallets WHERE user_id = $1 AND currency = $2",
        )
        .bind(user_id)
        .bind(currency)
        .fetch_one(&self.db.pool)
        .await?;
        Ok(wallet)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:GetWallet")]
    async fn wallet(&self, wallet_id: Uuid) -> Result<Option<Wallet>, StoreError> {
        let wallet = sqlx::query_as::<_, Wallet>("SELECT * FROM wallets WHERE id = $1")
            .bind(wallet_id)
            .fetch_optional(&self.db.pool)
            .await?;
        Ok(wallet)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:GetUserWallets")]
    async fn user_wallets(&self, user_id: Uuid) -> Result<Vec<Wallet>, StoreError> {
        let wallets = sqlx::query_as::<_, Wallet>(
            "SELECT * FROM wallets WHERE user_id = $1 ORDER BY currency",
        )
        .bind(user_id)
        .fetch_all(&self.db.pool)
        .await?;
        Ok(wallets)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:GetWalletTransaction")]
    async fn transaction(
        &self,
        wallet_id: Uuid,
        reference: &str,
    ) -> Result<Option<WalletTransaction>, StoreError> {
        let txn = sqlx::query_as::<_, WalletTransaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM wallet_transactions \
             WHERE wallet_id = $1 AND reference = $2"
        ))
        .bind(wallet_id)
        .bind(reference)
        .fetch_optional(&self.db.pool)
        .await?;
        Ok(txn)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:ListWalletTransactions")]
    async fn transactions(
        &self,
        wallet_id: Uuid,
        page: Page,
    ) -> Result<Vec<WalletTransaction>, StoreError> {
        let txns = sqlx::query_as::<_, WalletTransaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM wallet_transactions \
             WHERE wallet_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
        ))
        .bind(wallet_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.db.pool)
        .await?;
        Ok(txns)
    }

    async fn commit_mutation(
        &self,
        wallet: &Wallet,
        next: WalletSnapshot,
        txn: &WalletTransaction,
    ) -> Result<Wallet, StoreError> {
        self.db
            .process(CommitWalletMutation {
                wallet: wallet.clone(),
                next,
                txn: txn.clone(),
            })
            .await
    }

    #[tracing::instrument(skip_all, err, name = "SQL:SetWalletTransactionStatus")]
    async fn set_transaction_status(
        &self,
        wallet_id: Uuid,
        reference: &str,
        status: TransactionStatus,
    ) -> Result<bool, StoreError> {
        let completed_at = status.is_terminal().then(now);
        let result = sqlx::query(
            r#"
            UPDATE wallet_transactions
            SET status = $1, completed_at = COALESCE($2, completed_at)
            WHERE wallet_id = $3 AND reference = $4
            "#,
        )
        .bind(status)
        .bind(completed_at)
        .bind(wallet_id)
        .bind(reference)
        .execute(&self.db.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
