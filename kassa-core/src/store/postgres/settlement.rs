use super::PgStore;
use crate::entities::bank::{Bank, WalletAccount};
use crate::entities::beneficiary::Beneficiary;
use crate::entities::{Currency, ProviderName};
use crate::entities::charge::ChargeRecord;
use crate::entities::revenue::RevenueRecord;
use crate::entities::transfer::{ResponseLog, TransferRecord, TransferStatus};
use crate::store::{RevenueLedger, SettlementStore, StoreError};
use crate::utils::time::now;
use async_trait::async_trait;
use sqlx::types::Json;
use uuid::Uuid;

#[async_trait]
impl SettlementStore for PgStore {
    #[tracing::instrument(skip_all, err, name = "SQL:InsertTransferRecord")]
    async fn insert_transfer(&self, record: &TransferRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO transfer_records
                (id, user_id, wallet_id, provider, reference, root_reference, attempt,
                 psp_transaction_id, amount, fee, currency, status, account, narration,
                 provider_response, webhook_response, refunded_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19)
            ON CONFLICT (provider, reference) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(record.wallet_id)
        .bind(record.provider)
        .bind(&record.reference)
        .bind(&record.root_reference)
        .bind(record.attempt)
        .bind(&record.psp_transaction_id)
        .bind(record.amount)
        .bind(record.fee)
        .bind(record.currency)
        .bind(record.status)
        .bind(Json(&record.account))
        .bind(&record.narration)
        .bind(Json(&record.provider_response))
        .bind(Json(&record.webhook_response))
        .bind(record.refunded_at)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.db.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::DuplicateReference(record.reference.clone()));
        }
        Ok(())
    }

    #[tracing::instrument(skip_all, err, name = "SQL:GetTransferRecord")]
    async fn transfer(&self, id: Uuid) -> Result<Option<TransferRecord>, StoreError> {
        let record =
            sqlx::query_as::<_, TransferRecord>("SELECT * FROM transfer_records WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.db.pool)
                .await?;
        Ok(record)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:GetTransferRecordByReference")]
    async fn transfer_by_reference(
        &self,
        provider: ProviderName,
        reference: &str,
    ) -> Result<Option<TransferRecord>, StoreError> {
        let record = sqlx::query_as::<_, TransferRecord>(
            "SELECT * FROM transfer_records WHERE provider = $1 AND reference = $2",
        )
        .bind(provider)
        .bind(reference)
        .fetch_optional(&self.db.pool)
        .await?;
        Ok(record)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:GetTransferRecordByPspId")]
    async fn transfer_by_psp_id(
        &self,
        provider: ProviderName,
        psp_transaction_id: &str,
    ) -> Result<Option<TransferRecord>, StoreError> {
        let record = sqlx::query_as::<_, TransferRecord>(
            "SELECT * FROM transfer_records WHERE provider = $1 AND psp_transaction_id = $2",
        )
        .bind(provider)
        .bind(psp_transaction_id)
        .fetch_optional(&self.db.pool)
        .await?;
        Ok(record)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:GetLatestTransferAttempt")]
    async fn latest_transfer_attempt(
        &self,
        provider: ProviderName,
        root_reference: &str,
    ) -> Result<Option<TransferRecord>, StoreError> {
        let record = sqlx::query_as::<_, TransferRecord>(
            r#"
            SELECT * FROM transfer_records
            WHERE provider = $1 AND root_reference = $2
            ORDER BY attempt DESC
            LIMIT 1
            "#,
        )
        .bind(provider)
        .bind(root_reference)
        .fetch_optional(&self.db.pool)
        .await?;
        Ok(record)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:UpdateTransferStatus")]
    async fn update_transfer_status(
        &self,
        id: Uuid,
        expected: TransferStatus,
        next: TransferStatus,
        psp_transaction_id: Option<&str>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE transfer_records
            SET status = $1,
                psp_transaction_id = COALESCE($2, psp_transaction_id),
                updated_at = $3
            WHERE id = $4 AND status = $5
            "#,
        )
        .bind(next)
        .bind(psp_transaction_id)
        .bind(now())
        .bind(id)
        .bind(expected)
        .execute(&self.db.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:AppendTransferResponse")]
    async fn append_transfer_response(
        &self,
        id: Uuid,
        log: ResponseLog,
        payload: serde_json::Value,
    ) -> Result<(), StoreError> {
        let sql = match log {
            ResponseLog::Provider => {
                "UPDATE transfer_records \
                 SET provider_response = provider_response || jsonb_build_array($1::jsonb) \
                 WHERE id = $2"
            }
            ResponseLog::Webhook => {
                "UPDATE transfer_records \
                 SET webhook_response = webhook_response || jsonb_build_array($1::jsonb) \
                 WHERE id = $2"
            }
        };
        sqlx::query(sql)
            .bind(payload)
            .bind(id)
            .execute(&self.db.pool)
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip_all, err, name = "SQL:MarkTransferRefunded")]
    async fn mark_transfer_refunded(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE transfer_records SET refunded_at = $1 WHERE id = $2 AND refunded_at IS NULL",
        )
        .bind(now())
        .bind(id)
        .execute(&self.db.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:GetInFlightTransfers")]
    async fn in_flight_transfers(&self, limit: i64) -> Result<Vec<TransferRecord>, StoreError> {
        let records = sqlx::query_as::<_, TransferRecord>(
            r#"
            SELECT * FROM transfer_records
            WHERE status IN ('pending', 'processing')
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.db.pool)
        .await?;
        Ok(records)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:GetUnrefundedFailedTransfers")]
    async fn unrefunded_failed_transfers(
        &self,
        limit: i64,
    ) -> Result<Vec<TransferRecord>, StoreError> {
        let records = sqlx::query_as::<_, TransferRecord>(
            r#"
            SELECT * FROM transfer_records
            WHERE status = 'failed' AND refunded_at IS NULL
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.db.pool)
        .await?;
        Ok(records)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:UpsertChargeRecord")]
    async fn upsert_charge(&self, charge: &ChargeRecord) -> Result<ChargeRecord, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO charge_records
                (id, provider, reference, user_id, amount, currency, channel, status,
                 webhook_response, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (provider, reference) DO NOTHING
            "#,
        )
        .bind(charge.id)
        .bind(charge.provider)
        .bind(&charge.reference)
        .bind(charge.user_id)
        .bind(charge.amount)
        .bind(charge.currency)
        .bind(&charge.channel)
        .bind(charge.status)
        .bind(Json(&charge.webhook_response))
        .bind(charge.created_at)
        .bind(charge.updated_at)
        .execute(&self.db.pool)
        .await?;

        let stored = sqlx::query_as::<_, ChargeRecord>(
            "SELECT * FROM charge_records WHERE provider = $1 AND reference = $2",
        )
        .bind(charge.provider)
        .bind(&charge.reference)
        .fetch_one(&self.db.pool)
        .await?;
        Ok(stored)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:UpdateChargeStatus")]
    async fn update_charge_status(
        &self,
        id: Uuid,
        expected: TransferStatus,
        next: TransferStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE charge_records SET status = $1, updated_at = $2 WHERE id = $3 AND status = $4",
        )
        .bind(next)
        .bind(now())
        .bind(id)
        .bind(expected)
        .execute(&self.db.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:AppendChargeResponse")]
    async fn append_charge_response(
        &self,
        id: Uuid,
        payload: serde_json::Value,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE charge_records \
             SET webhook_response = webhook_response || jsonb_build_array($1::jsonb) \
             WHERE id = $2",
        )
        .bind(payload)
        .bind(id)
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip_all, err, name = "SQL:UpsertBeneficiary")]
    async fn upsert_beneficiary(
        &self,
        beneficiary: &Beneficiary,
    ) -> Result<Beneficiary, StoreError> {
        // The partial unique index covers live rows only, so a deleted
        // beneficiary can be re-created.
        let inserted = sqlx::query_as::<_, Beneficiary>(
            r#"
            INSERT INTO beneficiaries
                (id, user_id, currency, kind, account_number, account_name, bank_code,
                 bank_name, details, target_user_id, created_at, deleted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NULL)
            ON CONFLICT DO NOTHING
            RETURNING *
            "#,
        )
        .bind(beneficiary.id)
        .bind(beneficiary.user_id)
        .bind(beneficiary.currency)
        .bind(beneficiary.kind)
        .bind(&beneficiary.account_number)
        .bind(&beneficiary.account_name)
        .bind(&beneficiary.bank_code)
        .bind(&beneficiary.bank_name)
        .bind(&beneficiary.details)
        .bind(beneficiary.target_user_id)
        .bind(beneficiary.created_at)
        .fetch_optional(&self.db.pool)
        .await?;
        if let Some(row) = inserted {
            return Ok(row);
        }

        let existing = sqlx::query_as::<_, Beneficiary>(
            r#"
            SELECT * FROM beneficiaries
            WHERE user_id = $1 AND currency = $2 AND kind = $3
              AND account_number IS NOT DISTINCT FROM $4
              AND target_user_id IS NOT DISTINCT FROM $5
              AND deleted_at IS NULL
            "#,
        )
        .bind(beneficiary.user_id)
        .bind(beneficiary.currency)
        .bind(beneficiary.kind)
        .bind(&beneficiary.account_number)
        .bind(beneficiary.target_user_id)
        .fetch_one(&self.db.pool)
        .await?;
        Ok(existing)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:GetBeneficiary")]
    async fn beneficiary(
        &self,
        user_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Beneficiary>, StoreError> {
        let row = sqlx::query_as::<_, Beneficiary>(
            "SELECT * FROM beneficiaries WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.db.pool)
        .await?;
        Ok(row)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:ListBeneficiaries")]
    async fn beneficiaries(&self, user_id: Uuid) -> Result<Vec<Beneficiary>, StoreError> {
        let rows = sqlx::query_as::<_, Beneficiary>(
            r#"
            SELECT * FROM beneficiaries
            WHERE user_id = $1 AND deleted_at IS NULL
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db.pool)
        .await?;
        Ok(rows)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:DeleteBeneficiary")]
    async fn delete_beneficiary(&self, user_id: Uuid, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE beneficiaries SET deleted_at = $1
            WHERE id = $2 AND user_id = $3 AND deleted_at IS NULL
            "#,
        )
        .bind(now())
        .bind(id)
        .bind(user_id)
        .execute(&self.db.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:ListBanks")]
    async fn banks(&self, currency: Option<Currency>) -> Result<Vec<Bank>, StoreError> {
        let rows = sqlx::query_as::<_, Bank>(
            r#"
            SELECT * FROM banks
            WHERE deleted_at IS NULL AND ($1::currency_code IS NULL OR currency = $1)
            ORDER BY name ASC
            "#,
        )
        .bind(currency)
        .fetch_all(&self.db.pool)
        .await?;
        Ok(rows)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:GetBank")]
    async fn bank(&self, id: Uuid) -> Result<Option<Bank>, StoreError> {
        let row = sqlx::query_as::<_, Bank>(
            "SELECT * FROM banks WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(&self.db.pool)
        .await?;
        Ok(row)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:UpsertBank")]
    async fn upsert_bank(&self, bank: &Bank) -> Result<Bank, StoreError> {
        let row = sqlx::query_as::<_, Bank>(
            r#"
            INSERT INTO banks (id, currency, name, logo, meta, created_at, deleted_at)
            VALUES ($1, $2, $3, $4, $5, $6, NULL)
            ON CONFLICT (currency, name) DO UPDATE
                SET meta = banks.meta || EXCLUDED.meta,
                    logo = COALESCE(EXCLUDED.logo, banks.logo)
            RETURNING *
            "#,
        )
        .bind(bank.id)
        .bind(bank.currency)
        .bind(&bank.name)
        .bind(&bank.logo)
        .bind(&bank.meta)
        .bind(bank.created_at)
        .fetch_one(&self.db.pool)
        .await?;
        Ok(row)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:GetWalletAccount")]
    async fn wallet_account(
        &self,
        user_id: Uuid,
        currency: Currency,
    ) -> Result<Option<WalletAccount>, StoreError> {
        let row = sqlx::query_as::<_, WalletAccount>(
            "SELECT * FROM wallet_accounts WHERE user_id = $1 AND currency = $2",
        )
        .bind(user_id)
        .bind(currency)
        .fetch_optional(&self.db.pool)
        .await?;
        Ok(row)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:ListWalletAccounts")]
    async fn wallet_accounts(&self, user_id: Uuid) -> Result<Vec<WalletAccount>, StoreError> {
        let rows = sqlx::query_as::<_, WalletAccount>(
            "SELECT * FROM wallet_accounts WHERE user_id = $1 ORDER BY currency ASC",
        )
        .bind(user_id)
        .fetch_all(&self.db.pool)
        .await?;
        Ok(rows)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:InsertWalletAccount")]
    async fn insert_wallet_account(
        &self,
        account: &WalletAccount,
    ) -> Result<WalletAccount, StoreError> {
        let inserted = sqlx::query_as::<_, WalletAccount>(
            r#"
            INSERT INTO wallet_accounts
                (id, user_id, wallet_id, currency, provider, account_number, account_name,
                 bank_name, provider_customer_id, provider_response, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (user_id, currency) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(account.id)
        .bind(account.user_id)
        .bind(account.wallet_id)
        .bind(account.currency)
        .bind(account.provider)
        .bind(&account.account_number)
        .bind(&account.account_name)
        .bind(&account.bank_name)
        .bind(&account.provider_customer_id)
        .bind(&account.provider_response)
        .bind(account.created_at)
        .fetch_optional(&self.db.pool)
        .await?;
        match inserted {
            Some(row) => Ok(row),
            None => self
                .wallet_account(account.user_id, account.currency)
                .await?
                .ok_or(StoreError::Database(sqlx::Error::RowNotFound)),
        }
    }
}

#[async_trait]
impl RevenueLedger for PgStore {
    #[tracing::instrument(skip_all, err, name = "SQL:InsertRevenueRecord")]
    async fn record(&self, revenue: &RevenueRecord) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO revenue_records (id, reference, amount, currency, source, meta, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (reference) DO NOTHING
            "#,
        )
        .bind(revenue.id)
        .bind(&revenue.reference)
        .bind(revenue.amount)
        .bind(revenue.currency)
        .bind(revenue.source)
        .bind(&revenue.meta)
        .bind(revenue.created_at)
        .execute(&self.db.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:GetRevenueRecord")]
    async fn revenue(&self, reference: &str) -> Result<Option<RevenueRecord>, StoreError> {
        let row =
            sqlx::query_as::<_, RevenueRecord>("SELECT * FROM revenue_records WHERE reference = $1")
                .bind(reference)
                .fetch_optional(&self.db.pool)
                .await?;
        Ok(row)
    }
}
