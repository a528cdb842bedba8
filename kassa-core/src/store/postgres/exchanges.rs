use super::PgStore;
use crate::entities::Page;
use crate::entities::exchange::{
    Exchange, ExchangeStatus, Offering, OfferingStatus, OfferingUpdate,
};
use crate::framework::{DatabaseAccessor, DatabaseProcessor};
use crate::store::{ExchangeStore, StoreError};
use crate::utils::time::now;
use async_trait::async_trait;
use kanau::processor::Processor;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct CreateExchangeWithOfferings {
    pub exchange: Exchange,
    pub offerings: Vec<Offering>,
}

impl Processor<CreateExchangeWithOfferings> for DatabaseProcessor {
    type Output = ();
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:CreateExchangeWithOfferings")]
    async fn process(&self, input: CreateExchangeWithOfferings) -> Result<(), StoreError> {
        let CreateExchangeWithOfferings {
            exchange,
            offerings,
        } = input;
        let mut tx = self.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO exchanges
                (id, user_id, payin_currency, payout_currency, payin_amount, payout_amount,
                 total_payin_amount, platform_fee, provider_fee, rate, status, rating, comment,
                 created_at, updated_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(exchange.id)
        .bind(exchange.user_id)
        .bind(exchange.payin_currency)
        .bind(exchange.payout_currency)
        .bind(exchange.payin_amount)
        .bind(exchange.payout_amount)
        .bind(exchange.total_payin_amount)
        .bind(exchange.platform_fee)
        .bind(exchange.provider_fee)
        .bind(exchange.rate)
        .bind(exchange.status)
        .bind(exchange.rating)
        .bind(&exchange.comment)
        .bind(exchange.created_at)
        .bind(exchange.updated_at)
        .bind(exchange.completed_at)
        .execute(tx.acquire())
        .await?;

        for offering in &offerings {
            sqlx::query(
                r#"
                INSERT INTO offerings
                    (id, exchange_id, hop, counterparty_id, catalog_offering_id,
                     payin_currency, payout_currency, rate, expected_payin_amount,
                     expected_payout_amount, status, counterparty_exchange_id, quote_fee,
                     quote_expires_at, order_status, cancellation_reason, refunded_at,
                     created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                        $16, $17, $18, $19)
                "#,
            )
            .bind(offering.id)
            .bind(offering.exchange_id)
            .bind(offering.hop)
            .bind(&offering.counterparty_id)
            .bind(&offering.catalog_offering_id)
            .bind(offering.payin_currency)
            .bind(offering.payout_currency)
            .bind(offering.rate)
            .bind(offering.expected_payin_amount)
            .bind(offering.expected_payout_amount)
            .bind(offering.status)
            .bind(&offering.counterparty_exchange_id)
            .bind(offering.quote_fee)
            .bind(offering.quote_expires_at)
            .bind(&offering.order_status)
            .bind(&offering.cancellation_reason)
            .bind(offering.refunded_at)
            .bind(offering.created_at)
            .bind(offering.updated_at)
            .execute(tx.acquire())
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

fn status_texts(statuses: &[ExchangeStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

#[async_trait]
impl ExchangeStore for PgStore {
    async fn create_exchange(
        &self,
        exchange: &Exchange,
        offerings: &[Offering],
    ) -> Result<(), StoreError> {
        self.db
            .process(CreateExchangeWithOfferings {
                exchange: exchange.clone(),
                offerings: offerings.to_vec(),
            })
            .await
    }

    #[tracing::instrument(skip_all, err, name = "SQL:GetExchange")]
    async fn exchange(&self, id: Uuid) -> Result<Option<Exchange>, StoreError> {
        let row = sqlx::query_as::<_, Exchange>("SELECT * FROM exchanges WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db.pool)
            .await?;
        Ok(row)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:ListUserExchanges")]
    async fn user_exchanges(
        &self,
        user_id: Uuid,
        page: Page,
    ) -> Result<Vec<Exchange>, StoreError> {
        let rows = sqlx::query_as::<_, Exchange>(
            r#"
            SELECT * FROM exchanges
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.db.pool)
        .await?;
        Ok(rows)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:GetExchangesWithStatus")]
    async fn exchanges_with_status(
        &self,
        statuses: &[ExchangeStatus],
        limit: i64,
    ) -> Result<Vec<Exchange>, StoreError> {
        let rows = sqlx::query_as::<_, Exchange>(
            r#"
            SELECT * FROM exchanges
            WHERE status::text = ANY($1)
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(status_texts(statuses))
        .bind(limit)
        .fetch_all(&self.db.pool)
        .await?;
        Ok(rows)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:GetExchangeOfferings")]
    async fn offerings(&self, exchange_id: Uuid) -> Result<Vec<Offering>, StoreError> {
        let rows = sqlx::query_as::<_, Offering>(
            "SELECT * FROM offerings WHERE exchange_id = $1 ORDER BY hop ASC",
        )
        .bind(exchange_id)
        .fetch_all(&self.db.pool)
        .await?;
        Ok(rows)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:GetOffering")]
    async fn offering(&self, id: Uuid) -> Result<Option<Offering>, StoreError> {
        let row = sqlx::query_as::<_, Offering>("SELECT * FROM offerings WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db.pool)
            .await?;
        Ok(row)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:GetInFlightOfferings")]
    async fn in_flight_offerings(&self) -> Result<Vec<Offering>, StoreError> {
        let rows = sqlx::query_as::<_, Offering>(
            r#"
            SELECT * FROM offerings
            WHERE status IN ('processing', 'awaiting_order', 'order_placed')
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.db.pool)
        .await?;
        Ok(rows)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:GetUnrefundedCancelledOfferings")]
    async fn unrefunded_cancelled_offerings(&self) -> Result<Vec<Offering>, StoreError> {
        let rows = sqlx::query_as::<_, Offering>(
            r#"
            SELECT * FROM offerings
            WHERE status = 'cancelled' AND refunded_at IS NULL
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.db.pool)
        .await?;
        Ok(rows)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:UpdateExchangeStatus")]
    async fn update_exchange_status(
        &self,
        id: Uuid,
        expected: &[ExchangeStatus],
        next: ExchangeStatus,
    ) -> Result<bool, StoreError> {
        let completed_at = next.is_terminal().then(now);
        let result = sqlx::query(
            r#"
            UPDATE exchanges
            SET status = $1, updated_at = $2, completed_at = COALESCE($3, completed_at)
            WHERE id = $4 AND status::text = ANY($5)
            "#,
        )
        .bind(next)
        .bind(now())
        .bind(completed_at)
        .bind(id)
        .bind(status_texts(expected))
        .execute(&self.db.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:UpdateOffering")]
    async fn update_offering(
        &self,
        id: Uuid,
        expected: OfferingStatus,
        next: OfferingStatus,
        update: OfferingUpdate,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE offerings
            SET status = $1,
                counterparty_exchange_id = COALESCE($2, counterparty_exchange_id),
                quote_fee = COALESCE($3, quote_fee),
                quote_expires_at = COALESCE($4, quote_expires_at),
                order_status = COALESCE($5, order_status),
                cancellation_reason = COALESCE($6, cancellation_reason),
                updated_at = $7
            WHERE id = $8 AND status = $9
            "#,
        )
        .bind(next)
        .bind(update.counterparty_exchange_id)
        .bind(update.quote_fee)
        .bind(update.quote_expires_at)
        .bind(update.order_status)
        .bind(update.cancellation_reason)
        .bind(now())
        .bind(id)
        .bind(expected)
        .execute(&self.db.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:MarkOfferingRefunded")]
    async fn mark_offering_refunded(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE offerings SET refunded_at = $1 WHERE id = $2 AND refunded_at IS NULL",
        )
        .bind(now())
        .bind(id)
        .execute(&self.db.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:RateExchange")]
    async fn rate_exchange(
        &self,
        id: Uuid,
        rating: i16,
        comment: Option<String>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE exchanges SET rating = $1, comment = $2, updated_at = $3 WHERE id = $4",
        )
        .bind(rating)
        .bind(comment)
        .bind(now())
        .bind(id)
        .execute(&self.db.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
