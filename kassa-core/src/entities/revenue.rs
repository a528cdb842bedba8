use super::Currency;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case", type_name = "revenue_source")]
pub enum RevenueSource {
    CurrencyExchange,
    WalletWithdrawal,
}

/// One recognised platform fee. `reference` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RevenueRecord {
    pub id: Uuid,
    pub reference: String,
    pub amount: Decimal,
    pub currency: Currency,
    pub source: RevenueSource,
    pub meta: serde_json::Value,
    pub created_at: time::PrimitiveDateTime,
}

impl RevenueRecord {
    pub fn new(
        reference: impl Into<String>,
        amount: Decimal,
        currency: Currency,
        source: RevenueSource,
        meta: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            reference: reference.into(),
            amount,
            currency,
            source,
            meta,
            created_at: crate::utils::time::now(),
        }
    }
}
