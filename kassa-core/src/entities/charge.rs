use super::transfer::TransferStatus;
use super::{Currency, ProviderName};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One inbound funding event reported by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChargeRecord {
    pub id: Uuid,
    pub provider: ProviderName,
    pub reference: String,
    pub user_id: Option<Uuid>,
    pub amount: Decimal,
    pub currency: Currency,
    pub channel: Option<String>,
    pub status: TransferStatus,
    #[sqlx(json)]
    pub webhook_response: Vec<serde_json::Value>,
    pub created_at: time::PrimitiveDateTime,
    pub updated_at: time::PrimitiveDateTime,
}

impl ChargeRecord {
    /// Ledger reference used when crediting this charge.
    pub fn ledger_reference(&self) -> String {
        format!("charge_{}_{}", self.provider, self.reference)
    }
}
