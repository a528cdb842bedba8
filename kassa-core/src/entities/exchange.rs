use super::Currency;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case", type_name = "exchange_status")]
pub enum ExchangeStatus {
    Pending,
    Processing,
    Completed,
    Cancelled,
    PartiallyCompleted,
}

impl ExchangeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExchangeStatus::Completed
                | ExchangeStatus::Cancelled
                | ExchangeStatus::PartiallyCompleted
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExchangeStatus::Pending => "pending",
            ExchangeStatus::Processing => "processing",
            ExchangeStatus::Completed => "completed",
            ExchangeStatus::Cancelled => "cancelled",
            ExchangeStatus::PartiallyCompleted => "partially_completed",
        }
    }
}

/// States an exchange may still leave.
pub const OPEN_EXCHANGE_STATUSES: [ExchangeStatus; 2] =
    [ExchangeStatus::Pending, ExchangeStatus::Processing];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case", type_name = "offering_status")]
pub enum OfferingStatus {
    Pending,
    Processing,
    AwaitingOrder,
    OrderPlaced,
    Cancelled,
    Completed,
}

impl OfferingStatus {
    /// A hop the counterparty currently owns.
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            OfferingStatus::Processing | OfferingStatus::AwaitingOrder | OfferingStatus::OrderPlaced
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OfferingStatus::Cancelled | OfferingStatus::Completed)
    }
}

/// One multi-hop conversion requested by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Exchange {
    pub id: Uuid,
    pub user_id: Uuid,
    pub payin_currency: Currency,
    pub payout_currency: Currency,
    pub payin_amount: Decimal,
    pub payout_amount: Decimal,
    /// `payin_amount + platform_fee`; what was debited from the user.
    pub total_payin_amount: Decimal,
    pub platform_fee: Decimal,
    pub provider_fee: Decimal,
    /// Cumulative rate across all hops.
    pub rate: Decimal,
    pub status: ExchangeStatus,
    pub rating: Option<i16>,
    pub comment: Option<String>,
    pub created_at: time::PrimitiveDateTime,
    pub updated_at: time::PrimitiveDateTime,
    pub completed_at: Option<time::PrimitiveDateTime>,
}

impl Exchange {
    pub fn debit_reference(&self) -> String {
        format!("debit_{}", self.id)
    }

    pub fn credit_reference(&self) -> String {
        format!("credit_{}", self.id)
    }

    pub fn revenue_reference(&self) -> String {
        format!("rev_{}", self.id)
    }
}

/// One hop of an [`Exchange`], executed against one counterparty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Offering {
    pub id: Uuid,
    pub exchange_id: Uuid,
    /// Zero-based position in the chain.
    pub hop: i32,
    pub counterparty_id: String,
    /// Id of the published offering this hop was quoted from.
    pub catalog_offering_id: String,
    pub payin_currency: Currency,
    pub payout_currency: Currency,
    pub rate: Decimal,
    pub expected_payin_amount: Decimal,
    pub expected_payout_amount: Decimal,
    pub status: OfferingStatus,
    /// Exchange id assigned by the counterparty when the RFQ is accepted.
    pub counterparty_exchange_id: Option<String>,
    pub quote_fee: Option<Decimal>,
    pub quote_expires_at: Option<time::PrimitiveDateTime>,
    pub order_status: Option<String>,
    pub cancellation_reason: Option<String>,
    pub refunded_at: Option<time::PrimitiveDateTime>,
    pub created_at: time::PrimitiveDateTime,
    pub updated_at: time::PrimitiveDateTime,
}

impl Offering {
    pub fn refund_reference(&self) -> String {
        format!("refund_{}", self.id)
    }
}

/// Fields written alongside an offering status transition. `None` leaves
/// the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OfferingUpdate {
    pub counterparty_exchange_id: Option<String>,
    pub quote_fee: Option<Decimal>,
    pub quote_expires_at: Option<time::PrimitiveDateTime>,
    pub order_status: Option<String>,
    pub cancellation_reason: Option<String>,
}

impl OfferingUpdate {
    pub fn apply(self, offering: &mut Offering) {
        if let Some(v) = self.counterparty_exchange_id {
            offering.counterparty_exchange_id = Some(v);
        }
        if let Some(v) = self.quote_fee {
            offering.quote_fee = Some(v);
        }
        if let Some(v) = self.quote_expires_at {
            offering.quote_expires_at = Some(v);
        }
        if let Some(v) = self.order_status {
            offering.order_status = Some(v);
        }
        if let Some(v) = self.cancellation_reason {
            offering.cancellation_reason = Some(v);
        }
    }
}
