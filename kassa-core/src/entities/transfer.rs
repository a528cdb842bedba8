use super::{Currency, ProviderName};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Canonical settlement status shared by payouts and charges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase", type_name = "settlement_status")]
pub enum TransferStatus {
    Pending,
    Processing,
    Successful,
    Failed,
}

impl TransferStatus {
    fn rank(self) -> u8 {
        match self {
            TransferStatus::Pending => 0,
            TransferStatus::Processing => 1,
            TransferStatus::Successful | TransferStatus::Failed => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }

    /// Whether moving from `self` to `next` is a forward transition.
    ///
    /// Terminal states never move, and a delivery that reports the current
    /// status (or an earlier one) is not a transition.
    pub fn can_advance_to(self, next: TransferStatus) -> bool {
        next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Processing => "processing",
            TransferStatus::Successful => "successful",
            TransferStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination account for a payout.
///
/// `details` carries provider-specific fields (IBAN, sort code, recipient
/// type, ...) passed through to the adapter untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccountDetails {
    pub account_number: String,
    pub account_name: String,
    #[serde(default)]
    pub bank_code: Option<String>,
    #[serde(default)]
    pub bank_name: Option<String>,
    #[serde(default)]
    pub details: serde_json::Value,
}

/// One outbound payout attempt.
///
/// Retries of a failed payout never reuse a record: each attempt gets its
/// own reference (`root_reference` plus an attempt suffix) so that every
/// record's status only ever moves forward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TransferRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Wallet the funds were reserved from.
    pub wallet_id: Uuid,
    pub provider: ProviderName,
    pub reference: String,
    pub root_reference: String,
    pub attempt: i32,
    pub psp_transaction_id: Option<String>,
    pub amount: Decimal,
    pub fee: Decimal,
    pub currency: Currency,
    pub status: TransferStatus,
    #[sqlx(json)]
    pub account: AccountDetails,
    pub narration: Option<String>,
    #[sqlx(json)]
    pub provider_response: Vec<serde_json::Value>,
    #[sqlx(json)]
    pub webhook_response: Vec<serde_json::Value>,
    pub refunded_at: Option<time::PrimitiveDateTime>,
    pub created_at: time::PrimitiveDateTime,
    pub updated_at: time::PrimitiveDateTime,
}

impl TransferRecord {
    /// Total reserved from the wallet for this attempt.
    pub fn reserved(&self) -> Decimal {
        self.amount + self.fee
    }
}

/// Reference used for attempt `attempt` of a payout rooted at `root`.
///
/// The first attempt uses the root reference itself.
pub fn attempt_reference(root: &str, attempt: i32) -> String {
    if attempt <= 1 {
        root.to_owned()
    } else {
        format!("{root}_a{attempt}")
    }
}

/// Which response log an entry is appended to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseLog {
    /// Responses to calls the platform made (initiate, status checks).
    Provider,
    /// Inbound webhook deliveries.
    Webhook,
}
