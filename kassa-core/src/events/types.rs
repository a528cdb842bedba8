//! Notification event definitions.
//!
//! Notifications are fire-and-forget: they describe something that already
//! committed and carry enough data to render a message without re-reading
//! state. Losing one never affects balances.

use crate::entities::exchange::OfferingStatus;
use crate::entities::transfer::TransferStatus;
use crate::entities::Currency;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    /// A deposit was credited to a wallet.
    WalletFunded {
        user_id: Uuid,
        currency: Currency,
        amount: Decimal,
        reference: String,
    },
    /// A payout reached a terminal provider status.
    WithdrawalSettled {
        user_id: Uuid,
        transfer_id: Uuid,
        reference: String,
        status: TransferStatus,
        amount: Decimal,
        currency: Currency,
    },
    /// Funds reserved for a failed payout were returned.
    WithdrawalRefunded {
        user_id: Uuid,
        reference: String,
        amount: Decimal,
        currency: Currency,
    },
    /// One exchange hop changed state.
    ExchangeHopUpdated {
        user_id: Uuid,
        exchange_id: Uuid,
        offering_id: Uuid,
        hop: i32,
        status: OfferingStatus,
        order_status: Option<String>,
    },
    ExchangeCompleted {
        user_id: Uuid,
        exchange_id: Uuid,
        payout_amount: Decimal,
        payout_currency: Currency,
    },
    /// A cancelled hop's reserved amount was returned.
    ExchangeRefunded {
        user_id: Uuid,
        exchange_id: Uuid,
        offering_id: Uuid,
        amount: Decimal,
        currency: Currency,
    },
}

impl Notification {
    pub fn user_id(&self) -> Uuid {
        match self {
            Notification::WalletFunded { user_id, .. }
            | Notification::WithdrawalSettled { user_id, .. }
            | Notification::WithdrawalRefunded { user_id, .. }
            | Notification::ExchangeHopUpdated { user_id, .. }
            | Notification::ExchangeCompleted { user_id, .. }
            | Notification::ExchangeRefunded { user_id, .. } => *user_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Notification::WalletFunded { .. } => "wallet_funded",
            Notification::WithdrawalSettled { .. } => "withdrawal_settled",
            Notification::WithdrawalRefunded { .. } => "withdrawal_refunded",
            Notification::ExchangeHopUpdated { .. } => "exchange_hop_updated",
            Notification::ExchangeCompleted { .. } => "exchange_completed",
            Notification::ExchangeRefunded { .. } => "exchange_refunded",
        }
    }
}

impl kassa_sdk::signature::Signature for Notification {}
