//! Provider-neutral status events.
//!
//! Webhook deliveries and status polls are both normalized into a
//! [`CanonicalEvent`] before anything is applied, so the two paths share one
//! state machine.

use crate::entities::transfer::TransferStatus;
use crate::entities::{Currency, ProviderName};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Where a status observation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    Webhook,
    Poll,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferEvent {
    pub provider: ProviderName,
    /// Our reference, when the provider echoes it back.
    pub reference: Option<String>,
    pub psp_transaction_id: Option<String>,
    pub status: TransferStatus,
    pub payload: serde_json::Value,
    pub source: EventSource,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChargeEvent {
    pub provider: ProviderName,
    pub reference: String,
    pub amount: Decimal,
    pub currency: Currency,
    pub channel: Option<String>,
    pub status: TransferStatus,
    /// Taken from the metadata attached when the charge session was created.
    pub user_id: Option<Uuid>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalEvent {
    Transfer(TransferEvent),
    Charge(ChargeEvent),
}

impl CanonicalEvent {
    pub fn provider(&self) -> ProviderName {
        match self {
            CanonicalEvent::Transfer(e) => e.provider,
            CanonicalEvent::Charge(e) => e.provider,
        }
    }
}
