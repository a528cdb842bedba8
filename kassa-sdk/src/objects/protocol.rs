//! Counterparty exchange protocol messages.
//!
//! A conversion hop is a thread of messages exchanged with one
//! counterparty:
//!
//! ```text
//! rfq ──► quote ──► order ──► orderstatus* ──► close
//! ```
//!
//! Messages authored by the platform (`rfq`, `order`, `close`) are signed
//! with its Ed25519 key; messages authored by the counterparty (`quote`,
//! `orderstatus`, `close`) are signed with theirs. See
//! [`crate::signature`] for the signing scheme.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Protocol revision stamped into every message.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Envelope metadata shared by every message kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Identifier of the signing party.
    pub from: String,
    /// Identifier of the receiving party.
    pub to: String,
    /// Counterparty-assigned exchange id. Absent only on the initial RFQ.
    #[serde(default)]
    pub exchange_id: Option<String>,
    pub protocol: String,
    /// Unix timestamp (seconds) at which the message was signed.
    pub created_at: i64,
}

/// Message payload, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum MessageBody {
    Rfq(Rfq),
    Quote(Quote),
    Order(Order),
    OrderStatus(OrderStatusUpdate),
    Close(Close),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Rfq,
    Quote,
    Order,
    OrderStatus,
    Close,
}

impl MessageBody {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageBody::Rfq(_) => MessageKind::Rfq,
            MessageBody::Quote(_) => MessageKind::Quote,
            MessageBody::Order(_) => MessageKind::Order,
            MessageBody::OrderStatus(_) => MessageKind::OrderStatus,
            MessageBody::Close(_) => MessageKind::Close,
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MessageKind::Rfq => "rfq",
            MessageKind::Quote => "quote",
            MessageKind::Order => "order",
            MessageKind::OrderStatus => "orderstatus",
            MessageKind::Close => "close",
        };
        f.write_str(s)
    }
}

/// Request for quote against one published offering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rfq {
    pub offering_id: String,
    pub payin_amount: Decimal,
    pub payin_currency: String,
    pub payout_currency: String,
    /// Platform-side identifier of the hop, echoed back by counterparties
    /// that support it.
    pub client_reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub payin_amount: Decimal,
    pub payout_amount: Decimal,
    #[serde(default)]
    pub fee: Decimal,
    /// Unix timestamp after which the quote can no longer be ordered.
    pub expires_at: i64,
}

/// Acceptance of the latest quote on a thread.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusUpdate {
    pub status: String,
}

/// Terminal message of a thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Close {
    #[serde(default)]
    pub reason: Option<String>,
    /// Whether the hop settled. Counterparties that omit the flag are
    /// treated as reporting a failure.
    #[serde(default)]
    pub success: bool,
}

/// A signed protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub metadata: MessageMetadata,
    pub body: MessageBody,
    /// Base64 (no padding) Ed25519 signature.
    pub signature: String,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }
}

/// Response to a submitted RFQ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RfqAccepted {
    pub exchange_id: String,
}

/// All messages exchanged so far for one counterparty exchange id, oldest
/// first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeThread {
    pub exchange_id: String,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl ExchangeThread {
    pub fn latest(&self) -> Option<&Message> {
        self.messages.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn body_is_adjacently_tagged() {
        let body = MessageBody::Quote(Quote {
            payin_amount: dec!(100),
            payout_amount: dec!(92.5),
            fee: dec!(1),
            expires_at: 1_700_000_000,
        });
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["kind"], "quote");
        assert_eq!(value["data"]["expires_at"], 1_700_000_000);

        let status: MessageBody =
            serde_json::from_str(r#"{"kind":"orderstatus","data":{"status":"PAYOUT_INITIATED"}}"#)
                .unwrap();
        assert_eq!(status.kind(), MessageKind::OrderStatus);
    }

    #[test]
    fn close_without_success_flag_is_a_failure() {
        let body: MessageBody =
            serde_json::from_str(r#"{"kind":"close","data":{"reason":"no liquidity"}}"#).unwrap();
        match body {
            MessageBody::Close(close) => {
                assert!(!close.success);
                assert_eq!(close.reason.as_deref(), Some("no liquidity"));
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }
}
