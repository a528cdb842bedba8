//! Provider-agnostic payout and charge settlement.
//!
//! Payouts reserve funds with a ledger debit before the provider is called.
//! Every status the platform learns afterwards, whether from a webhook or a
//! poll, is normalized into a [`CanonicalEvent`] and applied by
//! [`SettlementPipeline`] as a forward-only compare-and-swap.

pub mod directory;
pub mod events;
pub mod pipeline;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod withdrawals;

pub use events::{CanonicalEvent, ChargeEvent, EventSource, TransferEvent};
pub use pipeline::{EventOutcome, ReconcileReport, SettlementPipeline, TransferRequest};
pub use provider::{
    ChargeSession, ChargeSessionRequest, PaymentProvider, ProviderBank, ProviderError,
    TransferInstruction, TransferOutcome, VirtualAccount, VirtualAccountRequest,
};
pub use registry::ProviderRegistry;
pub use withdrawals::{NewBeneficiary, Withdrawal};

use crate::entities::Currency;
use crate::ledger::LedgerError;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("validation error: {0}")]
    Validation(String),

    /// The amount cannot be settled, e.g. it is finer than a minor unit.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("no provider routes {0}")]
    UnsupportedCurrency(Currency),

    #[error("invalid webhook signature")]
    InvalidSignature,

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}
