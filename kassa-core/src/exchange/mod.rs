//! Multi-hop currency exchange through liquidity counterparties.
//!
//! A user exchange is a chain of offerings, each settled against one
//! counterparty through the signed RFQ/quote/order/close protocol. The
//! user is debited once up front; the payout is credited when every hop
//! has completed, and a cancelled hop refunds what was reserved for it.

pub mod catalog;
pub mod counterparty;
pub mod paths;
pub mod quote;
pub mod router;

pub use catalog::OfferingCatalog;
pub use counterparty::{
    Counterparty, CounterpartyClient, CounterpartyDirectory, CounterpartyError,
    HttpCounterpartyClient,
};
pub use paths::{CatalogOffering, Chain, PathFinder, find_paths};
pub use quote::{ExchangeQuote, HopQuote};
pub use router::{ExchangeDetails, ExchangeRouter, PollReport, SweepReport, ThreadUpdate};

use crate::ledger::LedgerError;
use crate::store::StoreError;
use kassa_sdk::signature::SignatureError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("counterparty error: {0}")]
    Counterparty(#[from] CounterpartyError),

    #[error("signature error: {0}")]
    Signature(#[from] SignatureError),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}
