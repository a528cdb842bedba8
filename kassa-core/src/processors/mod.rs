//! Background processors.
//!
//! Each one runs as its own task until the shutdown signal flips:
//!
//! - `TransferReconciler`: polls providers for in-flight payouts and
//!   finishes pending refunds
//! - `OfferingPoller`: applies counterparty thread updates to in-flight hops
//! - `ExchangeSweeper`: advances open exchanges
//! - `NotificationDispatcher`: drains the notification channel

pub mod exchange_sweeper;
pub mod notification_dispatcher;
pub mod offering_poller;
pub mod transfer_reconciler;

pub use exchange_sweeper::ExchangeSweeper;
pub use notification_dispatcher::{DispatchError, NotificationDispatcher};
pub use offering_poller::OfferingPoller;
pub use transfer_reconciler::TransferReconciler;
