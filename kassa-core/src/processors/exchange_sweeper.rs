//! ExchangeSweeper processor.
//!
//! Periodically advances every open exchange: sends RFQs that never went
//! out, completes exchanges whose last hop closed, and refunds cancelled
//! hops whose refund is not yet stamped.

use crate::exchange::ExchangeRouter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

pub struct ExchangeSweeper {
    router: Arc<ExchangeRouter>,
    interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl ExchangeSweeper {
    pub fn new(
        router: Arc<ExchangeRouter>,
        interval: Duration,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            router,
            interval,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        info!(interval_secs = self.interval.as_secs(), "ExchangeSweeper started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("ExchangeSweeper received shutdown signal");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    match self.router.process_pending_exchanges().await {
                        Ok(report) if report.processed > 0 || report.refunded > 0 => info!(
                            processed = report.processed,
                            refunded = report.refunded,
                            errors = report.errors,
                            "Swept open exchanges"
                        ),
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Exchange sweep failed"),
                    }
                }
            }
        }

        info!("ExchangeSweeper shutdown complete");
    }
}
