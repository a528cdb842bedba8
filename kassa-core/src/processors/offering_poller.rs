//! OfferingPoller processor.
//!
//! Periodically fetches counterparty threads for in-flight exchange hops
//! and applies the latest message of each.

use crate::exchange::ExchangeRouter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

pub struct OfferingPoller {
    router: Arc<ExchangeRouter>,
    interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl OfferingPoller {
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
        info!(interval_secs = self.interval.as_secs(), "OfferingPoller started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("OfferingPoller received shutdown signal");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    match self.router.poll_counterparties().await {
                        Ok(report) => debug!(
                            threads = report.threads,
                            applied = report.applied,
                            errors = report.errors,
                            "Polled counterparties"
                        ),
                        Err(e) => error!(error = %e, "Counterparty poll failed"),
                    }
                }
            }
        }

        info!("OfferingPoller shutdown complete");
    }
}
