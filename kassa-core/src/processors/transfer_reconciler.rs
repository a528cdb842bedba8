//! TransferReconciler processor.
//!
//! Periodically polls providers for every payout still awaiting a terminal
//! status and finishes refunds for failed payouts whose refund did not go
//! through. Webhooks normally settle payouts first; this is the backstop.

use crate::settlement::SettlementPipeline;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

pub struct TransferReconciler {
    pipeline: Arc<SettlementPipeline>,
    interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl TransferReconciler {
    pub fn new(
        pipeline: Arc<SettlementPipeline>,
        interval: Duration,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            pipeline,
            interval,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        info!(interval_secs = self.interval.as_secs(), "TransferReconciler started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("TransferReconciler received shutdown signal");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    match self.pipeline.reconcile_transfers().await {
                        Ok(report) if report.checked > 0 || report.refunded > 0 => {
                            info!(
                                checked = report.checked,
                                settled = report.settled,
                                still_pending = report.still_pending,
                                refunded = report.refunded,
                                errors = report.errors,
                                "Reconciled transfers"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Transfer reconciliation failed"),
                    }
                }
            }
        }

        info!("TransferReconciler shutdown complete");
    }
}
