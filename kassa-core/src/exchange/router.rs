use super::ExchangeError;
use super::catalog::OfferingCatalog;
use super::counterparty::{Counterparty, CounterpartyClient, CounterpartyError};
use super::paths::{Chain, find_paths};
use super::quote::{ExchangeQuote, summarize};
use crate::config::{CurrencySettings, SettingsHandle};
use crate::entities::exchange::{
    Exchange, ExchangeStatus, OPEN_EXCHANGE_STATUSES, Offering, OfferingStatus, OfferingUpdate,
};
use crate::entities::revenue::{RevenueRecord, RevenueSource};
use crate::entities::wallet::TransactionPurpose;
use crate::entities::{Currency, Page};
use crate::events::{Notification, Notifier};
use crate::ledger::{LedgerError, MutationRequest, WalletLedger};
use crate::store::{ExchangeStore, RevenueLedger};
use crate::utils::time::{from_unix, now};
use itertools::Itertools;
use kanau::processor::Processor;
use kassa_sdk::objects::{Close, Message, MessageBody, Order, Quote, Rfq};
use kassa_sdk::signature::{ProtocolSigner, verify_message};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How many open exchanges one sweep looks at.
const SWEEP_BATCH: i64 = 500;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExchangeDetails {
    pub exchange: Exchange,
    pub offerings: Vec<Offering>,
}

/// The latest counterparty-authored message on one hop's thread.
#[derive(Debug, Clone)]
pub struct ThreadUpdate {
    pub offering: Offering,
    pub message: Message,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub threads: usize,
    pub applied: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub processed: usize,
    pub refunded: usize,
    pub errors: usize,
}

pub struct ExchangeRouter {
    ledger: Arc<WalletLedger>,
    store: Arc<dyn ExchangeStore>,
    revenue: Arc<dyn RevenueLedger>,
    catalog: Arc<OfferingCatalog>,
    client: Arc<dyn CounterpartyClient>,
    signer: Arc<ProtocolSigner>,
    settings: SettingsHandle<CurrencySettings>,
    notifier: Arc<dyn Notifier>,
    /// Serializes [`ExchangeRouter::poll_counterparties`] across callers.
    poll_lock: Mutex<()>,
}

impl ExchangeRouter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<WalletLedger>,
        store: Arc<dyn ExchangeStore>,
        revenue: Arc<dyn RevenueLedger>,
        catalog: Arc<OfferingCatalog>,
        client: Arc<dyn CounterpartyClient>,
        signer: Arc<ProtocolSigner>,
        settings: SettingsHandle<CurrencySettings>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            ledger,
            store,
            revenue,
            catalog,
            client,
            signer,
            settings,
            notifier,
            poll_lock: Mutex::new(()),
        }
    }

    pub fn catalog(&self) -> &OfferingCatalog {
        &self.catalog
    }

    fn counterparty(&self, id: &str) -> Result<Arc<Counterparty>, ExchangeError> {
        Ok(self.catalog.directory().get(id)?)
    }

    async fn load_exchange(&self, id: Uuid) -> Result<Exchange, ExchangeError> {
        self.store
            .exchange(id)
            .await?
            .ok_or_else(|| ExchangeError::Validation(format!("unknown exchange {id}")))
    }

    async fn owned_exchange(&self, user_id: Uuid, id: Uuid) -> Result<Exchange, ExchangeError> {
        match self.store.exchange(id).await? {
            Some(exchange) if exchange.user_id == user_id => Ok(exchange),
            _ => Err(ExchangeError::Validation(format!("unknown exchange {id}"))),
        }
    }

    // -----------------------------------------------------------------------
    // Discovery and pricing
    // -----------------------------------------------------------------------

    /// Every chain currently routable from `from` to `to`.
    pub async fn find_paths(&self, from: Currency, to: Currency) -> Vec<Chain> {
        let offerings = self.catalog.offerings().await;
        find_paths(&offerings, from, to)
    }

    pub async fn quote(
        &self,
        payin_amount: Decimal,
        offering_ids: &[String],
    ) -> Result<ExchangeQuote, ExchangeError> {
        let resolved = self.catalog.resolve(offering_ids).await;
        let mut offerings = Vec::with_capacity(resolved.len());
        for (id, offering) in offering_ids.iter().zip(resolved) {
            offerings.push(
                offering.ok_or_else(|| ExchangeError::Validation(format!("unknown offering {id}")))?,
            );
        }
        summarize(payin_amount, &offerings, &self.settings.current())
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Debit the user, persist the exchange and start its first hop.
    #[tracing::instrument(skip_all, fields(%user_id, %payin_amount))]
    pub async fn create_exchange(
        &self,
        user_id: Uuid,
        payin_amount: Decimal,
        offering_ids: &[String],
    ) -> Result<ExchangeDetails, ExchangeError> {
        let quote = self.quote(payin_amount, offering_ids).await?;
        let created_at = now();
        let exchange = Exchange {
            id: Uuid::now_v7(),
            user_id,
            payin_currency: quote.payin_currency,
            payout_currency: quote.payout_currency,
            payin_amount: quote.payin_amount,
            payout_amount: quote.payout_amount,
            total_payin_amount: quote.total_payin_amount,
            platform_fee: quote.platform_fee,
            provider_fee: quote.provider_fee,
            rate: quote.rate,
            status: ExchangeStatus::Pending,
            rating: None,
            comment: None,
            created_at,
            updated_at: created_at,
            completed_at: None,
        };
        let offerings: Vec<Offering> = quote
            .hops
            .iter()
            .enumerate()
            .map(|(hop, q)| Offering {
                id: Uuid::now_v7(),
                exchange_id: exchange.id,
                hop: hop as i32,
                counterparty_id: q.counterparty_id.clone(),
                catalog_offering_id: q.offering_id.clone(),
                payin_currency: q.payin_currency,
                payout_currency: q.payout_currency,
                rate: q.rate,
                expected_payin_amount: q.payin_amount,
                expected_payout_amount: q.payout_amount,
                status: OfferingStatus::Pending,
                counterparty_exchange_id: None,
                quote_fee: None,
                quote_expires_at: None,
                order_status: None,
                cancellation_reason: None,
                refunded_at: None,
                created_at,
                updated_at: created_at,
            })
            .collect();

        let meta = serde_json::json!({
            "exchange_id": exchange.id,
            "payout_currency": exchange.payout_currency,
        });
        self.ledger
            .debit(
                MutationRequest::new(
                    user_id,
                    exchange.payin_currency,
                    exchange.total_payin_amount,
                    exchange.debit_reference(),
                    TransactionPurpose::CurrencyExchange,
                )
                .with_description(format!(
                    "Exchange {} to {}",
                    exchange.payin_currency, exchange.payout_currency
                ))
                .with_meta(meta.clone()),
            )
            .await?;

        if let Err(e) = self.store.create_exchange(&exchange, &offerings).await {
            error!(exchange_id = %exchange.id, error = %e, "Failed to persist exchange, reversing debit");
            let reversal = MutationRequest::new(
                user_id,
                exchange.payin_currency,
                exchange.total_payin_amount,
                format!("refund_{}", exchange.id),
                TransactionPurpose::Refund,
            )
            .with_meta(meta);
            match self.ledger.credit(reversal).await {
                Ok(_) | Err(LedgerError::DuplicateReference(_)) => {}
                Err(reversal_error) => {
                    error!(exchange_id = %exchange.id, error = %reversal_error, "Reversal of exchange debit failed");
                }
            }
            return Err(e.into());
        }
        info!(exchange_id = %exchange.id, hops = offerings.len(), "Exchange created");

        if let Err(e) = self.process_exchange(exchange.id).await {
            // The sweeper picks it up again.
            warn!(exchange_id = %exchange.id, error = %e, "Failed to start exchange");
        }
        self.exchange_details(user_id, exchange.id).await
    }

    /// Advance an exchange as far as local state allows.
    ///
    /// Sends the RFQ for the first pending hop, completes the exchange once
    /// every hop has completed, and otherwise waits for the poller.
    #[tracing::instrument(skip_all, err, fields(%exchange_id))]
    pub async fn process_exchange(&self, exchange_id: Uuid) -> Result<ExchangeStatus, ExchangeError> {
        let exchange = self.load_exchange(exchange_id).await?;
        if exchange.status.is_terminal() {
            return Ok(exchange.status);
        }
        let offerings = self.store.offerings(exchange_id).await?;
        if offerings.is_empty() {
            return Err(ExchangeError::InvariantViolation(format!(
                "exchange {exchange_id} has no offerings"
            )));
        }

        match offerings
            .iter()
            .find(|o| o.status != OfferingStatus::Completed)
        {
            None => self.complete_exchange(&exchange).await,
            Some(offering) if offering.status == OfferingStatus::Pending => {
                self.send_rfq(&exchange, offering).await?;
                Ok(self.load_exchange(exchange_id).await?.status)
            }
            Some(offering) if offering.status == OfferingStatus::Cancelled => {
                self.refund_cancelled_offering(offering).await?;
                Ok(self.load_exchange(exchange_id).await?.status)
            }
            Some(offering) => {
                debug!(offering_id = %offering.id, status = ?offering.status, "Hop in flight");
                Ok(exchange.status)
            }
        }
    }

    async fn complete_exchange(&self, exchange: &Exchange) -> Result<ExchangeStatus, ExchangeError> {
        let meta = serde_json::json!({ "exchange_id": exchange.id });
        let credit = MutationRequest::new(
            exchange.user_id,
            exchange.payout_currency,
            exchange.payout_amount,
            exchange.credit_reference(),
            TransactionPurpose::CurrencyExchange,
        )
        .with_description(format!(
            "Exchange {} to {}",
            exchange.payin_currency, exchange.payout_currency
        ))
        .with_meta(meta.clone());
        match self.ledger.credit(credit).await {
            Ok(_) => {}
            Err(LedgerError::DuplicateReference(_)) => {
                debug!(exchange_id = %exchange.id, "Payout already credited");
            }
            Err(e) => return Err(e.into()),
        }

        if exchange.platform_fee > Decimal::ZERO {
            let revenue = RevenueRecord::new(
                exchange.revenue_reference(),
                exchange.platform_fee,
                exchange.payin_currency,
                RevenueSource::CurrencyExchange,
                meta,
            );
            if !self.revenue.record(&revenue).await? {
                debug!(reference = %revenue.reference, "Revenue already recognized");
            }
        }

        if self
            .store
            .update_exchange_status(exchange.id, &OPEN_EXCHANGE_STATUSES, ExchangeStatus::Completed)
            .await?
        {
            info!(exchange_id = %exchange.id, payout = %exchange.payout_amount, "Exchange completed");
            self.notifier.notify(Notification::ExchangeCompleted {
                user_id: exchange.user_id,
                exchange_id: exchange.id,
                payout_amount: exchange.payout_amount,
                payout_currency: exchange.payout_currency,
            });
        }
        Ok(ExchangeStatus::Completed)
    }

    async fn send_rfq(&self, exchange: &Exchange, offering: &Offering) -> Result<(), ExchangeError> {
        let counterparty = self.counterparty(&offering.counterparty_id)?;
        let rfq = self.signer.sign_message(
            &counterparty.id,
            None,
            MessageBody::Rfq(Rfq {
                offering_id: offering.catalog_offering_id.clone(),
                payin_amount: offering.expected_payin_amount,
                payin_currency: offering.payin_currency.code().to_owned(),
                payout_currency: offering.payout_currency.code().to_owned(),
                client_reference: offering.id.to_string(),
            }),
        )?;

        let counterparty_exchange_id = match self.client.send_rfq(&counterparty, rfq).await {
            Ok(id) => id,
            Err(CounterpartyError::Rejected { status, body }) if status < 500 => {
                warn!(offering_id = %offering.id, status, %body, "RFQ rejected");
                let reason = format!("rfq rejected: {body}");
                self.cancel_offering(exchange, offering, OfferingStatus::Pending, reason)
                    .await?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let update = OfferingUpdate {
            counterparty_exchange_id: Some(counterparty_exchange_id),
            ..Default::default()
        };
        if !self
            .transition(exchange, offering, OfferingStatus::Pending, OfferingStatus::Processing, update)
            .await?
        {
            warn!(offering_id = %offering.id, "Offering left Pending while its RFQ was in flight");
            return Ok(());
        }
        self.store
            .update_exchange_status(exchange.id, &[ExchangeStatus::Pending], ExchangeStatus::Processing)
            .await?;
        info!(offering_id = %offering.id, hop = offering.hop, counterparty = %counterparty.id, "RFQ sent");
        Ok(())
    }

    /// CAS an offering and notify on success.
    async fn transition(
        &self,
        exchange: &Exchange,
        offering: &Offering,
        expected: OfferingStatus,
        next: OfferingStatus,
        update: OfferingUpdate,
    ) -> Result<bool, ExchangeError> {
        let mut updated = offering.clone();
        updated.status = next;
        update.clone().apply(&mut updated);
        if !self
            .store
            .update_offering(offering.id, expected, next, update)
            .await?
        {
            return Ok(false);
        }
        self.notify_hop(exchange, updated);
        Ok(true)
    }

    fn notify_hop(&self, exchange: &Exchange, offering: Offering) {
        self.notifier.notify(Notification::ExchangeHopUpdated {
            user_id: exchange.user_id,
            exchange_id: exchange.id,
            offering_id: offering.id,
            hop: offering.hop,
            status: offering.status,
            order_status: offering.order_status,
        });
    }

    async fn cancel_offering(
        &self,
        exchange: &Exchange,
        offering: &Offering,
        expected: OfferingStatus,
        reason: String,
    ) -> Result<bool, ExchangeError> {
        let update = OfferingUpdate {
            cancellation_reason: Some(reason),
            ..Default::default()
        };
        if !self
            .transition(exchange, offering, expected, OfferingStatus::Cancelled, update)
            .await?
        {
            return Ok(false);
        }
        self.refund_cancelled_offering(offering).await?;
        Ok(true)
    }

    /// What a cancelled hop returns. The first hop holds the whole debit,
    /// platform fee included; later hops hold their expected payin.
    fn refund_amount(exchange: &Exchange, offering: &Offering) -> Decimal {
        if offering.hop == 0 {
            exchange.total_payin_amount
        } else {
            offering.expected_payin_amount
        }
    }

    /// Return a cancelled hop's reserved amount to the user, once.
    ///
    /// The credit is keyed by `refund_{offering_id}`, so repeated calls are
    /// harmless; `refunded_at` records that it went through.
    pub async fn refund_cancelled_offering(&self, offering: &Offering) -> Result<bool, ExchangeError> {
        if offering.refunded_at.is_some() {
            return Ok(false);
        }
        let exchange = self.load_exchange(offering.exchange_id).await?;
        let amount = Self::refund_amount(&exchange, offering);
        let refund = MutationRequest::new(
            exchange.user_id,
            offering.payin_currency,
            amount,
            offering.refund_reference(),
            TransactionPurpose::Refund,
        )
        .with_description(format!("Refund for cancelled exchange hop {}", offering.hop))
        .with_meta(serde_json::json!({
            "exchange_id": exchange.id,
            "offering_id": offering.id,
        }));
        match self.ledger.credit(refund).await {
            Ok(_) => {}
            Err(LedgerError::DuplicateReference(_)) => {
                debug!(offering_id = %offering.id, "Hop refund already credited");
            }
            Err(e) => return Err(e.into()),
        }

        let stamped = self.store.mark_offering_refunded(offering.id).await?;
        self.store
            .update_exchange_status(
                exchange.id,
                &OPEN_EXCHANGE_STATUSES,
                ExchangeStatus::PartiallyCompleted,
            )
            .await?;
        if stamped {
            info!(offering_id = %offering.id, %amount, currency = %offering.payin_currency, "Cancelled hop refunded");
            self.notifier.notify(Notification::ExchangeRefunded {
                user_id: exchange.user_id,
                exchange_id: exchange.id,
                offering_id: offering.id,
                amount,
                currency: offering.payin_currency,
            });
        }
        Ok(stamped)
    }

    // -----------------------------------------------------------------------
    // Polling
    // -----------------------------------------------------------------------

    /// Fetch the threads of every in-flight hop and apply what changed.
    ///
    /// One counterparty failing never stops the others.
    pub async fn poll_counterparties(&self) -> Result<PollReport, ExchangeError> {
        let _guard = self.poll_lock.lock().await;
        let mut report = PollReport::default();

        let by_counterparty = self
            .store
            .in_flight_offerings()
            .await?
            .into_iter()
            .into_group_map_by(|o| o.counterparty_id.clone());

        for (counterparty_id, offerings) in by_counterparty {
            let counterparty = match self.counterparty(&counterparty_id) {
                Ok(c) => c,
                Err(e) => {
                    error!(counterparty = %counterparty_id, error = %e, "In-flight hops on an unknown counterparty");
                    report.errors += offerings.len();
                    continue;
                }
            };
            let mut by_thread: HashMap<String, Offering> = offerings
                .into_iter()
                .filter_map(|o| o.counterparty_exchange_id.clone().map(|id| (id, o)))
                .collect();
            let ids: Vec<String> = by_thread.keys().cloned().collect();

            let threads = match self.client.threads(&counterparty, &ids).await {
                Ok(threads) => threads,
                Err(e) => {
                    warn!(counterparty = %counterparty.id, error = %e, "Failed to fetch threads");
                    report.errors += 1;
                    continue;
                }
            };

            for thread in threads {
                report.threads += 1;
                let Some(offering) = by_thread.remove(&thread.exchange_id) else {
                    debug!(exchange_id = %thread.exchange_id, "Thread for an unknown hop");
                    continue;
                };
                let Some(message) = thread
                    .messages
                    .into_iter()
                    .rev()
                    .find(|m| m.metadata.from == counterparty.id)
                else {
                    continue;
                };
                if let Err(e) = verify_message(&message, &counterparty.public_key) {
                    warn!(offering_id = %offering.id, error = %e, "Dropping message with a bad signature");
                    report.errors += 1;
                    continue;
                }
                match self.process(ThreadUpdate { offering, message }).await {
                    Ok(Some(_)) => report.applied += 1,
                    Ok(None) => {}
                    Err(_) => report.errors += 1,
                }
            }
        }
        Ok(report)
    }

    async fn apply_quote(
        &self,
        exchange: &Exchange,
        offering: Offering,
        quote: Quote,
    ) -> Result<Option<OfferingStatus>, ExchangeError> {
        let offering = match offering.status {
            OfferingStatus::Processing => {
                let update = OfferingUpdate {
                    quote_fee: Some(quote.fee),
                    quote_expires_at: from_unix(quote.expires_at),
                    ..Default::default()
                };
                let mut quoted = offering.clone();
                update.clone().apply(&mut quoted);
                quoted.status = OfferingStatus::AwaitingOrder;
                if !self
                    .transition(
                        exchange,
                        &offering,
                        OfferingStatus::Processing,
                        OfferingStatus::AwaitingOrder,
                        update,
                    )
                    .await?
                {
                    return Ok(None);
                }
                quoted
            }
            // An earlier order placement failed; try again.
            OfferingStatus::AwaitingOrder => offering,
            _ => return Ok(None),
        };
        self.place_order(exchange, &offering).await
    }

    async fn place_order(
        &self,
        exchange: &Exchange,
        offering: &Offering,
    ) -> Result<Option<OfferingStatus>, ExchangeError> {
        let Some(thread_id) = offering.counterparty_exchange_id.clone() else {
            return Err(ExchangeError::InvariantViolation(format!(
                "offering {} awaits an order without a counterparty exchange id",
                offering.id
            )));
        };
        let counterparty = self.counterparty(&offering.counterparty_id)?;
        let order = self.signer.sign_message(
            &counterparty.id,
            Some(thread_id.clone()),
            MessageBody::Order(Order {}),
        )?;
        // Claim the hop before sending so only one caller ever places the order.
        if !self
            .store
            .update_offering(
                offering.id,
                OfferingStatus::AwaitingOrder,
                OfferingStatus::OrderPlaced,
                OfferingUpdate::default(),
            )
            .await?
        {
            return Ok(None);
        }
        if let Err(e) = self.client.send_message(&counterparty, &thread_id, order).await {
            warn!(offering_id = %offering.id, error = %e, "Order placement failed, will retry");
            let released = self
                .store
                .update_offering(
                    offering.id,
                    OfferingStatus::OrderPlaced,
                    OfferingStatus::AwaitingOrder,
                    OfferingUpdate::default(),
                )
                .await?;
            return Ok(released.then_some(OfferingStatus::AwaitingOrder));
        }
        let mut placed = offering.clone();
        placed.status = OfferingStatus::OrderPlaced;
        self.notify_hop(exchange, placed);
        info!(offering_id = %offering.id, "Order placed");
        Ok(Some(OfferingStatus::OrderPlaced))
    }

    async fn apply_close(
        &self,
        exchange: &Exchange,
        offering: Offering,
        close: Close,
    ) -> Result<Option<OfferingStatus>, ExchangeError> {
        if close.success {
            if offering.status != OfferingStatus::OrderPlaced {
                return Err(ExchangeError::InvariantViolation(format!(
                    "successful close for offering {} in {:?}",
                    offering.id, offering.status
                )));
            }
            if !self
                .transition(
                    exchange,
                    &offering,
                    OfferingStatus::OrderPlaced,
                    OfferingStatus::Completed,
                    OfferingUpdate::default(),
                )
                .await?
            {
                return Ok(None);
            }
            info!(offering_id = %offering.id, hop = offering.hop, "Hop completed");
            self.process_exchange(exchange.id).await?;
            return Ok(Some(OfferingStatus::Completed));
        }

        if !offering.status.is_in_flight() {
            return Ok(None);
        }
        let reason = close
            .reason
            .unwrap_or_else(|| "closed by counterparty".to_owned());
        info!(offering_id = %offering.id, %reason, "Hop cancelled by counterparty");
        if self
            .cancel_offering(exchange, &offering, offering.status, reason)
            .await?
        {
            Ok(Some(OfferingStatus::Cancelled))
        } else {
            Ok(None)
        }
    }

    async fn apply_order_status(
        &self,
        exchange: &Exchange,
        offering: Offering,
        status: String,
    ) -> Result<Option<OfferingStatus>, ExchangeError> {
        if offering.order_status.as_deref() == Some(status.as_str()) {
            return Ok(None);
        }
        let update = OfferingUpdate {
            order_status: Some(status),
            ..Default::default()
        };
        let current = offering.status;
        if self
            .transition(exchange, &offering, current, current, update)
            .await?
        {
            Ok(Some(current))
        } else {
            Ok(None)
        }
    }

    // -----------------------------------------------------------------------
    // User operations
    // -----------------------------------------------------------------------

    /// Abandon a hop the user no longer wants, refunding what it holds.
    #[tracing::instrument(skip_all, fields(%user_id, %offering_id))]
    pub async fn close_offering(
        &self,
        user_id: Uuid,
        offering_id: Uuid,
        reason: Option<String>,
    ) -> Result<Offering, ExchangeError> {
        let unknown = || ExchangeError::Validation(format!("unknown offering {offering_id}"));
        let offering = self.store.offering(offering_id).await?.ok_or_else(unknown)?;
        let exchange = self
            .owned_exchange(user_id, offering.exchange_id)
            .await
            .map_err(|_| unknown())?;
        if !matches!(
            offering.status,
            OfferingStatus::Processing | OfferingStatus::AwaitingOrder
        ) {
            return Err(ExchangeError::Validation(format!(
                "offering {offering_id} cannot be closed in {:?}",
                offering.status
            )));
        }
        let Some(thread_id) = offering.counterparty_exchange_id.clone() else {
            return Err(ExchangeError::InvariantViolation(format!(
                "offering {offering_id} is in flight without a counterparty exchange id"
            )));
        };

        let reason = reason.unwrap_or_else(|| "closed by user".to_owned());
        let counterparty = self.counterparty(&offering.counterparty_id)?;
        let close = self.signer.sign_message(
            &counterparty.id,
            Some(thread_id.clone()),
            MessageBody::Close(Close {
                reason: Some(reason.clone()),
                success: false,
            }),
        )?;

        // Cancel locally first: once this lands no order can be placed on
        // the hop, so a lost close message leaves nothing in flight.
        let update = OfferingUpdate {
            cancellation_reason: Some(reason),
            ..Default::default()
        };
        if !self
            .transition(
                &exchange,
                &offering,
                offering.status,
                OfferingStatus::Cancelled,
                update,
            )
            .await?
        {
            return Err(ExchangeError::Validation(format!(
                "offering {offering_id} changed state, try again"
            )));
        }
        if let Err(e) = self
            .client
            .send_message(&counterparty, &thread_id, close)
            .await
        {
            warn!(error = %e, "Close message not delivered to counterparty");
        }
        self.store
            .update_exchange_status(exchange.id, &OPEN_EXCHANGE_STATUSES, ExchangeStatus::Cancelled)
            .await?;
        self.refund_cancelled_offering(&offering).await?;
        info!("Offering closed by user");

        self.store.offering(offering_id).await?.ok_or_else(|| {
            ExchangeError::InvariantViolation(format!("offering {offering_id} disappeared"))
        })
    }

    pub async fn rate_exchange(
        &self,
        user_id: Uuid,
        exchange_id: Uuid,
        rating: i16,
        comment: Option<String>,
    ) -> Result<(), ExchangeError> {
        if !(1..=5).contains(&rating) {
            return Err(ExchangeError::Validation(format!(
                "rating must be between 1 and 5, got {rating}"
            )));
        }
        let exchange = self.owned_exchange(user_id, exchange_id).await?;
        if !exchange.status.is_terminal() {
            return Err(ExchangeError::Validation(format!(
                "exchange {exchange_id} is still {}",
                exchange.status.as_str()
            )));
        }
        self.store
            .rate_exchange(exchange_id, rating, comment)
            .await?;
        Ok(())
    }

    pub async fn list_exchanges(
        &self,
        user_id: Uuid,
        page: Page,
    ) -> Result<Vec<Exchange>, ExchangeError> {
        Ok(self.store.user_exchanges(user_id, page).await?)
    }

    pub async fn exchange_details(
        &self,
        user_id: Uuid,
        exchange_id: Uuid,
    ) -> Result<ExchangeDetails, ExchangeError> {
        let exchange = self.owned_exchange(user_id, exchange_id).await?;
        let offerings = self.store.offerings(exchange_id).await?;
        Ok(ExchangeDetails {
            exchange,
            offerings,
        })
    }

    /// Periodic sweep: advance every open exchange and finish any hop
    /// refund that did not go through.
    pub async fn process_pending_exchanges(&self) -> Result<SweepReport, ExchangeError> {
        let mut report = SweepReport::default();
        let open = self
            .store
            .exchanges_with_status(&OPEN_EXCHANGE_STATUSES, SWEEP_BATCH)
            .await?;
        for exchange in open {
            match self.process_exchange(exchange.id).await {
                Ok(_) => report.processed += 1,
                Err(e) => {
                    warn!(exchange_id = %exchange.id, error = %e, "Failed to advance exchange");
                    report.errors += 1;
                }
            }
        }
        for offering in self.store.unrefunded_cancelled_offerings().await? {
            match self.refund_cancelled_offering(&offering).await {
                Ok(true) => report.refunded += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(offering_id = %offering.id, error = %e, "Failed to refund cancelled hop");
                    report.errors += 1;
                }
            }
        }
        Ok(report)
    }
}

impl Processor<ThreadUpdate> for ExchangeRouter {
    /// The hop's status after the message, if anything changed.
    type Output = Option<OfferingStatus>;
    type Error = ExchangeError;
    #[tracing::instrument(skip_all, err, name = "Exchange:ThreadUpdate", fields(offering_id = %input.offering.id))]
    async fn process(&self, input: ThreadUpdate) -> Result<Option<OfferingStatus>, ExchangeError> {
        let ThreadUpdate { offering, message } = input;
        let exchange = self.load_exchange(offering.exchange_id).await?;
        match message.body {
            MessageBody::Quote(quote) => self.apply_quote(&exchange, offering, quote).await,
            MessageBody::OrderStatus(update) => {
                self.apply_order_status(&exchange, offering, update.status)
                    .await
            }
            MessageBody::Close(close) => self.apply_close(&exchange, offering, close).await,
            MessageBody::Rfq(_) | MessageBody::Order(_) => {
                debug!(from = %message.metadata.from, "Ignoring platform-authored message");
                Ok(None)
            }
        }
    }
}
