use super::SettlementError;
use super::events::{CanonicalEvent, ChargeEvent, EventSource, TransferEvent};
use super::provider::{
    ChargeSession, ChargeSessionRequest, PaymentProvider, ProviderError, TransferInstruction,
    is_whole_minor_units,
};
use super::registry::ProviderRegistry;
use crate::config::{CurrencySettings, SettingsHandle, SettlementConfig};
use crate::entities::charge::ChargeRecord;
use crate::entities::revenue::{RevenueRecord, RevenueSource};
use crate::entities::transfer::{
    AccountDetails, ResponseLog, TransferRecord, TransferStatus, attempt_reference,
};
use crate::entities::wallet::{TransactionPurpose, TransactionStatus};
use crate::entities::{Currency, ProviderName};
use crate::events::{Notification, Notifier};
use crate::ledger::{LedgerError, MutationRequest, WalletLedger};
use crate::store::{RevenueLedger, SettlementStore, StoreError};
use crate::utils::time::now;
use kanau::processor::Processor;
use reqwest::header::HeaderMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Reject amounts a provider could not settle exactly.
pub(crate) fn check_settleable(amount: Decimal, fee: Decimal) -> Result<(), SettlementError> {
    if amount <= Decimal::ZERO {
        return Err(SettlementError::Validation(format!(
            "amount must be positive, got {amount}"
        )));
    }
    if fee < Decimal::ZERO {
        return Err(SettlementError::Validation(format!(
            "fee must not be negative, got {fee}"
        )));
    }
    for value in [amount, fee] {
        if !is_whole_minor_units(value) {
            return Err(SettlementError::InvalidAmount(format!(
                "{value} is finer than a minor unit"
            )));
        }
    }
    Ok(())
}

/// A payout request. `reference` is the root reference; retries derive
/// their own from it.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub user_id: Uuid,
    pub currency: Currency,
    pub amount: Decimal,
    pub fee: Decimal,
    pub reference: String,
    pub account: AccountDetails,
    pub narration: Option<String>,
}

/// Result of applying one [`CanonicalEvent`].
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    Transfer(TransferRecord),
    Charge(ChargeRecord),
    /// Not relevant to settlement, or about an object we never created.
    Ignored,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub checked: usize,
    pub settled: usize,
    pub still_pending: usize,
    pub refunded: usize,
    pub errors: usize,
}

pub struct SettlementPipeline {
    pub(super) ledger: Arc<WalletLedger>,
    pub(super) store: Arc<dyn SettlementStore>,
    revenue: Arc<dyn RevenueLedger>,
    pub(super) registry: ProviderRegistry,
    pub(super) settings: SettingsHandle<CurrencySettings>,
    config: SettlementConfig,
    notifier: Arc<dyn Notifier>,
}

impl SettlementPipeline {
    pub fn new(
        ledger: Arc<WalletLedger>,
        store: Arc<dyn SettlementStore>,
        revenue: Arc<dyn RevenueLedger>,
        registry: ProviderRegistry,
        settings: SettingsHandle<CurrencySettings>,
        config: SettlementConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            ledger,
            store,
            revenue,
            registry,
            settings,
            config,
            notifier,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    async fn reload(&self, id: Uuid) -> Result<TransferRecord, SettlementError> {
        self.store.transfer(id).await?.ok_or_else(|| {
            SettlementError::InvariantViolation(format!("transfer record {id} disappeared"))
        })
    }

    /// Pay out to an external account.
    ///
    /// Idempotent on `request.reference`: a successful payout is returned
    /// as-is, an in-flight one is re-polled, and a failed one is retried
    /// under a fresh attempt reference while the attempt budget lasts.
    #[tracing::instrument(skip_all, fields(user_id = %request.user_id, reference = %request.reference))]
    pub async fn transfer_to_account(
        &self,
        request: TransferRequest,
    ) -> Result<TransferRecord, SettlementError> {
        check_settleable(request.amount, request.fee)?;
        let provider = self.registry.for_currency(request.currency)?;
        let latest = self
            .store
            .latest_transfer_attempt(provider.name(), &request.reference)
            .await?;

        match latest {
            None => self.start_attempt(provider.as_ref(), &request, 1).await,
            Some(record) if record.status == TransferStatus::Successful => Ok(record),
            Some(record) if !record.status.is_terminal() => {
                self.refresh(provider.as_ref(), record).await
            }
            Some(record) => {
                if record.attempt >= self.config.max_transfer_attempts {
                    info!(attempt = record.attempt, "Transfer attempt budget exhausted");
                    return Ok(record);
                }
                match self
                    .start_attempt(provider.as_ref(), &request, record.attempt + 1)
                    .await
                {
                    Err(SettlementError::Ledger(LedgerError::InsufficientFunds { .. })) => {
                        info!(attempt = record.attempt + 1, "Cannot re-reserve funds for retry");
                        Ok(record)
                    }
                    other => other,
                }
            }
        }
    }

    async fn start_attempt(
        &self,
        provider: &dyn PaymentProvider,
        request: &TransferRequest,
        attempt: i32,
    ) -> Result<TransferRecord, SettlementError> {
        let reference = attempt_reference(&request.reference, attempt);
        let wallet = self.ledger.wallet(request.user_id, request.currency).await?;

        let reservation = MutationRequest::new(
            request.user_id,
            request.currency,
            request.amount,
            reference.clone(),
            TransactionPurpose::Withdrawal,
        )
        .with_fee(request.fee)
        .with_status(TransactionStatus::Pending)
        .with_description(format!("Withdrawal to {}", request.account.account_name))
        .with_note(request.narration.clone())
        .with_meta(serde_json::json!({
            "provider": provider.name(),
            "root_reference": request.reference,
            "attempt": attempt,
        }));
        match self.ledger.debit(reservation).await {
            Ok(_) => {}
            Err(LedgerError::DuplicateReference(_)) => {
                if let Some(existing) = self
                    .store
                    .transfer_by_reference(provider.name(), &reference)
                    .await?
                {
                    return Ok(existing);
                }
                if self
                    .ledger
                    .transaction(wallet.id, &refund_reference(&reference))
                    .await?
                    .is_some()
                {
                    return Err(SettlementError::Validation(format!(
                        "reservation {reference} was released, retry under a new reference"
                    )));
                }
                debug!(%reference, "Funds already reserved for this attempt");
            }
            Err(e) => return Err(e.into()),
        }

        let created_at = now();
        let record = TransferRecord {
            id: Uuid::now_v7(),
            user_id: request.user_id,
            wallet_id: wallet.id,
            provider: provider.name(),
            reference: reference.clone(),
            root_reference: request.reference.clone(),
            attempt,
            psp_transaction_id: None,
            amount: request.amount,
            fee: request.fee,
            currency: request.currency,
            status: TransferStatus::Pending,
            account: request.account.clone(),
            narration: request.narration.clone(),
            provider_response: Vec::new(),
            webhook_response: Vec::new(),
            refunded_at: None,
            created_at,
            updated_at: created_at,
        };
        match self.store.insert_transfer(&record).await {
            Ok(()) => {}
            Err(StoreError::DuplicateReference(_)) => {
                // Another caller created this attempt first and owns it.
                return self
                    .store
                    .transfer_by_reference(provider.name(), &reference)
                    .await?
                    .ok_or_else(|| {
                        SettlementError::InvariantViolation(format!(
                            "transfer {reference} reported as duplicate but not found"
                        ))
                    });
            }
            Err(e) => {
                error!(%reference, error = %e, "Failed to record payout, releasing reserved funds");
                self.release_reservation(request, wallet.id, &reference).await;
                return Err(e.into());
            }
        }

        info!(%reference, attempt, provider = %provider.name(), "Initiating payout");
        match provider
            .initiate_transfer(&TransferInstruction::from(&record))
            .await
        {
            Ok(outcome) => {
                self.apply_polled_status(
                    record,
                    outcome.status,
                    outcome.psp_transaction_id,
                    outcome.raw,
                )
                .await
            }
            Err(e) => {
                warn!(%reference, error = %e, "Payout initiation failed");
                self.apply_polled_status(
                    record,
                    TransferStatus::Failed,
                    None,
                    serde_json::json!({ "error": e.to_string() }),
                )
                .await
            }
        }
    }

    /// Return funds reserved for an attempt that never got a record.
    ///
    /// The credit is keyed by `refund_{reference}`; its presence also
    /// stops the attempt reference from being reused.
    async fn release_reservation(
        &self,
        request: &TransferRequest,
        wallet_id: Uuid,
        reference: &str,
    ) {
        let release = MutationRequest::new(
            request.user_id,
            request.currency,
            request.amount + request.fee,
            refund_reference(reference),
            TransactionPurpose::Refund,
        )
        .with_description(format!("Release of unrecorded withdrawal {reference}"))
        .with_meta(serde_json::json!({ "reference": reference }));
        match self.ledger.credit(release).await {
            Ok(_) | Err(LedgerError::DuplicateReference(_)) => {}
            Err(e) => {
                error!(%reference, error = %e, "Release of reserved funds failed");
                return;
            }
        }
        if let Err(e) = self
            .ledger
            .set_transaction_status(wallet_id, reference, TransactionStatus::Failed)
            .await
        {
            warn!(%reference, error = %e, "Could not mark released reservation as failed");
        }
    }

    /// Feed a status the provider reported directly through the same
    /// canonical-event path webhooks take.
    async fn apply_polled_status(
        &self,
        record: TransferRecord,
        status: TransferStatus,
        psp_transaction_id: Option<String>,
        payload: serde_json::Value,
    ) -> Result<TransferRecord, SettlementError> {
        let event = CanonicalEvent::Transfer(TransferEvent {
            provider: record.provider,
            reference: Some(record.reference.clone()),
            psp_transaction_id,
            status,
            payload,
            source: EventSource::Poll,
        });
        match self.process(event).await? {
            EventOutcome::Transfer(updated) => Ok(updated),
            _ => Err(SettlementError::InvariantViolation(format!(
                "transfer {} not found while applying a polled status",
                record.reference
            ))),
        }
    }

    /// Ask the provider for the current status and apply it.
    ///
    /// Provider failures are logged and leave the record unchanged, except
    /// for a `Pending` record the provider has never heard of: once it is
    /// older than `stale_pending_secs` it is failed (and refunded).
    pub(crate) async fn refresh(
        &self,
        provider: &dyn PaymentProvider,
        record: TransferRecord,
    ) -> Result<TransferRecord, SettlementError> {
        match provider.check_transfer_status(&record).await {
            Ok(outcome) => {
                self.apply_polled_status(
                    record,
                    outcome.status,
                    outcome.psp_transaction_id,
                    outcome.raw,
                )
                .await
            }
            Err(ProviderError::NotFound)
                if record.status == TransferStatus::Pending
                    && (now() - record.created_at).whole_seconds()
                        >= self.config.stale_pending_secs =>
            {
                warn!(reference = %record.reference, "Abandoned pending payout, failing it");
                self.apply_polled_status(
                    record,
                    TransferStatus::Failed,
                    None,
                    serde_json::json!({ "error": "not found at provider" }),
                )
                .await
            }
            Err(e) => {
                warn!(reference = %record.reference, error = %e, "Payout status check failed");
                Ok(record)
            }
        }
    }

    /// Move `record` forward to `next` and run the side effects of the
    /// transition exactly once.
    async fn apply_transfer_status(
        &self,
        record: TransferRecord,
        next: TransferStatus,
        psp_transaction_id: Option<&str>,
    ) -> Result<TransferRecord, SettlementError> {
        let mut current = record;
        loop {
            if !current.status.can_advance_to(next) {
                debug!(
                    reference = %current.reference,
                    current = %current.status,
                    reported = %next,
                    "Stale or duplicate status, not applied"
                );
                if current.status == TransferStatus::Failed && current.refunded_at.is_none() {
                    self.refund_failed_transfer(&current).await?;
                    return self.reload(current.id).await;
                }
                return Ok(current);
            }
            if self
                .store
                .update_transfer_status(current.id, current.status, next, psp_transaction_id)
                .await?
            {
                let updated = self.reload(current.id).await?;
                info!(reference = %updated.reference, from = %current.status, to = %next, "Transfer status advanced");
                self.on_transition(&updated).await?;
                return self.reload(updated.id).await;
            }
            // Lost the race; look at what won.
            current = self.reload(current.id).await?;
        }
    }

    async fn on_transition(&self, record: &TransferRecord) -> Result<(), SettlementError> {
        match record.status {
            TransferStatus::Pending => {}
            TransferStatus::Processing => {
                self.ledger
                    .set_transaction_status(
                        record.wallet_id,
                        &record.reference,
                        TransactionStatus::Processing,
                    )
                    .await?;
            }
            TransferStatus::Successful => {
                self.ledger
                    .set_transaction_status(
                        record.wallet_id,
                        &record.reference,
                        TransactionStatus::Successful,
                    )
                    .await?;
                if record.fee > Decimal::ZERO {
                    let revenue = RevenueRecord::new(
                        format!("rev_{}", record.reference),
                        record.fee,
                        record.currency,
                        RevenueSource::WalletWithdrawal,
                        serde_json::json!({ "transfer_id": record.id }),
                    );
                    if !self.revenue.record(&revenue).await? {
                        debug!(reference = %revenue.reference, "Revenue already recognized");
                    }
                }
                self.notify_settled(record);
            }
            TransferStatus::Failed => {
                self.refund_failed_transfer(record).await?;
                self.notify_settled(record);
            }
        }
        Ok(())
    }

    fn notify_settled(&self, record: &TransferRecord) {
        self.notifier.notify(Notification::WithdrawalSettled {
            user_id: record.user_id,
            transfer_id: record.id,
            reference: record.reference.clone(),
            status: record.status,
            amount: record.amount,
            currency: record.currency,
        });
    }

    /// Return `amount + fee` to the wallet. Safe to call repeatedly: the
    /// credit is keyed by `refund_{reference}`.
    pub(crate) async fn refund_failed_transfer(
        &self,
        record: &TransferRecord,
    ) -> Result<(), SettlementError> {
        let refund = MutationRequest::new(
            record.user_id,
            record.currency,
            record.reserved(),
            refund_reference(&record.reference),
            TransactionPurpose::Refund,
        )
        .with_description(format!("Refund for failed withdrawal {}", record.reference))
        .with_meta(serde_json::json!({
            "transfer_id": record.id,
            "reference": record.reference,
        }));
        match self.ledger.credit(refund).await {
            Ok(_) => {
                info!(reference = %record.reference, amount = %record.reserved(), "Failed payout refunded");
            }
            Err(LedgerError::DuplicateReference(_)) => {
                debug!(reference = %record.reference, "Refund already credited");
            }
            Err(e) => return Err(e.into()),
        }
        self.ledger
            .set_transaction_status(record.wallet_id, &record.reference, TransactionStatus::Failed)
            .await?;
        if self.store.mark_transfer_refunded(record.id).await? {
            self.notifier.notify(Notification::WithdrawalRefunded {
                user_id: record.user_id,
                reference: record.reference.clone(),
                amount: record.reserved(),
                currency: record.currency,
            });
        }
        Ok(())
    }

    async fn apply_transfer_event(
        &self,
        event: TransferEvent,
    ) -> Result<EventOutcome, SettlementError> {
        let by_reference = match &event.reference {
            Some(reference) => {
                self.store
                    .transfer_by_reference(event.provider, reference)
                    .await?
            }
            None => None,
        };
        let record = match (by_reference, &event.psp_transaction_id) {
            (Some(record), _) => Some(record),
            (None, Some(psp_id)) => self.store.transfer_by_psp_id(event.provider, psp_id).await?,
            (None, None) => None,
        };
        let Some(record) = record else {
            warn!(
                provider = %event.provider,
                reference = ?event.reference,
                psp_transaction_id = ?event.psp_transaction_id,
                "Status event for unknown transfer"
            );
            return Ok(EventOutcome::Ignored);
        };

        let log = match event.source {
            EventSource::Webhook => ResponseLog::Webhook,
            EventSource::Poll => ResponseLog::Provider,
        };
        self.store
            .append_transfer_response(record.id, log, event.payload)
            .await?;
        let updated = self
            .apply_transfer_status(record, event.status, event.psp_transaction_id.as_deref())
            .await?;
        Ok(EventOutcome::Transfer(updated))
    }

    async fn apply_charge_event(&self, event: ChargeEvent) -> Result<EventOutcome, SettlementError> {
        let created_at = now();
        let fresh = ChargeRecord {
            id: Uuid::now_v7(),
            provider: event.provider,
            reference: event.reference.clone(),
            user_id: event.user_id,
            amount: event.amount,
            currency: event.currency,
            channel: event.channel.clone(),
            status: TransferStatus::Pending,
            webhook_response: Vec::new(),
            created_at,
            updated_at: created_at,
        };
        let mut current = self.store.upsert_charge(&fresh).await?;
        self.store
            .append_charge_response(current.id, event.payload)
            .await?;

        while current.status.can_advance_to(event.status) {
            if self
                .store
                .update_charge_status(current.id, current.status, event.status)
                .await?
            {
                info!(reference = %current.reference, from = %current.status, to = %event.status, "Charge status advanced");
            }
            current = self.store.upsert_charge(&fresh).await?;
        }

        if current.status == TransferStatus::Successful {
            self.credit_charge(&current, event.user_id).await?;
        }
        Ok(EventOutcome::Charge(current))
    }

    /// Credit a successful charge once, keyed by its ledger reference.
    async fn credit_charge(
        &self,
        charge: &ChargeRecord,
        event_user: Option<Uuid>,
    ) -> Result<(), SettlementError> {
        let Some(user_id) = charge.user_id.or(event_user) else {
            error!(reference = %charge.reference, provider = %charge.provider, "Successful charge without a user, cannot credit");
            return Ok(());
        };
        let credit = MutationRequest::new(
            user_id,
            charge.currency,
            charge.amount,
            charge.ledger_reference(),
            TransactionPurpose::Deposit,
        )
        .with_description(format!("Deposit via {}", charge.provider))
        .with_meta(serde_json::json!({
            "charge_id": charge.id,
            "provider": charge.provider,
            "channel": charge.channel,
        }));
        match self.ledger.credit(credit).await {
            Ok(_) => Ok(()),
            Err(LedgerError::DuplicateReference(_)) => {
                debug!(reference = %charge.reference, "Charge already credited");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Verify, normalize and apply one webhook delivery.
    #[tracing::instrument(skip_all, fields(provider = %provider))]
    pub async fn handle_webhook(
        &self,
        provider: &str,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<EventOutcome, SettlementError> {
        let name: ProviderName = provider
            .parse()
            .map_err(|_| SettlementError::UnknownProvider(provider.to_owned()))?;
        let adapter = self.registry.provider(name)?;
        adapter
            .validate_webhook_signature(headers, body)
            .map_err(|e| {
                warn!(error = %e, "Rejected webhook");
                SettlementError::InvalidSignature
            })?;
        let Some(event) = adapter.transform_webhook(body)? else {
            debug!("Webhook not relevant to settlement");
            return Ok(EventOutcome::Ignored);
        };
        self.process(event).await
    }

    /// Re-poll every in-flight payout and finish refunds that were
    /// interrupted. One record's failure never stops the batch.
    pub async fn reconcile_transfers(&self) -> Result<ReconcileReport, SettlementError> {
        let mut report = ReconcileReport::default();

        let in_flight = self
            .store
            .in_flight_transfers(self.config.reconcile_batch)
            .await?;
        for record in in_flight {
            report.checked += 1;
            let Some(provider) = self.registry.get(record.provider) else {
                warn!(provider = %record.provider, reference = %record.reference, "Provider no longer configured");
                report.errors += 1;
                continue;
            };
            let reference = record.reference.clone();
            match self.refresh(provider.as_ref(), record).await {
                Ok(r) if r.status.is_terminal() => report.settled += 1,
                Ok(_) => report.still_pending += 1,
                Err(e) => {
                    error!(%reference, error = %e, "Failed to reconcile transfer");
                    report.errors += 1;
                }
            }
        }

        let unrefunded = self
            .store
            .unrefunded_failed_transfers(self.config.reconcile_batch)
            .await?;
        for record in unrefunded {
            match self.refund_failed_transfer(&record).await {
                Ok(()) => report.refunded += 1,
                Err(e) => {
                    error!(reference = %record.reference, error = %e, "Failed to refund transfer");
                    report.errors += 1;
                }
            }
        }

        Ok(report)
    }

    /// Resolve the account holder through the currency's provider.
    pub async fn verify_account(
        &self,
        currency: Currency,
        account: &AccountDetails,
    ) -> Result<AccountDetails, SettlementError> {
        let provider = self.registry.for_currency(currency)?;
        Ok(provider.verify_account(currency, account).await?)
    }

    /// Open a hosted payment page funding the user's wallet.
    pub async fn create_charge_session(
        &self,
        request: ChargeSessionRequest,
    ) -> Result<ChargeSession, SettlementError> {
        check_settleable(request.amount, Decimal::ZERO)?;
        self.ensure_funding_enabled(request.currency)?;
        let provider = self.registry.charge_provider()?;
        Ok(provider.create_charge_session(&request).await?)
    }
}

fn refund_reference(reference: &str) -> String {
    format!("refund_{reference}")
}

impl Processor<CanonicalEvent> for SettlementPipeline {
    type Output = EventOutcome;
    type Error = SettlementError;
    #[tracing::instrument(skip_all, err, name = "Settlement:CanonicalEvent")]
    async fn process(&self, input: CanonicalEvent) -> Result<EventOutcome, SettlementError> {
        match input {
            CanonicalEvent::Transfer(event) => self.apply_transfer_event(event).await,
            CanonicalEvent::Charge(event) => self.apply_charge_event(event).await,
        }
    }
}
