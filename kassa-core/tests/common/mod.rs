#![allow(dead_code)]

use async_trait::async_trait;
use kassa_core::config::{
    CurrencySettings, ExchangeConfig, LedgerConfig, SettingsHandle, SettlementConfig,
};
use kassa_core::entities::bank::{Bank, WalletAccount};
use kassa_core::entities::beneficiary::Beneficiary;
use kassa_core::entities::charge::ChargeRecord;
use kassa_core::entities::transfer::{
    AccountDetails, ResponseLog, TransferRecord, TransferStatus,
};
use kassa_core::entities::wallet::TransactionPurpose;
use kassa_core::entities::{Currency, ProviderName};
use kassa_core::events::{Notification, Notifier};
use kassa_core::exchange::{
    Counterparty, CounterpartyClient, CounterpartyDirectory, CounterpartyError, ExchangeRouter,
    OfferingCatalog,
};
use kassa_core::ledger::{MutationRequest, WalletLedger};
use kassa_core::settlement::{
    CanonicalEvent, EventSource, PaymentProvider, ProviderBank, ProviderError, ProviderRegistry,
    SettlementPipeline, TransferEvent, TransferInstruction, TransferOutcome, VirtualAccount,
    VirtualAccountRequest,
};
use kassa_core::store::{MemoryStore, SettlementStore, StoreError};
use kassa_sdk::objects::{
    Close, ExchangeThread, Message, MessageBody, MessageKind, OrderStatusUpdate,
    PublishedOffering, Quote,
};
use kassa_sdk::signature::ProtocolSigner;
use reqwest::header::HeaderMap;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub const PLATFORM_ID: &str = "kassa";
pub const FAKE_SIGNATURE_HEADER: &str = "x-fake-signature";

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn all(&self) -> Vec<Notification> {
        self.seen.lock().unwrap().clone()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.kind() == kind)
            .count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.seen.lock().unwrap().push(notification);
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

pub struct LedgerHarness {
    pub store: Arc<MemoryStore>,
    pub ledger: Arc<WalletLedger>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn ledger_harness() -> LedgerHarness {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let ledger = Arc::new(WalletLedger::new(
        store.clone(),
        LedgerConfig::default(),
        notifier.clone(),
    ));
    LedgerHarness {
        store,
        ledger,
        notifier,
    }
}

pub async fn fund(ledger: &WalletLedger, user_id: Uuid, currency: Currency, amount: Decimal) {
    ledger
        .credit(MutationRequest::new(
            user_id,
            currency,
            amount,
            format!("fund_{}", Uuid::now_v7()),
            TransactionPurpose::Deposit,
        ))
        .await
        .unwrap();
}

pub async fn balance(ledger: &WalletLedger, user_id: Uuid, currency: Currency) -> Decimal {
    ledger.wallet(user_id, currency).await.unwrap().available_balance
}

// ---------------------------------------------------------------------------
// Payment provider
// ---------------------------------------------------------------------------

/// Provider whose responses are scripted by the test.
///
/// `initiate_transfer` pops the next scripted status (`None` scripts an
/// API failure) and defaults to `Processing`. `check_transfer_status`
/// answers from the per-reference status table, `NotFound` otherwise.
pub struct FakeProvider {
    name: ProviderName,
    initiate: Mutex<VecDeque<Option<TransferStatus>>>,
    statuses: Mutex<HashMap<String, TransferStatus>>,
    pub initiated: Mutex<Vec<TransferInstruction>>,
    pub banks: Mutex<Vec<ProviderBank>>,
    pub opened_accounts: AtomicUsize,
}

impl FakeProvider {
    pub fn new(name: ProviderName) -> Self {
        Self {
            name,
            initiate: Mutex::new(VecDeque::new()),
            statuses: Mutex::new(HashMap::new()),
            initiated: Mutex::new(Vec::new()),
            banks: Mutex::new(Vec::new()),
            opened_accounts: AtomicUsize::new(0),
        }
    }

    pub fn list_bank(&self, name: &str, code: &str) {
        self.banks.lock().unwrap().push(ProviderBank {
            name: name.into(),
            code: code.into(),
        });
    }

    pub fn script_initiate(&self, outcome: Option<TransferStatus>) {
        self.initiate.lock().unwrap().push_back(outcome);
    }

    pub fn set_status(&self, reference: &str, status: TransferStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(reference.to_owned(), status);
    }

    pub fn initiated_references(&self) -> Vec<String> {
        self.initiated
            .lock()
            .unwrap()
            .iter()
            .map(|i| i.reference.clone())
            .collect()
    }

    pub fn webhook_body(reference: &str, status: TransferStatus) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "reference": reference,
            "status": status,
        }))
        .unwrap()
    }

    pub fn signed_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(FAKE_SIGNATURE_HEADER, "valid".parse().unwrap());
        headers
    }
}

#[async_trait]
impl PaymentProvider for FakeProvider {
    fn name(&self) -> ProviderName {
        self.name
    }

    async fn initiate_transfer(
        &self,
        instruction: &TransferInstruction,
    ) -> Result<TransferOutcome, ProviderError> {
        self.initiated.lock().unwrap().push(instruction.clone());
        let scripted = self
            .initiate
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Some(TransferStatus::Processing));
        match scripted {
            Some(status) => Ok(TransferOutcome {
                psp_transaction_id: Some(format!("psp_{}", instruction.reference)),
                status,
                raw: serde_json::json!({ "status": status }),
            }),
            None => Err(ProviderError::Api {
                status: 500,
                message: "scripted failure".into(),
            }),
        }
    }

    async fn check_transfer_status(
        &self,
        record: &TransferRecord,
    ) -> Result<TransferOutcome, ProviderError> {
        let status = self
            .statuses
            .lock()
            .unwrap()
            .get(&record.reference)
            .copied()
            .ok_or(ProviderError::NotFound)?;
        Ok(TransferOutcome {
            psp_transaction_id: record.psp_transaction_id.clone(),
            status,
            raw: serde_json::json!({ "status": status }),
        })
    }

    async fn list_banks(&self, _currency: Currency) -> Result<Vec<ProviderBank>, ProviderError> {
        Ok(self.banks.lock().unwrap().clone())
    }

    async fn create_virtual_account(
        &self,
        request: &VirtualAccountRequest,
    ) -> Result<VirtualAccount, ProviderError> {
        let n = self.opened_accounts.fetch_add(1, Ordering::SeqCst);
        Ok(VirtualAccount {
            account_number: format!("90000000{n:02}"),
            account_name: request.name.clone(),
            bank_name: Some("Wema Bank".into()),
            provider_customer_id: Some(format!("CUS_{n}")),
            raw: serde_json::json!({ "customer": n }),
        })
    }

    fn validate_webhook_signature(
        &self,
        headers: &HeaderMap,
        _body: &[u8],
    ) -> Result<(), ProviderError> {
        match headers
            .get(FAKE_SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            Some("valid") => Ok(()),
            _ => Err(ProviderError::InvalidSignature),
        }
    }

    fn transform_webhook(&self, body: &[u8]) -> Result<Option<CanonicalEvent>, ProviderError> {
        let payload: serde_json::Value = serde_json::from_slice(body)?;
        let status: TransferStatus = serde_json::from_value(payload["status"].clone())?;
        Ok(Some(CanonicalEvent::Transfer(TransferEvent {
            provider: self.name,
            reference: payload["reference"].as_str().map(str::to_owned),
            psp_transaction_id: None,
            status,
            payload,
            source: EventSource::Webhook,
        })))
    }
}

pub struct SettlementHarness {
    pub store: Arc<MemoryStore>,
    pub ledger: Arc<WalletLedger>,
    pub notifier: Arc<RecordingNotifier>,
    pub provider: Arc<FakeProvider>,
    pub settings: SettingsHandle<CurrencySettings>,
    pub pipeline: SettlementPipeline,
}

pub fn settlement_harness(config: SettlementConfig) -> SettlementHarness {
    settlement_harness_over(config, |store| store as Arc<dyn SettlementStore>)
}

/// Like [`settlement_harness`], with the pipeline's settlement store
/// wrapped by `wrap`.
pub fn settlement_harness_over(
    config: SettlementConfig,
    wrap: impl FnOnce(Arc<MemoryStore>) -> Arc<dyn SettlementStore>,
) -> SettlementHarness {
    let LedgerHarness {
        store,
        ledger,
        notifier,
    } = ledger_harness();
    let provider = Arc::new(FakeProvider::new(ProviderName::Paystack));
    let registry = ProviderRegistry::new().register(provider.clone(), [Currency::Ngn]);
    let settings = SettingsHandle::new(CurrencySettings::default());
    let pipeline = SettlementPipeline::new(
        ledger.clone(),
        wrap(store.clone()),
        store.clone(),
        registry,
        settings.clone(),
        config,
        notifier.clone(),
    );
    SettlementHarness {
        store,
        ledger,
        notifier,
        provider,
        settings,
        pipeline,
    }
}

/// Delegates to a [`MemoryStore`], but fails `insert_transfer` while
/// `failing` is set.
pub struct FailingInserts {
    inner: Arc<MemoryStore>,
    pub failing: AtomicBool,
}

impl FailingInserts {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl SettlementStore for FailingInserts {
    async fn insert_transfer(&self, record: &TransferRecord) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.insert_transfer(record).await
    }

    async fn transfer(&self, id: Uuid) -> Result<Option<TransferRecord>, StoreError> {
        self.inner.transfer(id).await
    }

    async fn transfer_by_reference(
        &self,
        provider: ProviderName,
        reference: &str,
    ) -> Result<Option<TransferRecord>, StoreError> {
        self.inner.transfer_by_reference(provider, reference).await
    }

    async fn transfer_by_psp_id(
        &self,
        provider: ProviderName,
        psp_transaction_id: &str,
    ) -> Result<Option<TransferRecord>, StoreError> {
        self.inner
            .transfer_by_psp_id(provider, psp_transaction_id)
            .await
    }

    async fn latest_transfer_attempt(
        &self,
        provider: ProviderName,
        root_reference: &str,
    ) -> Result<Option<TransferRecord>, StoreError> {
        self.inner
            .latest_transfer_attempt(provider, root_reference)
            .await
    }

    async fn update_transfer_status(
        &self,
        id: Uuid,
        expected: TransferStatus,
        next: TransferStatus,
        psp_transaction_id: Option<&str>,
    ) -> Result<bool, StoreError> {
        self.inner
            .update_transfer_status(id, expected, next, psp_transaction_id)
            .await
    }

    async fn append_transfer_response(
        &self,
        id: Uuid,
        log: ResponseLog,
        payload: serde_json::Value,
    ) -> Result<(), StoreError> {
        self.inner.append_transfer_response(id, log, payload).await
    }

    async fn mark_transfer_refunded(&self, id: Uuid) -> Result<bool, StoreError> {
        self.inner.mark_transfer_refunded(id).await
    }

    async fn in_flight_transfers(&self, limit: i64) -> Result<Vec<TransferRecord>, StoreError> {
        self.inner.in_flight_transfers(limit).await
    }

    async fn unrefunded_failed_transfers(
        &self,
        limit: i64,
    ) -> Result<Vec<TransferRecord>, StoreError> {
        self.inner.unrefunded_failed_transfers(limit).await
    }

    async fn upsert_charge(&self, charge: &ChargeRecord) -> Result<ChargeRecord, StoreError> {
        self.inner.upsert_charge(charge).await
    }

    async fn update_charge_status(
        &self,
        id: Uuid,
        expected: TransferStatus,
        next: TransferStatus,
    ) -> Result<bool, StoreError> {
        self.inner.update_charge_status(id, expected, next).await
    }

    async fn append_charge_response(
        &self,
        id: Uuid,
        payload: serde_json::Value,
    ) -> Result<(), StoreError> {
        self.inner.append_charge_response(id, payload).await
    }

    async fn upsert_beneficiary(
        &self,
        beneficiary: &Beneficiary,
    ) -> Result<Beneficiary, StoreError> {
        self.inner.upsert_beneficiary(beneficiary).await
    }

    async fn beneficiary(
        &self,
        user_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Beneficiary>, StoreError> {
        self.inner.beneficiary(user_id, id).await
    }

    async fn beneficiaries(&self, user_id: Uuid) -> Result<Vec<Beneficiary>, StoreError> {
        self.inner.beneficiaries(user_id).await
    }

    async fn delete_beneficiary(&self, user_id: Uuid, id: Uuid) -> Result<bool, StoreError> {
        self.inner.delete_beneficiary(user_id, id).await
    }

    async fn banks(&self, currency: Option<Currency>) -> Result<Vec<Bank>, StoreError> {
        self.inner.banks(currency).await
    }

    async fn bank(&self, id: Uuid) -> Result<Option<Bank>, StoreError> {
        self.inner.bank(id).await
    }

    async fn upsert_bank(&self, bank: &Bank) -> Result<Bank, StoreError> {
        self.inner.upsert_bank(bank).await
    }

    async fn wallet_account(
        &self,
        user_id: Uuid,
        currency: Currency,
    ) -> Result<Option<WalletAccount>, StoreError> {
        self.inner.wallet_account(user_id, currency).await
    }

    async fn wallet_accounts(&self, user_id: Uuid) -> Result<Vec<WalletAccount>, StoreError> {
        self.inner.wallet_accounts(user_id).await
    }

    async fn insert_wallet_account(
        &self,
        account: &WalletAccount,
    ) -> Result<WalletAccount, StoreError> {
        self.inner.insert_wallet_account(account).await
    }
}

pub fn account() -> AccountDetails {
    AccountDetails {
        account_number: "0123456789".into(),
        account_name: "Ada Obi".into(),
        bank_code: Some("058".into()),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Counterparties
// ---------------------------------------------------------------------------

struct Desk {
    signer: ProtocolSigner,
    offerings: Vec<PublishedOffering>,
}

/// In-process counterparties speaking the signed exchange protocol.
///
/// Each desk signs its own messages; threads are appended to by both the
/// platform (through the client trait) and the test (through the
/// `quote`/`order_status`/`close` helpers).
#[derive(Default)]
pub struct FakeCounterparties {
    desks: HashMap<String, Desk>,
    threads: Mutex<HashMap<String, (String, Vec<Message>)>>,
    next_id: AtomicUsize,
    pub reject_rfqs: AtomicBool,
    pub fail_sends: AtomicBool,
}

impl FakeCounterparties {
    pub fn with_desk(mut self, id: &str, offerings: Vec<PublishedOffering>) -> Self {
        let pkcs8 = ProtocolSigner::generate_pkcs8().unwrap();
        let signer = ProtocolSigner::from_pkcs8(id, &pkcs8).unwrap();
        self.desks
            .insert(id.to_owned(), Desk { signer, offerings });
        self
    }

    pub fn directory(&self) -> CounterpartyDirectory {
        CounterpartyDirectory::new(self.desks.iter().map(|(id, desk)| Counterparty {
            id: id.clone(),
            name: id.clone(),
            endpoint: url::Url::parse(&format!("https://{id}.example/")).unwrap(),
            public_key: desk.signer.public_key().to_vec(),
        }))
    }

    /// Counterparty exchange ids, in creation order, opened on `desk`.
    pub fn thread_ids(&self, desk: &str) -> Vec<String> {
        let threads = self.threads.lock().unwrap();
        let mut ids: Vec<String> = threads
            .iter()
            .filter(|(_, (owner, _))| owner == desk)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort_by_key(|id| {
            id.trim_start_matches("cpx_")
                .parse::<usize>()
                .unwrap_or_default()
        });
        ids
    }

    pub fn kinds(&self, exchange_id: &str) -> Vec<MessageKind> {
        self.threads.lock().unwrap()[exchange_id]
            .1
            .iter()
            .map(Message::kind)
            .collect()
    }

    fn reply(&self, exchange_id: &str, body: MessageBody) {
        let mut threads = self.threads.lock().unwrap();
        let (owner, messages) = threads.get_mut(exchange_id).unwrap();
        let message = self.desks[owner.as_str()]
            .signer
            .sign_message(PLATFORM_ID, Some(exchange_id.to_owned()), body)
            .unwrap();
        messages.push(message);
    }

    pub fn quote(&self, exchange_id: &str, payin: Decimal, payout: Decimal) {
        self.reply(exchange_id, quote_body(payin, payout));
    }

    /// A quote in the desk's name, signed with a key nobody published.
    pub fn forged_quote(&self, exchange_id: &str, payin: Decimal, payout: Decimal) {
        let mut threads = self.threads.lock().unwrap();
        let (owner, messages) = threads.get_mut(exchange_id).unwrap();
        let pkcs8 = ProtocolSigner::generate_pkcs8().unwrap();
        let impostor = ProtocolSigner::from_pkcs8(owner.clone(), &pkcs8).unwrap();
        let message = impostor
            .sign_message(PLATFORM_ID, Some(exchange_id.to_owned()), quote_body(payin, payout))
            .unwrap();
        messages.push(message);
    }

    /// A genuine quote with its signature stripped.
    pub fn unsigned_quote(&self, exchange_id: &str, payin: Decimal, payout: Decimal) {
        let mut threads = self.threads.lock().unwrap();
        let (owner, messages) = threads.get_mut(exchange_id).unwrap();
        let mut message = self.desks[owner.as_str()]
            .signer
            .sign_message(PLATFORM_ID, Some(exchange_id.to_owned()), quote_body(payin, payout))
            .unwrap();
        message.signature = String::new();
        messages.push(message);
    }

    pub fn order_status(&self, exchange_id: &str, status: &str) {
        self.reply(
            exchange_id,
            MessageBody::OrderStatus(OrderStatusUpdate {
                status: status.into(),
            }),
        );
    }

    pub fn close(&self, exchange_id: &str, success: bool) {
        self.reply(
            exchange_id,
            MessageBody::Close(Close {
                reason: (!success).then(|| "no liquidity".to_owned()),
                success,
            }),
        );
    }
}

#[async_trait]
impl CounterpartyClient for FakeCounterparties {
    async fn offerings(
        &self,
        counterparty: &Counterparty,
    ) -> Result<Vec<PublishedOffering>, CounterpartyError> {
        Ok(self.desks[counterparty.id.as_str()].offerings.clone())
    }

    async fn send_rfq(
        &self,
        counterparty: &Counterparty,
        rfq: Message,
    ) -> Result<String, CounterpartyError> {
        if self.reject_rfqs.load(Ordering::SeqCst) {
            return Err(CounterpartyError::Rejected {
                status: 422,
                body: "offering withdrawn".into(),
            });
        }
        let id = format!("cpx_{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.threads
            .lock()
            .unwrap()
            .insert(id.clone(), (counterparty.id.clone(), vec![rfq]));
        Ok(id)
    }

    async fn send_message(
        &self,
        _counterparty: &Counterparty,
        exchange_id: &str,
        message: Message,
    ) -> Result<(), CounterpartyError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(CounterpartyError::Rejected {
                status: 503,
                body: "desk unavailable".into(),
            });
        }
        let mut threads = self.threads.lock().unwrap();
        let (_, messages) = threads
            .get_mut(exchange_id)
            .ok_or_else(|| CounterpartyError::Rejected {
                status: 404,
                body: format!("unknown exchange {exchange_id}"),
            })?;
        messages.push(message);
        Ok(())
    }

    async fn threads(
        &self,
        counterparty: &Counterparty,
        exchange_ids: &[String],
    ) -> Result<Vec<ExchangeThread>, CounterpartyError> {
        let threads = self.threads.lock().unwrap();
        Ok(exchange_ids
            .iter()
            .filter_map(|id| {
                let (owner, messages) = threads.get(id)?;
                (owner == &counterparty.id).then(|| ExchangeThread {
                    exchange_id: id.clone(),
                    messages: messages.clone(),
                })
            })
            .collect())
    }
}

fn quote_body(payin: Decimal, payout: Decimal) -> MessageBody {
    MessageBody::Quote(Quote {
        payin_amount: payin,
        payout_amount: payout,
        fee: Decimal::ONE,
        expires_at: time::OffsetDateTime::now_utc().unix_timestamp() + 600,
    })
}

pub fn published(id: &str, from: &str, to: &str, rate: Decimal) -> PublishedOffering {
    PublishedOffering {
        id: id.into(),
        payin_currency: from.into(),
        payout_currency: to.into(),
        rate,
        fee: Decimal::ZERO,
        settlement_secs: 60,
        description: None,
    }
}

pub struct ExchangeHarness {
    pub store: Arc<MemoryStore>,
    pub ledger: Arc<WalletLedger>,
    pub notifier: Arc<RecordingNotifier>,
    pub counterparties: Arc<FakeCounterparties>,
    pub router: ExchangeRouter,
}

pub fn exchange_harness(counterparties: FakeCounterparties) -> ExchangeHarness {
    let LedgerHarness {
        store,
        ledger,
        notifier,
    } = ledger_harness();
    let counterparties = Arc::new(counterparties);
    let catalog = Arc::new(OfferingCatalog::new(
        counterparties.directory(),
        counterparties.clone(),
        ExchangeConfig::default().offering_cache_ttl(),
    ));
    let pkcs8 = ProtocolSigner::generate_pkcs8().unwrap();
    let signer = Arc::new(ProtocolSigner::from_pkcs8(PLATFORM_ID, &pkcs8).unwrap());
    let router = ExchangeRouter::new(
        ledger.clone(),
        store.clone(),
        store.clone(),
        catalog,
        counterparties.clone(),
        signer,
        SettingsHandle::new(CurrencySettings::default()),
        notifier.clone(),
    );
    ExchangeHarness {
        store,
        ledger,
        notifier,
        counterparties,
        router,
    }
}
