//! Paystack adapter (NGN, GHS, KES, ZAR payouts and card/bank charges).

use crate::config::PaystackConfig;
use crate::entities::transfer::{AccountDetails, TransferRecord, TransferStatus};
use crate::entities::{Currency, ProviderName};
use crate::settlement::events::{CanonicalEvent, ChargeEvent, EventSource, TransferEvent};
use crate::settlement::provider::{
    ChargeSession, ChargeSessionRequest, PaymentProvider, ProviderBank, ProviderError,
    TransferInstruction, TransferOutcome, VirtualAccount, VirtualAccountRequest, from_minor_units,
    header_str, http_client, read_json, to_minor_units,
};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use ring::hmac;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::warn;
use url::Url;
use uuid::Uuid;

const DEFAULT_BASE_URL: &str = "https://api.paystack.co/";
const SIGNATURE_HEADER: &str = "x-paystack-signature";
const PREFERRED_BANK: &str = "wema-bank";

pub struct PaystackProvider {
    base_url: Url,
    secret_key: String,
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ResolvedAccount {
    account_number: String,
    account_name: String,
}

#[derive(Debug, Deserialize)]
struct Recipient {
    recipient_code: String,
}

#[derive(Debug, Deserialize)]
struct TransferData {
    status: String,
    #[serde(default)]
    transfer_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InitializedCharge {
    authorization_url: String,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct ListedBank {
    name: String,
    code: String,
    #[serde(default = "listed_bank_active")]
    active: bool,
}

fn listed_bank_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct Customer {
    customer_code: String,
}

#[derive(Debug, Deserialize)]
struct DedicatedAccount {
    account_number: String,
    account_name: String,
    #[serde(default)]
    bank: Option<DedicatedBank>,
}

#[derive(Debug, Deserialize)]
struct DedicatedBank {
    name: String,
}

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    event: String,
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WebhookTransfer {
    reference: String,
    status: String,
    #[serde(default)]
    transfer_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookCharge {
    reference: String,
    status: String,
    amount: i64,
    currency: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    metadata: serde_json::Value,
}

impl PaystackProvider {
    pub fn new(config: &PaystackConfig) -> Result<Self, ProviderError> {
        let base_url = match &config.base_url {
            Some(url) => url.clone(),
            None => Url::parse(DEFAULT_BASE_URL).map_err(|e| ProviderError::Config(e.to_string()))?,
        };
        Ok(Self {
            base_url,
            secret_key: config.secret_key.clone(),
            http_client: http_client(),
        })
    }

    fn url(&self, path: &str) -> Result<Url, ProviderError> {
        self.base_url
            .join(path)
            .map_err(|e| ProviderError::Config(e.to_string()))
    }

    /// Send and unwrap Paystack's `{status, message, data}` envelope.
    async fn call<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<(T, serde_json::Value), ProviderError> {
        let response = request.bearer_auth(&self.secret_key).send().await?;
        let raw = read_json(response).await?;
        let envelope: Envelope<serde_json::Value> = serde_json::from_value(raw.clone())?;
        if !envelope.status {
            return Err(ProviderError::Api {
                status: 200,
                message: envelope.message,
            });
        }
        let data = envelope.data.unwrap_or(serde_json::Value::Null);
        Ok((serde_json::from_value(data.clone())?, data))
    }

    pub fn map_status(status: &str) -> TransferStatus {
        match status {
            "success" => TransferStatus::Successful,
            "failed" | "reversed" | "rejected" | "abandoned" => TransferStatus::Failed,
            _ => TransferStatus::Processing,
        }
    }

    async fn recipient_code(
        &self,
        instruction: &TransferInstruction,
    ) -> Result<String, ProviderError> {
        let bank_code = instruction.account.bank_code.as_deref().ok_or_else(|| {
            ProviderError::InvalidRequest("bank code is required for Paystack payouts".into())
        })?;
        let (recipient, _): (Recipient, _) = self
            .call(
                self.http_client
                    .post(self.url("transferrecipient")?)
                    .json(&serde_json::json!({
                        "type": "nuban",
                        "name": instruction.account.account_name,
                        "account_number": instruction.account.account_number,
                        "bank_code": bank_code,
                        "currency": instruction.currency.code(),
                    })),
            )
            .await?;
        Ok(recipient.recipient_code)
    }
}

#[async_trait]
impl PaymentProvider for PaystackProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Paystack
    }

    async fn verify_account(
        &self,
        _currency: Currency,
        account: &AccountDetails,
    ) -> Result<AccountDetails, ProviderError> {
        let bank_code = account.bank_code.as_deref().ok_or_else(|| {
            ProviderError::InvalidRequest("bank code is required to resolve an account".into())
        })?;
        let (resolved, _): (ResolvedAccount, _) = self
            .call(self.http_client.get(self.url("bank/resolve")?).query(&[
                ("account_number", account.account_number.as_str()),
                ("bank_code", bank_code),
            ]))
            .await?;
        Ok(AccountDetails {
            account_number: resolved.account_number,
            account_name: resolved.account_name,
            ..account.clone()
        })
    }

    async fn initiate_transfer(
        &self,
        instruction: &TransferInstruction,
    ) -> Result<TransferOutcome, ProviderError> {
        let recipient = self.recipient_code(instruction).await?;
        let (data, raw): (TransferData, _) = self
            .call(
                self.http_client
                    .post(self.url("transfer")?)
                    .json(&serde_json::json!({
                        "source": "balance",
                        "amount": to_minor_units(instruction.amount)?,
                        "reference": instruction.reference,
                        "recipient": recipient,
                        "reason": instruction.narration,
                        "currency": instruction.currency.code(),
                        "metadata": { "record_id": instruction.record_id },
                    })),
            )
            .await?;
        Ok(TransferOutcome {
            psp_transaction_id: data.transfer_code,
            status: Self::map_status(&data.status),
            raw,
        })
    }

    async fn check_transfer_status(
        &self,
        record: &TransferRecord,
    ) -> Result<TransferOutcome, ProviderError> {
        let path = format!("transfer/verify/{}", record.reference);
        let (data, raw): (TransferData, _) =
            self.call(self.http_client.get(self.url(&path)?)).await?;
        Ok(TransferOutcome {
            psp_transaction_id: data.transfer_code,
            status: Self::map_status(&data.status),
            raw,
        })
    }

    async fn create_charge_session(
        &self,
        request: &ChargeSessionRequest,
    ) -> Result<ChargeSession, ProviderError> {
        let email = request.email.as_deref().ok_or_else(|| {
            ProviderError::InvalidRequest("email is required for Paystack charges".into())
        })?;
        let (data, _): (InitializedCharge, _) = self
            .call(
                self.http_client
                    .post(self.url("transaction/initialize")?)
                    .json(&serde_json::json!({
                        "email": email,
                        "amount": to_minor_units(request.amount)?,
                        "currency": request.currency.code(),
                        "metadata": { "user_id": request.user_id },
                    })),
            )
            .await?;
        Ok(ChargeSession {
            provider: ProviderName::Paystack,
            session_id: data.reference,
            checkout_url: Some(data.authorization_url),
        })
    }

    async fn list_banks(&self, currency: Currency) -> Result<Vec<ProviderBank>, ProviderError> {
        let (banks, _): (Vec<ListedBank>, _) = self
            .call(
                self.http_client
                    .get(self.url("bank")?)
                    .query(&[("currency", currency.code()), ("perPage", "100")]),
            )
            .await?;
        Ok(banks
            .into_iter()
            .filter(|b| b.active)
            .map(|b| ProviderBank {
                name: b.name,
                code: b.code,
            })
            .collect())
    }

    async fn create_virtual_account(
        &self,
        request: &VirtualAccountRequest,
    ) -> Result<VirtualAccount, ProviderError> {
        let mut names = request.name.split_whitespace();
        let first_name = names.next().unwrap_or_default();
        let last_name = names.next_back().unwrap_or(first_name);
        let (customer, _): (Customer, _) = self
            .call(
                self.http_client
                    .post(self.url("customer")?)
                    .json(&serde_json::json!({
                        "email": request.email,
                        "first_name": first_name,
                        "last_name": last_name,
                        "phone": request.phone,
                        "metadata": { "user_id": request.user_id },
                    })),
            )
            .await?;
        let (account, raw): (DedicatedAccount, _) = self
            .call(
                self.http_client
                    .post(self.url("dedicated_account")?)
                    .json(&serde_json::json!({
                        "customer": customer.customer_code,
                        "preferred_bank": PREFERRED_BANK,
                    })),
            )
            .await?;
        Ok(VirtualAccount {
            account_number: account.account_number,
            account_name: account.account_name,
            bank_name: account.bank.map(|b| b.name),
            provider_customer_id: Some(customer.customer_code),
            raw,
        })
    }

    fn validate_webhook_signature(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<(), ProviderError> {
        let signature = header_str(headers, SIGNATURE_HEADER)
            .and_then(|s| hex::decode(s.trim()).ok())
            .ok_or(ProviderError::InvalidSignature)?;
        let key = hmac::Key::new(hmac::HMAC_SHA512, self.secret_key.as_bytes());
        hmac::verify(&key, body, &signature).map_err(|_| ProviderError::InvalidSignature)
    }

    fn transform_webhook(&self, body: &[u8]) -> Result<Option<CanonicalEvent>, ProviderError> {
        let envelope: WebhookEnvelope = serde_json::from_slice(body)?;
        let payload: serde_json::Value = serde_json::from_slice(body)?;
        match envelope.event.as_str() {
            "transfer.success" | "transfer.failed" | "transfer.reversed" => {
                let data: WebhookTransfer = serde_json::from_value(envelope.data)?;
                let status = match envelope.event.as_str() {
                    "transfer.success" => TransferStatus::Successful,
                    _ => TransferStatus::Failed,
                };
                if Self::map_status(&data.status) != status {
                    warn!(event = %envelope.event, status = %data.status, "Paystack event and data status disagree, using event");
                }
                Ok(Some(CanonicalEvent::Transfer(TransferEvent {
                    provider: ProviderName::Paystack,
                    reference: Some(data.reference),
                    psp_transaction_id: data.transfer_code,
                    status,
                    payload,
                    source: EventSource::Webhook,
                })))
            }
            "charge.success" => {
                let data: WebhookCharge = serde_json::from_value(envelope.data)?;
                let Ok(currency) = data.currency.parse::<Currency>() else {
                    warn!(currency = %data.currency, reference = %data.reference, "Ignoring charge in unsupported currency");
                    return Ok(None);
                };
                let user_id = data
                    .metadata
                    .get("user_id")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse::<Uuid>().ok());
                Ok(Some(CanonicalEvent::Charge(ChargeEvent {
                    provider: ProviderName::Paystack,
                    reference: data.reference,
                    amount: from_minor_units(data.amount),
                    currency,
                    channel: data.channel,
                    status: Self::map_status(&data.status),
                    user_id,
                    payload,
                })))
            }
            _ => Ok(None),
        }
    }
}
