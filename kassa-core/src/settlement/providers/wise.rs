//! Wise adapter (USD, EUR, GBP, AUD, MXN payouts).
//!
//! A payout is four calls: quote, recipient account, transfer, then funding
//! the transfer from the profile's balance. Wise keys transfers by its own
//! numeric id, so status updates arrive without our reference and are
//! matched on `psp_transaction_id`.

use crate::config::WiseConfig;
use crate::entities::transfer::{TransferRecord, TransferStatus};
use crate::entities::{Currency, ProviderName};
use crate::settlement::events::{CanonicalEvent, EventSource, TransferEvent};
use crate::settlement::provider::{
    PaymentProvider, ProviderError, TransferInstruction, TransferOutcome, header_str,
    http_client, json_number, read_json,
};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use ring::signature::{RSA_PKCS1_2048_8192_SHA256, UnparsedPublicKey};
use serde::Deserialize;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://api.transferwise.com/";
const SIGNATURE_HEADER: &str = "x-signature-sha256";

pub struct WiseProvider {
    base_url: Url,
    api_token: String,
    profile_id: i64,
    webhook_public_key: Vec<u8>,
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct IdOnly<T> {
    id: T,
}

#[derive(Debug, Deserialize)]
struct WiseTransfer {
    id: i64,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    event_type: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    resource: IdOnly<serde_json::Value>,
    current_state: String,
}

fn decode_key(encoded: &str) -> Result<Vec<u8>, ProviderError> {
    kassa_sdk::signature::decode_base64(encoded)
        .map_err(|_| ProviderError::Config("webhook_public_key is not valid base64".into()))
}

impl WiseProvider {
    pub fn new(config: &WiseConfig) -> Result<Self, ProviderError> {
        let base_url = match &config.base_url {
            Some(url) => url.clone(),
            None => Url::parse(DEFAULT_BASE_URL).map_err(|e| ProviderError::Config(e.to_string()))?,
        };
        Ok(Self {
            base_url,
            api_token: config.api_token.clone(),
            profile_id: config.profile_id,
            webhook_public_key: decode_key(&config.webhook_public_key)?,
            http_client: http_client(),
        })
    }

    fn url(&self, path: &str) -> Result<Url, ProviderError> {
        self.base_url
            .join(path)
            .map_err(|e| ProviderError::Config(e.to_string()))
    }

    async fn call(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<serde_json::Value, ProviderError> {
        read_json(request.bearer_auth(&self.api_token).send().await?).await
    }

    pub fn map_status(state: &str) -> TransferStatus {
        match state {
            "outgoing_payment_sent" => TransferStatus::Successful,
            "cancelled" | "funds_refunded" | "bounced_back" | "charged_back" => {
                TransferStatus::Failed
            }
            _ => TransferStatus::Processing,
        }
    }

    /// Account type and detail fields Wise expects for a currency.
    fn recipient_details(instruction: &TransferInstruction) -> (&'static str, serde_json::Value) {
        let account = &instruction.account;
        let bank_code = account.bank_code.clone().unwrap_or_default();
        let (kind, mut details) = match instruction.currency {
            Currency::Eur => (
                "iban",
                serde_json::json!({ "BIC": bank_code, "IBAN": account.account_number }),
            ),
            Currency::Gbp => (
                "sort_code",
                serde_json::json!({ "sortCode": bank_code, "accountNumber": account.account_number }),
            ),
            Currency::Aud => (
                "australian",
                serde_json::json!({ "bsbCode": bank_code, "accountNumber": account.account_number }),
            ),
            Currency::Mxn => (
                "mexican",
                serde_json::json!({ "clabe": bank_code, "identificationNumber": account.account_number }),
            ),
            _ => (
                "aba",
                serde_json::json!({ "abartn": bank_code, "accountNumber": account.account_number }),
            ),
        };
        if let Some(target) = details.as_object_mut() {
            if let Some(extra) = account.details.as_object() {
                for (k, v) in extra {
                    target.insert(k.clone(), v.clone());
                }
            }
            target
                .entry("legalType")
                .or_insert_with(|| serde_json::Value::String("PRIVATE".into()));
        }
        (kind, details)
    }
}

#[async_trait]
impl PaymentProvider for WiseProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Wise
    }

    async fn initiate_transfer(
        &self,
        instruction: &TransferInstruction,
    ) -> Result<TransferOutcome, ProviderError> {
        let quote: IdOnly<String> = serde_json::from_value(
            self.call(
                self.http_client
                    .post(self.url(&format!("v3/profiles/{}/quotes", self.profile_id))?)
                    .json(&serde_json::json!({
                        "sourceCurrency": instruction.currency.code(),
                        "targetCurrency": instruction.currency.code(),
                        "sourceAmount": json_number(instruction.amount)?,
                    })),
            )
            .await?,
        )?;

        let (kind, details) = Self::recipient_details(instruction);
        let recipient: IdOnly<i64> = serde_json::from_value(
            self.call(
                self.http_client
                    .post(self.url("v1/accounts")?)
                    .json(&serde_json::json!({
                        "currency": instruction.currency.code(),
                        "type": kind,
                        "profile": self.profile_id,
                        "accountHolderName": instruction.account.account_name,
                        "details": details,
                    })),
            )
            .await?,
        )?;

        let raw = self
            .call(
                self.http_client
                    .post(self.url("v1/transfers")?)
                    .json(&serde_json::json!({
                        "targetAccount": recipient.id,
                        "quoteUuid": quote.id,
                        "customerTransactionId": instruction.record_id,
                        "details": { "reference": instruction.narration.clone().unwrap_or_default() },
                    })),
            )
            .await?;
        let transfer: WiseTransfer = serde_json::from_value(raw.clone())?;

        let funding = self
            .call(
                self.http_client
                    .post(self.url(&format!(
                        "v3/profiles/{}/transfers/{}/payments",
                        self.profile_id, transfer.id
                    ))?)
                    .json(&serde_json::json!({ "type": "BALANCE" })),
            )
            .await?;

        Ok(TransferOutcome {
            psp_transaction_id: Some(transfer.id.to_string()),
            status: Self::map_status(transfer.status.as_deref().unwrap_or_default()),
            raw: serde_json::json!({ "transfer": raw, "funding": funding }),
        })
    }

    async fn check_transfer_status(
        &self,
        record: &TransferRecord,
    ) -> Result<TransferOutcome, ProviderError> {
        let psp_id = record
            .psp_transaction_id
            .as_deref()
            .ok_or(ProviderError::NotFound)?;
        let raw = self
            .call(
                self.http_client
                    .get(self.url(&format!("v1/transfers/{psp_id}"))?),
            )
            .await?;
        let transfer: WiseTransfer = serde_json::from_value(raw.clone())?;
        Ok(TransferOutcome {
            psp_transaction_id: Some(transfer.id.to_string()),
            status: Self::map_status(transfer.status.as_deref().unwrap_or_default()),
            raw,
        })
    }

    fn validate_webhook_signature(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<(), ProviderError> {
        let signature = header_str(headers, SIGNATURE_HEADER)
            .and_then(|s| kassa_sdk::signature::decode_base64(s.trim()).ok())
            .ok_or(ProviderError::InvalidSignature)?;
        UnparsedPublicKey::new(&RSA_PKCS1_2048_8192_SHA256, &self.webhook_public_key)
            .verify(body, &signature)
            .map_err(|_| ProviderError::InvalidSignature)
    }

    fn transform_webhook(&self, body: &[u8]) -> Result<Option<CanonicalEvent>, ProviderError> {
        let payload: serde_json::Value = serde_json::from_slice(body)?;
        let envelope: WebhookEnvelope = match serde_json::from_value(payload.clone()) {
            Ok(e) => e,
            // Other event families have a different shape.
            Err(_) => return Ok(None),
        };
        if envelope.event_type != "transfers#state-change" {
            return Ok(None);
        }
        let psp_id = match envelope.data.resource.id {
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::String(s) => s,
            other => {
                return Err(ProviderError::InvalidRequest(format!(
                    "unexpected resource id: {other}"
                )));
            }
        };
        Ok(Some(CanonicalEvent::Transfer(TransferEvent {
            provider: ProviderName::Wise,
            reference: None,
            psp_transaction_id: Some(psp_id),
            status: Self::map_status(&envelope.data.current_state),
            payload,
            source: EventSource::Webhook,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::transfer::AccountDetails;
    use reqwest::header::HeaderValue;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn provider() -> WiseProvider {
        WiseProvider::new(&WiseConfig {
            api_token: "token".into(),
            profile_id: 42,
            webhook_public_key: "AAAA".into(),
            base_url: None,
            currencies: vec![Currency::Usd],
        })
        .unwrap()
    }

    #[test]
    fn status_map() {
        assert_eq!(
            WiseProvider::map_status("outgoing_payment_sent"),
            TransferStatus::Successful
        );
        assert_eq!(WiseProvider::map_status("cancelled"), TransferStatus::Failed);
        assert_eq!(
            WiseProvider::map_status("funds_converted"),
            TransferStatus::Processing
        );
        assert_eq!(WiseProvider::map_status("something_new"), TransferStatus::Processing);
    }

    #[test]
    fn rejects_bad_signatures() {
        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_static("bm90IGEgc2lnbmF0dXJl"));
        assert!(matches!(
            provider().validate_webhook_signature(&headers, b"{}"),
            Err(ProviderError::InvalidSignature)
        ));
        assert!(matches!(
            provider().validate_webhook_signature(&HeaderMap::new(), b"{}"),
            Err(ProviderError::InvalidSignature)
        ));
    }

    #[test]
    fn transforms_state_change() {
        let body = br#"{"event_type":"transfers#state-change","data":{"resource":{"id":9001,"type":"transfer"},"current_state":"outgoing_payment_sent","previous_state":"funds_converted"}}"#;
        let Some(CanonicalEvent::Transfer(event)) = provider().transform_webhook(body).unwrap()
        else {
            panic!("expected transfer event");
        };
        assert_eq!(event.psp_transaction_id.as_deref(), Some("9001"));
        assert_eq!(event.status, TransferStatus::Successful);
        assert!(event.reference.is_none());

        let other = br#"{"event_type":"balances#credit","data":{"amount":1}}"#;
        assert!(provider().transform_webhook(other).unwrap().is_none());
    }

    #[test]
    fn recipient_details_per_currency() {
        let instruction = TransferInstruction {
            record_id: Uuid::now_v7(),
            user_id: Uuid::now_v7(),
            reference: "wd".into(),
            amount: dec!(10),
            currency: Currency::Gbp,
            account: AccountDetails {
                account_number: "12345678".into(),
                account_name: "Ada".into(),
                bank_code: Some("401276".into()),
                bank_name: None,
                details: serde_json::json!({ "legalType": "BUSINESS" }),
            },
            narration: None,
        };
        let (kind, details) = WiseProvider::recipient_details(&instruction);
        assert_eq!(kind, "sort_code");
        assert_eq!(details["sortCode"], "401276");
        assert_eq!(details["legalType"], "BUSINESS");
    }
}
