//! Stripe adapter.
//!
//! Used for hosted checkout charges. Payouts are supported for the
//! currencies explicitly configured, against the platform's connected bank
//! destination.

use crate::config::StripeConfig;
use crate::entities::transfer::{TransferRecord, TransferStatus};
use crate::entities::{Currency, ProviderName};
use crate::settlement::events::{CanonicalEvent, ChargeEvent, EventSource, TransferEvent};
use crate::settlement::provider::{
    ChargeSession, ChargeSessionRequest, PaymentProvider, ProviderError, TransferInstruction,
    TransferOutcome, from_minor_units, header_str, http_client, read_json, to_minor_units,
};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use ring::hmac;
use serde::Deserialize;
use tracing::warn;
use url::Url;
use uuid::Uuid;

const DEFAULT_BASE_URL: &str = "https://api.stripe.com/";
const SIGNATURE_HEADER: &str = "stripe-signature";
/// Maximum age of a signed webhook, in seconds.
const SIGNATURE_TOLERANCE: i64 = 300;

pub struct StripeProvider {
    base_url: Url,
    secret_key: String,
    webhook_secret: String,
    success_url: Url,
    cancel_url: Url,
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct Payout {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct CheckoutSession {
    id: String,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Event {
    #[serde(rename = "type")]
    kind: String,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    amount: i64,
    currency: String,
    status: String,
    #[serde(default)]
    payment_method_types: Vec<String>,
    #[serde(default)]
    metadata: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct EventPayout {
    id: String,
    status: String,
    #[serde(default)]
    metadata: serde_json::Value,
}

/// Parse `t=...,v1=...[,v1=...]`.
fn parse_signature(header: &str) -> Option<(i64, Vec<Vec<u8>>)> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        let (k, v) = part.trim().split_once('=')?;
        match k {
            "t" => timestamp = v.parse::<i64>().ok(),
            "v1" => signatures.extend(hex::decode(v).ok()),
            _ => {}
        }
    }
    Some((timestamp?, signatures))
}

impl StripeProvider {
    pub fn new(config: &StripeConfig) -> Result<Self, ProviderError> {
        let base_url = match &config.base_url {
            Some(url) => url.clone(),
            None => Url::parse(DEFAULT_BASE_URL).map_err(|e| ProviderError::Config(e.to_string()))?,
        };
        Ok(Self {
            base_url,
            secret_key: config.secret_key.clone(),
            webhook_secret: config.webhook_secret.clone(),
            success_url: config.success_url.clone(),
            cancel_url: config.cancel_url.clone(),
            http_client: http_client(),
        })
    }

    fn url(&self, path: &str) -> Result<Url, ProviderError> {
        self.base_url
            .join(path)
            .map_err(|e| ProviderError::Config(e.to_string()))
    }

    pub fn map_status(status: &str) -> TransferStatus {
        match status {
            "paid" | "succeeded" => TransferStatus::Successful,
            "failed" | "canceled" => TransferStatus::Failed,
            _ => TransferStatus::Processing,
        }
    }

    fn verify_at(&self, header: &str, body: &[u8], now: i64) -> Result<(), ProviderError> {
        let (timestamp, signatures) =
            parse_signature(header).ok_or(ProviderError::InvalidSignature)?;
        if (now - timestamp).abs() > SIGNATURE_TOLERANCE {
            return Err(ProviderError::InvalidSignature);
        }
        let key = hmac::Key::new(hmac::HMAC_SHA256, self.webhook_secret.as_bytes());
        let mut signed = format!("{timestamp}.").into_bytes();
        signed.extend_from_slice(body);
        if signatures
            .iter()
            .any(|s| hmac::verify(&key, &signed, s).is_ok())
        {
            Ok(())
        } else {
            Err(ProviderError::InvalidSignature)
        }
    }
}

fn metadata_str<'a>(metadata: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    metadata.get(key).and_then(|v| v.as_str())
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Stripe
    }

    async fn initiate_transfer(
        &self,
        instruction: &TransferInstruction,
    ) -> Result<TransferOutcome, ProviderError> {
        let amount = to_minor_units(instruction.amount)?.to_string();
        let currency = instruction.currency.code().to_lowercase();
        let record_id = instruction.record_id.to_string();
        let mut form = vec![
            ("amount", amount.as_str()),
            ("currency", currency.as_str()),
            ("metadata[reference]", instruction.reference.as_str()),
            ("metadata[record_id]", record_id.as_str()),
        ];
        if let Some(narration) = &instruction.narration {
            form.push(("description", narration.as_str()));
        }
        if let Some(destination) = metadata_str(&instruction.account.details, "destination") {
            form.push(("destination", destination));
        }
        let raw = read_json(
            self.http_client
                .post(self.url("v1/payouts")?)
                .bearer_auth(&self.secret_key)
                .header("Idempotency-Key", &instruction.reference)
                .form(&form)
                .send()
                .await?,
        )
        .await?;
        let payout: Payout = serde_json::from_value(raw.clone())?;
        Ok(TransferOutcome {
            psp_transaction_id: Some(payout.id),
            status: Self::map_status(&payout.status),
            raw,
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
        let raw = read_json(
            self.http_client
                .get(self.url(&format!("v1/payouts/{psp_id}"))?)
                .bearer_auth(&self.secret_key)
                .send()
                .await?,
        )
        .await?;
        let payout: Payout = serde_json::from_value(raw.clone())?;
        Ok(TransferOutcome {
            psp_transaction_id: Some(payout.id),
            status: Self::map_status(&payout.status),
            raw,
        })
    }

    async fn create_charge_session(
        &self,
        request: &ChargeSessionRequest,
    ) -> Result<ChargeSession, ProviderError> {
        let amount = to_minor_units(request.amount)?.to_string();
        let currency = request.currency.code().to_lowercase();
        let user_id = request.user_id.to_string();
        let name = request.description.as_deref().unwrap_or("Wallet Fund");
        let mut success_url = self.success_url.clone();
        success_url
            .query_pairs_mut()
            .append_pair("currency", request.currency.code());
        let success_url = format!("{success_url}&stripe_session_id={{CHECKOUT_SESSION_ID}}");
        let mut form = vec![
            ("mode", "payment"),
            ("line_items[0][quantity]", "1"),
            ("line_items[0][price_data][currency]", currency.as_str()),
            ("line_items[0][price_data][unit_amount]", amount.as_str()),
            ("line_items[0][price_data][product_data][name]", name),
            ("success_url", success_url.as_str()),
            ("cancel_url", self.cancel_url.as_str()),
            ("payment_intent_data[metadata][user_id]", user_id.as_str()),
        ];
        if let Some(email) = &request.email {
            form.push(("customer_email", email.as_str()));
        }
        let raw = read_json(
            self.http_client
                .post(self.url("v1/checkout/sessions")?)
                .bearer_auth(&self.secret_key)
                .form(&form)
                .send()
                .await?,
        )
        .await?;
        let session: CheckoutSession = serde_json::from_value(raw)?;
        Ok(ChargeSession {
            provider: ProviderName::Stripe,
            session_id: session.id,
            checkout_url: session.url,
        })
    }

    fn validate_webhook_signature(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<(), ProviderError> {
        let header = header_str(headers, SIGNATURE_HEADER).ok_or(ProviderError::InvalidSignature)?;
        self.verify_at(
            header,
            body,
            time::OffsetDateTime::now_utc().unix_timestamp(),
        )
    }

    fn transform_webhook(&self, body: &[u8]) -> Result<Option<CanonicalEvent>, ProviderError> {
        let payload: serde_json::Value = serde_json::from_slice(body)?;
        let event: Event = serde_json::from_value(payload.clone())?;
        match event.kind.as_str() {
            "payment_intent.succeeded" | "payment_intent.payment_failed" => {
                let intent: PaymentIntent = serde_json::from_value(event.data.object)?;
                let Ok(currency) = intent.currency.to_uppercase().parse::<Currency>() else {
                    warn!(currency = %intent.currency, intent = %intent.id, "Ignoring charge in unsupported currency");
                    return Ok(None);
                };
                let status = if event.kind == "payment_intent.succeeded" {
                    TransferStatus::Successful
                } else {
                    TransferStatus::Failed
                };
                if Self::map_status(&intent.status) != status {
                    warn!(event = %event.kind, status = %intent.status, "Stripe event and intent status disagree, using event");
                }
                Ok(Some(CanonicalEvent::Charge(ChargeEvent {
                    provider: ProviderName::Stripe,
                    reference: intent.id,
                    amount: from_minor_units(intent.amount),
                    currency,
                    channel: intent.payment_method_types.into_iter().next(),
                    status,
                    user_id: metadata_str(&intent.metadata, "user_id")
                        .and_then(|s| s.parse::<Uuid>().ok()),
                    payload,
                })))
            }
            "payout.paid" | "payout.failed" | "payout.canceled" => {
                let payout: EventPayout = serde_json::from_value(event.data.object)?;
                Ok(Some(CanonicalEvent::Transfer(TransferEvent {
                    provider: ProviderName::Stripe,
                    reference: metadata_str(&payout.metadata, "reference").map(str::to_owned),
                    psp_transaction_id: Some(payout.id),
                    status: Self::map_status(&payout.status),
                    payload,
                    source: EventSource::Webhook,
                })))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn provider() -> StripeProvider {
        StripeProvider::new(&StripeConfig {
            secret_key: "sk_test".into(),
            webhook_secret: "whsec_test".into(),
            success_url: Url::parse("https://app.example/funded").unwrap(),
            cancel_url: Url::parse("https://app.example/cancelled").unwrap(),
            base_url: None,
            currencies: Vec::new(),
        })
        .unwrap()
    }

    fn sign(timestamp: i64, body: &[u8]) -> String {
        let key = hmac::Key::new(hmac::HMAC_SHA256, b"whsec_test");
        let mut signed = format!("{timestamp}.").into_bytes();
        signed.extend_from_slice(body);
        format!(
            "t={timestamp},v1={}",
            hex::encode(hmac::sign(&key, &signed).as_ref())
        )
    }

    #[test]
    fn signature_tolerance() {
        let body = br#"{"type":"payout.paid"}"#;
        let now = 1_700_000_000;
        let p = provider();
        assert!(p.verify_at(&sign(now, body), body, now + 10).is_ok());
        assert!(matches!(
            p.verify_at(&sign(now, body), body, now + 301),
            Err(ProviderError::InvalidSignature)
        ));
        assert!(matches!(
            p.verify_at(&sign(now, b"other"), body, now),
            Err(ProviderError::InvalidSignature)
        ));
        assert!(matches!(
            p.verify_at("garbage", body, now),
            Err(ProviderError::InvalidSignature)
        ));
    }

    #[test]
    fn transforms_payment_intent() {
        let user = Uuid::now_v7();
        let body = format!(
            r#"{{"type":"payment_intent.succeeded","data":{{"object":{{"id":"pi_1","amount":1999,"currency":"usd","status":"succeeded","payment_method_types":["card"],"metadata":{{"user_id":"{user}"}}}}}}}}"#
        );
        let Some(CanonicalEvent::Charge(event)) =
            provider().transform_webhook(body.as_bytes()).unwrap()
        else {
            panic!("expected charge event");
        };
        assert_eq!(event.reference, "pi_1");
        assert_eq!(event.amount, dec!(19.99));
        assert_eq!(event.currency, Currency::Usd);
        assert_eq!(event.channel.as_deref(), Some("card"));
        assert_eq!(event.user_id, Some(user));
    }

    #[test]
    fn transforms_payout_and_ignores_the_rest() {
        let body = br#"{"type":"payout.failed","data":{"object":{"id":"po_1","status":"failed","metadata":{"reference":"wd_9"}}}}"#;
        let Some(CanonicalEvent::Transfer(event)) = provider().transform_webhook(body).unwrap()
        else {
            panic!("expected transfer event");
        };
        assert_eq!(event.reference.as_deref(), Some("wd_9"));
        assert_eq!(event.status, TransferStatus::Failed);

        let other = br#"{"type":"customer.created","data":{"object":{}}}"#;
        assert!(provider().transform_webhook(other).unwrap().is_none());
    }
}
