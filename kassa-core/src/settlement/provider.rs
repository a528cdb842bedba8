//! The payment provider seam.

use super::events::CanonicalEvent;
use crate::entities::transfer::{AccountDetails, TransferRecord, TransferStatus};
use crate::entities::{Currency, ProviderName};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider has no record of the referenced object.
    #[error("not found at provider")]
    NotFound,

    #[error("operation not supported by provider")]
    Unsupported,

    #[error("provider API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid webhook signature")]
    InvalidSignature,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("provider misconfigured: {0}")]
    Config(String),

    #[error("could not decode provider payload: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Everything an adapter needs to start one payout attempt.
#[derive(Debug, Clone)]
pub struct TransferInstruction {
    /// Id of the [`TransferRecord`]; usable as a provider-side idempotency key.
    pub record_id: Uuid,
    pub user_id: Uuid,
    pub reference: String,
    pub amount: Decimal,
    pub currency: Currency,
    pub account: AccountDetails,
    pub narration: Option<String>,
}

impl From<&TransferRecord> for TransferInstruction {
    fn from(record: &TransferRecord) -> Self {
        Self {
            record_id: record.id,
            user_id: record.user_id,
            reference: record.reference.clone(),
            amount: record.amount,
            currency: record.currency,
            account: record.account.clone(),
            narration: record.narration.clone(),
        }
    }
}

/// What the provider reported for a payout.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferOutcome {
    pub psp_transaction_id: Option<String>,
    pub status: TransferStatus,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct ChargeSessionRequest {
    pub user_id: Uuid,
    pub amount: Decimal,
    pub currency: Currency,
    pub email: Option<String>,
    pub description: Option<String>,
}

/// A hosted payment page the user is redirected to.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeSession {
    pub provider: ProviderName,
    pub session_id: String,
    pub checkout_url: Option<String>,
}

/// A bank as a provider lists it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderBank {
    pub name: String,
    pub code: String,
}

#[derive(Debug, Clone)]
pub struct VirtualAccountRequest {
    pub user_id: Uuid,
    pub currency: Currency,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

/// A dedicated account opened at the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualAccount {
    pub account_number: String,
    pub account_name: String,
    pub bank_name: Option<String>,
    pub provider_customer_id: Option<String>,
    pub raw: serde_json::Value,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> ProviderName;

    /// Resolve the account holder's name for an account.
    async fn verify_account(
        &self,
        _currency: Currency,
        _account: &AccountDetails,
    ) -> Result<AccountDetails, ProviderError> {
        Err(ProviderError::Unsupported)
    }

    async fn initiate_transfer(
        &self,
        instruction: &TransferInstruction,
    ) -> Result<TransferOutcome, ProviderError>;

    async fn check_transfer_status(
        &self,
        record: &TransferRecord,
    ) -> Result<TransferOutcome, ProviderError>;

    async fn create_charge_session(
        &self,
        _request: &ChargeSessionRequest,
    ) -> Result<ChargeSession, ProviderError> {
        Err(ProviderError::Unsupported)
    }

    async fn list_banks(&self, _currency: Currency) -> Result<Vec<ProviderBank>, ProviderError> {
        Err(ProviderError::Unsupported)
    }

    async fn create_virtual_account(
        &self,
        _request: &VirtualAccountRequest,
    ) -> Result<VirtualAccount, ProviderError> {
        Err(ProviderError::Unsupported)
    }

    /// Check the signature over the raw request body. Must not touch any
    /// state.
    fn validate_webhook_signature(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<(), ProviderError>;

    /// `Ok(None)` for deliveries that are not relevant to settlement.
    fn transform_webhook(&self, body: &[u8]) -> Result<Option<CanonicalEvent>, ProviderError>;
}

pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Decimal places of the smallest unit providers settle in.
pub const MINOR_UNIT_SCALE: u32 = 2;

/// Whether `amount` is a whole number of minor units.
pub fn is_whole_minor_units(amount: Decimal) -> bool {
    amount.normalize().scale() <= MINOR_UNIT_SCALE
}

/// Amount in minor units (cents, kobo). Sub-minor precision is an error,
/// never rounded away.
pub(crate) fn to_minor_units(amount: Decimal) -> Result<i64, ProviderError> {
    if !is_whole_minor_units(amount) {
        return Err(ProviderError::InvalidRequest(format!(
            "{amount} is finer than a minor unit"
        )));
    }
    amount
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|minor| minor.to_i64())
        .ok_or_else(|| ProviderError::InvalidRequest(format!("amount out of range: {amount}")))
}

pub(crate) fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

pub(crate) fn json_number(amount: Decimal) -> Result<serde_json::Value, ProviderError> {
    amount
        .to_f64()
        .and_then(serde_json::Number::from_f64)
        .map(serde_json::Value::Number)
        .ok_or_else(|| ProviderError::InvalidRequest(format!("amount out of range: {amount}")))
}

/// Turn a non-success HTTP response into [`ProviderError`], keeping the
/// provider's message when it sends one.
pub(crate) async fn read_json(
    response: reqwest::Response,
) -> Result<serde_json::Value, ProviderError> {
    let status = response.status();
    let bytes = response.bytes().await?;
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap_or_else(|_| {
        serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned())
    });
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ProviderError::NotFound);
    }
    if !status.is_success() {
        let message = body
            .get("message")
            .or_else(|| body.get("error").and_then(|e| e.get("message")))
            .and_then(|m| m.as_str())
            .map(str::to_owned)
            .unwrap_or_else(|| body.to_string());
        return Err(ProviderError::Api {
            status: status.as_u16(),
            message,
        });
    }
    Ok(body)
}

pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn minor_units() {
        assert_eq!(to_minor_units(dec!(12.34)).unwrap(), 1234);
        assert_eq!(to_minor_units(dec!(12.3400)).unwrap(), 1234);
        assert!(matches!(
            to_minor_units(dec!(12.345)),
            Err(ProviderError::InvalidRequest(_))
        ));
        assert_eq!(from_minor_units(1234), dec!(12.34));
    }

    #[test]
    fn json_number_is_numeric() {
        assert!(json_number(dec!(10.5)).unwrap().is_number());
    }
}
