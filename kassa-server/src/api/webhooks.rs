//! Payment provider webhook ingestion.
//!
//! Each provider posts to `/webhooks/{provider}`. The body is handed to the
//! settlement pipeline untouched so the adapter can verify its signature
//! over the exact bytes received.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
};
use bytes::Bytes;
use kassa_core::settlement::{EventOutcome, ProviderError, SettlementError};
use serde::Serialize;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/webhooks/{provider}", post(receive_webhook))
}

#[derive(Debug, Serialize)]
struct WebhookAck {
    status: &'static str,
}

/// `POST /webhooks/{provider}`: verify and apply one provider event.
///
/// Irrelevant or unknown-reference events are acknowledged so the provider
/// stops redelivering them.
async fn receive_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, WebhookApiError> {
    let outcome = state
        .pipeline
        .handle_webhook(&provider, &headers, &body)
        .await?;

    let status = match outcome {
        EventOutcome::Transfer(record) => {
            tracing::info!(%provider, reference = %record.reference, status = ?record.status, "Transfer webhook applied");
            "applied"
        }
        EventOutcome::Charge(charge) => {
            tracing::info!(%provider, reference = %charge.reference, "Charge webhook applied");
            "applied"
        }
        EventOutcome::Ignored => "ignored",
    };
    Ok(Json(WebhookAck { status }))
}

/// Errors surfaced by the webhook endpoint.
#[derive(Debug)]
struct WebhookApiError(SettlementError);

impl From<SettlementError> for WebhookApiError {
    fn from(e: SettlementError) -> Self {
        Self(e)
    }
}

impl WebhookApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            SettlementError::InvalidSignature
            | SettlementError::Provider(ProviderError::InvalidSignature) => StatusCode::UNAUTHORIZED,
            SettlementError::UnknownProvider(_) => StatusCode::NOT_FOUND,
            SettlementError::Validation(_)
            | SettlementError::InvalidAmount(_)
            | SettlementError::UnsupportedCurrency(_)
            | SettlementError::Provider(ProviderError::Decode(_))
            | SettlementError::Provider(ProviderError::InvalidRequest(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WebhookApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        match status {
            StatusCode::UNAUTHORIZED => (status, "invalid signature").into_response(),
            StatusCode::NOT_FOUND => (status, "unknown provider").into_response(),
            StatusCode::BAD_REQUEST => {
                tracing::warn!(error = %self.0, "Malformed webhook");
                (status, "malformed webhook").into_response()
            }
            _ => {
                tracing::error!(error = %self.0, "Webhook processing failed");
                (status, "internal server error").into_response()
            }
        }
    }
}
