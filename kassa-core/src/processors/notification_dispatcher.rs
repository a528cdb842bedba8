//! NotificationDispatcher processor.
//!
//! Drains the notification channel and POSTs each notification to the
//! configured endpoint, signed with `Kassa-Signature` when a secret is set.
//! Without an endpoint notifications are only logged. Delivery is
//! best-effort: a failed POST is logged and the notification dropped.

use crate::config::NotificationsConfig;
use crate::events::{Notification, NotificationReceiver};
use kassa_sdk::signature::{SIGNATURE_HEADER, SignedObject};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("delivery failed with status {status}: {body}")]
    DeliveryFailed { status: u16, body: String },

    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub struct NotificationDispatcher {
    config: NotificationsConfig,
    notification_rx: NotificationReceiver,
    shutdown_rx: watch::Receiver<bool>,
    http_client: reqwest::Client,
}

impl NotificationDispatcher {
    pub fn new(
        config: NotificationsConfig,
        notification_rx: NotificationReceiver,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        if config.endpoint.is_some() && signing_secret(&config).is_none() {
            warn!("No notifications.secret configured, notifications will be sent unsigned");
        }
        Self {
            config,
            notification_rx,
            shutdown_rx,
            http_client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    pub async fn run(mut self) {
        info!("NotificationDispatcher started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("NotificationDispatcher received shutdown signal");
                        break;
                    }
                }

                Some(notification) = self.notification_rx.recv() => {
                    let kind = notification.kind();
                    let user_id = notification.user_id();
                    if let Err(e) = self.dispatch(notification).await {
                        error!(kind, %user_id, error = %e, "Failed to deliver notification");
                    }
                }

                else => {
                    info!("Notification channel closed");
                    break;
                }
            }
        }

        info!("NotificationDispatcher shutdown complete");
    }

    async fn dispatch(&self, notification: Notification) -> Result<(), DispatchError> {
        let Some(endpoint) = self.config.endpoint.clone() else {
            debug!(kind = notification.kind(), user_id = %notification.user_id(), ?notification, "Notification");
            return Ok(());
        };
        let kind = notification.kind();
        let out = outgoing(notification, signing_secret(&self.config))?;

        let mut request = self
            .http_client
            .post(endpoint)
            .header("Content-Type", "application/json");
        if let Some(signature) = out.signature {
            request = request.header(SIGNATURE_HEADER, signature);
        }
        let response = request.body(out.json).send().await?;

        let status = response.status();
        if status.is_success() {
            debug!(kind, "Notification delivered");
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(DispatchError::DeliveryFailed {
                status: status.as_u16(),
                body,
            })
        }
    }
}

/// A serialized notification and its `Kassa-Signature` value, if signed.
#[derive(Debug)]
struct Outgoing {
    json: String,
    signature: Option<String>,
}

fn signing_secret(config: &NotificationsConfig) -> Option<&str> {
    config.secret.as_deref().filter(|s| !s.is_empty())
}

fn outgoing(notification: Notification, secret: Option<&str>) -> Result<Outgoing, DispatchError> {
    match secret {
        Some(secret) => {
            let signed = SignedObject::new(notification, secret.as_bytes())?;
            Ok(Outgoing {
                signature: Some(signed.to_header()),
                json: signed.json,
            })
        }
        None => Ok(Outgoing {
            json: serde_json::to_string(&notification)?,
            signature: None,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Currency;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn funded() -> Notification {
        Notification::WalletFunded {
            user_id: Uuid::now_v7(),
            currency: Currency::Usd,
            amount: dec!(5),
            reference: "fund_1".into(),
        }
    }

    #[test]
    fn unsigned_without_a_secret() {
        let config = NotificationsConfig {
            endpoint: None,
            secret: Some(String::new()),
        };
        assert_eq!(signing_secret(&config), None);
        let out = outgoing(funded(), signing_secret(&config)).unwrap();
        assert!(out.signature.is_none());
        assert!(out.json.contains("wallet_funded"));
    }

    #[test]
    fn signed_with_a_secret() {
        let notification = funded();
        let out = outgoing(notification.clone(), Some("hook-secret")).unwrap();
        let header = out.signature.unwrap();
        let received: SignedObject<Notification> =
            SignedObject::from_header_and_body(&header, out.json).unwrap();
        assert_eq!(received.verify(b"hook-secret").unwrap(), notification);
    }
}
