//! Notification channel factory and the channel-backed [`Notifier`].

use super::types::Notification;
use super::Notifier;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

/// Default buffer size for event channels.
///
/// This provides enough buffer to handle bursts while keeping memory bounded.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

/// Sender handle for notifications.
pub type NotificationSender = mpsc::Sender<Notification>;
/// Receiver handle for notifications.
pub type NotificationReceiver = mpsc::Receiver<Notification>;

/// Create a new notification channel.
pub fn notification_channel() -> (NotificationSender, NotificationReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

/// [`Notifier`] that queues onto a bounded channel drained by the
/// `NotificationDispatcher`. Never blocks the caller.
#[derive(Clone)]
pub struct ChannelNotifier {
    tx: NotificationSender,
}

impl ChannelNotifier {
    pub fn new(tx: NotificationSender) -> Self {
        Self { tx }
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notification: Notification) {
        match self.tx.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(n)) => {
                warn!(kind = n.kind(), user_id = %n.user_id(), "Notification queue full, dropping");
            }
            Err(TrySendError::Closed(n)) => {
                warn!(kind = n.kind(), user_id = %n.user_id(), "Notification queue closed, dropping");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Currency;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn funded() -> Notification {
        Notification::WalletFunded {
            user_id: Uuid::nil(),
            currency: Currency::Usd,
            amount: Decimal::ONE,
            reference: "r".into(),
        }
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let (tx, mut rx) = mpsc::channel(1);
        let notifier = ChannelNotifier::new(tx);
        notifier.notify(funded());
        notifier.notify(funded());
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_queue_is_ignored() {
        let (tx, rx) = notification_channel();
        drop(rx);
        ChannelNotifier::new(tx).notify(funded());
    }
}
