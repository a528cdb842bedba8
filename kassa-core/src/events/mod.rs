//! User-facing notifications.
//!
//! Ledger, settlement and exchange code emit [`Notification`]s through a
//! [`Notifier`] after their state has committed. The default notifier
//! queues them onto a bounded channel drained by the
//! `NotificationDispatcher` processor, so delivery is never on the
//! critical path of a balance mutation.

pub mod channels;
pub mod types;

pub use channels::{
    ChannelNotifier, DEFAULT_CHANNEL_BUFFER, NotificationReceiver, NotificationSender,
    notification_channel,
};
pub use types::Notification;

/// Fire-and-forget notification sink.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Discards every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _notification: Notification) {}
}
