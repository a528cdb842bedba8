//! Hot-swappable settings with change notification.
//!
//! `SettingsHandle<T>` publishes immutable snapshots through a `watch`
//! channel. Readers grab the current `Arc<T>` without holding any lock
//! across awaits; a reload swaps the snapshot and wakes subscribers.

use std::sync::Arc;
use tokio::sync::watch;

pub struct SettingsHandle<T> {
    tx: Arc<watch::Sender<Arc<T>>>,
}

impl<T> SettingsHandle<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _) = watch::channel(Arc::new(initial));
        Self { tx: Arc::new(tx) }
    }

    /// The snapshot in effect right now.
    pub fn current(&self) -> Arc<T> {
        Arc::clone(&self.tx.borrow())
    }

    /// Publish a new snapshot. In-flight readers keep the one they hold.
    pub fn replace(&self, value: T) {
        self.tx.send_replace(Arc::new(value));
    }

    /// Receiver that resolves `changed()` on every [`replace`](Self::replace).
    pub fn subscribe(&self) -> watch::Receiver<Arc<T>> {
        self.tx.subscribe()
    }
}

impl<T> Clone for SettingsHandle<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replace_notifies_subscribers() {
        let handle = SettingsHandle::new(1u32);
        let mut rx = handle.subscribe();
        let held = handle.current();

        handle.clone().replace(2);
        rx.changed().await.unwrap();

        assert_eq!(**rx.borrow(), 2);
        assert_eq!(*handle.current(), 2);
        assert_eq!(*held, 1);
    }
}
