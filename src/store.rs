use tokio::sync::mpsc;

use crate::models::notification::Notification;

/// Side-effect signal for the presentation layer (toast display).
#[derive(Debug, Clone, PartialEq)]
pub enum StoreSignal {
    NewNotification(Notification),
}

/// Single source of truth for the ordered notification list (newest first)
/// and its derived unread count.
///
/// The count is recomputed from the list on `replace_all` and adjusted
/// incrementally on `upsert`/`mark_read`; `unread_count_never_drifts_from_list`
/// guards the equivalence of the two.
pub struct NotificationStore {
    notifications: Vec<Notification>,
    unread_count: usize,
    last_notification_id: Option<i64>,
    initialized: bool,
    signal_tx: mpsc::UnboundedSender<StoreSignal>,
}

impl NotificationStore {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StoreSignal>) {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        (
            Self {
                notifications: Vec::new(),
                unread_count: 0,
                last_notification_id: None,
                initialized: false,
                signal_tx,
            },
            signal_rx,
        )
    }

    /// Replace the whole list from a fetch result. Signals only when a newer
    /// head id appears after the first load; the first load itself stays
    /// silent so page entry never toasts.
    pub fn replace_all(&mut self, list: Vec<Notification>) {
        let newest_id = list.first().map(|n| n.id);

        if self.initialized {
            if let (Some(id), Some(newest)) = (newest_id, list.first()) {
                if self.last_notification_id != Some(id) {
                    self.signal(StoreSignal::NewNotification(newest.clone()));
                }
            }
        }

        self.unread_count = list.iter().filter(|n| !n.is_read).count();
        self.notifications = list;
        if newest_id.is_some() {
            self.last_notification_id = newest_id;
        }
        self.initialized = true;
    }

    /// Insert a push-delivered notification at the head. Idempotent on `id`:
    /// at-least-once delivery across both channels must not duplicate entries.
    pub fn upsert(&mut self, notification: Notification) {
        if self.notifications.iter().any(|n| n.id == notification.id) {
            return;
        }

        if !notification.is_read {
            self.unread_count += 1;
        }
        self.last_notification_id = Some(notification.id);
        self.signal(StoreSignal::NewNotification(notification.clone()));
        self.notifications.insert(0, notification);
    }

    pub fn mark_read(&mut self, id: i64) {
        if let Some(entry) = self.notifications.iter_mut().find(|n| n.id == id) {
            if !entry.is_read {
                entry.is_read = true;
                self.unread_count = self.unread_count.saturating_sub(1);
            }
        }
    }

    /// Local half of the bulk mark-read; the engine follows up with a fresh
    /// fetch because the server-side bulk request may partially fail.
    pub fn mark_all_read(&mut self) {
        for entry in &mut self.notifications {
            entry.is_read = true;
        }
        self.unread_count = 0;
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn unread_count(&self) -> usize {
        self.unread_count
    }

    pub fn last_notification_id(&self) -> Option<i64> {
        self.last_notification_id
    }

    fn signal(&self, signal: StoreSignal) {
        // A dropped receiver just means nobody renders toasts.
        let _ = self.signal_tx.send(signal);
    }
}
