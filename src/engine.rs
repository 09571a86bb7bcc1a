use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Interval;

use crate::channels::fetch::FetchChannel;
use crate::channels::push::{ConnectionStatus, PushChannel, PushConfig, PushEvent, PushHandle};
use crate::errors::Error;
use crate::models::notification::Notification;
use crate::store::{NotificationStore, StoreSignal};

/// How notifications currently arrive. Push is preferred for latency; polling
/// is the correctness safety net when the push channel is unhealthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Push,
    Poll,
}

/// Outbound events for the presentation layer.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    NewNotification(Notification),
    ConnectionChanged(ConnectionStatus),
    /// Fetch or push credentials were rejected; handled by the auth layer,
    /// never retried here.
    AuthExpired,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub poll_interval: Duration,
    pub push: PushConfig,
}

impl SyncConfig {
    pub fn new(push: PushConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(crate::constants::DEFAULT_POLL_INTERVAL_SECS),
            push,
        }
    }
}

enum RefreshOutcome {
    Applied,
    Failed,
    AuthRejected,
}

/// Owns the push/poll failover decision and is the only writer of the
/// notification store. One logical session per engine: `start` connects,
/// `shutdown` tears everything down; neither is tied to any render cadence.
pub struct SyncEngine {
    store: Arc<Mutex<NotificationStore>>,
    fetch: Arc<dyn FetchChannel>,
    event_tx: mpsc::UnboundedSender<SyncEvent>,
    signal_rx: Option<mpsc::UnboundedReceiver<StoreSignal>>,
    mode_tx: Option<watch::Sender<DeliveryMode>>,
    mode_rx: watch::Receiver<DeliveryMode>,
    push_handle: Option<PushHandle>,
    loop_handle: Option<JoinHandle<()>>,
}

impl SyncEngine {
    pub fn new(fetch: Arc<dyn FetchChannel>) -> (Self, mpsc::UnboundedReceiver<SyncEvent>) {
        let (store, signal_rx) = NotificationStore::new();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        // Polling is the delivery path until the push channel reports in.
        let (mode_tx, mode_rx) = watch::channel(DeliveryMode::Poll);
        (
            Self {
                store: Arc::new(Mutex::new(store)),
                fetch,
                event_tx,
                signal_rx: Some(signal_rx),
                mode_tx: Some(mode_tx),
                mode_rx,
                push_handle: None,
                loop_handle: None,
            },
            event_rx,
        )
    }

    /// Session start: connect the push channel and fetch eagerly once, which
    /// covers the window before the connection is established.
    pub fn start(&mut self, config: SyncConfig) {
        if self.loop_handle.is_some() {
            tracing::warn!("sync engine already started");
            return;
        }
        let (push_handle, push_events) = PushChannel::new(config.push).spawn();
        self.push_handle = Some(push_handle);
        self.spawn_event_loop(push_events, config.poll_interval);
    }

    /// Session end: cancel the polling timer and close the push connection.
    /// Idempotent; also invoked from `Drop` so no exit path leaks timers.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.push_handle.take() {
            handle.shutdown();
            handle.abort();
        }
        if let Some(handle) = self.loop_handle.take() {
            handle.abort();
        }
        tracing::debug!("notification sync torn down");
    }

    /// Follows the path notifications actually arrive on: `Poll` whenever the
    /// polling timer is armed, even if the socket is nominally still open.
    pub fn delivery_mode(&self) -> DeliveryMode {
        *self.mode_rx.borrow()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.push_handle
            .as_ref()
            .map(PushHandle::status)
            .unwrap_or(ConnectionStatus::Disconnected)
    }

    pub async fn snapshot(&self) -> (Vec<Notification>, usize) {
        let store = self.store.lock().await;
        (store.notifications().to_vec(), store.unread_count())
    }

    pub async fn unread_count(&self) -> usize {
        self.store.lock().await.unread_count()
    }

    /// Server first, local state only on success; a rejected call leaves the
    /// store untouched so optimistic callers can revert.
    pub async fn mark_read(&self, id: i64) -> Result<(), Error> {
        self.fetch.mark_read(id).await?;
        self.store.lock().await.mark_read(id);
        Ok(())
    }

    /// The bulk server request may partially fail, so the local bulk update is
    /// always followed by a reconciling re-fetch.
    pub async fn mark_all_read(&self) -> Result<(), Error> {
        self.fetch.mark_all_read().await?;
        self.store.lock().await.mark_all_read();

        let list = self.fetch.list_notifications().await?;
        self.store.lock().await.replace_all(list);
        Ok(())
    }

    fn spawn_event_loop(
        &mut self,
        mut push_events: mpsc::UnboundedReceiver<PushEvent>,
        poll_interval: Duration,
    ) {
        let Some(mut signals) = self.signal_rx.take() else {
            tracing::warn!("sync engine event loop already running");
            return;
        };
        let Some(mode) = self.mode_tx.take() else {
            return;
        };
        let store = self.store.clone();
        let fetch = self.fetch.clone();
        let events = self.event_tx.clone();

        let handle = tokio::spawn(async move {
            let mut poll: Option<Interval> = None;
            // Once credentials are rejected the session owner has to act;
            // polling is parked and AuthExpired fires exactly once.
            let mut auth_expired = false;

            if let RefreshOutcome::AuthRejected = Self::refresh(&store, &fetch).await {
                auth_expired = true;
                let _ = events.send(SyncEvent::AuthExpired);
            }

            let mut push_open = true;
            loop {
                tokio::select! {
                    event = push_events.recv(), if push_open => match event {
                        Some(PushEvent::Connected) => {
                            if poll.take().is_some() {
                                tracing::info!("push channel restored, polling cancelled");
                            }
                            let _ = mode.send(DeliveryMode::Push);
                            let _ = events.send(SyncEvent::ConnectionChanged(
                                ConnectionStatus::Connected,
                            ));
                        }
                        Some(PushEvent::Disconnected { reason }) => {
                            let _ = mode.send(DeliveryMode::Poll);
                            let _ = events.send(SyncEvent::ConnectionChanged(
                                ConnectionStatus::Disconnected,
                            ));
                            if poll.is_none() && !auth_expired {
                                tracing::warn!(
                                    "push channel down ({reason}), falling back to polling"
                                );
                                poll = Some(tokio::time::interval(poll_interval));
                            }
                        }
                        Some(PushEvent::ChannelError(message)) => {
                            tracing::warn!("push channel error: {message}");
                            let _ = mode.send(DeliveryMode::Poll);
                            if poll.is_none() && !auth_expired {
                                poll = Some(tokio::time::interval(poll_interval));
                            }
                        }
                        Some(PushEvent::Notification(notification)) => {
                            store.lock().await.upsert(notification);
                        }
                        // Reconnect budget exhausted and the task is gone;
                        // polling carries the session from here on.
                        None => {
                            push_open = false;
                            let _ = mode.send(DeliveryMode::Poll);
                            if poll.is_none() && !auth_expired {
                                poll = Some(tokio::time::interval(poll_interval));
                            }
                        }
                    },
                    signal = signals.recv() => match signal {
                        Some(StoreSignal::NewNotification(notification)) => {
                            let _ = events.send(SyncEvent::NewNotification(notification));
                        }
                        None => break,
                    },
                    _ = Self::poll_tick(&mut poll) => {
                        if let RefreshOutcome::AuthRejected = Self::refresh(&store, &fetch).await {
                            poll = None;
                            if !auth_expired {
                                auth_expired = true;
                                let _ = events.send(SyncEvent::AuthExpired);
                            }
                        }
                    }
                }
            }
        });
        self.loop_handle = Some(handle);
    }

    async fn poll_tick(poll: &mut Option<Interval>) {
        match poll {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending().await,
        }
    }

    async fn refresh(
        store: &Arc<Mutex<NotificationStore>>,
        fetch: &Arc<dyn FetchChannel>,
    ) -> RefreshOutcome {
        match fetch.list_notifications().await {
            Ok(list) => {
                store.lock().await.replace_all(list);
                RefreshOutcome::Applied
            }
            Err(err) if err.is_auth() => {
                tracing::warn!("notification fetch rejected: {err}");
                RefreshOutcome::AuthRejected
            }
            // A single failed tick is not fatal; the next tick retries.
            Err(err) => {
                tracing::warn!("notification fetch failed, retrying next tick: {err}");
                RefreshOutcome::Failed
            }
        }
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AuthenticateError;
    use crate::models::notification::NotificationKind;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn sample(id: i64, is_read: bool) -> Notification {
        Notification {
            id,
            title: format!("notification {id}"),
            message: "body".to_string(),
            kind: NotificationKind::Generic,
            related_type: None,
            related_id: None,
            data: None,
            is_read,
            created_at: Utc::now(),
            task_status: None,
        }
    }

    #[derive(Default)]
    struct MockFetch {
        response: StdMutex<Vec<Notification>>,
        delay: StdMutex<Option<Duration>>,
        list_calls: AtomicUsize,
        mark_read_calls: AtomicUsize,
        mark_all_calls: AtomicUsize,
        fail_mark_read: AtomicBool,
        auth_fail: AtomicBool,
    }

    impl MockFetch {
        fn set_response(&self, list: Vec<Notification>) {
            *self.response.lock().unwrap() = list;
        }

        fn set_delay(&self, delay: Duration) {
            *self.delay.lock().unwrap() = Some(delay);
        }

        fn list_calls(&self) -> usize {
            self.list_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FetchChannel for MockFetch {
        async fn list_notifications(&self) -> Result<Vec<Notification>, Error> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.auth_fail.load(Ordering::SeqCst) {
                return Err(AuthenticateError::InvalidToken.into());
            }
            Ok(self.response.lock().unwrap().clone())
        }

        async fn mark_read(&self, _id: i64) -> Result<(), Error> {
            self.mark_read_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_mark_read.load(Ordering::SeqCst) {
                return Err(Error::bad_status(
                    reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                    "/notifications/_/read",
                ));
            }
            Ok(())
        }

        async fn mark_all_read(&self) -> Result<(), Error> {
            self.mark_all_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn engine_with_loop(
        fetch: Arc<MockFetch>,
    ) -> (
        SyncEngine,
        mpsc::UnboundedReceiver<SyncEvent>,
        mpsc::UnboundedSender<PushEvent>,
    ) {
        let (mut engine, events) = SyncEngine::new(fetch);
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        engine.spawn_event_loop(push_rx, Duration::from_secs(30));
        (engine, events, push_tx)
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_starts_polling_and_reconnect_cancels_it() {
        let fetch = Arc::new(MockFetch::default());
        let (mut engine, _events, push_tx) = engine_with_loop(fetch.clone());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fetch.list_calls(), 1, "eager fetch on session start");

        push_tx
            .send(PushEvent::Disconnected {
                reason: "io error".to_string(),
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fetch.list_calls(), 2, "polling begins with a prompt tick");

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fetch.list_calls(), 3);

        push_tx.send(PushEvent::Connected).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let settled = fetch.list_calls();

        // The cancelled timer must not fire again, ever.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fetch.list_calls(), settled);

        engine.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn channel_error_also_falls_back_to_polling() {
        let fetch = Arc::new(MockFetch::default());
        let (mut engine, _events, push_tx) = engine_with_loop(fetch.clone());

        tokio::time::sleep(Duration::from_millis(10)).await;
        push_tx
            .send(PushEvent::ChannelError("server error".to_string()))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(fetch.list_calls() >= 3);

        engine.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn no_store_mutation_after_teardown() {
        let fetch = Arc::new(MockFetch::default());
        fetch.set_response(vec![sample(1, false)]);
        let (mut engine, _events, push_tx) = engine_with_loop(fetch.clone());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(engine.unread_count().await, 1);

        // Slow fetch in flight plus a scheduled poll tick at teardown time.
        fetch.set_response(vec![sample(2, false), sample(1, false)]);
        fetch.set_delay(Duration::from_secs(5));
        push_tx
            .send(PushEvent::Disconnected {
                reason: "drop".to_string(),
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fetch.list_calls(), 2, "delayed poll fetch is in flight");

        engine.shutdown();
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(fetch.list_calls(), 2, "no tick fires after teardown");
        let (list, unread) = engine.snapshot().await;
        assert_eq!(list.len(), 1, "in-flight result never lands");
        assert_eq!(unread, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn push_notifications_upsert_once_and_toast_once() {
        let fetch = Arc::new(MockFetch::default());
        let (mut engine, mut events, push_tx) = engine_with_loop(fetch.clone());
        tokio::time::sleep(Duration::from_millis(10)).await;

        push_tx.send(PushEvent::Notification(sample(9, false))).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let (list, unread) = engine.snapshot().await;
        assert_eq!(list[0].id, 9);
        assert_eq!(unread, 1);
        assert!(matches!(
            events.try_recv(),
            Ok(SyncEvent::NewNotification(n)) if n.id == 9
        ));

        // Redelivery of the same event: no duplicate, no second toast.
        push_tx.send(PushEvent::Notification(sample(9, false))).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let (list, unread) = engine.snapshot().await;
        assert_eq!(list.len(), 1);
        assert_eq!(unread, 1);
        assert!(events.try_recv().is_err());

        engine.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_push_channel_leaves_polling_running() {
        let fetch = Arc::new(MockFetch::default());
        let (mut engine, _events, push_tx) = engine_with_loop(fetch.clone());
        tokio::time::sleep(Duration::from_millis(10)).await;

        push_tx
            .send(PushEvent::Disconnected {
                reason: "budget exhausted".to_string(),
            })
            .unwrap();
        drop(push_tx);
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(fetch.list_calls() >= 3, "polling survives the push task's end");

        engine.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_fires_once_and_parks_polling() {
        let fetch = Arc::new(MockFetch::default());
        fetch.auth_fail.store(true, Ordering::SeqCst);
        let (mut engine, mut events, push_tx) = engine_with_loop(fetch.clone());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(matches!(events.try_recv(), Ok(SyncEvent::AuthExpired)));
        assert_eq!(fetch.list_calls(), 1);

        // A disconnect would normally arm the poll timer; with rejected
        // credentials it must not.
        push_tx
            .send(PushEvent::Disconnected {
                reason: "drop".to_string(),
            })
            .unwrap();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fetch.list_calls(), 1, "rejected token is not retried");

        let repeats = std::iter::from_fn(|| events.try_recv().ok())
            .filter(|event| matches!(event, SyncEvent::AuthExpired))
            .count();
        assert_eq!(repeats, 0, "AuthExpired fires exactly once");

        // The loop itself stays alive for push traffic.
        push_tx.send(PushEvent::Notification(sample(4, false))).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(engine.unread_count().await, 1);

        engine.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_mid_polling_parks_the_timer() {
        let fetch = Arc::new(MockFetch::default());
        let (mut engine, mut events, push_tx) = engine_with_loop(fetch.clone());
        tokio::time::sleep(Duration::from_millis(10)).await;

        push_tx
            .send(PushEvent::Disconnected {
                reason: "drop".to_string(),
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fetch.list_calls(), 2);

        fetch.auth_fail.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fetch.list_calls(), 3);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fetch.list_calls(), 3, "no further ticks after rejection");

        let fired = std::iter::from_fn(|| events.try_recv().ok())
            .filter(|event| matches!(event, SyncEvent::AuthExpired))
            .count();
        assert_eq!(fired, 1);

        engine.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn delivery_mode_tracks_the_active_path() {
        let fetch = Arc::new(MockFetch::default());
        let (mut engine, _events, push_tx) = engine_with_loop(fetch.clone());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            engine.delivery_mode(),
            DeliveryMode::Poll,
            "poll until push reports in"
        );

        push_tx.send(PushEvent::Connected).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(engine.delivery_mode(), DeliveryMode::Push);

        // An application-level channel error arms polling even though the
        // socket is still open; the mode follows the active path.
        push_tx
            .send(PushEvent::ChannelError("server error".to_string()))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(engine.delivery_mode(), DeliveryMode::Poll);

        push_tx.send(PushEvent::Connected).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(engine.delivery_mode(), DeliveryMode::Push);

        push_tx
            .send(PushEvent::Disconnected {
                reason: "drop".to_string(),
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(engine.delivery_mode(), DeliveryMode::Poll);

        engine.shutdown();
    }

    #[tokio::test]
    async fn mark_read_applies_locally_only_on_success() {
        let fetch = Arc::new(MockFetch::default());
        let (engine, _events) = SyncEngine::new(fetch.clone() as Arc<dyn FetchChannel>);
        engine
            .store
            .lock()
            .await
            .replace_all(vec![sample(5, false)]);

        fetch.fail_mark_read.store(true, Ordering::SeqCst);
        assert!(engine.mark_read(5).await.is_err());
        assert_eq!(engine.unread_count().await, 1, "rejected call leaves store");

        fetch.fail_mark_read.store(false, Ordering::SeqCst);
        engine.mark_read(5).await.unwrap();
        assert_eq!(engine.unread_count().await, 0);
        assert_eq!(fetch.mark_read_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn mark_all_read_reconciles_with_a_fresh_fetch() {
        let fetch = Arc::new(MockFetch::default());
        let (engine, _events) = SyncEngine::new(fetch.clone() as Arc<dyn FetchChannel>);
        engine
            .store
            .lock()
            .await
            .replace_all(vec![sample(2, false), sample(1, false)]);

        fetch.set_response(vec![sample(2, true), sample(1, true)]);
        engine.mark_all_read().await.unwrap();

        assert_eq!(fetch.mark_all_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fetch.list_calls(), 1, "bulk op is followed by a re-fetch");
        let (list, unread) = engine.snapshot().await;
        assert!(list.iter().all(|n| n.is_read));
        assert_eq!(unread, 0);
    }
}
