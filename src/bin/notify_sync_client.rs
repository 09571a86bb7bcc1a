use std::sync::Arc;
use std::time::Duration;

use notify_sync_client::channels::fetch::HttpFetchChannel;
use notify_sync_client::channels::push::PushConfig;
use notify_sync_client::config::APP_CONFIG;
use notify_sync_client::engine::{SyncConfig, SyncEngine, SyncEvent};
use notify_sync_client::utils::tracing::init_standard_tracing;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_standard_tracing(env!("CARGO_CRATE_NAME"));

    let fetch = Arc::new(HttpFetchChannel::new(
        &APP_CONFIG.api_base_url,
        &APP_CONFIG.api_token,
    ));
    let (mut engine, mut events) = SyncEngine::new(fetch);

    let mut push = PushConfig::new(
        &APP_CONFIG.socket_url,
        &APP_CONFIG.api_token,
        &APP_CONFIG.user_id,
    );
    push.max_reconnect_attempts = APP_CONFIG.max_reconnect_attempts;
    push.base_reconnect_delay = Duration::from_millis(APP_CONFIG.base_reconnect_delay_ms);
    push.max_reconnect_delay = Duration::from_millis(APP_CONFIG.max_reconnect_delay_ms);
    push.connect_timeout = Duration::from_secs(APP_CONFIG.connect_timeout_secs);

    let mut config = SyncConfig::new(push);
    config.poll_interval = Duration::from_secs(APP_CONFIG.poll_interval_secs);
    engine.start(config);

    tracing::info!("notification sync running for user {}", APP_CONFIG.user_id);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(SyncEvent::NewNotification(n)) => {
                    tracing::info!("[{}] {}: {}", n.kind, n.title, n.message);
                }
                Some(SyncEvent::ConnectionChanged(status)) => {
                    tracing::info!("push connection: {status:?}");
                }
                Some(SyncEvent::AuthExpired) => {
                    tracing::error!("session credentials rejected, exiting");
                    break;
                }
                None => break,
            },
        }
    }

    engine.shutdown();
    let unread = engine.unread_count().await;
    tracing::info!("shutting down with {unread} unread notifications");
    Ok(())
}
