use clap::Parser;
use once_cell::sync::Lazy;

use crate::constants;

pub static APP_CONFIG: Lazy<Config> = Lazy::new(|| {
    dotenvy::dotenv().ok();
    Config::parse()
});

#[derive(Debug, Parser)]
pub struct Config {
    /// Base URL of the task management REST API, e.g. https://api.example.com/api
    #[clap(long, env)]
    pub api_base_url: String,

    /// Websocket endpoint for server-pushed notifications
    #[clap(long, env)]
    pub socket_url: String,

    /// Bearer token for the current session
    #[clap(long, env)]
    pub api_token: String,

    /// User id to join on the push channel
    #[clap(long, env)]
    pub user_id: String,

    #[clap(long, env, default_value = "info")]
    pub log_level: String,

    #[clap(long, env, default_value_t = constants::DEFAULT_POLL_INTERVAL_SECS)]
    pub poll_interval_secs: u64,

    #[clap(long, env, default_value_t = constants::DEFAULT_MAX_RECONNECT_ATTEMPTS)]
    pub max_reconnect_attempts: usize,

    #[clap(long, env, default_value_t = constants::DEFAULT_BASE_RECONNECT_DELAY_MS)]
    pub base_reconnect_delay_ms: u64,

    #[clap(long, env, default_value_t = constants::DEFAULT_MAX_RECONNECT_DELAY_MS)]
    pub max_reconnect_delay_ms: u64,

    #[clap(long, env, default_value_t = constants::DEFAULT_CONNECT_TIMEOUT_SECS)]
    pub connect_timeout_secs: u64,
}
