/// Server-pushed event carrying a notification payload.
pub const EVENT_NOTIFICATION: &str = "notification";
/// Server-pushed event carrying an application-level error payload.
pub const EVENT_ERROR: &str = "error";
/// Client-emitted event scoping delivery to the current user.
pub const EVENT_JOIN: &str = "join";

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: usize = 5;
pub const DEFAULT_BASE_RECONNECT_DELAY_MS: u64 = 1_000;
pub const DEFAULT_MAX_RECONNECT_DELAY_MS: u64 = 5_000;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 20;

/// Subject-entity marker set server-side when the referenced task was deleted.
pub const TASK_STATUS_DELETED: &str = "deleted";
