use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::constants::TASK_STATUS_DELETED;

#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    PartialEq,
    Eq,
    Hash,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationKind {
    TaskAssigned,
    ExtensionRequested,
    LeaderInvitation,
    /// Catch-all; unrecognized wire values decode here as well.
    #[serde(other)]
    Generic,
}

/// Notification payload as delivered by both the fetch and push channels.
/// `data` is an opaque kind-dependent payload (extension days/reason, etc.);
/// optional fields may be absent entirely and decode as `None`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: i64,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_status: Option<String>,
}

impl Notification {
    /// The subject entity was deleted server-side; render distinctly, keep the entry.
    pub fn subject_deleted(&self) -> bool {
        self.task_status.as_deref() == Some(TASK_STATUS_DELETED)
    }
}
