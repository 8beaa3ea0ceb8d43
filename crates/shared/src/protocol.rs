use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Item;

/// Result of running an item. Every dispatch path ends here; nothing throws
/// past the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub ok: bool,
    pub message: String,
}

impl DispatchOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Manual,
    Card,
    Cloud,
}

impl TriggerSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Card => "card",
            Self::Cloud => "cloud",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedItem {
    pub name: String,
    #[serde(flatten)]
    pub item: Item,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveItemRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_name: Option<String>,
    #[serde(flatten)]
    pub item: Item,
    #[serde(default)]
    pub run_after_save: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveItemResponse {
    pub item: NamedItem,
    /// Present when the save asked for an immediate run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<DispatchOutcome>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunItemRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceActionRequest {
    #[serde(default)]
    pub ip: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceActionResponse {
    pub msg: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseLinkRequest {
    pub link: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseLinkResponse {
    pub json: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerKind {
    Card,
    Cloud,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ListenerState {
    Starting,
    Disabled,
    Idle {
        reason: String,
    },
    Connecting {
        target: String,
    },
    Connected {
        target: String,
        since: DateTime<Utc>,
    },
    Backoff {
        attempt: u32,
        retry_in_secs: u64,
        last_error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerHealth {
    pub listener: ListenerKind,
    #[serde(flatten)]
    pub state: ListenerState,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub card: ListenerHealth,
    pub cloud: ListenerHealth,
}
