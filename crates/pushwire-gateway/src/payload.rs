//! Notification payload types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Sound played for every notification.
pub const DEFAULT_SOUND: &str = "default";

/// Message shared by every device of a push.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    /// Alert text.
    pub text: String,
    /// Badge option; absent means the badge is reset to 0.
    #[serde(default)]
    pub badge: Option<i64>,
    /// Custom fields placed next to `aps` at the top level.
    #[serde(default)]
    pub custom: Map<String, Value>,
}

impl Message {
    /// Create a message with alert text only.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Set the badge option.
    pub fn with_badge(mut self, badge: i64) -> Self {
        self.badge = Some(badge);
        self
    }

    /// Add a custom top-level field.
    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let _ = self.custom.insert(key.into(), value.into());
        self
    }
}

/// A push target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Hex device token.
    pub token: String,
    /// Per-device badge offset added to the message badge.
    #[serde(default)]
    pub badge: Option<i64>,
}

impl Device {
    /// Create a device without a badge offset.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            badge: None,
        }
    }

    /// Set the per-device badge offset.
    pub fn with_badge(mut self, badge: i64) -> Self {
        self.badge = Some(badge);
        self
    }
}

/// The `aps` dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aps {
    /// Alert text.
    pub alert: String,
    /// Sound name.
    pub sound: String,
    /// Badge count.
    pub badge: u32,
}

/// JSON body of one notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// Standard dictionary.
    pub aps: Aps,
    /// Custom fields, flattened beside `aps`.
    #[serde(flatten)]
    pub custom: Map<String, Value>,
}

impl NotificationPayload {
    /// Build the payload for one device of a push.
    pub fn for_device(device: &Device, message: &Message) -> Self {
        let mut custom = message.custom.clone();
        if custom.remove("aps").is_some() {
            debug!("ignoring custom field named aps");
        }

        Self {
            aps: Aps {
                alert: message.text.clone(),
                sound: DEFAULT_SOUND.to_string(),
                badge: compute_badge(message.badge, device.badge),
            },
            custom,
        }
    }

    /// Compact JSON bytes.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Badge for a device: message option plus device offset, or 0 without an
/// option. Never negative.
pub fn compute_badge(message_badge: Option<i64>, device_offset: Option<i64>) -> u32 {
    let Some(base) = message_badge else {
        return 0;
    };
    let total = base.saturating_add(device_offset.unwrap_or(0));
    u32::try_from(total.max(0)).unwrap_or(u32::MAX)
}
