//! Wire format of invalidation notifications.
//!
//! Every message is a JSON object carrying the publishing instance's
//! `originUuid` and an `actionId` naming the command:
//!
//! ```text
//! {"originUuid":"5f0c...","actionId":"DELETE_FROM_GROUP","key":"u1","group":"co1"}
//! {"originUuid":"5f0c...","actionId":"SET","key":"u1","value":{"name":"alice"}}
//! ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use layercache_core::CacheResult;

/// An invalidation command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "actionId", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationAction<V> {
    Clear,
    Delete {
        key: String,
    },
    DeleteMany {
        keys: Vec<String>,
    },
    /// Overwrites an entry; `value: null` stores a confirmed null.
    Set {
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group: Option<String>,
        value: Option<V>,
    },
    DeleteGroup {
        group: String,
    },
    DeleteFromGroup {
        key: String,
        group: String,
    },
}

impl<V> NotificationAction<V> {
    pub fn action_id(&self) -> &'static str {
        match self {
            Self::Clear => "CLEAR",
            Self::Delete { .. } => "DELETE",
            Self::DeleteMany { .. } => "DELETE_MANY",
            Self::Set { .. } => "SET",
            Self::DeleteGroup { .. } => "DELETE_GROUP",
            Self::DeleteFromGroup { .. } => "DELETE_FROM_GROUP",
        }
    }
}

/// A command stamped with the instance that published it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification<V> {
    pub origin_uuid: Uuid,
    #[serde(flatten)]
    pub action: NotificationAction<V>,
}

impl<V> Notification<V> {
    pub fn new(origin_uuid: Uuid, action: NotificationAction<V>) -> Self {
        Self {
            origin_uuid,
            action,
        }
    }
}

impl<V: Serialize> Notification<V> {
    pub fn encode(&self) -> CacheResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl<V: for<'de> Deserialize<'de>> Notification<V> {
    pub fn decode(payload: &str) -> CacheResult<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}
