use std::{collections::HashMap, fmt};

use chrono::{DateTime, Utc};
use derive_more::From;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event name used by [`Client::identify`](crate::Client::identify).
pub const IDENTIFY_EVENT: &str = "$identify";
/// Event name used by [`Client::group_identify`](crate::Client::group_identify).
pub const GROUP_IDENTIFY_EVENT: &str = "$groupidentify";
/// Event name used by [`Client::alias`](crate::Client::alias).
pub const ALIAS_EVENT: &str = "$create_alias";
/// Event name used by [`Client::capture_exception`](crate::Client::capture_exception).
pub const EXCEPTION_EVENT: &str = "$exception";
/// Event sent by the worker when a single flag is evaluated.
pub const FEATURE_FLAG_CALLED_EVENT: &str = "$feature_flag_called";

/// Free-form event or person properties.
pub type Properties = Map<String, Value>;

/// An analytics event as seen by the [`BeforeSend`](crate::BeforeSend) pipeline.
///
/// Every event-producing client operation builds one of these before anything leaves the process.
/// Transforms receive it by value and return a replacement, so an event is never edited behind
/// the caller's back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Event name, e.g. `"signed_up"` or one of the reserved `$` names.
    pub event: String,
    /// Identifier of the person the event belongs to.
    pub distinct_id: String,
    /// Event properties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Properties>,
    /// When the event happened. The worker uses the send time when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Group type to group key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<HashMap<String, GroupKey>>,
    /// Idempotency key for the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

impl Event {
    /// Create an event with only a name and a distinct id set.
    pub fn new(event: impl Into<String>, distinct_id: impl Into<String>) -> Event {
        Event {
            event: event.into(),
            distinct_id: distinct_id.into(),
            properties: None,
            timestamp: None,
            groups: None,
            uuid: None,
        }
    }

    /// Return a copy with `key` set in properties, creating the map if needed.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Event {
        self.properties
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }
}

/// Key identifying a group within a group type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, From)]
#[serde(untagged)]
pub enum GroupKey {
    /// A string key.
    String(String),
    /// Numeric keys are sent as JSON numbers.
    Number(f64),
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::String(s) => f.write_str(s),
            GroupKey::Number(n) => write!(f, "{}", n),
        }
    }
}

impl From<&str> for GroupKey {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<i64> for GroupKey {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}
