//! Arguments accepted by [`Client`](crate::Client) operations.
//!
//! Required fields are set through `new()`; optional ones are public and can be filled in with
//! struct update syntax:
//!
//! ```
//! # use posthog_deferred::Capture;
//! let args = Capture {
//!     uuid: Some("0190b1d8-5c57-7a4c-9f00-000000000000".to_owned()),
//!     ..Capture::new("user-1", "signed_up")
//! };
//! ```
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{FlagValue, GroupKey, NormalizedError, Properties};

/// Arguments for [`Client::capture`](crate::Client::capture).
#[derive(Debug, Clone, Default)]
pub struct Capture {
    /// Person the event belongs to.
    pub distinct_id: String,
    /// Event name.
    pub event: String,
    /// Event properties.
    pub properties: Option<Properties>,
    /// Groups the event belongs to, keyed by group type.
    pub groups: Option<HashMap<String, GroupKey>>,
    /// Ask the worker to evaluate flags and attach them to the event.
    pub send_feature_flags: Option<bool>,
    /// When the event happened. Defaults to the time it is sent.
    pub timestamp: Option<DateTime<Utc>>,
    /// Idempotency key for the event.
    pub uuid: Option<String>,
    /// Skip GeoIP enrichment of the event.
    pub disable_geoip: Option<bool>,
}

impl Capture {
    /// Capture `event` for `distinct_id`.
    pub fn new(distinct_id: impl Into<String>, event: impl Into<String>) -> Capture {
        Capture {
            distinct_id: distinct_id.into(),
            event: event.into(),
            ..Default::default()
        }
    }
}

/// Arguments for [`Client::identify`](crate::Client::identify).
#[derive(Debug, Clone, Default)]
pub struct Identify {
    /// Person to update.
    pub distinct_id: String,
    /// Person properties to set.
    pub properties: Option<Properties>,
    /// Skip GeoIP enrichment of the event.
    pub disable_geoip: Option<bool>,
}

impl Identify {
    /// Identify `distinct_id` without setting properties.
    pub fn new(distinct_id: impl Into<String>) -> Identify {
        Identify {
            distinct_id: distinct_id.into(),
            ..Default::default()
        }
    }
}

/// Arguments for [`Client::group_identify`](crate::Client::group_identify).
#[derive(Debug, Clone, Default)]
pub struct GroupIdentify {
    /// Group type, e.g. `"company"`.
    pub group_type: String,
    /// Key of the group within its type.
    pub group_key: String,
    /// Group properties to set.
    pub properties: Option<Properties>,
    /// Person the update is attributed to. Defaults to `"{group_type}_{group_key}"`.
    pub distinct_id: Option<String>,
    /// Skip GeoIP enrichment of the event.
    pub disable_geoip: Option<bool>,
}

impl GroupIdentify {
    /// Identify the group `group_key` of type `group_type`.
    pub fn new(group_type: impl Into<String>, group_key: impl Into<String>) -> GroupIdentify {
        GroupIdentify {
            group_type: group_type.into(),
            group_key: group_key.into(),
            ..Default::default()
        }
    }
}

/// Arguments for [`Client::alias`](crate::Client::alias).
#[derive(Debug, Clone, Default)]
pub struct Alias {
    /// Existing identifier of the person.
    pub distinct_id: String,
    /// Additional identifier to link to `distinct_id`.
    pub alias: String,
    /// Skip GeoIP enrichment of the event.
    pub disable_geoip: Option<bool>,
}

impl Alias {
    /// Link `alias` to `distinct_id`.
    pub fn new(distinct_id: impl Into<String>, alias: impl Into<String>) -> Alias {
        Alias {
            distinct_id: distinct_id.into(),
            alias: alias.into(),
            disable_geoip: None,
        }
    }
}

/// Arguments for [`Client::capture_exception`](crate::Client::capture_exception).
#[derive(Debug, Clone)]
pub struct CaptureException {
    /// Person the error happened for.
    pub distinct_id: String,
    /// The error, already normalized.
    pub error: NormalizedError,
    /// Extra properties sent with the `$exception` event.
    pub additional_properties: Option<Properties>,
}

impl CaptureException {
    /// `error` can be anything convertible to [`NormalizedError`]: a message, a JSON value, or
    /// the result of [`NormalizedError::from_error`].
    pub fn new(distinct_id: impl Into<String>, error: impl Into<NormalizedError>) -> Self {
        CaptureException {
            distinct_id: distinct_id.into(),
            error: error.into(),
            additional_properties: None,
        }
    }
}

/// Evaluation options shared by single-flag reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagOptions {
    /// Groups to evaluate group-based flags against, keyed by group type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<HashMap<String, String>>,
    /// Person properties to evaluate with, on top of what the backend already knows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub person_properties: Option<Properties>,
    /// Group type to properties of that group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_properties: Option<HashMap<String, Properties>>,
    /// Send a `$feature_flag_called` event for the read. Defaults to `true`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_feature_flag_events: Option<bool>,
    /// Skip GeoIP-based person properties during evaluation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_geoip: Option<bool>,
}

/// Arguments for the single-flag reads: [`Client::get_feature_flag`](crate::Client::get_feature_flag),
/// [`Client::is_feature_enabled`](crate::Client::is_feature_enabled) and
/// [`Client::get_feature_flag_result`](crate::Client::get_feature_flag_result).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlag {
    /// Flag key.
    pub key: String,
    /// Person to evaluate the flag for.
    pub distinct_id: String,
    /// Evaluation options.
    #[serde(flatten)]
    pub options: FlagOptions,
}

impl FeatureFlag {
    /// Evaluate flag `key` for `distinct_id` with default options.
    pub fn new(key: impl Into<String>, distinct_id: impl Into<String>) -> FeatureFlag {
        FeatureFlag {
            key: key.into(),
            distinct_id: distinct_id.into(),
            options: FlagOptions::default(),
        }
    }
}

/// Arguments for [`Client::get_feature_flag_payload`](crate::Client::get_feature_flag_payload).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlagPayload {
    /// Flag key.
    pub key: String,
    /// Person to evaluate the flag for.
    pub distinct_id: String,
    /// Only return the payload if the flag evaluates to this value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_value: Option<FlagValue>,
    /// Evaluation options.
    #[serde(flatten)]
    pub options: FlagOptions,
}

impl FeatureFlagPayload {
    /// Look up the payload of flag `key` for `distinct_id`.
    pub fn new(key: impl Into<String>, distinct_id: impl Into<String>) -> FeatureFlagPayload {
        FeatureFlagPayload {
            key: key.into(),
            distinct_id: distinct_id.into(),
            match_value: None,
            options: FlagOptions::default(),
        }
    }
}

/// Arguments for [`Client::get_all_flags`](crate::Client::get_all_flags) and
/// [`Client::get_all_flags_and_payloads`](crate::Client::get_all_flags_and_payloads).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllFlags {
    /// Person to evaluate flags for.
    pub distinct_id: String,
    /// Groups to evaluate group-based flags against, keyed by group type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<HashMap<String, String>>,
    /// Person properties to evaluate with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub person_properties: Option<Properties>,
    /// Group type to properties of that group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_properties: Option<HashMap<String, Properties>>,
    /// Skip GeoIP-based person properties during evaluation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_geoip: Option<bool>,
    /// Restrict evaluation to these flags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag_keys: Option<Vec<String>>,
}

impl AllFlags {
    /// Evaluate every flag for `distinct_id`.
    pub fn new(distinct_id: impl Into<String>) -> AllFlags {
        AllFlags {
            distinct_id: distinct_id.into(),
            ..Default::default()
        }
    }
}
