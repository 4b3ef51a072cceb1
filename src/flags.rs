use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Value of an evaluated feature flag: `true`/`false` for boolean flags, or the variant key for
/// multivariate flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, From)]
#[serde(untagged)]
pub enum FlagValue {
    /// Value of a boolean flag, or of a multivariate flag that is disabled.
    Boolean(bool),
    /// Variant key of an enabled multivariate flag.
    Variant(String),
}

impl FlagValue {
    /// Whether the flag counts as enabled. Any variant is enabled.
    pub fn is_enabled(&self) -> bool {
        match self {
            FlagValue::Boolean(b) => *b,
            FlagValue::Variant(_) => true,
        }
    }

    /// The variant key, if this is a variant.
    pub fn as_variant(&self) -> Option<&str> {
        match self {
            FlagValue::Variant(v) => Some(v),
            FlagValue::Boolean(_) => None,
        }
    }
}

impl From<&str> for FlagValue {
    fn from(value: &str) -> Self {
        Self::Variant(value.to_owned())
    }
}

/// Full evaluation result of a single flag as computed by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlagResult {
    /// Flag key.
    pub key: String,
    /// Whether the flag matched the subject.
    pub enabled: bool,
    /// Variant key for multivariate flags.
    pub variant: Option<String>,
    /// JSON payload attached to the evaluated value.
    pub payload: Option<Value>,
}

impl FeatureFlagResult {
    /// The value [`Client::get_feature_flag`](crate::Client::get_feature_flag) reports for this
    /// flag.
    pub fn value(&self) -> FlagValue {
        match &self.variant {
            Some(variant) if self.enabled => FlagValue::Variant(variant.clone()),
            _ => FlagValue::Boolean(self.enabled),
        }
    }
}

/// Values and payloads of every flag evaluated for a subject.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllFlagsAndPayloads {
    /// Flag key to evaluated value.
    pub feature_flags: HashMap<String, FlagValue>,
    /// Flag key to payload, for flags that have one.
    pub feature_flag_payloads: HashMap<String, Value>,
}

/// Body of a `/flags` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FlagsResponse {
    #[serde(default)]
    pub flags: HashMap<String, FlagDetail>,
    #[serde(default)]
    pub errors_while_computing_flags: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FlagDetail {
    pub key: String,
    pub enabled: bool,
    #[serde(default)]
    pub variant: Option<String>,
    #[serde(default)]
    pub metadata: Option<FlagMetadata>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FlagMetadata {
    #[serde(default)]
    pub payload: Option<Value>,
}

impl From<FlagDetail> for FeatureFlagResult {
    fn from(detail: FlagDetail) -> Self {
        let payload = detail
            .metadata
            .and_then(|metadata| metadata.payload)
            .filter(|payload| !payload.is_null())
            .map(parse_payload);

        FeatureFlagResult {
            key: detail.key,
            enabled: detail.enabled,
            variant: detail.variant,
            payload,
        }
    }
}

/// Payloads arrive JSON-encoded inside a string. Fall back to the raw string when it isn't JSON.
fn parse_payload(payload: Value) -> Value {
    match payload {
        Value::String(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
        other => other,
    }
}

impl FlagsResponse {
    pub fn into_results(self) -> HashMap<String, FeatureFlagResult> {
        self.flags
            .into_iter()
            .map(|(key, detail)| (key, detail.into()))
            .collect()
    }
}
