//! Capabilities a host execution context hands to the [`Client`](crate::Client).
//!
//! Hosts that separate transactional code from side-effecting actions give the two kinds of code
//! different abilities. Transactional code can only *schedule* work for later; actions can run
//! other actions and wait for their result. Each is a separate trait here, and every client
//! operation asks for the one capability it needs, so handing a transactional context to a
//! feature-flag read is a compile error rather than a runtime surprise.
use std::{fmt, time::Duration};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// Work the [`Worker`](crate::Worker) knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    /// [`Client::capture`](crate::Client::capture).
    Capture,
    /// [`Client::identify`](crate::Client::identify).
    Identify,
    /// [`Client::group_identify`](crate::Client::group_identify).
    GroupIdentify,
    /// [`Client::alias`](crate::Client::alias).
    Alias,
    /// [`Client::capture_exception`](crate::Client::capture_exception).
    CaptureException,
    /// [`Client::get_feature_flag`](crate::Client::get_feature_flag).
    GetFeatureFlag,
    /// [`Client::is_feature_enabled`](crate::Client::is_feature_enabled).
    IsFeatureEnabled,
    /// [`Client::get_feature_flag_payload`](crate::Client::get_feature_flag_payload).
    GetFeatureFlagPayload,
    /// [`Client::get_feature_flag_result`](crate::Client::get_feature_flag_result).
    GetFeatureFlagResult,
    /// [`Client::get_all_flags`](crate::Client::get_all_flags).
    GetAllFlags,
    /// [`Client::get_all_flags_and_payloads`](crate::Client::get_all_flags_and_payloads).
    GetAllFlagsAndPayloads,
}

impl Operation {
    /// Stable name of the operation, suitable for registering it with a host.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Capture => "capture",
            Operation::Identify => "identify",
            Operation::GroupIdentify => "groupIdentify",
            Operation::Alias => "alias",
            Operation::CaptureException => "captureException",
            Operation::GetFeatureFlag => "getFeatureFlag",
            Operation::IsFeatureEnabled => "isFeatureEnabled",
            Operation::GetFeatureFlagPayload => "getFeatureFlagPayload",
            Operation::GetFeatureFlagResult => "getFeatureFlagResult",
            Operation::GetAllFlags => "getAllFlags",
            Operation::GetAllFlagsAndPayloads => "getAllFlagsAndPayloads",
        }
    }

    /// Whether the operation only records data and has no meaningful result.
    pub fn is_fire_and_forget(&self) -> bool {
        matches!(
            self,
            Operation::Capture
                | Operation::Identify
                | Operation::GroupIdentify
                | Operation::Alias
                | Operation::CaptureException
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully serialized arguments for one [`Operation`].
///
/// A bundle is plain JSON data: it holds no references, callbacks or handles, so a host is free
/// to persist it, ship it to another process, or replay it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DispatchBundle(Value);

impl DispatchBundle {
    /// Serialize `args` into a bundle.
    pub fn from_args<T: Serialize>(args: &T) -> Result<DispatchBundle> {
        Ok(DispatchBundle(serde_json::to_value(args)?))
    }

    pub(crate) fn to_args<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.0)
    }

    /// Borrow the bundle as JSON.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Take the bundle's JSON.
    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<DispatchBundle> for Value {
    fn from(bundle: DispatchBundle) -> Value {
        bundle.0
    }
}

/// Deferred-scheduling capability, available in transactional and action contexts alike.
///
/// Implementations must return as soon as the submission is accepted; they must not wait for
/// the operation to execute. Retries and durability are the implementation's business.
pub trait Scheduler {
    /// Submit `operation` to run after `delay` with `bundle` as its arguments.
    fn run_after(&self, delay: Duration, operation: Operation, bundle: DispatchBundle)
        -> Result<()>;
}

/// Remote-invocation capability, available only to isolated actions.
///
/// Blocks until the invoked operation has finished and returns its result unchanged.
pub trait ActionRunner {
    /// Execute `operation` with `bundle` and return its JSON result.
    fn run_action(&self, operation: Operation, bundle: DispatchBundle) -> Result<Value>;
}

impl<T: Scheduler + ?Sized> Scheduler for &T {
    fn run_after(
        &self,
        delay: Duration,
        operation: Operation,
        bundle: DispatchBundle,
    ) -> Result<()> {
        (**self).run_after(delay, operation, bundle)
    }
}

impl<T: ActionRunner + ?Sized> ActionRunner for &T {
    fn run_action(&self, operation: Operation, bundle: DispatchBundle) -> Result<Value> {
        (**self).run_action(operation, bundle)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{DispatchBundle, Operation};

    #[test]
    fn operation_names_match_serialized_form() {
        for op in [
            Operation::Capture,
            Operation::GroupIdentify,
            Operation::CaptureException,
            Operation::GetAllFlagsAndPayloads,
        ] {
            assert_eq!(serde_json::to_value(op).unwrap(), json!(op.as_str()));
        }
    }

    #[test]
    fn only_event_operations_are_fire_and_forget() {
        assert!(Operation::Alias.is_fire_and_forget());
        assert!(!Operation::GetFeatureFlag.is_fire_and_forget());
    }

    #[test]
    fn bundle_is_transparent_json() {
        let bundle = DispatchBundle::from_args(&json!({"apiKey": "k"})).unwrap();
        assert_eq!(serde_json::to_string(&bundle).unwrap(), r#"{"apiKey":"k"}"#);
    }
}
