use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A caught error reduced to plain strings so it can cross the dispatch boundary.
///
/// Conversion is total: any input produces a `NormalizedError`, and `name`/`stack` are only
/// filled in when the source actually carries them as strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedError {
    /// Human-readable message. Always present.
    pub message: String,
    /// Error class or type name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Stack trace or cause chain, as text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl NormalizedError {
    /// Normalize a dynamically-typed thrown value. `None` stands for a missing value and becomes
    /// `"undefined"`.
    ///
    /// ```
    /// # use posthog_deferred::NormalizedError;
    /// # use serde_json::json;
    /// let err = NormalizedError::from_value(Some(&json!({"name": "TypeError", "message": "bad"})));
    /// assert_eq!(err.name.as_deref(), Some("TypeError"));
    /// assert_eq!(NormalizedError::from_value(Some(&json!(42))).message, "42");
    /// assert_eq!(NormalizedError::from_value(None).message, "undefined");
    /// ```
    pub fn from_value(value: Option<&Value>) -> NormalizedError {
        let Some(value) = value else {
            return NormalizedError::message_only("undefined");
        };

        match value {
            Value::Object(fields) => match fields.get("message") {
                Some(Value::String(message)) => NormalizedError {
                    message: message.clone(),
                    name: string_field(fields.get("name")),
                    stack: string_field(fields.get("stack")),
                },
                _ => NormalizedError::message_only(value.to_string()),
            },
            Value::String(message) => NormalizedError::message_only(message.clone()),
            other => NormalizedError::message_only(other.to_string()),
        }
    }

    /// Normalize a Rust error. The name is the error's type name without its module path and the
    /// stack lists the `source()` chain, if there is one.
    pub fn from_error<E: std::error::Error + ?Sized>(err: &E) -> NormalizedError {
        let name = short_type_name(std::any::type_name::<E>());

        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(format!("caused by: {}", cause));
            source = cause.source();
        }

        NormalizedError {
            message: err.to_string(),
            name: Some(name.to_owned()),
            stack: (!chain.is_empty()).then(|| chain.join("\n")),
        }
    }

    fn message_only(message: impl Into<String>) -> NormalizedError {
        NormalizedError {
            message: message.into(),
            name: None,
            stack: None,
        }
    }
}

fn string_field(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    }
}

fn short_type_name(full: &str) -> &str {
    // Generic parameters may contain `::` themselves, so only look before the first `<`.
    let head = full.split('<').next().unwrap_or(full);
    match head.rfind("::") {
        Some(idx) => &full[idx + 2..],
        None => full,
    }
}

impl From<&str> for NormalizedError {
    fn from(value: &str) -> Self {
        NormalizedError::message_only(value)
    }
}

impl From<String> for NormalizedError {
    fn from(value: String) -> Self {
        NormalizedError::message_only(value)
    }
}

impl From<Value> for NormalizedError {
    fn from(value: Value) -> Self {
        NormalizedError::from_value(Some(&value))
    }
}

impl From<&Value> for NormalizedError {
    fn from(value: &Value) -> Self {
        NormalizedError::from_value(Some(value))
    }
}
