use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};

use crate::{
    backend::{BackendConnection, EventMessage, FlagsQuery},
    bundle::{
        AliasBundle, Bundle, CaptureBundle, CaptureExceptionBundle, Connection,
        GroupIdentifyBundle, IdentifyBundle,
    },
    event::{
        ALIAS_EVENT, EXCEPTION_EVENT, FEATURE_FLAG_CALLED_EVENT, GROUP_IDENTIFY_EVENT,
        IDENTIFY_EVENT,
    },
    AllFlags, AllFlagsAndPayloads, DispatchBundle, Error, FeatureFlag, FeatureFlagPayload,
    FeatureFlagResult, FlagOptions, FlagValue, Operation, Result,
};

/// Every event is sent as soon as it is captured.
const FLUSH_AT: usize = 1;

/// Executes dispatch bundles against the analytics backend.
///
/// This is the only component that talks to the network. Each call opens its own backend
/// connection, performs exactly one operation and shuts the connection down before returning,
/// so nothing is shared between calls and nothing outlives them. Failures are returned as-is;
/// the worker never retries.
///
/// Hosts register [`Worker::execute`] as the handler behind their deferred queue and action
/// runner. [`QueueScheduler`](crate::QueueScheduler) and [`LocalActions`](crate::LocalActions)
/// do this for in-process use.
#[derive(Debug, Clone, Default)]
pub struct Worker {
    _private: (),
}

impl Worker {
    /// Create a new worker.
    pub fn new() -> Worker {
        Worker::default()
    }

    /// Execute `operation` with the arguments in `bundle`.
    ///
    /// Fire-and-forget operations return `Value::Null`. Flag reads return their result, with
    /// `Value::Null` standing for "no value".
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidBundle`] if `bundle` does not fit `operation`.
    /// - [`Error::InvalidHost`], [`Error::Unauthorized`], [`Error::Backend`] or
    ///   [`Error::Network`] from the backend call.
    pub fn execute(&self, operation: Operation, bundle: &DispatchBundle) -> Result<Value> {
        log::debug!(target: "posthog", operation:display = operation; "executing worker call");

        match operation {
            Operation::Capture => {
                let bundle: Bundle<CaptureBundle> = parse(operation, bundle)?;
                with_backend(&bundle.connection, |backend| capture(backend, bundle.args))?;
                Ok(Value::Null)
            }
            Operation::Identify => {
                let bundle: Bundle<IdentifyBundle> = parse(operation, bundle)?;
                with_backend(&bundle.connection, |backend| identify(backend, bundle.args))?;
                Ok(Value::Null)
            }
            Operation::GroupIdentify => {
                let bundle: Bundle<GroupIdentifyBundle> = parse(operation, bundle)?;
                with_backend(&bundle.connection, |backend| {
                    group_identify(backend, bundle.args)
                })?;
                Ok(Value::Null)
            }
            Operation::Alias => {
                let bundle: Bundle<AliasBundle> = parse(operation, bundle)?;
                with_backend(&bundle.connection, |backend| alias(backend, bundle.args))?;
                Ok(Value::Null)
            }
            Operation::CaptureException => {
                let bundle: Bundle<CaptureExceptionBundle> = parse(operation, bundle)?;
                with_backend(&bundle.connection, |backend| {
                    capture_exception(backend, bundle.args)
                })?;
                Ok(Value::Null)
            }
            Operation::GetFeatureFlag => {
                let bundle: Bundle<FeatureFlag> = parse(operation, bundle)?;
                let result = read_with_backend(&bundle.connection, |backend| {
                    evaluate_flag(backend, &bundle.args)
                })?;
                to_result(result.map(|r| r.value()))
            }
            Operation::IsFeatureEnabled => {
                let bundle: Bundle<FeatureFlag> = parse(operation, bundle)?;
                let result = read_with_backend(&bundle.connection, |backend| {
                    evaluate_flag(backend, &bundle.args)
                })?;
                to_result(result.map(|r| r.value().is_enabled()))
            }
            Operation::GetFeatureFlagResult => {
                let bundle: Bundle<FeatureFlag> = parse(operation, bundle)?;
                let result = read_with_backend(&bundle.connection, |backend| {
                    evaluate_flag(backend, &bundle.args)
                })?;
                to_result(result)
            }
            Operation::GetFeatureFlagPayload => {
                let bundle: Bundle<FeatureFlagPayload> = parse(operation, bundle)?;
                let payload = read_with_backend(&bundle.connection, |backend| {
                    flag_payload(backend, &bundle.args)
                })?;
                Ok(payload.unwrap_or(Value::Null))
            }
            Operation::GetAllFlags => {
                let bundle: Bundle<AllFlags> = parse(operation, bundle)?;
                let flags = read_with_backend(&bundle.connection, |backend| {
                    backend.flags(&all_flags_query(&bundle.args))
                })?;
                let values: HashMap<String, FlagValue> = flags
                    .into_iter()
                    .map(|(key, result)| (key, result.value()))
                    .collect();
                to_result(values)
            }
            Operation::GetAllFlagsAndPayloads => {
                let bundle: Bundle<AllFlags> = parse(operation, bundle)?;
                let flags = read_with_backend(&bundle.connection, |backend| {
                    backend.flags(&all_flags_query(&bundle.args))
                })?;
                let mut all = AllFlagsAndPayloads::default();
                for (key, result) in flags {
                    all.feature_flags.insert(key.clone(), result.value());
                    if let Some(payload) = result.payload {
                        all.feature_flag_payloads.insert(key, payload);
                    }
                }
                to_result(all)
            }
        }
    }
}

fn parse<T: DeserializeOwned>(operation: Operation, bundle: &DispatchBundle) -> Result<T> {
    bundle.to_args().map_err(|err| {
        log::warn!(target: "posthog", operation:display = operation; "malformed dispatch bundle: {}", err);
        Error::InvalidBundle {
            operation,
            source: Arc::new(err),
        }
    })
}

fn to_result<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Open a connection, run `f` and shut the connection down, whether `f` succeeded or not.
fn with_backend<T>(
    connection: &Connection,
    f: impl FnOnce(&mut BackendConnection) -> Result<T>,
) -> Result<T> {
    let mut backend = BackendConnection::open(&connection.api_key, &connection.host, FLUSH_AT)?;
    let result = f(&mut backend);
    let shutdown = backend.shutdown();
    let value = result?;
    shutdown?;
    Ok(value)
}

/// Like [`with_backend`] for reads. The answer has already been received, so a failed shutdown
/// is logged instead of replacing it.
fn read_with_backend<T>(
    connection: &Connection,
    f: impl FnOnce(&mut BackendConnection) -> Result<T>,
) -> Result<T> {
    let mut backend = BackendConnection::open(&connection.api_key, &connection.host, FLUSH_AT)?;
    let result = f(&mut backend);
    if let Err(err) = backend.shutdown() {
        log::warn!(target: "posthog", "failed to flush events after flag read: {}", err);
    }
    result
}

fn timestamp_from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_else(|| {
        log::warn!(target: "posthog", millis; "timestamp out of range, using current time");
        Utc::now()
    })
}

fn geoip(message: EventMessage, disable_geoip: Option<bool>) -> EventMessage {
    if disable_geoip == Some(true) {
        message.property("$geoip_disable", true)
    } else {
        message
    }
}

fn capture(backend: &mut BackendConnection, args: CaptureBundle) -> Result<()> {
    let mut message = EventMessage::new(args.event, args.distinct_id.clone())
        .extend(args.properties)
        .uuid(args.uuid);
    if let Some(millis) = args.timestamp {
        message.timestamp = timestamp_from_millis(millis);
    }

    let string_groups = args.groups.as_ref().map(|groups| {
        groups
            .iter()
            .map(|(group_type, key)| (group_type.clone(), key.to_string()))
            .collect::<HashMap<_, _>>()
    });

    if args.send_feature_flags == Some(true) {
        let flags = backend.flags(&FlagsQuery {
            distinct_id: args.distinct_id,
            groups: string_groups.clone(),
            geoip_disable: args.disable_geoip.unwrap_or(false),
            ..Default::default()
        })?;

        let mut active: Vec<&str> = Vec::new();
        for (key, result) in &flags {
            let value = result.value();
            if value.is_enabled() {
                active.push(key);
            }
            message = message.property(&format!("$feature/{}", key), json!(value));
        }
        active.sort_unstable();
        message = message.property("$active_feature_flags", json!(active));
    }

    if let Some(groups) = string_groups {
        message = message.property("$groups", json!(groups));
    }

    backend.capture(geoip(message, args.disable_geoip))
}

fn identify(backend: &mut BackendConnection, args: IdentifyBundle) -> Result<()> {
    let message = EventMessage::new(IDENTIFY_EVENT, args.distinct_id)
        .property("$set", args.properties.unwrap_or_default());
    backend.capture(geoip(message, args.disable_geoip))
}

fn group_identify(backend: &mut BackendConnection, args: GroupIdentifyBundle) -> Result<()> {
    let distinct_id = args
        .distinct_id
        .unwrap_or_else(|| format!("{}_{}", args.group_type, args.group_key));
    let message = EventMessage::new(GROUP_IDENTIFY_EVENT, distinct_id)
        .property("$group_type", args.group_type)
        .property("$group_key", args.group_key)
        .property("$group_set", args.properties.unwrap_or_default());
    backend.capture(geoip(message, args.disable_geoip))
}

fn alias(backend: &mut BackendConnection, args: AliasBundle) -> Result<()> {
    let message = EventMessage::new(ALIAS_EVENT, args.distinct_id.clone())
        .property("distinct_id", args.distinct_id)
        .property("alias", args.alias);
    backend.capture(geoip(message, args.disable_geoip))
}

fn capture_exception(backend: &mut BackendConnection, args: CaptureExceptionBundle) -> Result<()> {
    let exception_type = args.error_name.unwrap_or_else(|| "Error".to_owned());

    let mut message = EventMessage::new(EXCEPTION_EVENT, args.distinct_id)
        .property(
            "$exception_list",
            json!([{
                "type": exception_type,
                "value": args.error_message,
                "mechanism": {"handled": true, "synthetic": false},
            }]),
        )
        .property("$exception_type", exception_type)
        .property("$exception_message", args.error_message);
    if let Some(stack) = args.error_stack {
        message = message.property("$exception_stack_trace_raw", stack);
    }

    backend.capture(message.extend(args.additional_properties))
}

fn flag_query(key: &str, distinct_id: &str, options: &FlagOptions) -> FlagsQuery {
    FlagsQuery {
        distinct_id: distinct_id.to_owned(),
        groups: options.groups.clone(),
        person_properties: options.person_properties.clone(),
        group_properties: options.group_properties.clone(),
        geoip_disable: options.disable_geoip.unwrap_or(false),
        flag_keys_to_evaluate: Some(vec![key.to_owned()]),
    }
}

fn all_flags_query(args: &AllFlags) -> FlagsQuery {
    FlagsQuery {
        distinct_id: args.distinct_id.clone(),
        groups: args.groups.clone(),
        person_properties: args.person_properties.clone(),
        group_properties: args.group_properties.clone(),
        geoip_disable: args.disable_geoip.unwrap_or(false),
        flag_keys_to_evaluate: args.flag_keys.clone(),
    }
}

/// Evaluate a single flag and, unless disabled, record a `$feature_flag_called` event.
fn evaluate_flag(
    backend: &mut BackendConnection,
    args: &FeatureFlag,
) -> Result<Option<FeatureFlagResult>> {
    let mut flags = backend.flags(&flag_query(&args.key, &args.distinct_id, &args.options))?;
    let result = flags.remove(&args.key);

    if args.options.send_feature_flag_events != Some(false) {
        let response = result.as_ref().map(FeatureFlagResult::value);
        let mut message = EventMessage::new(FEATURE_FLAG_CALLED_EVENT, args.distinct_id.clone())
            .property("$feature_flag", args.key.clone())
            .property("$feature_flag_response", json!(response))
            .property("locally_evaluated", false)
            .property(&format!("$feature/{}", args.key), json!(response));
        if let Some(groups) = &args.options.groups {
            message = message.property("$groups", json!(groups));
        }
        // Tracking is best effort; the caller still gets the evaluated flag.
        if let Err(err) = backend.capture(geoip(message, args.options.disable_geoip)) {
            log::warn!(target: "posthog",
                       flag:display = args.key;
                       "failed to record {} event: {}", FEATURE_FLAG_CALLED_EVENT, err);
        }
    }

    Ok(result)
}

fn flag_payload(backend: &mut BackendConnection, args: &FeatureFlagPayload) -> Result<Option<Value>> {
    let mut flags = backend.flags(&flag_query(&args.key, &args.distinct_id, &args.options))?;
    let Some(result) = flags.remove(&args.key) else {
        return Ok(None);
    };

    if let Some(expected) = &args.match_value {
        if result.value() != *expected {
            return Ok(None);
        }
    }
    Ok(result.payload)
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};
    use wiremock::{
        matchers::{body_partial_json, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    use super::Worker;
    use crate::{DispatchBundle, Error, Operation, Result};

    async fn execute(server: &MockServer, operation: Operation, args: Value) -> Result<Value> {
        let _ = env_logger::builder().is_test(true).try_init();

        let mut fields = json!({"apiKey": "phc_test", "host": server.uri()});
        fields
            .as_object_mut()
            .unwrap()
            .extend(args.as_object().unwrap().clone());
        let bundle = DispatchBundle::from_args(&fields).unwrap();

        // The worker uses a blocking HTTP client, keep it off the async executor.
        tokio::task::spawn_blocking(move || Worker::new().execute(operation, &bundle))
            .await
            .unwrap()
    }

    async fn mock_batch(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/batch/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "Ok"})))
            .mount(server)
            .await;
    }

    async fn mock_flags(server: &MockServer, flags: Value) {
        Mock::given(method("POST"))
            .and(path("/flags/"))
            .and(query_param("v", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "flags": flags,
                "errorsWhileComputingFlags": false,
            })))
            .mount(server)
            .await;
    }

    /// Every event received on the batch endpoint, in arrival order.
    async fn sent_events(server: &MockServer) -> Vec<Value> {
        let mut events = Vec::new();
        for request in server.received_requests().await.unwrap() {
            if request.url.path() != "/batch/" {
                continue;
            }
            let body: Value = request.body_json().unwrap();
            assert_eq!(body["api_key"], "phc_test");
            events.extend(body["batch"].as_array().unwrap().iter().cloned());
        }
        events
    }

    fn beta_flag() -> Value {
        json!({
            "beta": {
                "key": "beta",
                "enabled": true,
                "variant": "test",
                "metadata": {"payload": "{\"discount\": 10}"}
            }
        })
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn capture_sends_one_event_immediately() {
        let server = MockServer::start().await;
        mock_batch(&server).await;

        let result = execute(
            &server,
            Operation::Capture,
            json!({
                "distinctId": "user-1",
                "event": "signed_up",
                "properties": {"plan": "pro"},
                "groups": {"company": "acme"},
                "timestamp": 1_700_000_000_000i64,
                "uuid": "uuid-1",
                "disableGeoip": true,
            }),
        )
        .await
        .unwrap();

        assert_eq!(result, Value::Null);
        let events = sent_events(&server).await;
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event["event"], "signed_up");
        assert_eq!(event["distinct_id"], "user-1");
        assert_eq!(event["uuid"], "uuid-1");
        assert_eq!(event["timestamp"], "2023-11-14T22:13:20Z");
        assert_eq!(event["properties"]["plan"], "pro");
        assert_eq!(event["properties"]["$groups"], json!({"company": "acme"}));
        assert_eq!(event["properties"]["$geoip_disable"], true);
        assert_eq!(event["properties"]["$lib"], "posthog-deferred-rust");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn capture_can_attach_feature_flags() {
        let server = MockServer::start().await;
        mock_batch(&server).await;
        mock_flags(
            &server,
            json!({
                "beta": {"key": "beta", "enabled": true, "variant": "test"},
                "legacy": {"key": "legacy", "enabled": false},
            }),
        )
        .await;

        execute(
            &server,
            Operation::Capture,
            json!({"distinctId": "user-1", "event": "clicked", "sendFeatureFlags": true}),
        )
        .await
        .unwrap();

        let events = sent_events(&server).await;
        let properties = &events[0]["properties"];
        assert_eq!(properties["$feature/beta"], "test");
        assert_eq!(properties["$feature/legacy"], false);
        assert_eq!(properties["$active_feature_flags"], json!(["beta"]));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn identify_group_identify_and_alias_use_reserved_events() {
        let server = MockServer::start().await;
        mock_batch(&server).await;

        execute(
            &server,
            Operation::Identify,
            json!({"distinctId": "user-1", "properties": {"name": "Ada"}}),
        )
        .await
        .unwrap();
        execute(
            &server,
            Operation::GroupIdentify,
            json!({"groupType": "company", "groupKey": "acme", "properties": {"size": 10}}),
        )
        .await
        .unwrap();
        execute(
            &server,
            Operation::Alias,
            json!({"distinctId": "user-1", "alias": "ada@example.com"}),
        )
        .await
        .unwrap();

        let events = sent_events(&server).await;
        assert_eq!(events.len(), 3);

        assert_eq!(events[0]["event"], "$identify");
        assert_eq!(events[0]["properties"]["$set"], json!({"name": "Ada"}));

        assert_eq!(events[1]["event"], "$groupidentify");
        assert_eq!(events[1]["distinct_id"], "company_acme");
        assert_eq!(events[1]["properties"]["$group_type"], "company");
        assert_eq!(events[1]["properties"]["$group_key"], "acme");
        assert_eq!(events[1]["properties"]["$group_set"], json!({"size": 10}));

        assert_eq!(events[2]["event"], "$create_alias");
        assert_eq!(events[2]["properties"]["distinct_id"], "user-1");
        assert_eq!(events[2]["properties"]["alias"], "ada@example.com");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn capture_exception_sends_exception_properties() {
        let server = MockServer::start().await;
        mock_batch(&server).await;

        execute(
            &server,
            Operation::CaptureException,
            json!({
                "distinctId": "user-1",
                "errorMessage": "bad type",
                "errorName": "TypeError",
                "errorStack": "TypeError: bad type",
                "additionalProperties": {"context": "signup"},
            }),
        )
        .await
        .unwrap();

        let events = sent_events(&server).await;
        let properties = &events[0]["properties"];
        assert_eq!(events[0]["event"], "$exception");
        assert_eq!(properties["$exception_type"], "TypeError");
        assert_eq!(properties["$exception_message"], "bad type");
        assert_eq!(properties["$exception_stack_trace_raw"], "TypeError: bad type");
        assert_eq!(properties["$exception_list"][0]["value"], "bad type");
        assert_eq!(properties["context"], "signup");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn get_feature_flag_returns_variant_and_records_call() {
        let server = MockServer::start().await;
        mock_batch(&server).await;
        Mock::given(method("POST"))
            .and(path("/flags/"))
            .and(body_partial_json(json!({
                "api_key": "phc_test",
                "distinct_id": "user-1",
                "flag_keys_to_evaluate": ["beta"],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"flags": beta_flag()})))
            .expect(1)
            .mount(&server)
            .await;

        let value = execute(
            &server,
            Operation::GetFeatureFlag,
            json!({"key": "beta", "distinctId": "user-1"}),
        )
        .await
        .unwrap();

        assert_eq!(value, json!("test"));
        let events = sent_events(&server).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["event"], "$feature_flag_called");
        assert_eq!(events[0]["properties"]["$feature_flag"], "beta");
        assert_eq!(events[0]["properties"]["$feature_flag_response"], "test");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn flag_reads_survive_failed_tracking_event() {
        let server = MockServer::start().await;
        mock_flags(&server, json!({"beta": {"key": "beta", "enabled": true}})).await;
        Mock::given(method("POST"))
            .and(path("/batch/"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let value = execute(
            &server,
            Operation::GetFeatureFlag,
            json!({"key": "beta", "distinctId": "user-1"}),
        )
        .await
        .unwrap();
        assert_eq!(value, json!(true));

        let enabled = execute(
            &server,
            Operation::IsFeatureEnabled,
            json!({"key": "beta", "distinctId": "user-1"}),
        )
        .await
        .unwrap();
        assert_eq!(enabled, json!(true));

        let result = execute(
            &server,
            Operation::GetFeatureFlagResult,
            json!({"key": "beta", "distinctId": "user-1"}),
        )
        .await
        .unwrap();
        assert_eq!(result["key"], "beta");
        assert_eq!(result["enabled"], true);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn flag_events_can_be_disabled() {
        let server = MockServer::start().await;
        mock_flags(&server, beta_flag()).await;
        Mock::given(method("POST"))
            .and(path("/batch/"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let enabled = execute(
            &server,
            Operation::IsFeatureEnabled,
            json!({"key": "beta", "distinctId": "user-1", "sendFeatureFlagEvents": false}),
        )
        .await
        .unwrap();

        assert_eq!(enabled, json!(true));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_flag_yields_null() {
        let server = MockServer::start().await;
        mock_batch(&server).await;
        mock_flags(&server, json!({})).await;

        for operation in [
            Operation::GetFeatureFlag,
            Operation::IsFeatureEnabled,
            Operation::GetFeatureFlagResult,
            Operation::GetFeatureFlagPayload,
        ] {
            let value = execute(
                &server,
                operation,
                json!({"key": "missing", "distinctId": "user-1"}),
            )
            .await
            .unwrap();
            assert_eq!(value, Value::Null, "{operation}");
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn payload_respects_match_value() {
        let server = MockServer::start().await;
        mock_flags(&server, beta_flag()).await;

        let matching = execute(
            &server,
            Operation::GetFeatureFlagPayload,
            json!({"key": "beta", "distinctId": "user-1", "matchValue": "test"}),
        )
        .await
        .unwrap();
        let other = execute(
            &server,
            Operation::GetFeatureFlagPayload,
            json!({"key": "beta", "distinctId": "user-1", "matchValue": "control"}),
        )
        .await
        .unwrap();

        assert_eq!(matching, json!({"discount": 10}));
        assert_eq!(other, Value::Null);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn feature_flag_result_includes_payload() {
        let server = MockServer::start().await;
        mock_batch(&server).await;
        mock_flags(&server, beta_flag()).await;

        let result = execute(
            &server,
            Operation::GetFeatureFlagResult,
            json!({"key": "beta", "distinctId": "user-1"}),
        )
        .await
        .unwrap();

        assert_eq!(
            result,
            json!({"key": "beta", "enabled": true, "variant": "test", "payload": {"discount": 10}})
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn all_flags_and_payloads() {
        let server = MockServer::start().await;
        mock_flags(
            &server,
            json!({
                "beta": {"key": "beta", "enabled": true, "metadata": {"payload": "[1, 2]"}},
                "legacy": {"key": "legacy", "enabled": false},
            }),
        )
        .await;

        let flags = execute(&server, Operation::GetAllFlags, json!({"distinctId": "user-1"}))
            .await
            .unwrap();
        let with_payloads = execute(
            &server,
            Operation::GetAllFlagsAndPayloads,
            json!({"distinctId": "user-1"}),
        )
        .await
        .unwrap();

        assert_eq!(flags, json!({"beta": true, "legacy": false}));
        assert_eq!(
            with_payloads,
            json!({
                "featureFlags": {"beta": true, "legacy": false},
                "featureFlagPayloads": {"beta": [1, 2]},
            })
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unauthorized_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = execute(
            &server,
            Operation::GetAllFlags,
            json!({"distinctId": "user-1"}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Unauthorized));

        let err = execute(
            &server,
            Operation::Identify,
            json!({"distinctId": "user-1"}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Unauthorized));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn server_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/batch/"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let err = execute(
            &server,
            Operation::Capture,
            json!({"distinctId": "user-1", "event": "clicked"}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Backend { status: 503 }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn malformed_bundle_fails_before_any_request() {
        let server = MockServer::start().await;

        let err = execute(&server, Operation::Alias, json!({"distinctId": "user-1"}))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::InvalidBundle {
                operation: Operation::Alias,
                ..
            }
        ));
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
