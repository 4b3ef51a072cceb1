use std::{collections::HashMap, sync::Arc, time::Duration};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    before_send,
    bundle::{
        AliasBundle, Bundle, CaptureBundle, CaptureExceptionBundle, Connection,
        GroupIdentifyBundle, IdentifyBundle,
    },
    event::{ALIAS_EVENT, EXCEPTION_EVENT, GROUP_IDENTIFY_EVENT, IDENTIFY_EVENT},
    ActionRunner, Alias, AllFlags, AllFlagsAndPayloads, Capture, CaptureException, ClientConfig,
    DispatchBundle, Error, Event, FeatureFlag, FeatureFlagPayload, FeatureFlagResult, FlagValue,
    GroupIdentify, GroupKey, Identify, Operation, Result, Scheduler,
};

const ERROR_MESSAGE: &str = "errorMessage";
const ERROR_NAME: &str = "errorName";
const ERROR_STACK: &str = "errorStack";
const ALIAS_PROPERTY: &str = "alias";

/// Front client for PostHog analytics and feature flags.
///
/// In order to create a client instance, first create [`ClientConfig`]. Create one client per
/// process and pass it the host context on every call.
///
/// # Capabilities
///
/// Event operations ([`Client::capture`], [`Client::identify`], [`Client::group_identify`],
/// [`Client::alias`], [`Client::capture_exception`]) only need a [`Scheduler`]: they build the
/// event, run it through the `before_send` pipeline and schedule a [`Worker`](crate::Worker)
/// call. They return as soon as the call is scheduled and never perform network I/O themselves,
/// which makes them safe to use from transactional code.
///
/// Feature-flag reads need an [`ActionRunner`] because they wait for the backend's answer. A
/// context that can only schedule work cannot be used for them:
///
/// ```compile_fail
/// # use std::time::Duration;
/// # use posthog_deferred::{ClientConfig, DispatchBundle, FeatureFlag, Operation, Result, Scheduler};
/// struct Transaction;
///
/// impl Scheduler for Transaction {
///     fn run_after(&self, _: Duration, _: Operation, _: DispatchBundle) -> Result<()> {
///         Ok(())
///     }
/// }
///
/// let client = ClientConfig::from_api_key("api-key").to_client();
/// client.get_feature_flag(&Transaction, FeatureFlag::new("beta", "user-1"));
/// ```
pub struct Client<'a> {
    config: ClientConfig<'a>,
}

impl<'a> Client<'a> {
    /// Create a new `Client` using the specified configuration.
    pub fn new(config: ClientConfig<'a>) -> Self {
        Client { config }
    }

    /// Capture a custom event.
    ///
    /// Returns once the worker call is scheduled. Events suppressed by `before_send` return
    /// `Ok(())` as well.
    ///
    /// # Errors
    ///
    /// - [`Error::Serialization`] if the event cannot be encoded into a bundle.
    /// - Whatever the scheduler returns if it refuses the submission.
    pub fn capture(&self, ctx: &impl Scheduler, args: Capture) -> Result<()> {
        let event = Event {
            event: args.event,
            distinct_id: args.distinct_id,
            properties: args.properties,
            timestamp: args.timestamp,
            groups: args.groups,
            uuid: args.uuid,
        };
        let Some(event) = self.before_send(event) else {
            return Ok(());
        };

        self.dispatch(
            ctx,
            Operation::Capture,
            CaptureBundle {
                distinct_id: event.distinct_id,
                event: event.event,
                properties: event.properties,
                groups: event.groups,
                send_feature_flags: args.send_feature_flags,
                timestamp: event.timestamp.map(|ts| ts.timestamp_millis()),
                uuid: event.uuid,
                disable_geoip: args.disable_geoip,
            },
        )
    }

    /// Set person properties, sent as a `$identify` event.
    pub fn identify(&self, ctx: &impl Scheduler, args: Identify) -> Result<()> {
        let event = Event {
            properties: args.properties,
            ..Event::new(IDENTIFY_EVENT, args.distinct_id)
        };
        let Some(event) = self.before_send(event) else {
            return Ok(());
        };

        self.dispatch(
            ctx,
            Operation::Identify,
            IdentifyBundle {
                distinct_id: event.distinct_id,
                properties: event.properties,
                disable_geoip: args.disable_geoip,
            },
        )
    }

    /// Set group properties, sent as a `$groupidentify` event.
    ///
    /// The pipeline sees the group in [`Event::groups`]. If a transform leaves exactly one group
    /// there, that group is the one updated.
    pub fn group_identify(&self, ctx: &impl Scheduler, args: GroupIdentify) -> Result<()> {
        let distinct_id = args
            .distinct_id
            .unwrap_or_else(|| format!("{}_{}", args.group_type, args.group_key));
        let event = Event {
            properties: args.properties,
            groups: Some(HashMap::from([(
                args.group_type.clone(),
                GroupKey::String(args.group_key.clone()),
            )])),
            ..Event::new(GROUP_IDENTIFY_EVENT, distinct_id)
        };
        let Some(event) = self.before_send(event) else {
            return Ok(());
        };

        // A transform may retarget the group; anything but a single group keeps the original.
        let retargeted = event
            .groups
            .as_ref()
            .filter(|groups| groups.len() == 1)
            .and_then(|groups| groups.iter().next());
        let (group_type, group_key) = match retargeted {
            Some((group_type, group_key)) => (group_type.clone(), group_key.to_string()),
            None => (args.group_type, args.group_key),
        };

        self.dispatch(
            ctx,
            Operation::GroupIdentify,
            GroupIdentifyBundle {
                group_type,
                group_key,
                properties: event.properties,
                distinct_id: Some(event.distinct_id),
                disable_geoip: args.disable_geoip,
            },
        )
    }

    /// Link `alias` to `distinct_id`, sent as a `$create_alias` event.
    ///
    /// The pipeline sees the alias as the `"alias"` property.
    pub fn alias(&self, ctx: &impl Scheduler, args: Alias) -> Result<()> {
        let event = Event::new(ALIAS_EVENT, args.distinct_id)
            .with_property(ALIAS_PROPERTY, args.alias.clone());
        let Some(event) = self.before_send(event) else {
            return Ok(());
        };

        let alias = event
            .properties
            .as_ref()
            .and_then(|props| props.get(ALIAS_PROPERTY))
            .and_then(Value::as_str)
            .map_or(args.alias, str::to_owned);

        self.dispatch(
            ctx,
            Operation::Alias,
            AliasBundle {
                distinct_id: event.distinct_id,
                alias,
                disable_geoip: args.disable_geoip,
            },
        )
    }

    /// Report an error, sent as a `$exception` event.
    ///
    /// The pipeline sees the error as `errorMessage`, `errorName` and `errorStack` properties
    /// next to `additional_properties`.
    pub fn capture_exception(&self, ctx: &impl Scheduler, args: CaptureException) -> Result<()> {
        let had_additional = args.additional_properties.is_some();
        let mut properties = args.additional_properties.unwrap_or_default();
        properties.insert(ERROR_MESSAGE.to_owned(), args.error.message.clone().into());
        if let Some(name) = &args.error.name {
            properties.insert(ERROR_NAME.to_owned(), name.clone().into());
        }
        if let Some(stack) = &args.error.stack {
            properties.insert(ERROR_STACK.to_owned(), stack.clone().into());
        }

        let event = Event {
            properties: Some(properties),
            ..Event::new(EXCEPTION_EVENT, args.distinct_id)
        };
        let Some(event) = self.before_send(event) else {
            return Ok(());
        };

        let mut properties = event.properties.unwrap_or_default();
        let error_message =
            take_string(&mut properties, ERROR_MESSAGE).unwrap_or(args.error.message);
        let error_name = take_string(&mut properties, ERROR_NAME);
        let error_stack = take_string(&mut properties, ERROR_STACK);
        let additional_properties =
            (had_additional || !properties.is_empty()).then_some(properties);

        self.dispatch(
            ctx,
            Operation::CaptureException,
            CaptureExceptionBundle {
                distinct_id: event.distinct_id,
                error_message,
                error_name,
                error_stack,
                additional_properties,
            },
        )
    }

    /// Evaluate a flag: the variant for multivariate flags, `true`/`false` otherwise.
    ///
    /// Returns `Ok(None)` if the backend does not know the flag.
    ///
    /// # Errors
    ///
    /// Backend failures ([`Error::Unauthorized`], [`Error::Backend`], [`Error::Network`]) are
    /// returned as they surface from the action runner.
    pub fn get_feature_flag(
        &self,
        ctx: &impl ActionRunner,
        args: FeatureFlag,
    ) -> Result<Option<FlagValue>> {
        self.invoke(ctx, Operation::GetFeatureFlag, args)
    }

    /// Whether a flag is enabled for the subject. `Ok(None)` if the flag is unknown.
    pub fn is_feature_enabled(
        &self,
        ctx: &impl ActionRunner,
        args: FeatureFlag,
    ) -> Result<Option<bool>> {
        self.invoke(ctx, Operation::IsFeatureEnabled, args)
    }

    /// JSON payload attached to the flag's evaluated value, if any.
    pub fn get_feature_flag_payload(
        &self,
        ctx: &impl ActionRunner,
        args: FeatureFlagPayload,
    ) -> Result<Option<Value>> {
        self.invoke(ctx, Operation::GetFeatureFlagPayload, args)
    }

    /// Full evaluation result of a single flag.
    pub fn get_feature_flag_result(
        &self,
        ctx: &impl ActionRunner,
        args: FeatureFlag,
    ) -> Result<Option<FeatureFlagResult>> {
        self.invoke(ctx, Operation::GetFeatureFlagResult, args)
    }

    /// Values of all flags for the subject.
    pub fn get_all_flags(
        &self,
        ctx: &impl ActionRunner,
        args: AllFlags,
    ) -> Result<HashMap<String, FlagValue>> {
        Ok(self
            .invoke(ctx, Operation::GetAllFlags, args)?
            .unwrap_or_default())
    }

    /// Values and payloads of all flags for the subject.
    pub fn get_all_flags_and_payloads(
        &self,
        ctx: &impl ActionRunner,
        args: AllFlags,
    ) -> Result<AllFlagsAndPayloads> {
        Ok(self
            .invoke(ctx, Operation::GetAllFlagsAndPayloads, args)?
            .unwrap_or_default())
    }

    fn before_send(&self, event: Event) -> Option<Event> {
        let name = event.event.clone();
        let result = before_send::apply(
            self.config.before_send.iter().map(|transform| transform.as_ref()),
            event,
        );
        if result.is_none() {
            log::debug!(target: "posthog", event:display = name; "event suppressed by before_send");
        }
        result
    }

    fn connection(&self) -> Connection {
        Connection {
            api_key: self.config.api_key.clone(),
            host: self.config.host.clone(),
        }
    }

    fn bundle<T: Serialize>(&self, args: T) -> Result<DispatchBundle> {
        DispatchBundle::from_args(&Bundle {
            connection: self.connection(),
            args,
        })
    }

    fn dispatch<T: Serialize>(
        &self,
        ctx: &impl Scheduler,
        operation: Operation,
        args: T,
    ) -> Result<()> {
        let bundle = self.bundle(args)?;

        log::trace!(target: "posthog",
                    operation:display = operation,
                    bundle:serde = bundle.as_value();
                    "scheduling deferred call");

        ctx.run_after(Duration::ZERO, operation, bundle)
    }

    fn invoke<T: Serialize, R: DeserializeOwned>(
        &self,
        ctx: &impl ActionRunner,
        operation: Operation,
        args: T,
    ) -> Result<Option<R>> {
        let bundle = self.bundle(args)?;

        log::trace!(target: "posthog", operation:display = operation; "invoking action");

        let value = ctx.run_action(operation, bundle)?;
        Option::<R>::deserialize(value).map_err(|err| Error::InvalidResult {
            operation,
            source: Arc::new(err),
        })
    }
}

fn take_string(properties: &mut Map<String, Value>, key: &str) -> Option<String> {
    match properties.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}
