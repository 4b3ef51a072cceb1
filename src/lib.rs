//! A PostHog analytics and feature flag client for hosts that defer side effects.
//!
//! # Overview
//!
//! The SDK revolves around a [`Client`] that records analytics events and reads feature flags on
//! behalf of user code. The client never talks to PostHog directly. Every operation is packaged
//! into a serializable [`DispatchBundle`] and handed to the host, which runs it on a [`Worker`]
//! holding the backend connection.
//!
//! # Capabilities
//!
//! The host is passed into every call as a capability:
//!
//! - [`Scheduler`] accepts deferred work. Event operations ([`Client::capture`],
//!   [`Client::identify`], [`Client::group_identify`], [`Client::alias`] and
//!   [`Client::capture_exception`]) only need this one and return as soon as the work is queued.
//! - [`ActionRunner`] runs work and returns its result. Feature flag reads need it, and passing a
//!   context without it is a compile error.
//!
//! [`QueueScheduler`] and [`LocalActions`] implement both capabilities in-process for hosts that
//! don't provide their own.
//!
//! # `before_send`
//!
//! Transforms registered with [`ClientConfig::before_send`] see every event before it is
//! scheduled, in registration order. A transform may rewrite the event or drop it by returning
//! `None`, in which case nothing is scheduled and later transforms don't run. Flag reads don't go
//! through the pipeline.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! Analytics should not be critical enough to crash a host, so it is usually fine to log and
//! ignore errors returned from event operations. They still indicate that developer's attention
//! is needed: a host that refuses work, a misconfigured backend host, or a worker that has been
//! shut down.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate with the `posthog` target.
//! Consider integrating a `log`-compatible logger implementation for better visibility into SDK
//! operations.
//!
//! # Examples
//!
//! ```no_run
//! use posthog_deferred::{Capture, ClientConfig, FeatureFlag, LocalActions, QueueScheduler};
//!
//! let client = ClientConfig::from_env().to_client();
//! let queue = QueueScheduler::start()?;
//! let actions = LocalActions::new();
//!
//! client.capture(&queue, Capture::new("user-1", "signed_up"))?;
//!
//! if client.is_feature_enabled(&actions, FeatureFlag::new("new-onboarding", "user-1"))? == Some(true) {
//!     // ...
//! }
//!
//! queue.shutdown()?;
//! # Ok::<(), posthog_deferred::Error>(())
//! ```

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

mod args;
mod backend;
mod before_send;
mod bundle;
mod client;
mod config;
mod context;
mod error;
mod event;
mod exception;
mod flags;
mod host;
mod worker;

pub use args::{
    Alias, AllFlags, Capture, CaptureException, FeatureFlag, FeatureFlagPayload, FlagOptions,
    GroupIdentify, Identify,
};
pub use before_send::BeforeSend;
pub use client::Client;
pub use config::ClientConfig;
pub use context::{ActionRunner, DispatchBundle, Operation, Scheduler};
pub use error::{Error, Result};
pub use event::{
    Event, GroupKey, Properties, ALIAS_EVENT, EXCEPTION_EVENT, FEATURE_FLAG_CALLED_EVENT,
    GROUP_IDENTIFY_EVENT, IDENTIFY_EVENT,
};
pub use exception::NormalizedError;
pub use flags::{AllFlagsAndPayloads, FeatureFlagResult, FlagValue};
pub use host::{LocalActions, QueueScheduler};
pub use worker::Worker;
