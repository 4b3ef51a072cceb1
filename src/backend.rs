//! HTTP connection to the PostHog capture and flags APIs.
//!
//! A [`BackendConnection`] lives for exactly one worker call: it is opened, used for one
//! operation and shut down. Captured events are buffered until `flush_at` of them are queued;
//! the worker uses a threshold of one so every event is sent as soon as it is captured.
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use reqwest::{StatusCode, Url};
use serde::Serialize;
use serde_json::Value;

use crate::{
    flags::{FeatureFlagResult, FlagsResponse},
    Error, Properties, Result,
};

const BATCH_ENDPOINT: &str = "/batch/";
const FLAGS_ENDPOINT: &str = "/flags/";
const FLAGS_API_VERSION: &str = "2";

const LIB_NAME: &str = "posthog-deferred-rust";

/// An event ready to be sent to the capture API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct EventMessage {
    pub event: String,
    pub distinct_id: String,
    pub properties: Properties,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(rename = "type")]
    kind: &'static str,
}

impl EventMessage {
    pub fn new(event: impl Into<String>, distinct_id: impl Into<String>) -> EventMessage {
        EventMessage {
            event: event.into(),
            distinct_id: distinct_id.into(),
            properties: Properties::new(),
            timestamp: Utc::now(),
            uuid: None,
            kind: "capture",
        }
    }

    pub fn property(mut self, key: &str, value: impl Into<Value>) -> EventMessage {
        self.properties.insert(key.to_owned(), value.into());
        self
    }

    pub fn uuid(mut self, uuid: Option<String>) -> EventMessage {
        self.uuid = uuid;
        self
    }

    /// Add `properties` on top of the existing ones.
    pub fn extend(mut self, properties: Option<Properties>) -> EventMessage {
        if let Some(properties) = properties {
            self.properties.extend(properties);
        }
        self
    }
}

/// Parameters of a `/flags` evaluation request.
#[derive(Debug, Clone, Default, Serialize)]
pub(crate) struct FlagsQuery {
    pub distinct_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub person_properties: Option<Properties>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_properties: Option<HashMap<String, Properties>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub geoip_disable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flag_keys_to_evaluate: Option<Vec<String>>,
}

#[derive(Serialize)]
struct FlagsRequest<'a> {
    api_key: &'a str,
    #[serde(flatten)]
    query: &'a FlagsQuery,
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    api_key: &'a str,
    batch: &'a [EventMessage],
}

/// A connection to the analytics backend scoped to a single worker call.
pub(crate) struct BackendConnection {
    client: reqwest::blocking::Client,
    api_key: String,
    batch_url: Url,
    flags_url: Url,
    flush_at: usize,
    queue: Vec<EventMessage>,
}

impl BackendConnection {
    /// Open a connection. No request is made until something is flushed or queried.
    pub fn open(api_key: &str, host: &str, flush_at: usize) -> Result<BackendConnection> {
        let host = host.trim_end_matches('/');
        let batch_url = Url::parse(&format!("{}{}", host, BATCH_ENDPOINT))
            .map_err(Error::InvalidHost)?;
        let flags_url = Url::parse_with_params(
            &format!("{}{}", host, FLAGS_ENDPOINT),
            &[("v", FLAGS_API_VERSION)],
        )
        .map_err(Error::InvalidHost)?;

        log::trace!(target: "posthog", host; "opening backend connection");

        Ok(BackendConnection {
            client: reqwest::blocking::Client::new(),
            api_key: api_key.to_owned(),
            batch_url,
            flags_url,
            flush_at: flush_at.max(1),
            queue: Vec::new(),
        })
    }

    /// Queue an event, flushing once `flush_at` events are waiting.
    pub fn capture(&mut self, mut message: EventMessage) -> Result<()> {
        message
            .properties
            .insert("$lib".to_owned(), LIB_NAME.into());
        message.properties.insert(
            "$lib_version".to_owned(),
            env!("CARGO_PKG_VERSION").into(),
        );

        log::trace!(target: "posthog",
                    event:display = message.event,
                    distinct_id:display = message.distinct_id;
                    "queueing event");

        self.queue.push(message);
        if self.queue.len() >= self.flush_at {
            self.flush()?;
        }
        Ok(())
    }

    /// Send all queued events. Events are removed from the queue even if sending fails.
    pub fn flush(&mut self) -> Result<()> {
        if self.queue.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.queue);

        log::debug!(target: "posthog", count = batch.len(); "sending event batch");

        let response = self
            .client
            .post(self.batch_url.clone())
            .json(&BatchRequest {
                api_key: &self.api_key,
                batch: &batch,
            })
            .send()?;
        check_status(response)?;

        Ok(())
    }

    /// Evaluate flags remotely, keyed by flag key.
    pub fn flags(&self, query: &FlagsQuery) -> Result<HashMap<String, FeatureFlagResult>> {
        log::debug!(target: "posthog",
                    distinct_id:display = query.distinct_id;
                    "requesting flag evaluation");

        let response = self
            .client
            .post(self.flags_url.clone())
            .json(&FlagsRequest {
                api_key: &self.api_key,
                query,
            })
            .send()?;
        let response: FlagsResponse = check_status(response)?.json()?;

        if response.errors_while_computing_flags {
            log::warn!(target: "posthog", "backend reported errors while computing flags, results may be partial");
        }

        Ok(response.into_results())
    }

    /// Flush outstanding events and release the connection.
    pub fn shutdown(mut self) -> Result<()> {
        self.flush()
    }
}

impl Drop for BackendConnection {
    fn drop(&mut self) {
        if !self.queue.is_empty() {
            log::warn!(target: "posthog",
                       count = self.queue.len();
                       "backend connection dropped with unsent events");
        }
    }
}

fn check_status(response: reqwest::blocking::Response) -> Result<reqwest::blocking::Response> {
    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::UNAUTHORIZED => {
            log::warn!(target: "posthog", "backend rejected the request. Check your API key");
            Err(Error::Unauthorized)
        }
        status => {
            log::warn!(target: "posthog", "received non-success response from backend: {:?}", status);
            Err(Error::Backend {
                status: status.as_u16(),
            })
        }
    }
}
