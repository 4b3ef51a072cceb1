use crate::{BeforeSend, Client};

/// Configuration for [`Client`].
///
/// # Examples
/// ```
/// # use posthog_deferred::{ClientConfig, Event};
/// let client = ClientConfig::from_api_key("phc_project_key")
///     .host("https://eu.i.posthog.com")
///     .before_send(|event: Event| Some(event.with_property("environment", "staging")))
///     .to_client();
/// ```
pub struct ClientConfig<'a> {
    pub(crate) api_key: String,
    pub(crate) host: String,
    pub(crate) before_send: Vec<Box<dyn BeforeSend + Send + Sync + 'a>>,
}

impl<'a> ClientConfig<'a> {
    /// Default backend host.
    pub const DEFAULT_HOST: &'static str = "https://us.i.posthog.com";

    /// Environment variable holding the project API key.
    pub const API_KEY_ENV: &'static str = "POSTHOG_API_KEY";

    /// Environment variable overriding the backend host.
    pub const HOST_ENV: &'static str = "POSTHOG_HOST";

    /// Create a configuration from process environment.
    ///
    /// `POSTHOG_API_KEY` and `POSTHOG_HOST` are read once, now. A missing API key is allowed
    /// here; the backend will reject calls made with it.
    pub fn from_env() -> Self {
        let api_key = std::env::var(Self::API_KEY_ENV).unwrap_or_default();
        let host =
            std::env::var(Self::HOST_ENV).unwrap_or_else(|_| Self::DEFAULT_HOST.to_owned());

        log::debug!(target: "posthog",
                    host:display = host,
                    api_key_set = !api_key.is_empty();
                    "loaded configuration from environment");

        ClientConfig {
            api_key,
            host,
            before_send: Vec::new(),
        }
    }

    /// Create a configuration with an explicit API key. The host still honors `POSTHOG_HOST`.
    ///
    /// ```
    /// # use posthog_deferred::ClientConfig;
    /// ClientConfig::from_api_key("api-key");
    /// ```
    pub fn from_api_key(api_key: impl Into<String>) -> Self {
        ClientConfig::from_env().api_key(api_key)
    }

    /// Override the API key.
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    /// Override the backend host. Clients should use the default setting in most cases.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Append a transform to the `before_send` pipeline. Transforms run in the order they are
    /// added.
    pub fn before_send(mut self, transform: impl BeforeSend + Send + Sync + 'a) -> Self {
        self.before_send.push(Box::new(transform));
        self
    }

    /// Create a new [`Client`] using this configuration.
    pub fn to_client(self) -> Client<'a> {
        Client::new(self)
    }
}

impl std::fmt::Debug for ClientConfig<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("host", &self.host)
            .field("before_send", &self.before_send.len())
            .finish_non_exhaustive()
    }
}
