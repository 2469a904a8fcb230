use std::time::Duration;

use derive_more::Display;

use crate::{Client, Error, Result};

/// Configuration for [`Client`].
///
/// # Examples
/// ```
/// # use std::time::Duration;
/// # use flagvault::ClientConfig;
/// let client = ClientConfig::from_api_key("live_api-key")
///     .timeout(Duration::from_secs(5))
///     .cache_ttl(Duration::from_secs(600))
///     .to_client()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub(crate) api_key: String,
    pub(crate) base_url: String,
    pub(crate) timeout: Duration,
    pub(crate) cache: CacheConfig,
}

impl ClientConfig {
    /// Default base URL for API calls.
    pub const DEFAULT_BASE_URL: &'static str = "https://api.flagvault.com";

    /// Default request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Environment variable read by [`ClientConfig::from_env`] for the API key.
    pub const API_KEY_ENV: &'static str = "FLAGVAULT_API_KEY";

    /// Environment variable read by [`ClientConfig::from_env`] for the base URL.
    pub const BASE_URL_ENV: &'static str = "FLAGVAULT_BASE_URL";

    /// Create a default FlagVault configuration using the specified API key.
    ///
    /// ```
    /// # use flagvault::ClientConfig;
    /// ClientConfig::from_api_key("api-key");
    /// ```
    pub fn from_api_key(api_key: impl Into<String>) -> Self {
        ClientConfig {
            api_key: api_key.into(),
            base_url: ClientConfig::DEFAULT_BASE_URL.to_owned(),
            timeout: ClientConfig::DEFAULT_TIMEOUT,
            cache: CacheConfig::default(),
        }
    }

    /// Create a configuration from `FLAGVAULT_API_KEY` and (optionally) `FLAGVAULT_BASE_URL`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var(ClientConfig::API_KEY_ENV).map_err(|_| {
            Error::InvalidConfig(format!(
                "{} environment variable is not set",
                ClientConfig::API_KEY_ENV
            ))
        })?;

        let config = ClientConfig::from_api_key(api_key);
        Ok(match std::env::var(ClientConfig::BASE_URL_ENV) {
            Ok(base_url) => config.base_url(base_url),
            Err(_) => config,
        })
    }

    /// Override base URL for API calls. Clients should use the default setting in most cases.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the timeout applied to every API request.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace the whole cache configuration.
    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Enable or disable caching. With caching disabled, every evaluation hits the API.
    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.cache.enabled = enabled;
        self
    }

    /// Set how long cached flag values (and preloaded flags) stay fresh.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache.ttl = ttl;
        self
    }

    /// Set the maximum number of cached flag values.
    pub fn cache_max_size(mut self, max_size: usize) -> Self {
        self.cache.max_size = max_size;
        self
    }

    /// Set the background refresh interval. `Duration::ZERO` disables background refresh.
    pub fn cache_refresh_interval(mut self, interval: Duration) -> Self {
        self.cache.refresh_interval = interval;
        self
    }

    /// Set what [`Client::is_enabled`] does when the API cannot be reached on a cache miss.
    pub fn cache_fallback_behavior(mut self, behavior: FallbackBehavior) -> Self {
        self.cache.fallback_behavior = behavior;
        self
    }

    /// Create a new [`Client`] using the specified configuration.
    ///
    /// ```
    /// # use flagvault::{ClientConfig, Client};
    /// let client: Client = ClientConfig::from_api_key("api-key").to_client().unwrap();
    /// ```
    pub fn to_client(self) -> Result<Client> {
        Client::new(self)
    }

    /// Normalize and check the configuration before a client is built from it.
    pub(crate) fn validate(mut self) -> Result<Self> {
        if self.api_key.is_empty() {
            return Err(Error::InvalidConfig(
                "API Key is required to initialize the SDK.".to_owned(),
            ));
        }
        let trimmed = self.base_url.trim_end_matches('/').len();
        self.base_url.truncate(trimmed);
        url::Url::parse(&self.base_url).map_err(Error::InvalidBaseUrl)?;
        Ok(self)
    }
}

/// Cache configuration. See [`ClientConfig`] for builder shortcuts.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Whether evaluation results are cached. Defaults to `true`.
    pub enabled: bool,
    /// Time-to-live of cached entries. Defaults to [`CacheConfig::DEFAULT_TTL`].
    pub ttl: Duration,
    /// Maximum number of cached flag values. Defaults to [`CacheConfig::DEFAULT_MAX_SIZE`].
    pub max_size: usize,
    /// Interval between background refreshes of soon-to-expire entries; zero disables the
    /// background thread. Defaults to [`CacheConfig::DEFAULT_REFRESH_INTERVAL`].
    pub refresh_interval: Duration,
    /// Behavior when a flag cannot be fetched on a cache miss.
    pub fallback_behavior: FallbackBehavior,
}

impl CacheConfig {
    /// Default value for [`CacheConfig::ttl`].
    pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);
    /// Default value for [`CacheConfig::max_size`].
    pub const DEFAULT_MAX_SIZE: usize = 1000;
    /// Default value for [`CacheConfig::refresh_interval`].
    pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);
}

impl Default for CacheConfig {
    fn default() -> CacheConfig {
        CacheConfig {
            enabled: true,
            ttl: CacheConfig::DEFAULT_TTL,
            max_size: CacheConfig::DEFAULT_MAX_SIZE,
            refresh_interval: CacheConfig::DEFAULT_REFRESH_INTERVAL,
            fallback_behavior: FallbackBehavior::default(),
        }
    }
}

/// What [`Client::is_enabled`] does when a flag is not cached and the API request fails.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackBehavior {
    /// Return the caller-provided default value.
    #[default]
    #[display(fmt = "default")]
    Default,
    /// Return the last value fetched for the flag if an expired entry is still cached, otherwise
    /// the caller-provided default value.
    #[display(fmt = "stale")]
    Stale,
    /// Return the error to the caller.
    #[display(fmt = "throw")]
    Throw,
}

/// Environment the API key belongs to, derived from the key prefix.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Keys prefixed with `live_`, and any key without a recognized prefix.
    #[display(fmt = "production")]
    Production,
    /// Keys prefixed with `test_`.
    #[display(fmt = "test")]
    Test,
}

impl Environment {
    /// Detect the environment from an API key.
    ///
    /// ```
    /// # use flagvault::Environment;
    /// assert_eq!(Environment::from_api_key("test_abc"), Environment::Test);
    /// assert_eq!(Environment::from_api_key("live_abc"), Environment::Production);
    /// ```
    pub fn from_api_key(api_key: &str) -> Environment {
        if api_key.starts_with("test_") {
            Environment::Test
        } else {
            Environment::Production
        }
    }
}
