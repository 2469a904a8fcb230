use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, OnceLock,
    },
    time::Duration,
};

use chrono::Utc;
use regex::Regex;

use crate::{
    cache::{FlagCache, Lookup},
    config::{CacheConfig, ClientConfig, Environment, FallbackBehavior},
    fetcher::{FlagFetcher, FlagFetcherConfig},
    refresh::RefreshThread,
    CacheStats, Error, FlagDebugInfo, FlagMetadata, Result,
};

/// Entries expiring within this window are refreshed by the background thread.
const REFRESH_WINDOW: Duration = Duration::from_secs(30);

const MAX_TARGET_ID_LEN: usize = 128;

/// A client for the FlagVault API.
///
/// In order to create a client instance, first create [`ClientConfig`].
///
/// The client is cheap to share between threads (`&Client` is all that is needed for
/// evaluation) and should be reused: it holds a connection pool and the flag cache.
///
/// # Background refresh
///
/// When caching is enabled and the refresh interval is not zero, the client starts a background
/// thread that re-fetches cached flags shortly before they expire. The thread is stopped when the
/// client is dropped or [`Client::shutdown`] is called.
///
/// # Examples
/// ```no_run
/// # use flagvault::ClientConfig;
/// let client = ClientConfig::from_api_key("live_api-key").to_client().unwrap();
/// if client.is_enabled("new-dashboard", false, Some("user-123")).unwrap_or(false) {
///     // show the new dashboard
/// }
/// ```
pub struct Client {
    inner: Arc<ClientInner>,
    refresh_thread: Mutex<Option<RefreshThread>>,
}

/// State shared between the client and its refresh thread.
struct ClientInner {
    config: ClientConfig,
    environment: Environment,
    fetcher: FlagFetcher,
    cache: FlagCache,
    refresh_in_progress: AtomicBool,
}

impl Client {
    /// Create a new `Client` using the specified configuration.
    ///
    /// ```
    /// # use flagvault::{ClientConfig, Client};
    /// let client = Client::new(ClientConfig::from_api_key("api-key")).unwrap();
    /// ```
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfig`] if the API key is empty.
    /// - [`Error::InvalidBaseUrl`] if the base URL cannot be parsed.
    /// - [`Error::Io`] if the background refresh thread failed to start.
    pub fn new(config: ClientConfig) -> Result<Client> {
        let config = config.validate()?;

        let fetcher = FlagFetcher::new(FlagFetcherConfig {
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            timeout: config.timeout,
        })?;

        let inner = Arc::new(ClientInner {
            environment: Environment::from_api_key(&config.api_key),
            cache: FlagCache::new(config.cache.ttl, config.cache.max_size),
            fetcher,
            config,
            refresh_in_progress: AtomicBool::new(false),
        });

        let refresh_interval = inner.config.cache.refresh_interval;
        let refresh_thread = if inner.config.cache.enabled && !refresh_interval.is_zero() {
            let inner = Arc::clone(&inner);
            Some(RefreshThread::start(refresh_interval, move || {
                inner.refresh_expiring_flags()
            })?)
        } else {
            None
        };

        log::debug!(target: "flagvault",
                    environment:display = inner.environment,
                    cache_enabled = inner.config.cache.enabled;
                    "initialized FlagVault client");

        Ok(Client {
            inner,
            refresh_thread: Mutex::new(refresh_thread),
        })
    }

    /// Check whether a feature flag is enabled, optionally for a specific target (user,
    /// organization, etc.).
    ///
    /// Evaluation never fails because of the API: if the flag cannot be fetched, a warning is
    /// logged and `default_value` is returned. With [`FallbackBehavior::Throw`], the fetch error
    /// is returned instead.
    ///
    /// When caching is enabled, the lookup order is:
    /// 1. preloaded flags (see [`Client::preload_flags`]), evaluated locally including percentage
    ///    rollout;
    /// 2. previously fetched values for the same flag and target;
    /// 3. the API.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `flag_key` is empty, or `target_id` is longer than 128
    ///   characters or contains anything but ASCII letters, digits, `-`, and `_`.
    /// - Fetch errors, only with [`FallbackBehavior::Throw`].
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # fn test(client: &flagvault::Client) {
    /// let enabled = client
    ///     .is_enabled("beta-features", false, Some("user-123"))
    ///     .unwrap_or(false);
    /// # }
    /// ```
    pub fn is_enabled(
        &self,
        flag_key: &str,
        default_value: bool,
        target_id: Option<&str>,
    ) -> Result<bool> {
        if flag_key.is_empty() {
            return Err(Error::InvalidArgument(
                "flag_key is required to check if a feature is enabled.".to_owned(),
            ));
        }
        if let Some(target_id) = target_id {
            validate_target_id(target_id)?;
        }

        self.inner.is_enabled(flag_key, default_value, target_id)
    }

    /// Fetch metadata for all flags.
    ///
    /// With caching enabled, the result is stored and reused until it expires, and subsequent
    /// [`Client::is_enabled`] calls evaluate flags from it without network requests.
    ///
    /// # Errors
    ///
    /// - [`Error::Authentication`] if the API key is rejected.
    /// - [`Error::Network`] on timeouts and connection failures.
    /// - [`Error::Api`] on unexpected responses.
    pub fn get_all_flags(&self) -> Result<HashMap<String, FlagMetadata>> {
        let flags = self.inner.all_flags()?;
        Ok(HashMap::clone(&flags))
    }

    /// Fetch all flags and store them in the cache. See [`Client::get_all_flags`].
    pub fn preload_flags(&self) -> Result<()> {
        let flags = self.inner.fetch_all_flags()?;
        log::debug!(target: "flagvault", count = flags.len(); "preloaded flags");
        Ok(())
    }

    /// Re-fetch cached flags that expire within the next 30 seconds.
    ///
    /// This is what the background refresh thread runs periodically. Only untargeted entries are
    /// refreshed; failures are logged and the existing entries are kept.
    pub fn refresh_expiring_flags(&self) {
        self.inner.refresh_expiring_flags()
    }

    /// Whether a refresh pass is currently running.
    pub fn refresh_in_progress(&self) -> bool {
        self.inner.refresh_in_progress.load(Ordering::SeqCst)
    }

    /// Return cache statistics.
    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats(Utc::now())
    }

    /// Inspect the cached (untargeted) state of `flag_key`. Does not affect statistics.
    pub fn debug_flag(&self, flag_key: &str) -> FlagDebugInfo {
        self.inner.cache.debug(flag_key, Utc::now())
    }

    /// Drop all cached values, preloaded flags, and statistics.
    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    /// Stop the background refresh thread (waiting for it to exit) and clear the cache.
    ///
    /// The client stays usable afterwards, without background refresh.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RefreshThreadPanicked`] if the refresh thread has panicked.
    pub fn shutdown(&self) -> Result<()> {
        let refresh_thread = self
            .refresh_thread
            .lock()
            .map_err(|_| Error::RefreshThreadPanicked)?
            .take();
        self.inner.cache.clear();

        match refresh_thread {
            Some(thread) => thread.shutdown(),
            None => Ok(()),
        }
    }

    /// Environment detected from the API key.
    pub fn environment(&self) -> Environment {
        self.inner.environment
    }

    /// The API key this client authenticates with.
    pub fn api_key(&self) -> &str {
        &self.inner.config.api_key
    }

    /// The base URL of the API.
    pub fn base_url(&self) -> &str {
        &self.inner.config.base_url
    }

    /// Request timeout.
    pub fn timeout(&self) -> Duration {
        self.inner.config.timeout
    }

    /// Effective cache configuration.
    pub fn cache_config(&self) -> &CacheConfig {
        &self.inner.config.cache
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Ok(refresh_thread) = self.refresh_thread.get_mut() {
            if let Some(thread) = refresh_thread.as_ref() {
                thread.stop();
            }
        }
    }
}

impl ClientInner {
    fn is_enabled(
        &self,
        flag_key: &str,
        default_value: bool,
        target_id: Option<&str>,
    ) -> Result<bool> {
        let cache_config = &self.config.cache;

        if !cache_config.enabled {
            return Ok(self.fetch_flag(flag_key, target_id).unwrap_or_else(|err| {
                log::warn!(target: "flagvault", flag_key, target_id, default_value;
                           "returning default value: {err}");
                default_value
            }));
        }

        let now = Utc::now();

        if let Some(flag) = self.cache.bulk_flag(flag_key, now) {
            let value = flag.evaluate(target_id);
            log::trace!(target: "flagvault", flag_key, target_id, value;
                        "evaluated preloaded flag");
            return Ok(value);
        }

        let stale = match self.cache.get(flag_key, target_id, now) {
            Lookup::Fresh(value) => {
                log::trace!(target: "flagvault", flag_key, target_id, value; "cache hit");
                return Ok(value);
            }
            Lookup::Expired(value) => Some(value),
            Lookup::Missing => None,
        };

        match self.fetch_flag(flag_key, target_id) {
            Ok(value) => {
                self.cache.insert(flag_key, target_id, value, Utc::now());
                Ok(value)
            }
            Err(err) => match (cache_config.fallback_behavior, stale) {
                (FallbackBehavior::Throw, _) => Err(err),
                (FallbackBehavior::Stale, Some(value)) => {
                    log::warn!(target: "flagvault", flag_key, target_id, value;
                               "returning stale cached value: {err}");
                    Ok(value)
                }
                (FallbackBehavior::Default | FallbackBehavior::Stale, _) => {
                    log::warn!(target: "flagvault", flag_key, target_id, default_value;
                               "returning default value: {err}");
                    Ok(default_value)
                }
            },
        }
    }

    fn fetch_flag(&self, flag_key: &str, target_id: Option<&str>) -> Result<bool> {
        self.fetcher.fetch_flag(flag_key, target_id)
    }

    fn all_flags(&self) -> Result<Arc<HashMap<String, FlagMetadata>>> {
        if self.config.cache.enabled {
            if let Some(flags) = self.cache.all_flags(Utc::now()) {
                log::trace!(target: "flagvault", count = flags.len();
                            "serving all flags from cache");
                return Ok(flags);
            }
        }
        self.fetch_all_flags()
    }

    /// Fetch all flags, storing them in the cache when caching is enabled.
    fn fetch_all_flags(&self) -> Result<Arc<HashMap<String, FlagMetadata>>> {
        let flags = Arc::new(self.fetcher.fetch_all_flags()?);
        if self.config.cache.enabled {
            self.cache.set_all_flags(Arc::clone(&flags), Utc::now());
        }
        Ok(flags)
    }

    fn refresh_expiring_flags(&self) {
        let Some(_guard) = RefreshGuard::acquire(&self.refresh_in_progress) else {
            log::debug!(target: "flagvault", "refresh already in progress, skipping");
            return;
        };

        let now = Utc::now();
        let expiring = self.cache.expiring_flags(now, REFRESH_WINDOW);
        log::debug!(target: "flagvault", count = expiring.len(); "refreshing expiring flags");

        for flag_key in expiring {
            match self.fetch_flag(&flag_key, None) {
                Ok(value) => self.cache.insert(&flag_key, None, value, Utc::now()),
                Err(err) => {
                    log::warn!(target: "flagvault", flag_key = flag_key.as_str();
                               "failed to refresh flag: {err}");
                }
            }
        }

        if self.cache.bulk_expiring(now, REFRESH_WINDOW) {
            if let Err(err) = self.fetch_all_flags() {
                log::warn!(target: "flagvault", "failed to refresh preloaded flags: {err}");
            }
        }
    }
}

/// Marks a refresh pass as running. The mark is cleared on drop, including when a pass unwinds.
struct RefreshGuard<'a>(&'a AtomicBool);

impl<'a> RefreshGuard<'a> {
    /// Returns `None` if another pass holds the mark.
    fn acquire(in_progress: &'a AtomicBool) -> Option<RefreshGuard<'a>> {
        in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RefreshGuard(in_progress))
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn validate_target_id(target_id: &str) -> Result<()> {
    static TARGET_ID: OnceLock<Regex> = OnceLock::new();
    let pattern = TARGET_ID.get_or_init(|| {
        Regex::new("^[A-Za-z0-9_-]*$").expect("target id pattern should be a valid regex")
    });

    if !pattern.is_match(target_id) {
        return Err(Error::InvalidArgument(
            "target_id must only contain alphanumeric characters, hyphens, and underscores"
                .to_owned(),
        ));
    }
    if target_id.len() > MAX_TARGET_ID_LEN {
        return Err(Error::InvalidArgument(format!(
            "target_id must not exceed {MAX_TARGET_ID_LEN} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicBool, Ordering},
        time::Duration,
    };

    use super::{validate_target_id, RefreshGuard};
    use crate::{ClientConfig, Environment, Error};

    fn offline_config() -> ClientConfig {
        // Nothing listens on port 9 (discard), so any request fails fast.
        ClientConfig::from_api_key("test-api-key")
            .base_url("http://127.0.0.1:9")
            .timeout(Duration::from_millis(200))
            .cache_refresh_interval(Duration::ZERO)
    }

    #[test]
    fn validates_target_id() {
        assert!(validate_target_id("user-123_valid").is_ok());
        assert!(validate_target_id(&"a".repeat(128)).is_ok());

        let err = validate_target_id("user@invalid").unwrap_err();
        assert!(err
            .to_string()
            .starts_with("target_id must only contain alphanumeric"));

        let err = validate_target_id(&"a".repeat(129)).unwrap_err();
        assert_eq!(err.to_string(), "target_id must not exceed 128 characters");
    }

    #[test]
    fn rejects_empty_flag_key() {
        let client = offline_config().to_client().unwrap();
        let err = client.is_enabled("", false, None).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(
            err.to_string(),
            "flag_key is required to check if a feature is enabled."
        );
    }

    #[test]
    fn exposes_configuration() {
        let client = ClientConfig::from_api_key("live_key")
            .base_url("https://custom.api.com")
            .timeout(Duration::from_secs(15))
            .cache_ttl(Duration::from_secs(600))
            .cache_max_size(500)
            .cache_refresh_interval(Duration::from_secs(120))
            .cache_fallback_behavior(crate::FallbackBehavior::Throw)
            .to_client()
            .unwrap();

        assert_eq!(client.api_key(), "live_key");
        assert_eq!(client.base_url(), "https://custom.api.com");
        assert_eq!(client.timeout(), Duration::from_secs(15));
        assert_eq!(client.environment(), Environment::Production);
        assert_eq!(client.cache_config().ttl, Duration::from_secs(600));
        assert_eq!(client.cache_config().max_size, 500);
        assert_eq!(client.cache_config().refresh_interval, Duration::from_secs(120));
        assert!(!client.refresh_in_progress());
        client.shutdown().unwrap();
    }

    #[test]
    fn refresh_thread_only_with_cache_and_interval() {
        let without_cache = offline_config()
            .cache_enabled(false)
            .cache_refresh_interval(Duration::from_secs(1))
            .to_client()
            .unwrap();
        assert!(without_cache.refresh_thread.lock().unwrap().is_none());

        let zero_interval = offline_config().to_client().unwrap();
        assert!(zero_interval.refresh_thread.lock().unwrap().is_none());

        let with_refresh = offline_config()
            .cache_refresh_interval(Duration::from_secs(60))
            .to_client()
            .unwrap();
        assert!(with_refresh.refresh_thread.lock().unwrap().is_some());
        with_refresh.shutdown().unwrap();
        assert!(with_refresh.refresh_thread.lock().unwrap().is_none());
    }

    #[test]
    fn refresh_guard_is_exclusive() {
        let in_progress = AtomicBool::new(false);

        let guard = RefreshGuard::acquire(&in_progress).unwrap();
        assert!(in_progress.load(Ordering::SeqCst));
        assert!(RefreshGuard::acquire(&in_progress).is_none());

        drop(guard);
        assert!(!in_progress.load(Ordering::SeqCst));
        assert!(RefreshGuard::acquire(&in_progress).is_some());
    }

    #[test]
    fn refresh_guard_clears_mark_on_panic() {
        let in_progress = AtomicBool::new(false);

        let result = std::panic::catch_unwind(|| {
            let _guard = RefreshGuard::acquire(&in_progress).unwrap();
            panic!("fetch failed");
        });

        assert!(result.is_err());
        assert!(!in_progress.load(Ordering::SeqCst));
    }

    #[test]
    fn refresh_with_empty_cache() {
        let client = offline_config().to_client().unwrap();
        client.refresh_expiring_flags();
        assert!(!client.refresh_in_progress());
    }

    #[test]
    fn network_errors_return_default() {
        let client = offline_config().to_client().unwrap();
        assert!(!client.is_enabled("flag", false, None).unwrap());
        assert!(client.is_enabled("flag", true, None).unwrap());
        assert_eq!(client.cache_stats().size, 0);
    }

    #[test]
    fn throw_fallback_returns_network_error() {
        let client = offline_config()
            .cache_fallback_behavior(crate::FallbackBehavior::Throw)
            .to_client()
            .unwrap();
        let err = client.is_enabled("flag", true, None).unwrap_err();
        assert!(err.is_network(), "unexpected error: {err:?}");
    }
}
