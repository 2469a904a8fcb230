//! An HTTP client that fetches flags from the FlagVault API.
use std::{collections::HashMap, time::Duration};

use reqwest::{blocking::Response, StatusCode, Url};

use crate::{
    flags::{FlagEnabledResponse, FlagsResponse},
    Error, FlagMetadata, Result, SDK_VERSION,
};

const API_PREFIX: &str = "api";
const FLAGS_ENDPOINT: &str = "feature-flag";
const API_KEY_HEADER: &str = "X-API-Key";

pub(crate) struct FlagFetcherConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

/// A client that fetches flag state from the FlagVault API.
pub(crate) struct FlagFetcher {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::blocking::Client,
    base_url: Url,
    api_key: String,
    timeout: Duration,
}

impl FlagFetcher {
    pub(crate) fn new(config: FlagFetcherConfig) -> Result<FlagFetcher> {
        let base_url = Url::parse(&config.base_url).map_err(Error::InvalidBaseUrl)?;
        if base_url.cannot_be_a_base() {
            return Err(Error::InvalidBaseUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase));
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .user_agent(format!("flagvault-rust-sdk/{SDK_VERSION}"))
            .build()
            .map_err(|err| Error::Network(format!("Failed to build HTTP client: {err}")))?;

        Ok(FlagFetcher {
            client,
            base_url,
            api_key: config.api_key,
            timeout: config.timeout,
        })
    }

    /// Build `{base_url}/api/feature-flag[/{segments}...]`, percent-encoding each segment.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // `cannot_be_a_base()` URLs are rejected in `new()`, so this always succeeds.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .push(API_PREFIX)
                .push(FLAGS_ENDPOINT)
                .extend(segments);
        }
        url
    }

    /// Fetch the enabled state of a single flag, optionally for a target.
    pub(crate) fn fetch_flag(&self, flag_key: &str, target_id: Option<&str>) -> Result<bool> {
        let mut url = self.endpoint(&[flag_key, "enabled"]);
        if let Some(target_id) = target_id {
            url.query_pairs_mut().append_pair("targetId", target_id);
        }

        log::debug!(target: "flagvault", flag_key, target_id; "fetching flag state");
        let response = self.send(url)?;

        if !response.status().is_success() {
            return Err(flag_response_error(response));
        }

        let body: FlagEnabledResponse = response
            .json()
            .map_err(|err| Error::from_transport(err, self.timeout))?;

        log::debug!(target: "flagvault", flag_key, target_id, enabled = body.enabled; "fetched flag state");
        Ok(body.enabled)
    }

    /// Fetch metadata of all flags of the project.
    pub(crate) fn fetch_all_flags(&self) -> Result<HashMap<String, FlagMetadata>> {
        let url = self.endpoint(&[]);

        log::debug!(target: "flagvault", "fetching all flags");
        let response = self.send(url)?;

        let status = response.status();
        if !status.is_success() {
            return Err(match auth_error(status) {
                Some(err) => err,
                None => Error::api(
                    Some(status.as_u16()),
                    format!("Failed to fetch flags: {status}"),
                ),
            });
        }

        let body: FlagsResponse = response
            .json()
            .map_err(|err| Error::from_transport(err, self.timeout))?;
        let flags = body.into_flag_map();

        log::debug!(target: "flagvault", count = flags.len(); "fetched all flags");
        Ok(flags)
    }

    fn send(&self, url: Url) -> Result<Response> {
        self.client
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .map_err(|err| Error::from_transport(err, self.timeout))
    }
}

fn flag_response_error(response: Response) -> Error {
    let status = response.status();
    if let Some(err) = auth_error(status) {
        return err;
    }

    // Prefer the server-provided message; fall back to the status line for non-JSON bodies.
    let message = response
        .json::<serde_json::Value>()
        .ok()
        .and_then(|body| body.get("message")?.as_str().map(str::to_owned))
        .unwrap_or_else(|| status.to_string());

    Error::api(Some(status.as_u16()), format!("API request failed: {message}"))
}

fn auth_error(status: StatusCode) -> Option<Error> {
    match status {
        StatusCode::UNAUTHORIZED => {
            log::warn!(target: "flagvault", "client is not authorized. Check your API key");
            Some(Error::Authentication("Invalid API credentials".to_owned()))
        }
        StatusCode::FORBIDDEN => {
            log::warn!(target: "flagvault", "access forbidden. Check your API key permissions");
            Some(Error::Authentication(
                "Access forbidden - check your API credentials".to_owned(),
            ))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{FlagFetcher, FlagFetcherConfig};
    use crate::Error;

    fn fetcher(base_url: &str) -> FlagFetcher {
        FlagFetcher::new(FlagFetcherConfig {
            base_url: base_url.to_owned(),
            api_key: "test-api-key".to_owned(),
            timeout: Duration::from_secs(1),
        })
        .unwrap()
    }

    #[test]
    fn builds_flag_endpoint() {
        let fetcher = fetcher("https://api.flagvault.com");
        assert_eq!(
            fetcher.endpoint(&["test-flag", "enabled"]).as_str(),
            "https://api.flagvault.com/api/feature-flag/test-flag/enabled"
        );
        assert_eq!(
            fetcher.endpoint(&[]).as_str(),
            "https://api.flagvault.com/api/feature-flag"
        );
    }

    #[test]
    fn keeps_base_path() {
        let fetcher = fetcher("http://localhost:3001/proxy");
        assert_eq!(
            fetcher.endpoint(&[]).as_str(),
            "http://localhost:3001/proxy/api/feature-flag"
        );
    }

    #[test]
    fn encodes_flag_key_as_single_segment() {
        let fetcher = fetcher("https://api.flagvault.com");
        let url = fetcher.endpoint(&["a/b?c", "enabled"]);
        assert_eq!(
            url.as_str(),
            "https://api.flagvault.com/api/feature-flag/a%2Fb%3Fc/enabled"
        );
    }

    #[test]
    fn rejects_non_base_url() {
        let result = FlagFetcher::new(FlagFetcherConfig {
            base_url: "mailto:someone@example.com".to_owned(),
            api_key: "key".to_owned(),
            timeout: Duration::from_secs(1),
        });
        assert!(matches!(result, Err(Error::InvalidBaseUrl(_))));
    }
}
