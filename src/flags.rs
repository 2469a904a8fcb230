use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Flag metadata as returned by the bulk flags endpoint.
///
/// Metadata is sufficient to evaluate the flag locally (see [`FlagMetadata::evaluate`]), which
/// is how the client answers [`Client::is_enabled`](crate::Client::is_enabled) after
/// [`Client::preload_flags`](crate::Client::preload_flags).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagMetadata {
    /// Unique flag key.
    pub key: String,
    /// Whether the flag is switched on. A disabled flag is never enabled for anyone.
    pub is_enabled: bool,
    /// Human-readable flag name.
    #[serde(default)]
    pub name: String,
    /// Percentage of targets that should see the flag enabled. Fractions are allowed; values
    /// outside 0-100 are clamped at evaluation time.
    #[serde(default)]
    pub rollout_percentage: Option<f64>,
    /// Seed mixed into the rollout hash, so that different flags bucket targets differently.
    #[serde(default)]
    pub rollout_seed: Option<String>,
}

/// `TryParse` allows the subfield to fail parsing without failing the parsing of the whole
/// structure.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum TryParse<T> {
    Parsed(T),
    ParseFailed(serde_json::Value),
}

/// Response of `GET /api/feature-flag`.
#[derive(Debug, Deserialize)]
pub(crate) struct FlagsResponse {
    // Servers that don't know the field (or return something else entirely) yield no flags.
    #[serde(default)]
    flags: Vec<TryParse<FlagMetadata>>,
}

impl FlagsResponse {
    /// Index parsed flags by key, skipping entries that failed to parse.
    pub(crate) fn into_flag_map(self) -> HashMap<String, FlagMetadata> {
        self.flags
            .into_iter()
            .filter_map(|flag| match flag {
                TryParse::Parsed(flag) => Some((flag.key.clone(), flag)),
                TryParse::ParseFailed(value) => {
                    log::warn!(target: "flagvault", flag:serde = value; "skipping flag that failed to parse");
                    None
                }
            })
            .collect()
    }
}

/// Response of `GET /api/feature-flag/{key}/enabled`.
#[derive(Debug, Deserialize)]
pub(crate) struct FlagEnabledResponse {
    #[serde(default)]
    pub enabled: bool,
}
