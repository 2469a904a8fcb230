//! The Rust SDK for FlagVault, a hosted feature flag service.
//!
//! # Overview
//!
//! The SDK revolves around a [`Client`] that answers whether a feature flag is enabled, either
//! globally or for a specific target (a user, an organization, etc.):
//!
//! ```no_run
//! # use flagvault::ClientConfig;
//! let client = ClientConfig::from_api_key("live_api-key").to_client().unwrap();
//!
//! let enabled = client
//!     .is_enabled("new-feature", false, Some("user-123"))
//!     .unwrap_or(false);
//! ```
//!
//! # Caching
//!
//! Flag values are cached in memory (5 minutes by default, see [`CacheConfig`]), and a background
//! thread refreshes entries shortly before they expire. [`Client::preload_flags`] fetches all
//! flags at once; afterwards flags are evaluated locally, including percentage rollouts, without
//! any network requests. [`Client::cache_stats`] and [`Client::debug_flag`] help to observe the
//! cache.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! [`Client::is_enabled`] only fails on invalid arguments: if the API cannot be reached, it logs a
//! warning and returns the provided default value (unless configured otherwise with
//! [`FallbackBehavior`]). Feature flag evaluation should not be critical enough to cause system
//! crashes. Bulk operations ([`Client::get_all_flags`], [`Client::preload_flags`]) return
//! authentication, network, and API errors to the caller.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging messages, all
//! under the `flagvault` target. Consider integrating a `log`-compatible logger implementation for
//! better visibility into SDK operations.
//!
//! # Examples
//!
//! Examples can be found in the `demos` directory of the `flagvault` crate repository.

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

mod cache;
mod client;
mod config;
mod error;
mod fetcher;
mod flags;
mod refresh;
mod rollout;

pub use cache::{CacheStats, FlagDebugInfo};
pub use client::Client;
pub use config::{CacheConfig, ClientConfig, Environment, FallbackBehavior};
pub use error::{Error, Result};
pub use flags::FlagMetadata;

/// Version of this SDK.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
