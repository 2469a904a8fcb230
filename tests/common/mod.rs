//! Shared helpers for integration tests.
//!
//! The SDK uses a blocking HTTP client, which must not run inside an async context. The mock
//! server therefore lives on its own multi-threaded runtime, and tests call the client from the
//! plain test thread.
#![allow(dead_code)]

use std::time::Duration;

use flagvault::ClientConfig;
use serde_json::{json, Value};
use tokio::runtime::Runtime;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, Request, ResponseTemplate,
};

pub const API_KEY: &str = "test-api-key";

pub struct TestServer {
    // Declared before `runtime`, so the server is dropped while the runtime is still alive.
    server: MockServer,
    runtime: Runtime,
}

impl TestServer {
    pub fn start() -> TestServer {
        let _ = env_logger::builder().is_test(true).try_init();

        let runtime = Runtime::new().expect("failed to start tokio runtime");
        let server = runtime.block_on(MockServer::start());
        TestServer { server, runtime }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    pub fn mount(&self, mock: Mock) {
        self.runtime.block_on(mock.mount(&self.server));
    }

    pub fn reset(&self) {
        self.runtime.block_on(self.server.reset());
    }

    pub fn requests(&self) -> Vec<Request> {
        self.runtime
            .block_on(self.server.received_requests())
            .unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.requests().len()
    }

    /// A client config pointing at this server, without background refresh.
    pub fn config(&self) -> ClientConfig {
        ClientConfig::from_api_key(API_KEY)
            .base_url(self.uri())
            .timeout(Duration::from_secs(2))
            .cache_refresh_interval(Duration::ZERO)
    }

    /// Respond to `GET /api/feature-flag/{flag_key}/enabled` with `{"enabled": enabled}`.
    pub fn mock_flag(&self, flag_key: &str, enabled: bool) {
        self.mount(
            Mock::given(method("GET"))
                .and(path(flag_path(flag_key)))
                .respond_with(
                    ResponseTemplate::new(200).set_body_json(json!({ "enabled": enabled })),
                ),
        );
    }

    /// Respond to `GET /api/feature-flag` with the given flags.
    pub fn mock_all_flags(&self, flags: Value) {
        self.mount(
            Mock::given(method("GET"))
                .and(path("/api/feature-flag"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "flags": flags }))),
        );
    }
}

pub fn flag_path(flag_key: &str) -> String {
    format!("/api/feature-flag/{flag_key}/enabled")
}

pub fn rollout_flag(
    key: &str,
    is_enabled: bool,
    percentage: Option<f64>,
    seed: Option<&str>,
) -> Value {
    json!({
        "key": key,
        "isEnabled": is_enabled,
        "name": key,
        "rolloutPercentage": percentage,
        "rolloutSeed": seed,
    })
}
