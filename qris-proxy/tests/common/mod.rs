//! Test helper module for qris-proxy integration tests.
//!
//! Spawns the application on a random port with both remote dependencies
//! (the GitHub contents store and the QRIS gateway) replaced by wiremock
//! servers.

#![allow(dead_code)]

use base64::{engine::general_purpose, Engine as _};
use qris_proxy::config::{Config, SecurityConfig, ServerConfig, StoreConfig, UpstreamConfig};
use qris_proxy::models::PromoDocument;
use qris_proxy::services::init_metrics;
use qris_proxy::Application;
use secrecy::Secret;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TEST_ADMIN_KEY: &str = "test-admin-key";
pub const TEST_CALLBACK_SECRET: &str = "test-callback-secret";
pub const TEST_PEPPER: &str = "test-pepper";
pub const STORE_DOCUMENT: &str = "promos.json";

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub store: MockServer,
    pub upstream: MockServer,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(Some(TEST_ADMIN_KEY), Some(TEST_CALLBACK_SECRET)).await
    }

    pub async fn spawn_with(admin_key: Option<&str>, callback_secret: Option<&str>) -> Self {
        init_metrics();

        let store = MockServer::start().await;
        let upstream = MockServer::start().await;

        let config = Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Random port
            },
            upstream: UpstreamConfig {
                base_url: upstream.uri(),
                timeout_seconds: 5,
            },
            store: StoreConfig {
                api_base_url: store.uri(),
                owner: "acme".to_string(),
                repo: "promo-data".to_string(),
                branch: "main".to_string(),
                path: STORE_DOCUMENT.to_string(),
                token: Secret::new("test-token".to_string()),
            },
            security: SecurityConfig {
                admin_key: admin_key.map(|key| Secret::new(key.to_string())),
                callback_secret: callback_secret.map(|secret| Secret::new(secret.to_string())),
                device_pepper: Secret::new(TEST_PEPPER.to_string()),
                allowed_origins: vec!["*".to_string()],
            },
            service_name: "qris-proxy".to_string(),
        };

        let app = Application::build(config)
            .await
            .expect("Failed to build test application");
        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server to be ready by polling the health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            store,
            upstream,
        }
    }

    /// Serve `document` from the mocked contents endpoint at `sha`.
    pub async fn given_stored_document(&self, document: &PromoDocument, sha: &str) {
        let json = serde_json::to_string_pretty(document).expect("Failed to encode document");
        Mock::given(method("GET"))
            .and(path(contents_path()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sha": sha,
                "content": general_purpose::STANDARD.encode(json),
                "encoding": "base64",
            })))
            .mount(&self.store)
            .await;
    }

    pub async fn given_missing_document(&self) {
        Mock::given(method("GET"))
            .and(path(contents_path()))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({ "message": "Not Found" })),
            )
            .mount(&self.store)
            .await;
    }

    /// Accept document saves and assert how many happen.
    pub async fn expect_document_saves(&self, times: u64) {
        Mock::given(method("PUT"))
            .and(path(contents_path()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": { "sha": "updated-sha" }
            })))
            .expect(times)
            .mount(&self.store)
            .await;
    }

    /// Reject the next save as a version conflict.
    pub async fn given_conflicting_save(&self) {
        Mock::given(method("PUT"))
            .and(path(contents_path()))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "message": "promos.json does not match sha"
            })))
            .mount(&self.store)
            .await;
    }
}

pub fn contents_path() -> String {
    format!("/repos/acme/promo-data/contents/{}", STORE_DOCUMENT)
}

/// The device key the app derives for a device id, with the test pepper.
pub fn device_key(device_id: &str) -> String {
    qris_proxy::services::voucher::derive_device_key(Some(device_id), None, TEST_PEPPER)
}
