use anyhow::Result;
use dotenvy::dotenv;
use secrecy::Secret;
use serde::Deserialize;
use std::env;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub store: StoreConfig,
    pub security: SecurityConfig,
    pub service_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Upstream QRIS payment backend.
#[derive(Deserialize, Clone, Debug)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
}

/// GitHub Contents API location of the promo document. `api_base_url` is
/// overridable so tests can point the store at a mock server.
#[derive(Deserialize, Clone, Debug)]
pub struct StoreConfig {
    pub api_base_url: String,
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub path: String,
    pub token: Secret<String>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct SecurityConfig {
    /// Unset disables the admin routes entirely.
    pub admin_key: Option<Secret<String>>,
    /// Unset leaves the status callback open.
    pub callback_secret: Option<Secret<String>>,
    pub device_pepper: Secret<String>,
    pub allowed_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = env::var("QRIS_PROXY_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("QRIS_PROXY_PORT")
            .unwrap_or_else(|_| "3007".to_string())
            .parse()?;

        let upstream_url = env::var("QRIS_UPSTREAM_URL").expect("QRIS_UPSTREAM_URL must be set");
        let upstream_timeout = env::var("QRIS_UPSTREAM_TIMEOUT_SECONDS")
            .unwrap_or_else(|_| "20".to_string())
            .parse()?;

        let store_api_url =
            env::var("QRIS_STORE_API_URL").unwrap_or_else(|_| "https://api.github.com".to_string());
        let store_owner = env::var("QRIS_STORE_OWNER").unwrap_or_default();
        let store_repo = env::var("QRIS_STORE_REPO").unwrap_or_default();
        let store_branch = env::var("QRIS_STORE_BRANCH").unwrap_or_else(|_| "main".to_string());
        let store_path =
            env::var("QRIS_STORE_PATH").unwrap_or_else(|_| "data/promos.json".to_string());
        let store_token = env::var("QRIS_STORE_TOKEN").unwrap_or_default();

        let admin_key = env::var("QRIS_ADMIN_KEY")
            .ok()
            .filter(|v| !v.is_empty())
            .map(Secret::new);
        let callback_secret = env::var("QRIS_CALLBACK_SECRET")
            .ok()
            .filter(|v| !v.is_empty())
            .map(Secret::new);
        let device_pepper =
            env::var("QRIS_DEVICE_PEPPER").unwrap_or_else(|_| "change_me".to_string());
        let allowed_origins = env::var("QRIS_ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            server: ServerConfig { host, port },
            upstream: UpstreamConfig {
                base_url: upstream_url,
                timeout_seconds: upstream_timeout,
            },
            store: StoreConfig {
                api_base_url: store_api_url,
                owner: store_owner,
                repo: store_repo,
                branch: store_branch,
                path: store_path,
                token: Secret::new(store_token),
            },
            security: SecurityConfig {
                admin_key,
                callback_secret,
                device_pepper: Secret::new(device_pepper),
                allowed_origins,
            },
            service_name: "qris-proxy".to_string(),
        })
    }
}
