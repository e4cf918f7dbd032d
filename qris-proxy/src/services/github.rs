//! Persistence for the promo document via the GitHub Contents API.
//!
//! The document lives as one JSON file in a repository. Every load returns
//! the file's blob sha alongside the parsed document; every save sends that
//! sha back so GitHub rejects writes against a stale version with 409, which
//! surfaces here as [`StoreError::Conflict`].

use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use reqwest::{header, Client, StatusCode};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::StoreConfig;
use crate::models::PromoDocument;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document store not configured: {0}")]
    NotConfigured(String),
    #[error("store request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("store returned HTTP {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("the stored document changed since it was loaded")]
    Conflict,
    #[error("unexpected response from the document store: {0}")]
    Decode(String),
    #[error("failed to encode the document: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A loaded document plus the version token required to save it back.
/// `version` is `None` when the file does not exist yet.
#[derive(Debug)]
pub struct DocumentSnapshot {
    pub document: PromoDocument,
    pub version: Option<String>,
}

#[derive(Clone)]
pub struct GithubStore {
    client: Client,
    config: StoreConfig,
}

#[derive(Deserialize)]
struct ContentsPayload {
    sha: String,
    #[serde(default)]
    content: String,
}

#[derive(Serialize)]
struct SaveRequest<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Deserialize)]
struct SaveResponse {
    content: Option<SavedContent>,
}

#[derive(Deserialize)]
struct SavedContent {
    sha: String,
}

impl GithubStore {
    pub fn new(config: StoreConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent("qris-proxy")
            .build()
            .expect("Failed to create HTTP client");
        Self { client, config }
    }

    pub fn is_configured(&self) -> bool {
        !self.config.owner.is_empty()
            && !self.config.repo.is_empty()
            && !self.config.token.expose_secret().is_empty()
    }

    /// Fetch the current document. A missing file yields the default
    /// document with no version; an unreadable file yields the default
    /// document but keeps the sha so the next save replaces it in place.
    pub async fn load(&self) -> Result<DocumentSnapshot, StoreError> {
        self.ensure_configured()?;

        let url = format!(
            "{}?ref={}",
            self.contents_url(),
            urlencoding::encode(&self.config.branch)
        );
        let response = self
            .client
            .get(&url)
            .bearer_auth(self.config.token.expose_secret())
            .header(header::ACCEPT, "application/vnd.github+json")
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            tracing::info!(
                path = %self.config.path,
                "Promo document not found in repository, starting from defaults"
            );
            return Ok(DocumentSnapshot {
                document: PromoDocument::default(),
                version: None,
            });
        }

        let body = response.text().await?;
        if !status.is_success() {
            return Err(StoreError::Api { status, body });
        }

        let payload: ContentsPayload =
            serde_json::from_str(&body).map_err(|err| StoreError::Decode(err.to_string()))?;
        let document = decode_document(&payload.content);

        Ok(DocumentSnapshot {
            document,
            version: Some(payload.sha),
        })
    }

    /// Persist the document against the version it was loaded at. `version`
    /// is `None` only when creating the file for the first time.
    pub async fn save(
        &self,
        document: &PromoDocument,
        version: Option<&str>,
        message: &str,
    ) -> Result<(), StoreError> {
        self.ensure_configured()?;

        let pretty = serde_json::to_string_pretty(document)?;
        let request = SaveRequest {
            message,
            content: general_purpose::STANDARD.encode(pretty),
            branch: &self.config.branch,
            sha: version,
        };

        let response = self
            .client
            .put(self.contents_url())
            .bearer_auth(self.config.token.expose_secret())
            .header(header::ACCEPT, "application/vnd.github+json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::CONFLICT {
            return Err(StoreError::Conflict);
        }
        let body = response.text().await?;
        if !status.is_success() {
            return Err(StoreError::Api { status, body });
        }

        if let Ok(saved) = serde_json::from_str::<SaveResponse>(&body) {
            if let Some(content) = saved.content {
                tracing::debug!(sha = %content.sha, "Persisted promo document");
            }
        }
        Ok(())
    }

    fn ensure_configured(&self) -> Result<(), StoreError> {
        if self.is_configured() {
            Ok(())
        } else {
            Err(StoreError::NotConfigured(
                "set QRIS_STORE_OWNER, QRIS_STORE_REPO and QRIS_STORE_TOKEN".to_string(),
            ))
        }
    }

    fn contents_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.config.api_base_url,
            self.config.owner,
            self.config.repo,
            urlencoding::encode(&self.config.path)
        )
    }
}

/// GitHub wraps base64 at 60 columns; strip whitespace before decoding.
fn decode_document(content: &str) -> PromoDocument {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = match general_purpose::STANDARD.decode(compact.as_bytes()) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(error = %err, "Stored promo document is not valid base64, using defaults");
            return PromoDocument::default();
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(document) => document,
        Err(err) => {
            tracing::warn!(error = %err, "Stored promo document is not valid JSON, using defaults");
            PromoDocument::default()
        }
    }
}
