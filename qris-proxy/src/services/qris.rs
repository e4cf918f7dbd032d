//! Client for the upstream QRIS payment gateway.
//!
//! The proxy never interprets gateway bodies beyond pulling out the fields it
//! needs; replies are relayed to the caller with their original status code.

use std::time::Duration;

use axum::body::Bytes;
use reqwest::{header, Client, StatusCode};
use serde_json::{json, Value};

use crate::config::UpstreamConfig;
use crate::dtos::StatusCallbackRequest;
use crate::error::AppError;

/// A gateway reply: original status code plus the body parsed as JSON.
/// Non-JSON bodies are wrapped as `{"raw": "..."}` instead of being dropped.
#[derive(Debug)]
pub struct UpstreamReply {
    pub status: StatusCode,
    pub body: Value,
}

#[derive(Debug)]
pub struct QrImage {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

#[derive(Clone)]
pub struct QrisClient {
    client: Client,
    config: UpstreamConfig,
}

impl QrisClient {
    pub fn new(config: UpstreamConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .expect("Failed to create HTTP client");
        Self { client, config }
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    pub async fn create_qr(&self, amount: u64, theme: &str) -> Result<UpstreamReply, AppError> {
        let url = format!("{}/api/createqr", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "amount": amount, "theme": theme }))
            .send()
            .await
            .map_err(unreachable_gateway)?;
        json_reply(response).await
    }

    pub async fn transaction_status(
        &self,
        transaction_id: &str,
    ) -> Result<UpstreamReply, AppError> {
        let url = format!(
            "{}/api/status?idTransaksi={}",
            self.config.base_url,
            urlencoding::encode(transaction_id)
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(unreachable_gateway)?;
        json_reply(response).await
    }

    pub async fn cancel(&self, transaction_id: &str) -> Result<UpstreamReply, AppError> {
        let url = format!("{}/api/cancel", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "idTransaksi": transaction_id }))
            .send()
            .await
            .map_err(unreachable_gateway)?;
        json_reply(response).await
    }

    pub async fn set_status(
        &self,
        update: &StatusCallbackRequest,
    ) -> Result<UpstreamReply, AppError> {
        let url = format!("{}/api/status", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .json(update)
            .send()
            .await
            .map_err(unreachable_gateway)?;
        json_reply(response).await
    }

    pub async fn qr_image(&self, transaction_id: &str) -> Result<QrImage, AppError> {
        let url = format!(
            "{}/api/qr/{}.png",
            self.config.base_url,
            urlencoding::encode(transaction_id)
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(unreachable_gateway)?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await.map_err(unreachable_gateway)?;
        Ok(QrImage {
            status,
            content_type,
            bytes,
        })
    }
}

async fn json_reply(response: reqwest::Response) -> Result<UpstreamReply, AppError> {
    let status = response.status();
    let text = response.text().await.map_err(unreachable_gateway)?;
    let body = serde_json::from_str(&text).unwrap_or_else(|_| json!({ "raw": text }));
    tracing::debug!(status = %status, "Upstream gateway replied");
    Ok(UpstreamReply { status, body })
}

fn unreachable_gateway(err: reqwest::Error) -> AppError {
    AppError::BadGateway(format!("upstream gateway unreachable: {}", err))
}
