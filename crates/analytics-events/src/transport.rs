// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of one batch to the ingestion endpoint.
//!
//! The engine only depends on the [`Transport`] trait. [`HttpTransport`] is the
//! reqwest implementation: a JSON `POST` to `{endpoint}/events`, retried
//! in-place on connection failures and 5xx responses according to a
//! [`RetryStrategy`]. Anything that still fails is reported as a
//! [`SubmitError`] carrying the HTTP status and the endpoint's error code so the
//! engine can decide whether to keep the batch.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, error};

use crate::context::SubmitPayload;
use crate::errors::{ErrorCode, SubmitError};

const ERROR_TYPE_HEADER: &str = "x-amzn-ErrorType";
const API_KEY_HEADER: &str = "x-api-key";
const EVENTS_PATH: &str = "/events";

/// Successful submission as reported by the endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestResponse {
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one batch. Resolves once the endpoint answered or delivery was
    /// given up.
    async fn submit(&self, payload: &SubmitPayload) -> Result<IngestResponse, SubmitError>;
}

#[derive(Debug, Clone)]
pub enum RetryStrategy {
    /// Number of attempts, no delay between them.
    Immediate(u64),
    /// Number of attempts and the delay in milliseconds, growing linearly.
    LinearBackoff(u64, u64),
}

impl RetryStrategy {
    fn attempts(&self) -> u64 {
        match self {
            RetryStrategy::Immediate(attempts) | RetryStrategy::LinearBackoff(attempts, _) => {
                (*attempts).max(1)
            }
        }
    }

    fn delay(&self, attempt: u64) -> Option<Duration> {
        match self {
            RetryStrategy::Immediate(_) => None,
            RetryStrategy::LinearBackoff(_, delay_ms) => {
                Some(Duration::from_millis(delay_ms.saturating_mul(attempt)))
            }
        }
    }
}

pub struct HttpTransportConfig {
    /// Base URL of the ingestion endpoint, without the `/events` path.
    pub endpoint: String,
    pub api_key: Option<String>,
    pub https_proxy: Option<String>,
    pub timeout: Duration,
    pub retry_strategy: RetryStrategy,
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    retry_strategy: RetryStrategy,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(api_key) = &config.api_key {
            match HeaderValue::from_str(api_key) {
                Ok(value) => {
                    headers.insert(API_KEY_HEADER, value);
                }
                Err(e) => error!("ANALYTICS | Ignoring API key that is not a valid header: {e}"),
            }
        }

        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers);
        if let Some(proxy) = &config.https_proxy {
            builder = builder.proxy(reqwest::Proxy::https(proxy.as_str())?);
        }

        Ok(HttpTransport {
            client: builder.build()?,
            url: format!("{}{}", config.endpoint.trim_end_matches('/'), EVENTS_PATH),
            retry_strategy: config.retry_strategy,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn submit(&self, payload: &SubmitPayload) -> Result<IngestResponse, SubmitError> {
        let body = serde_json::to_vec(payload).map_err(|e| {
            SubmitError::new(None, ErrorCode::Serialization, format!("{e}"))
        })?;

        let attempts = self.retry_strategy.attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self.client.post(&self.url).body(body.clone()).send().await;
            let retries_left = attempt < attempts;

            match result {
                Ok(response) if response.status().is_success() => {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    debug!("ANALYTICS | Batch accepted with status {status}");
                    return Ok(IngestResponse { status, body });
                }
                Ok(response) if response.status().is_server_error() && retries_left => {
                    debug!(
                        "ANALYTICS | Attempt {attempt}/{attempts} failed with status {}",
                        response.status()
                    );
                }
                Ok(response) => return Err(error_from_response(response).await),
                Err(e) if retries_left => {
                    debug!("ANALYTICS | Attempt {attempt}/{attempts} failed: {e}");
                }
                Err(e) => {
                    return Err(SubmitError::network(format!(
                        "request failed after {attempt} attempts: {e}"
                    )));
                }
            }

            if let Some(delay) = self.retry_strategy.delay(attempt) {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(rename = "__type")]
    error_type: Option<String>,
    code: Option<String>,
    message: Option<String>,
    #[serde(rename = "Message")]
    message_upper: Option<String>,
}

async fn error_from_response(response: Response) -> SubmitError {
    let status = response.status();
    let header_code = response
        .headers()
        .get(ERROR_TYPE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let text = response.text().await.unwrap_or_default();
    let body: Option<ErrorBody> = serde_json::from_str(&text).ok();

    let (body_code, body_message) = match body {
        Some(body) => (
            body.error_type.or(body.code),
            body.message.or(body.message_upper),
        ),
        None => (None, None),
    };
    let code = header_code
        .or(body_code)
        .map(|raw| ErrorCode::parse(&raw))
        .unwrap_or_else(|| ErrorCode::Other(fallback_code(status)));
    let message = body_message.unwrap_or(text);

    error!("ANALYTICS | Endpoint rejected batch: {status} {code}: {message}");
    SubmitError::new(Some(status.as_u16()), code, message)
}

fn fallback_code(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map_or_else(|| status.as_u16().to_string(), str::to_string)
}
