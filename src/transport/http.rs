//! HTTP transport
//!
//! One POST per send against the legacy FCM HTTP endpoint. The request is
//! synchronous from the caller's point of view: the sender waits for the
//! response before issuing anything else. Retries are layered on top by
//! `send_with_retry` using the shared backoff schedule.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tracing::{debug, instrument};

use crate::config::{HttpSettings, RetrySettings};
use crate::message::Message;
use crate::response::{RETRY_AFTER_HEADER, Response};
use crate::transport::retry::{RetryPolicy, retry};
use crate::utils::error::FcmError;

pub const DEFAULT_ENDPOINT: &str = "https://fcm.googleapis.com/fcm/send";

/// Client for the request/response transport.
#[derive(Debug, Clone)]
pub struct HttpClient {
    api_key: String,
    client: reqwest::Client,
    endpoint: String,
    retry_policy: RetryPolicy,
}

impl HttpClient {
    /// Creates a client with a default `reqwest::Client`.
    pub fn new(api_key: impl Into<String>) -> Result<Self, FcmError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(FcmError::InvalidApiKey);
        }
        Ok(Self {
            api_key,
            client: reqwest::Client::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            retry_policy: RetryPolicy::default(),
        })
    }

    /// Creates a client from configuration, with a request timeout.
    pub fn from_settings(http: &HttpSettings, retry: &RetrySettings) -> Result<Self, FcmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(http.timeout_secs))
            .build()?;
        Ok(Self::new(http.api_key.clone())?
            .with_client(client)
            .with_endpoint(http.endpoint.clone())
            .with_retry_policy(RetryPolicy::from_settings(retry)))
    }

    /// Replaces the underlying HTTP client (proxies, TLS roots, timeouts).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Validates and sends a message once.
    pub async fn send(&self, message: &Message) -> Result<Response, FcmError> {
        message.validate()?;
        let payload = serde_json::to_vec(message).map_err(FcmError::Encode)?;
        self.send_payload(payload).await
    }

    /// Validates and sends a message, retrying temporary failures with
    /// quadratic backoff up to `max_attempts` retries.
    pub async fn send_with_retry(
        &self,
        message: &Message,
        max_attempts: u32,
    ) -> Result<Response, FcmError> {
        message.validate()?;
        let payload = serde_json::to_vec(message).map_err(FcmError::Encode)?;
        retry(&self.retry_policy, max_attempts, || {
            self.send_payload(payload.clone())
        })
        .await
    }

    /// Posts an already serialized message.
    #[instrument(skip_all, fields(endpoint = %self.endpoint))]
    pub async fn send_payload(&self, payload: Vec<u8>) -> Result<Response, FcmError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .header(AUTHORIZATION, format!("key={}", self.api_key))
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|e| FcmError::connection(e.to_string()))?;

        let status = resp.status();
        let retry_after = resp
            .headers()
            .get(RETRY_AFTER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        debug!(status = status.as_u16(), ?retry_after, "received response");

        if status != StatusCode::OK {
            let response = Response {
                status_code: status.as_u16(),
                retry_after,
                ..Response::default()
            };
            return Err(FcmError::Server {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("unknown").to_string(),
                response: Box::new(response),
            });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| FcmError::connection(e.to_string()))?;
        let mut response: Response = serde_json::from_slice(&body).map_err(FcmError::Decode)?;
        response.status_code = status.as_u16();
        response.retry_after = retry_after;
        Ok(response)
    }
}
