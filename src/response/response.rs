use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::delivery_error::{DeliveryError, Vocabulary};

/// Header the backend uses to ask for a delay before the next attempt.
pub const RETRY_AFTER_HEADER: &str = "Retry-After";

/// Outcome of one delivery attempt.
///
/// For the HTTP transport this is the decoded response body plus the status
/// line and `Retry-After` header. For the stream transport it is built from a
/// single acknowledgment and always holds exactly one result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub multicast_id: i64,
    #[serde(default)]
    pub success: u32,
    #[serde(default)]
    pub failure: u32,
    #[serde(default)]
    pub canonical_ids: u32,
    #[serde(default, skip_deserializing)]
    pub status_code: u16,
    #[serde(default)]
    pub results: Vec<DeliveryResult>,
    #[serde(default, skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<String>,
}

impl Response {
    /// Builds a response around a single recipient result.
    pub fn single(status_code: u16, result: DeliveryResult) -> Self {
        let (success, failure) = if result.error.is_some() { (0, 1) } else { (1, 0) };
        Self {
            success,
            failure,
            status_code,
            results: vec![result],
            ..Self::default()
        }
    }

    /// The response handed to a caller whose acknowledgment never arrived.
    pub fn service_unavailable(message_id: &str, registration_id: &str) -> Self {
        Self::single(
            503,
            DeliveryResult {
                message_id: message_id.to_string(),
                registration_id: registration_id.to_string(),
                error: Some(DeliveryError::ServiceUnavailable),
                error_code: Some(DeliveryError::ServiceUnavailable.code().to_string()),
            },
        )
    }

    /// Parsed `Retry-After` hint, relative to the current time.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after_at(Utc::now())
    }

    /// Parses `Retry-After` as delta-seconds or as an HTTP date measured
    /// from `now`. Dates in the past yield a zero delay.
    pub fn retry_after_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        let raw = self.retry_after.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(secs) = raw.parse::<u64>() {
            return Some(Duration::from_secs(secs));
        }
        let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
        Some((at - now).to_std().unwrap_or(Duration::ZERO))
    }
}

/// Per-recipient outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawResult", into = "RawResult")]
pub struct DeliveryResult {
    pub message_id: String,
    /// Canonical registration id when the backend replaced the target token.
    /// Stream acknowledgments put the originating address here.
    pub registration_id: String,
    pub error: Option<DeliveryError>,
    /// The error code exactly as the backend sent it.
    pub error_code: Option<String>,
}

impl DeliveryResult {
    /// Builds a result from backend fields, classifying `code` against the
    /// given vocabulary.
    pub fn from_code(
        vocabulary: Vocabulary,
        message_id: impl Into<String>,
        registration_id: impl Into<String>,
        code: &str,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            registration_id: registration_id.into(),
            error: DeliveryError::classify(vocabulary, code),
            error_code: (!code.is_empty()).then(|| code.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.error_code.is_none()
    }

    /// Whether the target token should be removed from the caller's registry.
    pub fn unregistered(&self) -> bool {
        self.error.is_some_and(DeliveryError::indicates_unregistered)
    }

    /// A backend error code the classifier did not recognize.
    pub fn unclassified_code(&self) -> Option<&str> {
        match self.error {
            Some(_) => None,
            None => self.error_code.as_deref(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct RawResult {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    message_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    registration_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<RawResult> for DeliveryResult {
    fn from(raw: RawResult) -> Self {
        DeliveryResult::from_code(
            Vocabulary::Http,
            raw.message_id,
            raw.registration_id,
            raw.error.as_deref().unwrap_or_default(),
        )
    }
}

impl From<DeliveryResult> for RawResult {
    fn from(result: DeliveryResult) -> Self {
        let error = result
            .error_code
            .or_else(|| result.error.map(|e| e.code().to_string()));
        RawResult {
            message_id: result.message_id,
            registration_id: result.registration_id,
            error,
        }
    }
}
