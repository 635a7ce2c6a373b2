use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::utils::error::FcmError;

/// Longest time-to-live the backend accepts: four weeks, in seconds.
pub const MAX_TTL: u32 = 2_419_200;

/// Maximum number of registration tokens in one multicast message.
pub const MAX_REGISTRATION_IDS: usize = 1000;

/// Maximum number of `&&`/`||` operators in a targeting condition.
pub const MAX_CONDITION_OPERATORS: usize = 2;

/// Reasons a message is rejected before it reaches the network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("message is invalid")]
    InvalidMessage,
    #[error("topic is invalid or registration ids are not set")]
    InvalidTarget,
    #[error("too many registration ids (max {MAX_REGISTRATION_IDS})")]
    TooManyTargets,
    #[error("message time-to-live is invalid (max {MAX_TTL} seconds)")]
    InvalidTimeToLive,
    #[error("message id is required for stream sends")]
    MissingMessageId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Normal,
}

/// User-visible notification fields shared by all platforms.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub body: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub icon: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub click_action: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub color: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sound: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tag: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub body_loc_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub body_loc_args: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title_loc_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title_loc_args: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub android_channel_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub badge: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subtitle: String,
}

/// A downstream message: who receives it, what it carries and how the
/// backend should deliver it.
///
/// Exactly one addressing mode is expected to be meaningful: `to` (a token
/// or `/topics/...`), `registration_ids` (multicast) or `condition` (a
/// boolean topic expression such as `'a' in topics && 'b' in topics`).
///
/// `message_id` is what the stream transport correlates acknowledgments on;
/// the HTTP transport ignores it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub to: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub registration_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub condition: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub collapse_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub content_available: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub mutable_content: bool,
    /// Seconds the backend keeps the message while the device is offline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_live: Option<u32>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub delivery_receipt_requested: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub delay_while_idle: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub restricted_package_name: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub data: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification: Option<Notification>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message_id: String,
}

impl Message {
    pub fn for_token(token: impl Into<String>) -> Self {
        Self {
            to: token.into(),
            ..Self::default()
        }
    }

    pub fn for_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            registration_ids: tokens.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn for_condition(condition: impl Into<String>) -> Self {
        Self {
            condition: condition.into(),
            ..Self::default()
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = message_id.into();
        self
    }

    /// Assigns a random UUID as the message id.
    pub fn with_generated_id(self) -> Self {
        self.with_message_id(Uuid::new_v4().to_string())
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_notification(mut self, notification: Notification) -> Self {
        self.notification = Some(notification);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_time_to_live(mut self, seconds: u32) -> Self {
        self.time_to_live = Some(seconds);
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate(Some(self))
    }

    /// Validation for the stream transport, which also needs a message id
    /// to correlate the acknowledgment.
    pub fn validate_for_stream(&self) -> Result<(), ValidationError> {
        self.validate()?;
        if self.message_id.is_empty() {
            return Err(ValidationError::MissingMessageId);
        }
        Ok(())
    }
}

fn condition_operator_count(condition: &str) -> usize {
    condition.matches("&&").count() + condition.matches("||").count()
}

/// Pre-flight checks on addressing and lifetime fields.
pub fn validate(message: Option<&Message>) -> Result<(), ValidationError> {
    let Some(msg) = message else {
        return Err(ValidationError::InvalidMessage);
    };

    let has_condition = !msg.condition.is_empty()
        && condition_operator_count(&msg.condition) <= MAX_CONDITION_OPERATORS;
    if msg.to.is_empty() && msg.registration_ids.is_empty() && !has_condition {
        return Err(ValidationError::InvalidTarget);
    }
    if msg.registration_ids.len() > MAX_REGISTRATION_IDS {
        return Err(ValidationError::TooManyTargets);
    }
    if msg.time_to_live.is_some_and(|ttl| ttl > MAX_TTL) {
        return Err(ValidationError::InvalidTimeToLive);
    }
    Ok(())
}

/// Parses a JSON message document. A literal `null` decodes to `None` so the
/// caller's `validate` can report it as a missing message.
pub fn decode(input: &str) -> Result<Option<Message>, FcmError> {
    serde_json::from_str(input).map_err(FcmError::Decode)
}
