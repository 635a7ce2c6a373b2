//! XMPP stanza framing for the stream transport.
//!
//! Outbound messages are JSON wrapped in a `<gcm>` element inside a
//! `<message>` stanza. Inbound frames are classified by their root element;
//! message stanzas carry the backend's JSON (ack, nack, control or receipt)
//! inside the same `<gcm>` element.

use serde::Deserialize;

use crate::message::Message;
use crate::utils::error::FcmError;

pub const GCM_NAMESPACE: &str = "google:mobile:data";
pub const FRAMING_NAMESPACE: &str = "urn:ietf:params:xml:ns:xmpp-framing";
pub const FCM_DOMAIN: &str = "fcm.googleapis.com";

/// Control type announcing that the backend is about to close the stream.
pub const CONTROL_CONNECTION_DRAINING: &str = "CONNECTION_DRAINING";

/// An inbound frame, classified by shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stanza {
    /// A `<message>` stanza. `payload` is the unescaped `<gcm>` body, if any.
    Chat { payload: Option<String> },
    Presence(String),
    Iq(String),
    /// Stream-level frames (`<open>`, `<close>`, features) and anything else.
    Other(String),
}

impl Stanza {
    pub fn parse(frame: &str) -> Stanza {
        let frame = frame.trim();
        if has_root(frame, "message") {
            Stanza::Chat {
                payload: gcm_payload(frame),
            }
        } else if has_root(frame, "presence") {
            Stanza::Presence(frame.to_string())
        } else if has_root(frame, "iq") {
            Stanza::Iq(frame.to_string())
        } else {
            Stanza::Other(frame.to_string())
        }
    }
}

/// The JSON body of an inbound `<gcm>` element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AckFrame {
    #[serde(default)]
    pub message_type: String,
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub error_description: String,
    #[serde(default)]
    pub control_type: String,
}

impl AckFrame {
    pub fn parse(payload: &str) -> Result<AckFrame, FcmError> {
        serde_json::from_str(payload).map_err(FcmError::Decode)
    }

    pub fn is_ack(&self) -> bool {
        self.message_type.eq_ignore_ascii_case("ack")
    }

    pub fn is_nack(&self) -> bool {
        self.message_type.eq_ignore_ascii_case("nack")
    }

    pub fn is_control(&self) -> bool {
        self.message_type.eq_ignore_ascii_case("control")
    }

    pub fn is_draining_control(&self) -> bool {
        self.is_control() && self.control_type == CONTROL_CONNECTION_DRAINING
    }
}

/// Wraps a serialized message in the downstream `<message>` stanza.
pub fn encode_message(message: &Message) -> Result<String, FcmError> {
    let json = serde_json::to_string(message).map_err(FcmError::Encode)?;
    Ok(format!(
        r#"<message id=""><gcm xmlns="{GCM_NAMESPACE}">{}</gcm></message>"#,
        escape(&json)
    ))
}

/// RFC 7395 stream open frame.
pub fn open_frame() -> String {
    format!(r#"<open xmlns="{FRAMING_NAMESPACE}" to="{FCM_DOMAIN}" version="1.0"/>"#)
}

pub fn close_frame() -> String {
    format!(r#"<close xmlns="{FRAMING_NAMESPACE}"/>"#)
}

fn has_root(frame: &str, name: &str) -> bool {
    frame
        .strip_prefix('<')
        .and_then(|rest| rest.strip_prefix(name))
        .and_then(|rest| rest.chars().next())
        .is_some_and(|c| c == '>' || c == '/' || c.is_whitespace())
}

fn gcm_payload(frame: &str) -> Option<String> {
    let start = frame.find("<gcm")?;
    let open_end = start + frame[start..].find('>')?;
    if frame[..open_end].ends_with('/') {
        return None;
    }
    let body_start = open_end + 1;
    let body_len = frame[body_start..].find("</gcm>")?;
    let body = frame[body_start..body_start + body_len].trim();
    (!body.is_empty()).then(|| unescape(body))
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
