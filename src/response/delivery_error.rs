use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use serde::{Serialize, Serializer};

/// Identifies which transport produced an error code.
///
/// The HTTP endpoint and the XMPP stream report failures with disjoint
/// code vocabularies, so a code is only meaningful together with its origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vocabulary {
    Http,
    Xmpp,
}

/// A backend-reported delivery failure for a single recipient.
///
/// Every known code of both vocabularies maps to exactly one variant. The
/// `Stream*` variants are the stream-side spellings of failures the HTTP
/// endpoint also reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryError {
    MissingRegistration,
    InvalidRegistration,
    NotRegistered,
    InvalidPackageName,
    MismatchSenderId,
    MessageTooBig,
    InvalidDataKey,
    InvalidTtl,
    Unavailable,
    InternalServerError,
    DeviceMessageRateExceeded,
    TopicsMessageRateExceeded,
    InvalidJson,
    BadRegistration,
    DeviceUnregistered,
    SenderIdMismatch,
    BadAck,
    ServiceUnavailable,
    StreamInternalServerError,
    StreamDeviceMessageRateExceeded,
    StreamTopicsMessageRateExceeded,
    ConnectionDraining,
}

/// Static attributes of one `DeliveryError` variant.
#[derive(Debug, Clone, Copy)]
struct Classification {
    vocabulary: Vocabulary,
    code: &'static str,
    retryable: bool,
    timeout: bool,
    message: &'static str,
}

const fn entry(
    vocabulary: Vocabulary,
    code: &'static str,
    retryable: bool,
    timeout: bool,
    message: &'static str,
) -> Classification {
    Classification {
        vocabulary,
        code,
        retryable,
        timeout,
        message,
    }
}

static BY_CODE: LazyLock<HashMap<(Vocabulary, &'static str), DeliveryError>> =
    LazyLock::new(|| {
        DeliveryError::ALL
            .iter()
            .map(|err| {
                let class = err.classification();
                ((class.vocabulary, class.code), *err)
            })
            .collect()
    });

impl DeliveryError {
    /// Every variant, in table order.
    pub const ALL: [DeliveryError; 22] = [
        DeliveryError::MissingRegistration,
        DeliveryError::InvalidRegistration,
        DeliveryError::NotRegistered,
        DeliveryError::InvalidPackageName,
        DeliveryError::MismatchSenderId,
        DeliveryError::MessageTooBig,
        DeliveryError::InvalidDataKey,
        DeliveryError::InvalidTtl,
        DeliveryError::Unavailable,
        DeliveryError::InternalServerError,
        DeliveryError::DeviceMessageRateExceeded,
        DeliveryError::TopicsMessageRateExceeded,
        DeliveryError::InvalidJson,
        DeliveryError::BadRegistration,
        DeliveryError::DeviceUnregistered,
        DeliveryError::SenderIdMismatch,
        DeliveryError::BadAck,
        DeliveryError::ServiceUnavailable,
        DeliveryError::StreamInternalServerError,
        DeliveryError::StreamDeviceMessageRateExceeded,
        DeliveryError::StreamTopicsMessageRateExceeded,
        DeliveryError::ConnectionDraining,
    ];

    fn classification(self) -> Classification {
        use DeliveryError::*;
        use Vocabulary::{Http, Xmpp};

        match self {
            MissingRegistration => entry(
                Http,
                "MissingRegistration",
                false,
                false,
                "missing registration token",
            ),
            InvalidRegistration => entry(
                Http,
                "InvalidRegistration",
                false,
                false,
                "invalid registration token",
            ),
            NotRegistered => entry(Http, "NotRegistered", false, false, "unregistered device"),
            InvalidPackageName => entry(
                Http,
                "InvalidPackageName",
                false,
                false,
                "invalid package name",
            ),
            MismatchSenderId => entry(
                Http,
                "MismatchSenderId",
                false,
                false,
                "mismatched sender id",
            ),
            MessageTooBig => entry(Http, "MessageTooBig", false, false, "message is too big"),
            InvalidDataKey => entry(Http, "InvalidDataKey", false, false, "invalid data key"),
            InvalidTtl => entry(Http, "InvalidTtl", false, false, "invalid time to live"),
            Unavailable => entry(Http, "Unavailable", true, true, "timeout"),
            InternalServerError => entry(
                Http,
                "InternalServerError",
                true,
                false,
                "internal server error",
            ),
            DeviceMessageRateExceeded => entry(
                Http,
                "DeviceMessageRateExceeded",
                true,
                false,
                "device message rate exceeded",
            ),
            TopicsMessageRateExceeded => entry(
                Http,
                "TopicsMessageRateExceeded",
                true,
                false,
                "topics message rate exceeded",
            ),
            InvalidJson => entry(Xmpp, "INVALID_JSON", false, false, "invalid message"),
            BadRegistration => entry(
                Xmpp,
                "BAD_REGISTRATION",
                false,
                false,
                "registration is invalid",
            ),
            DeviceUnregistered => entry(
                Xmpp,
                "DEVICE_UNREGISTERED",
                false,
                false,
                "device is unregistered",
            ),
            SenderIdMismatch => entry(
                Xmpp,
                "SENDER_ID_MISMATCH",
                false,
                false,
                "sender id mismatch",
            ),
            BadAck => entry(Xmpp, "BAD_ACK", false, false, "bad ack"),
            ServiceUnavailable => entry(
                Xmpp,
                "SERVICE_UNAVAILABLE",
                true,
                true,
                "service unavailable",
            ),
            StreamInternalServerError => entry(
                Xmpp,
                "INTERNAL_SERVER_ERROR",
                true,
                false,
                "internal server error",
            ),
            StreamDeviceMessageRateExceeded => entry(
                Xmpp,
                "DEVICE_MESSAGE_RATE_EXCEEDED",
                true,
                false,
                "device message rate exceeded",
            ),
            StreamTopicsMessageRateExceeded => entry(
                Xmpp,
                "TOPICS_MESSAGE_RATE_EXCEEDED",
                true,
                false,
                "topic message rate exceeded",
            ),
            ConnectionDraining => entry(
                Xmpp,
                "CONNECTION_DRAINING",
                true,
                false,
                "connection draining",
            ),
        }
    }

    /// Maps a backend error code to its variant.
    ///
    /// Empty and unknown codes yield `None`: an unrecognized code is not
    /// treated as a failure, so a transient code the table does not know yet
    /// is never reported as permanent. The raw code stays available on the
    /// `Result` it came with.
    pub fn classify(vocabulary: Vocabulary, code: &str) -> Option<DeliveryError> {
        if code.is_empty() {
            return None;
        }
        BY_CODE.get(&(vocabulary, code)).copied()
    }

    /// The wire code the backend uses for this failure.
    pub fn code(self) -> &'static str {
        self.classification().code
    }

    pub fn vocabulary(self) -> Vocabulary {
        self.classification().vocabulary
    }

    /// Whether sending the same message again may succeed.
    pub fn is_retryable(self) -> bool {
        self.classification().retryable
    }

    pub fn is_timeout(self) -> bool {
        self.classification().timeout
    }

    /// True when the target token is permanently dead and should be pruned
    /// from the caller's registry.
    pub fn indicates_unregistered(self) -> bool {
        matches!(
            self,
            DeliveryError::InvalidRegistration
                | DeliveryError::NotRegistered
                | DeliveryError::MismatchSenderId
                | DeliveryError::BadRegistration
                | DeliveryError::DeviceUnregistered
                | DeliveryError::SenderIdMismatch
        )
    }
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.classification().message)
    }
}

impl std::error::Error for DeliveryError {}

impl Serialize for DeliveryError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}
