//! The `message` module defines the downstream message record sent over both
//! transports and the validation every send runs before touching the network.

pub mod message;

pub use message::{
    MAX_CONDITION_OPERATORS, MAX_REGISTRATION_IDS, MAX_TTL, Message, Notification, Priority,
    ValidationError, decode, validate,
};
