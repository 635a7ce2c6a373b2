//! The `response` module models what the backend reports back for a send.
//!
//! It holds the `Response`/`DeliveryResult` records shared by both transports
//! and the `DeliveryError` classifier that turns backend error codes into a
//! typed taxonomy with retry and timeout flags.

pub mod delivery_error;
pub mod response;

pub use delivery_error::{DeliveryError, Vocabulary};
pub use response::{DeliveryResult, RETRY_AFTER_HEADER, Response};
