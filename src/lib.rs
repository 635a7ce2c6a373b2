//! # fcmpush
//!
//! `fcmpush` sends push notifications through Firebase Cloud Messaging's
//! legacy interfaces: a request/response HTTP transport and a persistent
//! XMPP stream carried over WebSocket.
//!
//! ## Core Modules
//!
//! - `client`: The stream client, its dispatch loop and acknowledgment correlation.
//! - `config`: Layered configuration loading (file, `.env`, environment).
//! - `message`: The downstream message record and its validation.
//! - `response`: Backend responses and the delivery error classifier.
//! - `transport`: HTTP sends, the backoff retrier and stream framing.
//! - `utils`: The crate error type and logging setup.

pub mod client;
pub mod config;
pub mod message;
pub mod response;
pub mod transport;
pub mod utils;

pub use client::XmppClient;
pub use message::Message;
pub use response::{DeliveryError, Response};
pub use transport::HttpClient;
pub use utils::error::FcmError;
