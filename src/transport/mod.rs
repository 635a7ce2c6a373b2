//! The `transport` module carries messages to the backend.
//!
//! - `http`: one-shot JSON POSTs, optionally retried.
//! - `retry`: the quadratic backoff retrier shared by both transports.
//! - `stanza`: XMPP framing for the persistent stream.
//! - `websocket`: the production stream connector.

pub mod http;
pub mod retry;
pub mod stanza;
pub mod websocket;

pub use http::HttpClient;
pub use retry::{RetryPolicy, retry};
pub use websocket::WsConnector;
