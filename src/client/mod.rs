//! The `client` module implements the persistent stream client.
//!
//! `XmppClient` is the public handle. Behind it a single dispatch loop owns
//! the connection (through `ConnectionManager`) and matches acknowledgments
//! to waiting sends (through `Correlator`).

pub mod connection;
pub mod correlator;
pub mod dispatcher;
pub mod xmpp_client;

pub use connection::{Connection, ConnectionManager, Connector};
pub use correlator::{Correlator, PendingSend, Registration, Resolution, Waiter};
pub use dispatcher::{Command, Dispatcher, DispatcherOptions};
pub use xmpp_client::{ClientOptions, XmppClient};

#[cfg(test)]
mod tests;
