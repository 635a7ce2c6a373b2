use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::utils::error::FcmError;

/// A live, authenticated stream to the backend.
#[async_trait]
pub trait Connection: Send {
    /// Writes one stanza.
    async fn write_stanza(&mut self, stanza: &str) -> Result<(), FcmError>;

    /// Reads the next inbound stanza; `Ok(None)` means the peer closed the
    /// stream.
    ///
    /// Must be cancel-safe: the dispatch loop drops this future whenever a
    /// command arrives first, and no frame may be lost when that happens.
    async fn read_stanza(&mut self) -> Result<Option<String>, FcmError>;

    async fn close(&mut self) -> Result<(), FcmError>;
}

/// Opens new connections with parameters fixed at construction (endpoint,
/// credentials, production/test selection).
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Connection>, FcmError>;
}

/// Holds the one live connection and replaces it on demand.
pub struct ConnectionManager {
    connector: Box<dyn Connector>,
    connection: Option<Box<dyn Connection>>,
    generation: u64,
}

impl ConnectionManager {
    pub fn new(connector: Box<dyn Connector>) -> Self {
        Self {
            connector,
            connection: None,
            generation: 0,
        }
    }

    /// Opens a fresh connection and swaps it in. The previous handle, if
    /// any, is dropped without a clean close.
    pub async fn connect(&mut self) -> Result<(), FcmError> {
        let connection = self.connector.connect().await?;
        if self.connection.replace(connection).is_some() {
            debug!("discarded previous stream connection");
        }
        self.generation += 1;
        info!(generation = self.generation, "stream connected");
        Ok(())
    }

    /// Drops the current connection so the next read or write reports
    /// `NotConnected` until `connect` succeeds.
    pub fn disconnect(&mut self) {
        if self.connection.take().is_some() {
            warn!(generation = self.generation, "stream connection dropped");
        }
    }

    pub async fn close(&mut self) -> Result<(), FcmError> {
        match self.connection.take() {
            Some(mut connection) => connection.close().await,
            None => Ok(()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Number of successful connects so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub async fn write_stanza(&mut self, stanza: &str) -> Result<(), FcmError> {
        match self.connection.as_mut() {
            Some(connection) => connection.write_stanza(stanza).await,
            None => Err(FcmError::NotConnected),
        }
    }

    pub async fn read_stanza(&mut self) -> Result<Option<String>, FcmError> {
        match self.connection.as_mut() {
            Some(connection) => connection.read_stanza().await,
            None => Err(FcmError::NotConnected),
        }
    }
}
