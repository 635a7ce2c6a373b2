//! WebSocket transport
//!
//! Carries XMPP stanzas over a WebSocket connection (RFC 7395 framing): one
//! stanza per text frame. The connection is authenticated in the upgrade
//! request with the server key and the sender's JID, then opened with the
//! framing `<open/>` element.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info};
use tungstenite::client::IntoClientRequest;
use tungstenite::http::HeaderValue;
use tungstenite::http::header::AUTHORIZATION;
use tungstenite::protocol::Message as WsMessage;

use crate::client::connection::{Connection, Connector};
use crate::config::XmppSettings;
use crate::transport::stanza::{FCM_DOMAIN, close_frame, open_frame};
use crate::utils::error::FcmError;

/// Upgrade header naming the sender the stream authenticates as.
pub const SENDER_HEADER: &str = "x-fcm-sender";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens WebSocket connections to a fixed endpoint.
#[derive(Debug, Clone)]
pub struct WsConnector {
    endpoint: String,
    sender_jid: String,
    api_key: String,
}

impl WsConnector {
    pub fn new(
        endpoint: impl Into<String>,
        sender_id: &str,
        api_key: impl Into<String>,
    ) -> Result<Self, FcmError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(FcmError::InvalidApiKey);
        }
        Ok(Self {
            endpoint: endpoint.into(),
            sender_jid: format!("{sender_id}@{FCM_DOMAIN}"),
            api_key,
        })
    }

    /// Connector for the production or testing endpoint, per `debug`.
    pub fn from_settings(settings: &XmppSettings) -> Result<Self, FcmError> {
        Self::new(settings.endpoint(), &settings.sender_id, settings.api_key.clone())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn sender_jid(&self) -> &str {
        &self.sender_jid
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, FcmError> {
        let mut request = self.endpoint.as_str().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("key={}", self.api_key))
                .map_err(|_| FcmError::InvalidApiKey)?,
        );
        headers.insert(
            SENDER_HEADER,
            HeaderValue::from_str(&self.sender_jid)
                .map_err(|e| FcmError::connection(format!("invalid sender id: {e}")))?,
        );

        let (mut stream, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(request))
            .await
            .map_err(|_| FcmError::connection(format!("connect to {} timed out", self.endpoint)))?
            .map_err(|e| FcmError::connection(e.to_string()))?;

        stream.send(WsMessage::text(open_frame())).await?;
        info!(endpoint = %self.endpoint, jid = %self.sender_jid, "stream opened");
        Ok(Box::new(WsConnection { stream }))
    }
}

/// One open WebSocket stream.
pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connection for WsConnection {
    async fn write_stanza(&mut self, stanza: &str) -> Result<(), FcmError> {
        self.stream.send(WsMessage::text(stanza.to_string())).await?;
        Ok(())
    }

    async fn read_stanza(&mut self) -> Result<Option<String>, FcmError> {
        while let Some(frame) = self.stream.next().await {
            match frame? {
                WsMessage::Text(text) => return Ok(Some(text.as_str().to_string())),
                WsMessage::Close(frame) => {
                    debug!(?frame, "peer closed stream");
                    return Ok(None);
                }
                // ping/pong are answered by tungstenite; binary frames are not XMPP
                _ => continue,
            }
        }
        Ok(None)
    }

    async fn close(&mut self) -> Result<(), FcmError> {
        let _ = self.stream.send(WsMessage::text(close_frame())).await;
        match self.stream.close(None).await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
