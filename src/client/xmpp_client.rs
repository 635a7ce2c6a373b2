use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, instrument};

use crate::client::connection::{ConnectionManager, Connector};
use crate::client::correlator::PendingSend;
use crate::client::dispatcher::{Command, Dispatcher, DispatcherOptions};
use crate::config::{RetrySettings, XmppSettings};
use crate::message::Message;
use crate::response::Response;
use crate::transport::retry::RetryPolicy;
use crate::transport::websocket::WsConnector;
use crate::utils::error::FcmError;

/// Tuning for an `XmppClient`.
#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    /// Bound of the command queue; `send` waits when it is full. Also caps
    /// how many messages are kept for resend while the stream is down.
    pub command_capacity: usize,
    /// Timeout applied by `send`.
    pub send_timeout: Duration,
    pub max_read_failures: u32,
    pub reconnect_policy: RetryPolicy,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            command_capacity: 100,
            send_timeout: Duration::from_secs(15),
            max_read_failures: 3,
            reconnect_policy: RetryPolicy::default(),
        }
    }
}

impl ClientOptions {
    pub fn from_settings(xmpp: &XmppSettings, retry: &RetrySettings) -> Self {
        Self {
            command_capacity: xmpp.command_capacity,
            send_timeout: Duration::from_millis(xmpp.send_timeout_ms),
            max_read_failures: xmpp.max_read_failures,
            reconnect_policy: RetryPolicy::from_settings(retry),
        }
    }
}

/// Client for the persistent stream transport.
///
/// All operations go through the dispatch loop's command queue, so a client
/// can be shared (e.g. behind an `Arc`) and used from many tasks at once.
pub struct XmppClient {
    commands: mpsc::Sender<Command>,
    send_timeout: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl XmppClient {
    /// Connects to the endpoint chosen by `settings.debug` and starts the
    /// dispatch loop.
    pub async fn connect(settings: &XmppSettings, retry: &RetrySettings) -> Result<Self, FcmError> {
        let connector = WsConnector::from_settings(settings)?;
        Self::with_connector(
            Box::new(connector),
            ClientOptions::from_settings(settings, retry),
        )
        .await
    }

    /// Opens the first connection through `connector`, failing if it
    /// cannot, then hands it to a freshly spawned dispatch loop.
    pub async fn with_connector(
        connector: Box<dyn Connector>,
        options: ClientOptions,
    ) -> Result<Self, FcmError> {
        let mut connection = ConnectionManager::new(connector);
        connection.connect().await?;

        let (tx, rx) = mpsc::channel(options.command_capacity.max(1));
        let dispatcher = Dispatcher::new(
            rx,
            tx.downgrade(),
            connection,
            DispatcherOptions {
                max_read_failures: options.max_read_failures.max(1),
                reconnect_policy: options.reconnect_policy,
                resend_capacity: options.command_capacity.max(1),
            },
        );
        let task = tokio::spawn(dispatcher.run());

        Ok(Self {
            commands: tx,
            send_timeout: options.send_timeout,
            task: Mutex::new(Some(task)),
        })
    }

    /// Sends `message` and waits for its acknowledgment using the default
    /// timeout.
    pub async fn send(&self, message: &Message) -> Result<Response, FcmError> {
        self.send_with_timeout(message, self.send_timeout).await
    }

    /// Sends `message` and waits up to `timeout` for the acknowledgment.
    ///
    /// The response carries status 200 whether the backend acked or nacked;
    /// a nack shows up as the result's error. If no acknowledgment arrives in
    /// time the response is a synthesized 503 with `ServiceUnavailable`.
    #[instrument(skip(self, message), fields(message_id = %message.message_id))]
    pub async fn send_with_timeout(
        &self,
        message: &Message,
        timeout: Duration,
    ) -> Result<Response, FcmError> {
        message.validate_for_stream()?;
        let (pending, waiter) = PendingSend::new(message, timeout)?;
        self.submit(Command::Send(pending)).await?;
        waiter.wait().await
    }

    /// Queues `message` without waiting for its acknowledgment.
    pub async fn async_send(&self, message: &Message) -> Result<(), FcmError> {
        message.validate_for_stream()?;
        self.submit(Command::Send(PendingSend::detached(message)?))
            .await
    }

    /// Asks the dispatch loop to replace its connection. Commands already
    /// queued are kept and processed on the new connection.
    pub async fn reconnect(&self) -> Result<(), FcmError> {
        self.submit(Command::Reconnect).await
    }

    /// Stops the dispatch loop and waits for it to close the connection.
    /// Sends still waiting for an acknowledgment fail with `ClientClosed`.
    pub async fn close(&self) -> Result<(), FcmError> {
        // the loop may already be gone; joining below is what matters
        let _ = self.commands.send(Command::Shutdown).await;

        let task = self.task.lock().ok().and_then(|mut task| task.take());
        if let Some(task) = task {
            task.await
                .map_err(|e| FcmError::connection(format!("dispatch loop failed: {e}")))?;
            info!("stream client closed");
        }
        Ok(())
    }

    async fn submit(&self, command: Command) -> Result<(), FcmError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| FcmError::ClientClosed)
    }
}
