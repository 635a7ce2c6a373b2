//! The dispatch loop: a single task that owns the stream connection.
//!
//! Callers never touch the connection. They push `Command`s onto a bounded
//! queue and, for blocking sends, wait on a per-message reply channel the
//! loop resolves through the `Correlator`. Each turn the loop waits for
//! either the next command or the next inbound stanza, preferring commands
//! so outbound sends are not held up by a slow inbound stream.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::client::connection::ConnectionManager;
use crate::client::correlator::{Correlator, PendingSend, Registration, Resolution};
use crate::response::{DeliveryError, Vocabulary};
use crate::transport::retry::RetryPolicy;
use crate::transport::stanza::{AckFrame, Stanza};
use crate::utils::error::FcmError;

/// Control actions accepted by the dispatch loop, processed in FIFO order.
#[derive(Debug)]
pub enum Command {
    Send(PendingSend),
    Reconnect,
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
pub struct DispatcherOptions {
    /// Consecutive read errors tolerated before the connection is replaced.
    pub max_read_failures: u32,
    /// Delay schedule between reconnect attempts while disconnected.
    pub reconnect_policy: RetryPolicy,
    /// Most messages kept for resend while the stream is down.
    pub resend_capacity: usize,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            max_read_failures: 3,
            reconnect_policy: RetryPolicy::default(),
            resend_capacity: 100,
        }
    }
}

enum Step {
    Command(Option<Command>),
    Inbound(Result<Option<String>, FcmError>),
    ReconnectDue,
}

pub struct Dispatcher {
    commands: mpsc::Receiver<Command>,
    handle: mpsc::WeakSender<Command>,
    connection: ConnectionManager,
    correlator: Correlator,
    retry_pending: VecDeque<PendingSend>,
    read_failures: u32,
    reconnect_attempts: u32,
    /// When the next automatic connect attempt is due. Set once per outage
    /// step so incoming commands cannot push it back.
    reconnect_at: Option<Instant>,
    options: DispatcherOptions,
}

impl Dispatcher {
    /// `handle` is a weak sender onto the loop's own queue, used to schedule
    /// reconnects without keeping the queue open after every client is gone.
    pub fn new(
        commands: mpsc::Receiver<Command>,
        handle: mpsc::WeakSender<Command>,
        connection: ConnectionManager,
        options: DispatcherOptions,
    ) -> Self {
        Self {
            commands,
            handle,
            connection,
            correlator: Correlator::new(),
            retry_pending: VecDeque::new(),
            read_failures: 0,
            reconnect_attempts: 0,
            reconnect_at: None,
            options,
        }
    }

    pub async fn run(mut self) {
        info!("dispatch loop started");

        loop {
            let now = Instant::now();
            self.correlator.prune(now);
            self.prune_retry_pending(now);

            let step = if self.connection.is_connected() {
                tokio::select! {
                    biased;
                    cmd = self.commands.recv() => Step::Command(cmd),
                    frame = self.connection.read_stanza() => Step::Inbound(frame),
                }
            } else {
                let due = self.reconnect_due();
                if due <= now {
                    Step::ReconnectDue
                } else {
                    tokio::select! {
                        biased;
                        cmd = self.commands.recv() => Step::Command(cmd),
                        _ = tokio::time::sleep_until(due) => Step::ReconnectDue,
                    }
                }
            };

            match step {
                Step::Command(Some(Command::Send(pending))) => self.handle_send(pending).await,
                Step::Command(Some(Command::Reconnect)) | Step::ReconnectDue => {
                    self.handle_reconnect().await
                }
                Step::Command(Some(Command::Shutdown)) => {
                    info!("shutdown requested");
                    break;
                }
                Step::Command(None) => {
                    info!("all client handles dropped");
                    break;
                }
                Step::Inbound(Ok(Some(frame))) => {
                    self.read_failures = 0;
                    self.handle_frame(&frame);
                }
                Step::Inbound(Ok(None)) => {
                    warn!("stream closed by peer");
                    self.drop_connection();
                }
                Step::Inbound(Err(e)) => self.handle_read_error(e),
            }
        }

        if let Err(e) = self.connection.close().await {
            warn!(error = %e, "failed to close stream cleanly");
        }
        info!(
            pending = self.correlator.len(),
            unsent = self.retry_pending.len(),
            "dispatch loop stopped"
        );
    }

    async fn handle_send(&mut self, mut pending: PendingSend) {
        if pending.is_abandoned(Instant::now()) {
            debug!(message_id = %pending.message_id(), "caller stopped waiting; send skipped");
            return;
        }

        if self.correlator.register(&mut pending) == Registration::Rejected {
            warn!(message_id = %pending.message_id(), "duplicate message id; send rejected");
            return;
        }

        match self.connection.write_stanza(pending.stanza()).await {
            Ok(()) => debug!(message_id = %pending.message_id(), "message written"),
            Err(e) => {
                if self.connection.is_connected() {
                    warn!(message_id = %pending.message_id(), error = %e, "write failed");
                    self.drop_connection();
                }
                self.keep_for_resend(pending);
            }
        }
    }

    fn keep_for_resend(&mut self, pending: PendingSend) {
        let waiting = self.retry_pending.len();
        if waiting >= self.options.resend_capacity {
            warn!(
                message_id = %pending.message_id(),
                waiting,
                "resend queue full; message dropped"
            );
            if pending.deadline().is_some() {
                self.correlator
                    .reject(pending.message_id(), FcmError::ResendQueueFull(waiting));
            }
            return;
        }
        debug!(message_id = %pending.message_id(), "message kept for resend after reconnect");
        self.retry_pending.push_back(pending);
    }

    fn prune_retry_pending(&mut self, now: Instant) {
        let before = self.retry_pending.len();
        self.retry_pending.retain(|pending| !pending.is_abandoned(now));
        let dropped = before - self.retry_pending.len();
        if dropped > 0 {
            debug!(dropped, "dropped resends whose caller stopped waiting");
        }
    }

    /// Drops the live connection and schedules the first reconnect attempt.
    fn drop_connection(&mut self) {
        self.connection.disconnect();
        self.reconnect_due();
    }

    fn reconnect_due(&mut self) -> Instant {
        let delay = self
            .options
            .reconnect_policy
            .capped_backoff(self.reconnect_attempts.max(1));
        *self.reconnect_at.get_or_insert_with(|| Instant::now() + delay)
    }

    async fn handle_reconnect(&mut self) {
        match self.connection.connect().await {
            Ok(()) => {
                self.reconnect_attempts = 0;
                self.reconnect_at = None;
                self.read_failures = 0;
                self.flush_retry_pending().await;
            }
            Err(e) => {
                self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
                warn!(attempt = self.reconnect_attempts, error = %e, "reconnect failed");
                if !self.connection.is_connected() {
                    self.reconnect_at = None;
                    self.reconnect_due();
                }
            }
        }
    }

    async fn flush_retry_pending(&mut self) {
        let queued = std::mem::take(&mut self.retry_pending);
        if !queued.is_empty() {
            info!(count = queued.len(), "resending messages after reconnect");
        }
        for pending in queued {
            if self.connection.is_connected() {
                self.handle_send(pending).await;
            } else {
                self.retry_pending.push_back(pending);
            }
        }
    }

    fn handle_read_error(&mut self, err: FcmError) {
        self.read_failures += 1;
        warn!(failures = self.read_failures, error = %err, "stream read failed");
        if self.read_failures >= self.options.max_read_failures {
            warn!("too many consecutive read failures; replacing connection");
            self.read_failures = 0;
            self.drop_connection();
        }
    }

    /// Handles one inbound stanza. A panic here is contained so a single
    /// bad frame cannot stop the loop.
    fn handle_frame(&mut self, frame: &str) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.process_frame(frame)));
        if outcome.is_err() {
            error!("panic while handling inbound stanza; frame dropped");
        }
    }

    fn process_frame(&mut self, frame: &str) {
        match Stanza::parse(frame) {
            Stanza::Chat {
                payload: Some(payload),
            } => self.handle_payload(&payload),
            Stanza::Chat { payload: None } => debug!(%frame, "message stanza without payload"),
            Stanza::Presence(presence) => debug!(%presence, "presence"),
            Stanza::Iq(iq) => debug!(%iq, "iq"),
            Stanza::Other(other) => debug!(%other, "stream frame"),
        }
    }

    fn handle_payload(&mut self, payload: &str) {
        let ack = match AckFrame::parse(payload) {
            Ok(ack) => ack,
            Err(e) => {
                warn!(error = %e, "malformed acknowledgment dropped");
                return;
            }
        };

        if ack.is_draining_control() {
            info!("backend is draining the connection");
            self.schedule_reconnect();
            return;
        }
        if !ack.is_ack() && !ack.is_nack() {
            debug!(message_type = %ack.message_type, message_id = %ack.message_id, "ignored");
            return;
        }

        let classified = DeliveryError::classify(Vocabulary::Xmpp, &ack.error);
        match self.correlator.resolve(&ack) {
            Resolution::Delivered => debug!(message_id = %ack.message_id, "acknowledgment delivered"),
            Resolution::Abandoned => {
                debug!(message_id = %ack.message_id, "acknowledgment arrived after caller gave up")
            }
            Resolution::NoWaiter => debug!(message_id = %ack.message_id, "no waiter; dropped"),
        }
        if !ack.error.is_empty() {
            warn!(
                message_id = %ack.message_id,
                code = %ack.error,
                description = %ack.error_description,
                "delivery failed"
            );
        }

        if classified == Some(DeliveryError::ConnectionDraining) {
            self.schedule_reconnect();
        }
    }

    /// Queues a `Reconnect` from a separate task so the loop never blocks on
    /// its own full queue.
    fn schedule_reconnect(&self) {
        if let Some(tx) = self.handle.upgrade() {
            tokio::spawn(async move {
                let _ = tx.send(Command::Reconnect).await;
            });
        }
    }
}
