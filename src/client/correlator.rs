//! Matches stream acknowledgments to the sends waiting on them.
//!
//! A `PendingSend` is created per send together with a `Waiter`. The
//! dispatch loop registers the reply half with the `Correlator` when it
//! writes the message; the caller keeps the `Waiter`, which races the reply
//! against the send's deadline.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use crate::message::Message;
use crate::response::{DeliveryResult, Response, Vocabulary};
use crate::transport::stanza::{AckFrame, encode_message};
use crate::utils::error::FcmError;

type Reply = Result<Response, FcmError>;

/// One message on its way to the stream, plus where its reply goes.
///
/// The stanza is encoded up front so encoding errors reach the caller
/// instead of the dispatch loop.
#[derive(Debug)]
pub struct PendingSend {
    message_id: String,
    stanza: String,
    reply: Option<oneshot::Sender<Reply>>,
    deadline: Option<Instant>,
}

impl PendingSend {
    /// A send whose caller waits up to `timeout` for the acknowledgment.
    pub fn new(message: &Message, timeout: Duration) -> Result<(PendingSend, Waiter), FcmError> {
        let stanza = encode_message(message)?;
        let (tx, rx) = oneshot::channel();
        let deadline = Instant::now() + timeout;
        let waiter = Waiter {
            message_id: message.message_id.clone(),
            registration_id: message.to.clone(),
            deadline,
            reply: rx,
        };
        let pending = PendingSend {
            message_id: message.message_id.clone(),
            stanza,
            reply: Some(tx),
            deadline: Some(deadline),
        };
        Ok((pending, waiter))
    }

    /// A send nobody waits on.
    pub fn detached(message: &Message) -> Result<PendingSend, FcmError> {
        Ok(PendingSend {
            message_id: message.message_id.clone(),
            stanza: encode_message(message)?,
            reply: None,
            deadline: None,
        })
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// The encoded `<message>` stanza.
    pub fn stanza(&self) -> &str {
        &self.stanza
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// True once the caller can no longer receive a reply.
    pub fn is_abandoned(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| d <= now)
            || self.reply.as_ref().is_some_and(oneshot::Sender::is_closed)
    }
}

/// Caller side of a `PendingSend`.
#[derive(Debug)]
pub struct Waiter {
    message_id: String,
    registration_id: String,
    deadline: Instant,
    reply: oneshot::Receiver<Reply>,
}

impl Waiter {
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Waits for the acknowledgment until the deadline.
    ///
    /// On timeout a 503 response carrying `ServiceUnavailable` is
    /// synthesized. If the dispatch loop dropped the reply channel (the
    /// client shut down) the caller gets `ClientClosed`.
    pub async fn wait(self) -> Result<Response, FcmError> {
        match tokio::time::timeout_at(self.deadline, self.reply).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(FcmError::ClientClosed),
            Err(_) => {
                debug!(message_id = %self.message_id, "acknowledgment timed out");
                Ok(Response::service_unavailable(
                    &self.message_id,
                    &self.registration_id,
                ))
            }
        }
    }
}

/// What happened to an inbound acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The waiting caller received the response.
    Delivered,
    /// An entry existed but its caller had already stopped waiting.
    Abandoned,
    /// Nothing was registered under the message id; the ack is dropped.
    NoWaiter,
}

/// Outcome of `Correlator::register`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Registered,
    /// Nothing to register: a detached send, or one registered on an
    /// earlier attempt.
    NoReply,
    /// The id is already waiting; the send must not be written.
    Rejected,
}

#[derive(Debug)]
struct Entry {
    reply: oneshot::Sender<Reply>,
    deadline: Option<Instant>,
}

/// Map from message id to the reply channel of the send awaiting it.
#[derive(Debug, Default)]
pub struct Correlator {
    pending: HashMap<String, Entry>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the reply half out of `pending` and files it under the
    /// message id.
    ///
    /// A second live send under an id that is already waiting is answered
    /// with `DuplicateMessageId` straight away; the first keeps its entry.
    pub fn register(&mut self, pending: &mut PendingSend) -> Registration {
        let Some(reply) = pending.reply.take() else {
            return Registration::NoReply;
        };
        if self
            .pending
            .get(&pending.message_id)
            .is_some_and(|entry| !entry.reply.is_closed())
        {
            let _ = reply.send(Err(FcmError::DuplicateMessageId(
                pending.message_id.clone(),
            )));
            return Registration::Rejected;
        }
        self.pending.insert(
            pending.message_id.clone(),
            Entry {
                reply,
                deadline: pending.deadline,
            },
        );
        Registration::Registered
    }

    pub fn is_pending(&self, message_id: &str) -> bool {
        self.pending.contains_key(message_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Builds the response for an inbound ack/nack and hands it to the
    /// waiting caller, removing the entry.
    pub fn resolve(&mut self, ack: &AckFrame) -> Resolution {
        let response = Response::single(
            200,
            DeliveryResult::from_code(Vocabulary::Xmpp, &ack.message_id, &ack.from, &ack.error),
        );

        match self.pending.remove(&ack.message_id) {
            Some(entry) => match entry.reply.send(Ok(response)) {
                Ok(()) => Resolution::Delivered,
                Err(_) => Resolution::Abandoned,
            },
            None => Resolution::NoWaiter,
        }
    }

    /// Fails the waiter registered under `message_id`, if any.
    pub fn reject(&mut self, message_id: &str, err: FcmError) -> Resolution {
        match self.pending.remove(message_id) {
            Some(entry) => match entry.reply.send(Err(err)) {
                Ok(()) => Resolution::Delivered,
                Err(_) => Resolution::Abandoned,
            },
            None => Resolution::NoWaiter,
        }
    }

    /// Drops entries whose deadline passed or whose caller went away.
    /// Returns how many were removed.
    pub fn prune(&mut self, now: Instant) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, entry| {
            !entry.deadline.is_some_and(|d| d <= now) && !entry.reply.is_closed()
        });
        before - self.pending.len()
    }
}
