//! Minimal actor runtime on top of tokio channels
//!
//! Each actor owns a [`Mailbox`] and drains it in a single task, so at most
//! one message is in flight per actor. Other parties hold cloneable
//! [`Address`]es. Ordering is the mpsc guarantee: messages from one sender
//! arrive in send order.
//!
//! Two control primitives sit on top of plain sends:
//! - [`Address::request`]: the message carries a `oneshot` reply slot and
//!   the caller waits for it with an explicit deadline.
//! - [`Address::poison`]: a poison envelope is queued behind everything
//!   already in the mailbox; the caller waits until the actor has drained
//!   those messages and exited.

use std::fmt;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::error::{RequestError, SendError};
use crate::types::ActorId;

/// What actually travels through a mailbox
pub enum Envelope<M> {
    /// Domain message
    Message(M),
    /// Graceful termination; the sender is signalled once the actor is gone
    Poison(oneshot::Sender<()>),
}

/// Sending half of a mailbox, tagged with the owner's identity
pub struct Address<M> {
    id: ActorId,
    sender: mpsc::UnboundedSender<Envelope<M>>,
}

// Manual impl: `M` itself need not be Clone.
impl<M> Clone for Address<M> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            sender: self.sender.clone(),
        }
    }
}

impl<M> fmt::Debug for Address<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Address").field("id", &self.id).finish()
    }
}

impl<M> Address<M> {
    pub fn id(&self) -> &ActorId {
        &self.id
    }

    /// Queue a message without waiting for it to be processed
    pub fn send(&self, msg: M) -> Result<(), SendError> {
        self.sender
            .send(Envelope::Message(msg))
            .map_err(|_| SendError::MailboxClosed(self.id.clone()))
    }

    /// Send a message carrying a reply slot and wait for the answer
    ///
    /// `make` builds the message around the reply sender. Fails with
    /// [`RequestError::Timeout`] if no answer arrives within `timeout`.
    pub async fn request<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> M,
        timeout: Duration,
    ) -> Result<R, RequestError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(make(reply_tx))
            .map_err(|_| RequestError::Closed(self.id.clone()))?;

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(RequestError::NoReply(self.id.clone())),
            Err(_) => Err(RequestError::Timeout(timeout)),
        }
    }

    /// Ask the actor to finish its queued work and exit, then wait for it
    ///
    /// Returns an error only if the actor was already gone before the
    /// request could be queued.
    pub async fn poison(&self) -> Result<(), SendError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.sender
            .send(Envelope::Poison(done_tx))
            .map_err(|_| SendError::MailboxClosed(self.id.clone()))?;

        // A dropped slot means the actor ended without acknowledging
        // (e.g. it panicked); either way it is no longer running.
        let _ = done_rx.await;
        Ok(())
    }

    /// True once the actor's mailbox has been dropped
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Receiving half, owned by the actor task
pub struct Mailbox<M> {
    receiver: mpsc::UnboundedReceiver<Envelope<M>>,
}

impl<M> Mailbox<M> {
    /// Next envelope, or `None` once every address has been dropped
    pub async fn recv(&mut self) -> Option<Envelope<M>> {
        self.receiver.recv().await
    }
}

/// Create a mailbox for the actor identified by `id`
///
/// Mailboxes are unbounded: the node sends to users and users send to
/// the node, and a bounded pair could block each other forever.
pub fn mailbox<M>(id: ActorId) -> (Address<M>, Mailbox<M>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Address { id, sender }, Mailbox { receiver })
}
