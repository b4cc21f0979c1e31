//! Program handle definition
//!
//! A `Program` is what a user actor knows about the front-end session it
//! serves: an opaque handle through which ingress messages are pushed out
//! for display.

use tokio::sync::mpsc;

use crate::error::SendError;
use crate::message::IngressMessage;
use crate::types::SessionId;

/// Front-end session attached to a user actor
#[derive(Debug, Clone)]
pub struct Program {
    /// Session this program belongs to
    session: SessionId,
    /// User → session message channel
    sender: mpsc::Sender<IngressMessage>,
}

impl Program {
    pub fn new(session: SessionId, sender: mpsc::Sender<IngressMessage>) -> Self {
        Self { session, sender }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Push a message to the session for display
    ///
    /// Returns an error if the channel is closed (session ended).
    pub async fn deliver(&self, msg: IngressMessage) -> Result<(), SendError> {
        self.sender
            .send(msg)
            .await
            .map_err(|_| SendError::ChannelClosed)
    }
}
