//! User actor implementation
//!
//! One user actor exists per admitted session. It bridges the broadcast
//! domain (its parent node) and the front-end [`Program`] registered by the
//! session.

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::actor::{self, Address, Envelope, Mailbox};
use crate::message::{EgressMessage, IngressMessage};
use crate::node::NodeMessage;
use crate::program::Program;
use crate::types::ActorId;

/// Messages accepted by a user actor
#[derive(Debug)]
pub enum UserMessage {
    /// From the node: display on the attached program
    Ingress(IngressMessage),
    /// From the session: forward to the node for fan-out
    Egress(EgressMessage),
    /// Attach (or replace) the front-end program
    RegisterProgram(Program),
    /// The session has ended; ask the node to retire this actor
    Disconnect,
}

/// The user actor
pub struct User {
    username: String,
    address: Address<UserMessage>,
    parent: Address<NodeMessage>,
    program: Option<Program>,
    mailbox: Mailbox<UserMessage>,
}

impl User {
    /// Spawn a user actor under `parent`
    ///
    /// Returns the new actor's address and the task driving it.
    pub fn spawn(
        username: &str,
        parent: Address<NodeMessage>,
    ) -> (Address<UserMessage>, JoinHandle<()>) {
        let (address, mailbox) = actor::mailbox(parent.id().child(username));
        let user = Self {
            username: username.to_string(),
            address: address.clone(),
            parent,
            program: None,
            mailbox,
        };
        let task = tokio::spawn(user.run());
        (address, task)
    }

    pub fn id(&self) -> &ActorId {
        self.address.id()
    }

    /// Run the user event loop until poisoned
    async fn run(mut self) {
        debug!("User {} started", self.id());

        let mut done = None;
        while let Some(envelope) = self.mailbox.recv().await {
            match envelope {
                Envelope::Message(msg) => self.handle_message(msg).await,
                Envelope::Poison(ack) => {
                    done = Some(ack);
                    break;
                }
            }
        }

        info!("User {} stopped", self.username);
        // Mailbox goes away before the poisoner is told we are done
        drop(self);
        if let Some(ack) = done {
            let _ = ack.send(());
        }
    }

    async fn handle_message(&mut self, msg: UserMessage) {
        match msg {
            UserMessage::Ingress(msg) => self.handle_ingress(msg).await,
            UserMessage::Egress(msg) => self.handle_egress(msg),
            UserMessage::RegisterProgram(program) => {
                if self.program.is_some() {
                    debug!("User {} replacing registered program", self.username);
                }
                info!(
                    "User {} attached to session {}",
                    self.username,
                    program.session()
                );
                self.program = Some(program);
            }
            UserMessage::Disconnect => {
                debug!("User {} disconnecting", self.username);
                let disconnect = NodeMessage::Disconnect {
                    user: self.id().clone(),
                };
                if let Err(e) = self.parent.send(disconnect) {
                    warn!("User {} could not notify node: {}", self.username, e);
                }
            }
        }
    }

    /// Handle a message from the node
    async fn handle_ingress(&mut self, msg: IngressMessage) {
        let Some(program) = &self.program else {
            debug!(
                "User {}: no program registered, dropping message from {}",
                self.username, msg.from
            );
            return;
        };

        debug!("User {} <- {}", self.username, msg.from);
        if let Err(e) = program.deliver(msg).await {
            warn!("User {}: program unreachable: {}", self.username, e);
        }
    }

    /// Handle a message from the session
    fn handle_egress(&mut self, msg: EgressMessage) {
        if self.program.is_none() {
            warn!("User {}: no program registered, dropping message", self.username);
            return;
        }

        if let Err(e) = self.parent.send(NodeMessage::Egress(msg)) {
            warn!("User {}: node unreachable: {}", self.username, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::types::SessionId;

    /// A stand-in node whose mailbox the test reads directly
    fn fake_node() -> (Address<NodeMessage>, Mailbox<NodeMessage>) {
        actor::mailbox(ActorId::root("node"))
    }

    fn program() -> (Program, mpsc::Receiver<IngressMessage>) {
        let (tx, rx) = mpsc::channel(8);
        (Program::new(SessionId::new(), tx), rx)
    }

    fn egress(from: &Address<UserMessage>, body: &str) -> EgressMessage {
        EgressMessage {
            from: from.id().clone(),
            to: String::new(),
            body: body.to_string(),
        }
    }

    async fn next_node_message(mailbox: &mut Mailbox<NodeMessage>) -> Option<NodeMessage> {
        match tokio::time::timeout(Duration::from_millis(200), mailbox.recv()).await {
            Ok(Some(Envelope::Message(msg))) => Some(msg),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_user_identity_is_child_of_node() {
        let (node, _node_mailbox) = fake_node();
        let (user, _task) = User::spawn("alice", node);
        assert_eq!(user.id().as_str(), "node/alice");
    }

    #[tokio::test]
    async fn test_egress_without_program_is_dropped() {
        let (node, mut node_mailbox) = fake_node();
        let (user, _task) = User::spawn("alice", node);

        user.send(UserMessage::Egress(egress(&user, "lost"))).unwrap();

        assert!(next_node_message(&mut node_mailbox).await.is_none());
    }

    #[tokio::test]
    async fn test_egress_with_program_reaches_node_unchanged() {
        let (node, mut node_mailbox) = fake_node();
        let (user, _task) = User::spawn("alice", node);
        let (program, _rx) = program();

        user.send(UserMessage::RegisterProgram(program)).unwrap();
        let sent = egress(&user, "hello");
        user.send(UserMessage::Egress(sent.clone())).unwrap();

        match next_node_message(&mut node_mailbox).await {
            Some(NodeMessage::Egress(received)) => assert_eq!(received, sent),
            other => panic!("expected egress, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ingress_forwarded_to_program() {
        let (node, _node_mailbox) = fake_node();
        let (user, _task) = User::spawn("alice", node);
        let (program, mut rx) = program();

        user.send(UserMessage::RegisterProgram(program)).unwrap();
        let msg = egress(&user, "hi").to_ingress();
        user.send(UserMessage::Ingress(msg.clone())).unwrap();

        assert_eq!(rx.recv().await, Some(msg));
    }

    #[tokio::test]
    async fn test_ingress_before_registration_is_dropped() {
        let (node, _node_mailbox) = fake_node();
        let (user, _task) = User::spawn("alice", node);
        let (program, mut rx) = program();

        let early = egress(&user, "too early").to_ingress();
        user.send(UserMessage::Ingress(early)).unwrap();
        user.send(UserMessage::RegisterProgram(program)).unwrap();
        let late = egress(&user, "on time").to_ingress();
        user.send(UserMessage::Ingress(late.clone())).unwrap();

        // Only the message sent after registration arrives
        assert_eq!(rx.recv().await, Some(late));
        let extra = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(extra.is_err());
    }

    #[tokio::test]
    async fn test_reregistration_replaces_program() {
        let (node, _node_mailbox) = fake_node();
        let (user, _task) = User::spawn("alice", node);
        let (first, mut first_rx) = program();
        let (second, mut second_rx) = program();

        user.send(UserMessage::RegisterProgram(first)).unwrap();
        user.send(UserMessage::RegisterProgram(second)).unwrap();
        user.send(UserMessage::Ingress(egress(&user, "x").to_ingress()))
            .unwrap();

        assert!(second_rx.recv().await.is_some());
        // The first program's sender was dropped with the replacement
        assert!(first_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_disconnect_notifies_node_with_own_id() {
        let (node, mut node_mailbox) = fake_node();
        let (user, _task) = User::spawn("alice", node);

        user.send(UserMessage::Disconnect).unwrap();

        match next_node_message(&mut node_mailbox).await {
            Some(NodeMessage::Disconnect { user: id }) => assert_eq!(&id, user.id()),
            other => panic!("expected disconnect, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_poison_terminates_user() {
        let (node, _node_mailbox) = fake_node();
        let (user, task) = User::spawn("alice", node);

        user.poison().await.unwrap();
        assert!(user.is_closed());
        task.await.unwrap();
    }
}
