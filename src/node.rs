//! Node actor implementation
//!
//! The node is the coordinator: it owns the transport listener, admits new
//! sessions by spawning one user actor per username, retires users when
//! they disconnect, and fans egress messages out to every user.
//!
//! All node state is touched only from its own mailbox loop, including the
//! listener lifecycle, so no locks are needed.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::actor::{self, Address, Envelope, Mailbox};
use crate::config::{Config, Routing};
use crate::error::{ChatError, RequestError};
use crate::message::EgressMessage;
use crate::transport::Listener;
use crate::types::ActorId;
use crate::user::{User, UserMessage};

/// Fallback root identity when the config names none
const DEFAULT_NODE_NAME: &str = "node";

/// Deadline for a start request (binding the listener)
const START_TIMEOUT: Duration = Duration::from_secs(5);

/// Extra time granted to a stop request on top of the shutdown grace
const STOP_SLACK: Duration = Duration::from_secs(1);

/// Lifecycle state of the node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Init,
    Running,
    Stopped,
}

/// Successful admission: where the session should talk from now on
#[derive(Debug, Clone)]
pub struct Admission {
    pub node: Address<NodeMessage>,
    pub user: Address<UserMessage>,
}

/// Snapshot of the node, answered to [`NodeMessage::Status`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    pub state: NodeState,
    /// Bound listener address while running
    pub listen_addr: Option<SocketAddr>,
    /// Usernames of live user actors, sorted
    pub users: Vec<String>,
}

/// Messages accepted by the node
#[derive(Debug)]
pub enum NodeMessage {
    /// Start the transport listener (Init → Running)
    Start {
        reply: oneshot::Sender<Result<(), ChatError>>,
    },
    /// Stop the transport listener (Running → Stopped)
    Stop {
        reply: oneshot::Sender<Result<(), ChatError>>,
    },
    /// Reserve a username and spawn its user actor
    Admit {
        username: String,
        reply: oneshot::Sender<Result<Admission, ChatError>>,
    },
    /// Sent by a user actor whose session has ended
    Disconnect { user: ActorId },
    /// Fan a message out to users
    Egress(EgressMessage),
    /// Report state, listener address and connected users
    Status { reply: oneshot::Sender<NodeStatus> },
}

/// A spawned user actor tracked by the node
struct Child {
    address: Address<UserMessage>,
    task: JoinHandle<()>,
}

/// The node actor
pub struct Node {
    config: Arc<Config>,
    state: NodeState,
    address: Address<NodeMessage>,
    /// Live user actors: username -> child
    children: HashMap<String, Child>,
    listener: Option<Listener>,
    mailbox: Mailbox<NodeMessage>,
}

impl Node {
    /// Create the node and spawn its event loop
    pub fn spawn(config: Config) -> NodeHandle {
        let name = config
            .node_name
            .clone()
            .unwrap_or_else(|| DEFAULT_NODE_NAME.to_string());
        let (address, mailbox) = actor::mailbox(ActorId::root(name));
        let stop_timeout = config.shutdown_grace() + STOP_SLACK;
        let node = Self {
            config: Arc::new(config),
            state: NodeState::Init,
            address: address.clone(),
            children: HashMap::new(),
            listener: None,
            mailbox,
        };
        let task = tokio::spawn(node.run());
        NodeHandle {
            address,
            task,
            stop_timeout,
        }
    }

    /// Run the node event loop until poisoned
    async fn run(mut self) {
        info!("Node {} started", self.address.id());

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

        if let Err(e) = self.stop().await {
            error!("Node {} stopped with error: {}", self.address.id(), e);
        }
        // Users are not torn down here; each ends with its session.
        info!(
            "Node {} shutting down with {} user(s) attached",
            self.address.id(),
            self.children.len()
        );
        drop(self);
        if let Some(ack) = done {
            let _ = ack.send(());
        }
    }

    /// Process a single message
    async fn handle_message(&mut self, msg: NodeMessage) {
        match msg {
            NodeMessage::Start { reply } => {
                let _ = reply.send(self.start().await);
            }
            NodeMessage::Stop { reply } => {
                let _ = reply.send(self.stop().await);
            }
            NodeMessage::Admit { username, reply } => {
                // The requester gave up (timed out) before the answer arrived
                if let Err(Ok(admission)) = reply.send(self.handle_admit(username)) {
                    let user = admission.user.id().clone();
                    warn!("Admission of {} abandoned by requester, rolling back", user);
                    self.retire(&user).await;
                }
            }
            NodeMessage::Disconnect { user } => {
                self.handle_disconnect(user).await;
            }
            NodeMessage::Egress(msg) => {
                self.handle_egress(msg);
            }
            NodeMessage::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    /// Start the transport listener
    ///
    /// A no-op unless the node is still in `Init`. A bind failure leaves
    /// the node in `Init` and is returned to the caller.
    async fn start(&mut self) -> Result<(), ChatError> {
        if self.state != NodeState::Init {
            debug!("Node start ignored in state {:?}", self.state);
            return Ok(());
        }

        info!("Starting transport on {}", self.config.listen_addr());
        let listener = Listener::bind(self.config.clone(), self.address.clone()).await?;
        self.listener = Some(listener);
        self.state = NodeState::Running;
        Ok(())
    }

    /// Stop the transport listener
    ///
    /// A no-op unless the node is `Running`. The node is `Stopped`
    /// afterwards even if the listener did not drain within the grace
    /// period; that failure is reported to the caller.
    async fn stop(&mut self) -> Result<(), ChatError> {
        if self.state != NodeState::Running {
            debug!("Node stop ignored in state {:?}", self.state);
            return Ok(());
        }

        info!("Stopping transport");
        self.state = NodeState::Stopped;
        match self.listener.take() {
            Some(listener) => listener.shutdown(self.config.shutdown_grace()).await,
            None => Ok(()),
        }
    }

    /// Handle an admission request
    fn handle_admit(&mut self, username: String) -> Result<Admission, ChatError> {
        if self.children.contains_key(&username) {
            info!("Rejecting duplicate user {}", username);
            return Err(ChatError::DuplicateUser(username));
        }

        let (user, task) = User::spawn(&username, self.address.clone());
        self.children.insert(
            username.clone(),
            Child {
                address: user.clone(),
                task,
            },
        );

        info!("Admitted user {} as {}", username, user.id());
        debug!("Total users: {}", self.children.len());

        Ok(Admission {
            node: self.address.clone(),
            user,
        })
    }

    /// Handle a user leaving
    ///
    /// Blocks the mailbox until the user actor has fully terminated, so no
    /// later message can observe it half-alive.
    async fn handle_disconnect(&mut self, user: ActorId) {
        let username = user.name();
        let is_same_actor = self
            .children
            .get(username)
            .is_some_and(|child| child.address.id() == &user);
        if !is_same_actor {
            warn!("Disconnect from unknown user {}", user);
            return;
        }
        info!("User {} disconnected", user);
        self.retire(&user).await;
    }

    /// Remove a user from the children and wait for its actor to exit
    async fn retire(&mut self, user: &ActorId) {
        let Some(child) = self.children.remove(user.name()) else {
            return;
        };

        if let Err(e) = child.address.poison().await {
            debug!("User {} already gone: {}", user, e);
        }
        if let Err(e) = child.task.await {
            error!("User {} task failed: {}", user, e);
        }
        debug!("Total users: {}", self.children.len());
    }

    /// Fan an egress message out according to the routing policy
    fn handle_egress(&self, msg: EgressMessage) {
        let recipients: Vec<&Child> = match self.config.routing {
            Routing::Broadcast => self.children.values().collect(),
            Routing::Directed if msg.is_broadcast() => self.children.values().collect(),
            Routing::Directed => {
                if !self.children.contains_key(&msg.to) {
                    warn!("{} sent to unknown user {}", msg.from, msg.to);
                }
                self.children
                    .iter()
                    .filter(|(name, _)| **name == msg.to || name.as_str() == msg.from.name())
                    .map(|(_, child)| child)
                    .collect()
            }
        };

        for child in recipients {
            debug!("NODE: {} --> {}", msg.from, child.address.id());
            if let Err(e) = child.address.send(UserMessage::Ingress(msg.to_ingress())) {
                warn!("Broadcast delivery failed: {}", e);
            }
        }
    }

    fn status(&self) -> NodeStatus {
        let mut users: Vec<String> = self.children.keys().cloned().collect();
        users.sort();
        NodeStatus {
            state: self.state,
            listen_addr: self.listener.as_ref().map(Listener::local_addr),
            users,
        }
    }
}

/// Request helpers for anyone holding the node's address
impl Address<NodeMessage> {
    /// Run the admission protocol for `username`
    pub async fn admit(&self, username: String, timeout: Duration) -> Result<Admission, ChatError> {
        let reply = self
            .request(|reply| NodeMessage::Admit { username, reply }, timeout)
            .await
            .map_err(|e| match e {
                RequestError::Timeout(t) => ChatError::AdmissionTimeout(t),
                other => ChatError::Request(other),
            })?;
        reply
    }

    pub async fn status(&self, timeout: Duration) -> Result<NodeStatus, ChatError> {
        Ok(self
            .request(|reply| NodeMessage::Status { reply }, timeout)
            .await?)
    }
}

/// Owner's handle to a spawned node
pub struct NodeHandle {
    address: Address<NodeMessage>,
    task: JoinHandle<()>,
    stop_timeout: Duration,
}

impl NodeHandle {
    pub fn address(&self) -> &Address<NodeMessage> {
        &self.address
    }

    /// Start the transport listener
    pub async fn start(&self) -> Result<(), ChatError> {
        self.address
            .request(|reply| NodeMessage::Start { reply }, START_TIMEOUT)
            .await?
    }

    /// Stop the transport listener, waiting for open sessions to close
    pub async fn stop(&self) -> Result<(), ChatError> {
        self.address
            .request(|reply| NodeMessage::Stop { reply }, self.stop_timeout)
            .await?
    }

    pub async fn status(&self) -> Result<NodeStatus, ChatError> {
        self.address.status(START_TIMEOUT).await
    }

    /// Poison the node and wait for its task to finish
    pub async fn shutdown(self) {
        if let Err(e) = self.address.poison().await {
            debug!("Node already gone: {}", e);
        }
        if let Err(e) = self.task.await {
            error!("Node task failed: {}", e);
        }
    }
}
