//! Multi-user WebSocket Chat Node Library
//!
//! A chat service where every connected session is backed by its own user
//! actor and a single node actor admits sessions and fans messages out.
//!
//! # Features
//! - Username admission with duplicate rejection (request/response with timeout)
//! - One user actor per session, supervised by the node
//! - Broadcast fan-out of chat messages (optional direct-message routing)
//! - Graceful, non-fatal transport start/stop
//! - JSON-over-WebSocket front-end
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `Node` is the coordinating actor owning the set of users and the listener
//! - Each admitted session gets a `User` actor bridging it to the node
//! - Each connection has a session task talking to its user actor
//! - No locks needed - all state access goes through message passing
//!
//! # Example
//! ```ignore
//! use chat_node::{Config, Node};
//!
//! #[tokio::main]
//! async fn main() {
//!     let node = Node::spawn(Config::default());
//!     node.start().await.unwrap();
//!
//!     tokio::signal::ctrl_c().await.unwrap();
//!
//!     node.stop().await.unwrap();
//!     node.shutdown().await;
//! }
//! ```

pub mod actor;
pub mod config;
pub mod error;
pub mod message;
pub mod node;
pub mod program;
pub mod session;
pub mod transport;
pub mod types;
pub mod user;

// Re-export main types for convenience
pub use actor::{Address, Envelope, Mailbox};
pub use config::{Config, Routing};
pub use error::{ChatError, RequestError, SendError};
pub use message::{ClientMessage, EgressMessage, ErrorCode, IngressMessage, ServerMessage};
pub use node::{Admission, Node, NodeHandle, NodeMessage, NodeState, NodeStatus};
pub use program::Program;
pub use session::handle_connection;
pub use transport::Listener;
pub use types::{ActorId, SessionId};
pub use user::{User, UserMessage};
