//! Message protocol definitions
//!
//! Two layers live here:
//! - In-process routing messages: [`EgressMessage`] flows from a session
//!   into the broadcast domain, [`IngressMessage`] flows from the node to a
//!   session for display. Keeping them distinct stops a user from
//!   re-broadcasting what it just received.
//! - The JSON wire protocol spoken over WebSocket, using Serde's tagged
//!   enums for type-safe serialization/deserialization.

use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::types::ActorId;

/// Prefix of the direct-message command typed by a client
const DIRECT_COMMAND: &str = "/msg";

/// Message travelling from the node to a user for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressMessage {
    pub from: ActorId,
    /// Target username, empty for broadcast
    pub to: String,
    pub body: String,
}

/// Message travelling from a user into the broadcast domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EgressMessage {
    pub from: ActorId,
    /// Target username, empty for broadcast
    pub to: String,
    pub body: String,
}

impl EgressMessage {
    /// Build an egress message from a line typed by the client
    ///
    /// `/msg <user> <text>` addresses `<user>`; anything else is a
    /// broadcast with the line as body.
    pub fn parse(from: ActorId, line: &str) -> Result<Self, ChatError> {
        let mut tokens = line.splitn(3, ' ');
        if tokens.next() != Some(DIRECT_COMMAND) {
            return Ok(Self {
                from,
                to: String::new(),
                body: line.to_string(),
            });
        }

        match (tokens.next(), tokens.next()) {
            (Some(to), Some(body)) if !to.is_empty() => Ok(Self {
                from,
                to: to.to_string(),
                body: body.to_string(),
            }),
            _ => Err(ChatError::InvalidCommand(format!(
                "usage: {} <user> <text>",
                DIRECT_COMMAND
            ))),
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.to.is_empty()
    }

    /// The ingress counterpart, field for field
    pub fn to_ingress(&self) -> IngressMessage {
        IngressMessage {
            from: self.from.clone(),
            to: self.to.clone(),
            body: self.body.clone(),
        }
    }
}

/// Client → Server message
///
/// All messages from client to server. Uses tagged enum with snake_case naming.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Claim a username (must be the first frame)
    Join { username: String },
    /// Send a line of chat; `/msg <user> <text>` for a direct message
    Say { text: String },
    /// List connected users
    Who,
    /// End the session
    Leave,
}

/// Server → Client message
///
/// All messages from server to client. Uses tagged enum with snake_case naming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Admission succeeded
    Welcome { username: String, node: String },
    /// Chat message delivered to this session
    Message {
        from: String,
        to: String,
        body: String,
    },
    /// Currently connected users
    Users { usernames: Vec<String> },
    /// Error occurred
    Error { code: ErrorCode, message: String },
}

impl From<IngressMessage> for ServerMessage {
    fn from(msg: IngressMessage) -> Self {
        ServerMessage::Message {
            from: msg.from.name().to_string(),
            to: msg.to,
            body: msg.body,
        }
    }
}

/// Error codes for ServerMessage::Error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Username already connected
    DuplicateUser,
    /// Node did not answer in time
    AdmissionTimeout,
    /// Username failed validation
    InvalidUsername,
    /// Malformed chat command
    InvalidCommand,
    /// Invalid message format
    InvalidMessage,
    /// Frame sent before `join`
    JoinRequired,
    /// `join` sent twice
    AlreadyJoined,
    /// Node is unavailable or shutting down
    Unavailable,
}

/// Convert ChatError to ServerMessage for client notification
impl From<&ChatError> for ServerMessage {
    fn from(err: &ChatError) -> Self {
        let code = match err {
            ChatError::DuplicateUser(_) => ErrorCode::DuplicateUser,
            ChatError::AdmissionTimeout(_) => ErrorCode::AdmissionTimeout,
            ChatError::InvalidUsername(_) => ErrorCode::InvalidUsername,
            ChatError::InvalidCommand(_) => ErrorCode::InvalidCommand,
            ChatError::JoinRequired | ChatError::JoinTimeout(_) => ErrorCode::JoinRequired,
            ChatError::Json(_) => ErrorCode::InvalidMessage,
            // Internal failures are not spelled out to clients
            _ => {
                return ServerMessage::Error {
                    code: ErrorCode::Unavailable,
                    message: "Service unavailable".to_string(),
                }
            }
        };
        ServerMessage::Error {
            code,
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn alice() -> ActorId {
        ActorId::root("node").child("alice")
    }

    #[test]
    fn test_egress_to_ingress_preserves_fields() {
        let egress = EgressMessage {
            from: alice(),
            to: "bob".to_string(),
            body: "hi there".to_string(),
        };
        let ingress = egress.to_ingress();
        assert_eq!(ingress.from, egress.from);
        assert_eq!(ingress.to, egress.to);
        assert_eq!(ingress.body, egress.body);
    }

    #[test]
    fn test_parse_broadcast_line() {
        let msg = EgressMessage::parse(alice(), "hello everyone").unwrap();
        assert!(msg.is_broadcast());
        assert_eq!(msg.body, "hello everyone");
        assert_eq!(msg.from, alice());
    }

    #[test]
    fn test_parse_direct_message() {
        let msg = EgressMessage::parse(alice(), "/msg bob see you at noon").unwrap();
        assert_eq!(msg.to, "bob");
        assert_eq!(msg.body, "see you at noon");
        assert!(!msg.is_broadcast());
    }

    #[test]
    fn test_parse_direct_message_missing_text() {
        assert!(matches!(
            EgressMessage::parse(alice(), "/msg bob"),
            Err(ChatError::InvalidCommand(_))
        ));
        assert!(matches!(
            EgressMessage::parse(alice(), "/msg"),
            Err(ChatError::InvalidCommand(_))
        ));
    }

    #[test]
    fn test_parse_other_slash_words_are_plain_text() {
        let msg = EgressMessage::parse(alice(), "/msgs are fun").unwrap();
        assert!(msg.is_broadcast());
        assert_eq!(msg.body, "/msgs are fun");
    }

    #[test]
    fn test_client_message_deserialize() {
        let json = r#"{"type": "join", "username": "alice"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::Join { username } => assert_eq!(username, "alice"),
            _ => panic!("Wrong variant"),
        }

        let msg: ClientMessage = serde_json::from_str(r#"{"type": "who"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Who));
    }

    #[test]
    fn test_server_message_from_ingress_uses_username() {
        let msg = ServerMessage::from(IngressMessage {
            from: alice(),
            to: String::new(),
            body: "hello".to_string(),
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"message\""));
        assert!(json.contains("\"from\":\"alice\""));
        assert!(json.contains("\"body\":\"hello\""));
    }

    #[test]
    fn test_error_conversion() {
        let msg = ServerMessage::from(&ChatError::DuplicateUser("alice".to_string()));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"code\":\"duplicate_user\""));
        assert!(json.contains("user alice already connected"));

        let msg = ServerMessage::from(&ChatError::AdmissionTimeout(Duration::from_millis(100)));
        assert!(matches!(
            msg,
            ServerMessage::Error {
                code: ErrorCode::AdmissionTimeout,
                ..
            }
        ));

        let msg = ServerMessage::from(&ChatError::TransportShutdown("boom".to_string()));
        assert!(matches!(
            msg,
            ServerMessage::Error {
                code: ErrorCode::Unavailable,
                ..
            }
        ));
    }
}
