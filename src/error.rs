//! Error types for the chat node
//!
//! Defines application-level errors, mailbox send errors and
//! request/response errors. Uses thiserror for ergonomic error definitions.

use std::time::Duration;

use thiserror::Error;

use crate::types::ActorId;

/// Application-level errors
///
/// Session errors (duplicate name, timeouts, bad input) end one
/// connection only. Transport errors are returned to whoever drives the
/// node lifecycle, which decides whether to retry or exit.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Username is already held by a live user actor
    #[error("user {0} already connected")]
    DuplicateUser(String),

    /// The node did not answer the admission request in time
    #[error("admission timed out after {0:?}")]
    AdmissionTimeout(Duration),

    /// The client did not send `join` in time
    #[error("no join received within {0:?}")]
    JoinTimeout(Duration),

    /// Username failed validation
    #[error("invalid username: {0}")]
    InvalidUsername(String),

    /// Malformed chat command (e.g. `/msg` without recipient or text)
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// A frame other than `join` arrived before admission
    #[error("join required")]
    JoinRequired,

    /// The transport listener could not be bound
    #[error("failed to start transport on {addr}: {source}")]
    TransportInit {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The transport listener did not shut down cleanly
    #[error("failed to stop transport: {0}")]
    TransportShutdown(String),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(String),

    /// Request/response with an actor failed
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Mailbox send failed
    #[error(transparent)]
    Send(#[from] SendError),

    /// WebSocket protocol error (fatal for the session)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Message send errors
///
/// Occurs when attempting to send into a mailbox or channel whose
/// receiving side has gone away.
#[derive(Debug, Error)]
pub enum SendError {
    /// The target actor has exited
    #[error("mailbox of {0} is closed")]
    MailboxClosed(ActorId),

    /// The receiving end of a front-end channel has been closed
    #[error("Channel closed")]
    ChannelClosed,
}

/// Request/response errors
#[derive(Debug, Error)]
pub enum RequestError {
    /// The target actor has exited before the request was queued
    #[error("request target {0} is gone")]
    Closed(ActorId),

    /// No reply within the caller-supplied deadline
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The target dropped the reply slot without answering
    #[error("request to {0} was dropped without a reply")]
    NoReply(ActorId),
}
