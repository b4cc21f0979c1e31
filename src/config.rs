//! Node configuration
//!
//! Every field has a default, so an empty JSON object is a valid config.
//! `Config::from_env` layers an optional JSON file (`CHAT_CONFIG`) and
//! `CHAT_*` environment variables over the defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// How the node fans out egress messages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Routing {
    /// Every admitted user receives every message, sender included;
    /// the `to` field is carried along but not used for routing
    #[default]
    Broadcast,
    /// Empty `to` broadcasts; otherwise only the named user and the
    /// sender receive the message
    Directed,
}

impl std::str::FromStr for Routing {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "broadcast" => Ok(Routing::Broadcast),
            "directed" => Ok(Routing::Directed),
            other => Err(ChatError::Config(format!("unknown routing '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root identity of the node; the binary fills in the host name
    pub node_name: Option<String>,
    /// Listener host
    pub host: String,
    /// Listener port (0 picks a free port)
    pub port: u16,
    /// Deadline for the node to answer an admission request
    pub admission_timeout_ms: u64,
    /// Deadline for a new connection to send `join`
    pub join_timeout_ms: u64,
    /// Grace period for the transport listener to drain on stop
    pub shutdown_grace_ms: u64,
    /// Per-session outbound channel capacity
    pub session_buffer: usize,
    pub max_username_len: usize,
    pub routing: Routing,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_name: None,
            host: "localhost".to_string(),
            port: 2222,
            admission_timeout_ms: 100,
            join_timeout_ms: 10_000,
            shutdown_grace_ms: 5_000,
            session_buffer: 32,
            max_username_len: 32,
            routing: Routing::Broadcast,
        }
    }
}

impl Config {
    /// Load from `CHAT_CONFIG` (if set) and `CHAT_*` overrides
    pub fn from_env() -> Result<Self, ChatError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with an injectable variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ChatError> {
        let mut config = match lookup("CHAT_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };

        if let Some(name) = lookup("CHAT_NODE_NAME") {
            config.node_name = Some(name);
        }
        if let Some(host) = lookup("CHAT_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("CHAT_PORT") {
            config.port = parse_var("CHAT_PORT", &port)?;
        }
        if let Some(ms) = lookup("CHAT_ADMISSION_TIMEOUT_MS") {
            config.admission_timeout_ms = parse_var("CHAT_ADMISSION_TIMEOUT_MS", &ms)?;
        }
        if let Some(ms) = lookup("CHAT_SHUTDOWN_GRACE_MS") {
            config.shutdown_grace_ms = parse_var("CHAT_SHUTDOWN_GRACE_MS", &ms)?;
        }
        if let Some(routing) = lookup("CHAT_ROUTING") {
            config.routing = routing.parse()?;
        }

        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ChatError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ChatError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ChatError> {
        serde_json::from_str(raw).map_err(|e| ChatError::Config(e.to_string()))
    }

    /// `host:port` string handed to the listener
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn admission_timeout(&self) -> Duration {
        Duration::from_millis(self.admission_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ChatError> {
    value
        .trim()
        .parse()
        .map_err(|_| ChatError::Config(format!("{} has invalid value '{}'", key, value)))
}
