//! Basic type definitions for the chat node
//!
//! Provides newtype wrappers for type safety:
//! - `ActorId`: hierarchical actor identity (`node/username`)
//! - `SessionId`: UUID-based transport session identifier

use uuid::Uuid;

/// Separator between path segments of an [`ActorId`]
const PATH_SEPARATOR: char = '/';

/// Identity of an actor (newtype pattern)
///
/// The node is a root identity such as `"host-1"`; every user actor it
/// spawns lives under it as `"host-1/alice"`. The last segment is the
/// actor's name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(String);

impl ActorId {
    /// Create a root identity
    pub fn root(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Identity of a child actor spawned under this one
    pub fn child(&self, name: &str) -> Self {
        Self(format!("{}{}{}", self.0, PATH_SEPARATOR, name))
    }

    /// The last path segment (the username for user actors)
    pub fn name(&self) -> &str {
        self.0
            .rsplit_once(PATH_SEPARATOR)
            .map(|(_, name)| name)
            .unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique transport session identifier (newtype pattern)
///
/// Wraps a UUID v4. One is issued per accepted connection and carried by
/// the [`Program`](crate::program::Program) handle attached to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new random session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_unique() {
        let id1 = SessionId::new();
        let id2 = SessionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_actor_id_child_path() {
        let node = ActorId::root("host-1");
        let alice = node.child("alice");
        assert_eq!(alice.as_str(), "host-1/alice");
        assert_eq!(alice.to_string(), "host-1/alice");
    }

    #[test]
    fn test_actor_id_name() {
        let node = ActorId::root("host-1");
        assert_eq!(node.name(), "host-1");
        assert_eq!(node.child("bob").name(), "bob");
    }
}
