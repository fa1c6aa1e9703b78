//! SSE connection identity.

use std::fmt;
use uuid::Uuid;

/// Unique identifier for a single SSE connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ConnectionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// A live SSE connection, always tied to an authenticated user: the
/// broadcaster is keyed by user id, so there is no such thing as an
/// anonymous or topic-subscribed connection in this model.
#[derive(Debug, Clone)]
pub struct SseConnection {
    pub id: ConnectionId,
    pub user_id: String,
    pub client_ip: Option<String>,
    pub last_event_id: Option<String>,
}

impl SseConnection {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            id: ConnectionId::new(),
            user_id: user_id.into(),
            client_ip: None,
            last_event_id: None,
        }
    }

    pub fn with_client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = Some(ip.into());
        self
    }

    pub fn with_last_event_id(mut self, id: impl Into<String>) -> Self {
        self.last_event_id = Some(id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new();
        assert_eq!(id.to_string(), id.as_uuid().to_string());
    }

    #[test]
    fn test_sse_connection_builder() {
        let conn = SseConnection::new("user-42")
            .with_client_ip("127.0.0.1")
            .with_last_event_id("evt-1");
        assert_eq!(conn.user_id, "user-42");
        assert_eq!(conn.client_ip.as_deref(), Some("127.0.0.1"));
        assert_eq!(conn.last_event_id.as_deref(), Some("evt-1"));
    }
}
