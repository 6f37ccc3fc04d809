//! Session identity and lifecycle state.

use std::fmt;

use uuid::Uuid;

/// Unique session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session lifecycle.
///
/// ```text
/// Disconnected ──connect──▶ Connecting ──ok──▶ Connected
///      ▲                        │                  │
///      └──────────failed────────┘                  │ disconnect / I/O failure
///      └──────────────── Closing ◀─────────────────┘
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionState {
    /// No transport is open.
    #[default]
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// Transport open; requests may be issued.
    Connected,
    /// Releasing the transport.
    Closing,
}

impl SessionState {
    /// Whether frames can be sent in this state.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn only_connected_can_send() {
        assert!(SessionState::Connected.is_connected());
        assert!(!SessionState::Connecting.is_connected());
        assert_eq!(SessionState::default(), SessionState::Disconnected);
        assert_eq!(SessionState::Closing.to_string(), "closing");
    }
}
