//! Connection state machine

use crate::{Error, Result};

/// Connection state
///
/// ```text
/// NEW → CONNECTED → HANDSHAKE → SUPPORTED → READY
///   └───────────┴──────────┴─────────┴────────┴──→ CLOSING → CLOSED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initial state (not connected)
    New,

    /// Socket connected; TLS handshake in progress if encryption is enabled
    Connected,

    /// Transport ready, OPTIONS sent
    Handshake,

    /// SUPPORTED received, STARTUP sent
    Supported,

    /// READY received; requests may be executed
    Ready,

    /// Draining outstanding requests before the socket is closed
    Closing,

    /// Closed
    Closed,
}

impl ConnectionState {
    /// Check if transition is valid
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (New, Connected)
                | (Connected, Handshake)
                | (Handshake, Supported)
                | (Supported, Ready)
                | (New | Connected | Handshake | Supported | Ready, Closing)
                | (Closing, Closed)
        )
    }

    /// Transition to new state
    pub fn transition(&mut self, next: ConnectionState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(Error::InvalidState {
                expected: format!("valid transition from {:?}", self),
                actual: format!("{:?}", next),
            });
        }
        *self = next;
        Ok(())
    }

    /// Whether the handshake is still running
    pub fn is_handshaking(&self) -> bool {
        matches!(self, Self::Connected | Self::Handshake | Self::Supported)
    }

    /// Whether the connection is closing or closed
    pub fn is_closing(&self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Connected => write!(f, "connected"),
            Self::Handshake => write!(f, "handshake"),
            Self::Supported => write!(f, "supported"),
            Self::Ready => write!(f, "ready"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}
