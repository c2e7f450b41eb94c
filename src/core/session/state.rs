/*!
Connection state management for the TLS bridge.

This module defines connection states and the state machine for connection progression.
*/

use std::fmt;

/// Connection state for tracking progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    /// Nothing opened yet
    Idle,
    /// Transport connect in progress
    TransportConnecting,
    /// Transport bound, handshake running
    Handshaking,
    /// Handshake complete and peer verified
    Established,
    /// Shutdown in progress
    Closing,
    /// Closed after an orderly shutdown
    Closed,
    /// Terminated by an error
    Failed,
}

impl ConnectionState {
    /// Whether no further transition is possible
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "Idle"),
            ConnectionState::TransportConnecting => write!(f, "TransportConnecting"),
            ConnectionState::Handshaking => write!(f, "Handshaking"),
            ConnectionState::Established => write!(f, "Established"),
            ConnectionState::Closing => write!(f, "Closing"),
            ConnectionState::Closed => write!(f, "Closed"),
            ConnectionState::Failed => write!(f, "Failed"),
        }
    }
}

/// Endpoint role in the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub enum Role {
    /// Client role (initiates connection)
    Client,
    /// Server role (accepts connection)
    Server,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => write!(f, "Client"),
            Role::Server => write!(f, "Server"),
        }
    }
}

/// Connection state manager
///
/// Handles state transitions and validation of operations
/// based on the current connection state.
#[derive(Debug, Clone, Copy)]
pub struct StateManager {
    state: ConnectionState,
    role: Role,
}

impl StateManager {
    /// Create a new state manager
    pub fn new(role: Role) -> Self {
        Self {
            state: ConnectionState::Idle,
            role,
        }
    }

    /// Get the current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Get the role
    pub fn role(&self) -> Role {
        self.role
    }

    /// Check if the connection is in the given state
    pub fn is_state(&self, state: ConnectionState) -> bool {
        self.state == state
    }

    /// Check if the connection is in any of the given states
    pub fn is_in_states(&self, states: &[ConnectionState]) -> bool {
        states.contains(&self.state)
    }

    /// Check if a transport connect may start
    pub fn can_connect(&self) -> bool {
        self.role == Role::Client && self.state == ConnectionState::Idle
    }

    /// Check if the handshake may start
    pub fn can_handshake(&self) -> bool {
        self.state == ConnectionState::TransportConnecting
    }

    /// Check if data transfer is allowed
    pub fn can_transfer_data(&self) -> bool {
        self.state == ConnectionState::Established
    }

    /// Check if an orderly close may start
    pub fn can_close(&self) -> bool {
        !self.state.is_terminal() && self.state != ConnectionState::Closing
    }

    /// Transition to the transport connecting state
    pub fn transition_to_connecting(&mut self) {
        if self.can_connect() {
            self.state = ConnectionState::TransportConnecting;
        }
    }

    /// Transition to the handshaking state
    pub fn transition_to_handshaking(&mut self) {
        if self.can_handshake() {
            self.state = ConnectionState::Handshaking;
        }
    }

    /// Transition to the established state
    pub fn transition_to_established(&mut self) {
        if self.state == ConnectionState::Handshaking {
            self.state = ConnectionState::Established;
        }
    }

    /// Transition to the closing state
    pub fn transition_to_closing(&mut self) {
        if self.can_close() {
            self.state = ConnectionState::Closing;
        }
    }

    /// Transition to the closed state
    pub fn transition_to_closed(&mut self) {
        if self.state != ConnectionState::Failed {
            self.state = ConnectionState::Closed;
        }
    }

    /// Transition to the failed state from any non-terminal state
    pub fn transition_to_failed(&mut self) {
        if !self.state.is_terminal() {
            self.state = ConnectionState::Failed;
        }
    }
}
