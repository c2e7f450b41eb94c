/*!
Connection session management for the TLS bridge.

This module provides the connection state machine.
*/

// State management
pub mod state;

// Re-export main session types
pub use self::state::{ConnectionState, Role, StateManager};
