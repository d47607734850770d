//! Relay module
//!
//! The client handle, its connection state machine, and the handler
//! registry it dispatches into.

pub mod client;
pub mod state;
pub mod subscriptions;
