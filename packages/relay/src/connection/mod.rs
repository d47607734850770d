//! Connection module
//!
//! Wire protocol, transports, and the background driver that keeps a
//! relay session alive.

pub(crate) mod driver;
#[cfg(test)]
pub(crate) mod memory;
pub mod polling;
pub mod protocol;
pub mod transport;
pub mod websocket;
