// ABOUTME: SSH client module for remote host connections.
// ABOUTME: Multi-hop connection setup, sessions, port forwarding and proxy transports.

mod agent;
mod client;
mod connect;
mod error;
mod forward;
pub mod transport;

pub use client::Session;
pub use connect::{ConnectOptions, connect};
pub use error::{Error, HopStage, Result};
pub use forward::ForwardHandle;
