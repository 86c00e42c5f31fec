//! Debug Adapter Protocol (DAP) implementation
//!
//! This module implements the client side of DAP: message types, wire
//! framing, the channel abstraction the engine is written against, and a
//! stdio-backed client for real adapters.

pub mod channel;
pub mod client;
pub mod codec;
pub mod types;

pub use channel::{AdapterConnector, AdapterExecutable, Connection, DebugChannel, EventSubscription};
pub use client::{DapClient, SpawnConnector};
pub use types::*;
