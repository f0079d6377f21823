//! Network core of the relay.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept, per-listener remote/source endpoints)
//!     → server.rs (run loop, dispatch)
//!     → connection.rs (outbound connect, bidirectional relay)
//!     → buffer.rs (bounded per-direction buffering, backpressure)
//!
//! Listener states:   NEW → ACTIVE → ZOMBIE → removed
//! Connection states: CONNECTING → CONNECTED → removed
//! ```
//!
//! # Design Decisions
//! - Fixed-size buffers bound per-connection memory; a full buffer
//!   suspends reading rather than erroring
//! - Reconfiguration reuses bound sockets for unchanged local endpoints,
//!   so a reload never leaves an address unserved
//! - Teardown is atomic: both sides of a relay close together

pub mod buffer;
pub mod connection;
pub mod endpoint;
pub mod listener;
pub mod server;

pub use buffer::RelayBuffer;
pub use connection::{ConnectionId, ConnectionRegistry, ConnectionState};
pub use listener::{Accepted, ListenerRegistry, ListenerState};
pub use server::RelayServer;
