//! TCP relay library.
//!
//! Listens on configured local endpoints and forwards every accepted
//! connection, byte-for-byte and bidirectionally, to a configured remote
//! endpoint. IPv4 and IPv6 are supported independently on each side,
//! including cross-family relaying.

pub mod config;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::schema::RelayConfig;
pub use lifecycle::signals::ControlEvent;
pub use net::server::RelayServer;
