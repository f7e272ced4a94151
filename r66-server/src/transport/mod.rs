//! Channels between partners: connection setup, TLS and the live-session registry

pub mod pool;
pub mod registry;
pub mod tls;

pub use pool::{Channel, ConnectOptions, Connection, configure_socket, connect};
pub use registry::{ActiveSession, Origin, SessionGuard, SessionId, SessionRegistry};
