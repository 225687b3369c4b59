pub mod connection;

pub use connection::{ConnectionLifecycle, ConnectionState, DisconnectReason};
