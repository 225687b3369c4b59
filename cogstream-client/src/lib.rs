//! # cogstream-client: Reference Streaming Client
//!
//! Connects to a cognitive engine, runs one synthetic producer thread per
//! configured source, and consumes the session's events: results are
//! logged, measurement samples go to the configured sinks, and any fatal
//! event stops the session.
//!
//! ## Modes
//!
//! - **Run**: Stream until Ctrl-C, a fatal event, or every producer is done.
//! - **Generate config**: Print the default TOML (`--gen-config`).

pub mod config;
pub mod producer;
pub mod sink;
