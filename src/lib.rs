//! easyconnect-agent: device connectivity agent
//!
//! A single-process daemon bundling the remote-access surfaces a small
//! connected device needs: a Telnet-like line console with a bounded
//! session pool, an HTTP/JSON API, a publish-only WebSocket push channel,
//! JSON-file-backed configuration, and a link watcher with reconnect.
//!
//! # Architecture
//!
//! Everything hangs off one [`agent::Agent`] facade built through
//! [`agent::AgentBuilder`]. Platform specifics (wireless state, memory
//! figures) are injected capabilities, not compiled-in bindings, so the
//! agent runs unchanged on development hosts and in tests.
//!
//! # Modules
//!
//! - `agent`: facade and lifecycle
//! - `config`: JSON-file configuration store
//! - `console`: line console (session pool, dispatch, broadcast)
//! - `link`: link abstraction and connectivity watcher
//! - `monitoring`: uptime and memory status
//! - `push`: WebSocket push channel
//! - `status`: status documents shared by web and push
//! - `web`: HTTP/JSON API
//! - `error`: error types

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod agent;
pub mod config;
pub mod console;
pub mod error;
pub mod link;
pub mod monitoring;
pub mod push;
pub mod status;
pub mod web;

// Re-export commonly used types
pub use agent::{Agent, AgentBuilder};
pub use error::{AgentError, Result};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
