//! # wsrelay-server
//!
//! Axum WebSocket relay. Every valid JSON message a client sends is stamped
//! and rebroadcast to all open connections; malformed input is answered with
//! a directed error frame and never relayed.
//!
//! - [`websocket`]: registry, broadcaster, router, liveness monitor, lifecycle
//! - [`server`]: HTTP routes, upgrade handling, listen and graceful shutdown
//! - [`shutdown`]: cancellation token shared by background tasks
//! - [`health`], [`metrics`]: operational endpoints

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod frames;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::{RelayError, SendError, ServerError};
pub use server::RelayServer;
pub use shutdown::ShutdownCoordinator;
