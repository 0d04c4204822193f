//! WebSocket relay core.
//!
//! - [`connection`]: per-client state and outbound queue
//! - [`registry`]: the set of open connections
//! - [`broadcast`]: fan-out to every open connection
//! - [`router`]: inbound parsing and the single dispatcher
//! - [`heartbeat`]: ping/pong liveness monitor
//! - [`lifecycle`]: accept, release and shutdown drain
//! - [`session`]: reader/writer tasks for one socket

pub mod broadcast;
pub mod connection;
pub mod heartbeat;
pub mod lifecycle;
pub mod registry;
pub mod router;
pub mod session;
