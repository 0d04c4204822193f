//! Server-originated JSON frames.

use serde::{Deserialize, Serialize};

/// Text of the welcome frame.
pub const WELCOME_MESSAGE: &str = "Connected to server";
/// Error label for unparseable input.
pub const INVALID_FORMAT: &str = "Invalid message format";
/// Text of the departure notice.
pub const DISCONNECT_MESSAGE: &str = "Client disconnected";

/// First frame on every connection.
///
/// `temperature` and `humidity` are sensor placeholders and always zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WelcomeFrame {
    /// Always `0`.
    pub temperature: i64,
    /// Always `0`.
    pub humidity: i64,
    /// Always [`WELCOME_MESSAGE`].
    pub message: String,
    /// Registry size including the new connection.
    pub connected_clients: usize,
}

impl WelcomeFrame {
    /// Welcome for a registry that now holds `connected_clients` members.
    pub fn new(connected_clients: usize) -> Self {
        Self {
            temperature: 0,
            humidity: 0,
            message: WELCOME_MESSAGE.to_string(),
            connected_clients,
        }
    }
}

/// Directed reply to a sender whose frame was not JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrame {
    /// Error label.
    pub error: String,
    /// The raw text that was rejected.
    pub message: String,
}

impl ErrorFrame {
    /// `{"error":"Invalid message format","message":raw}`.
    pub fn invalid_format(raw: &str) -> Self {
        Self {
            error: INVALID_FORMAT.to_string(),
            message: raw.to_string(),
        }
    }
}

/// Broadcast after a connection leaves the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectFrame {
    /// Always [`DISCONNECT_MESSAGE`].
    pub message: String,
    /// Registry size after the departure.
    pub connected_clients: usize,
}

impl DisconnectFrame {
    /// Notice for a registry that now holds `connected_clients` members.
    pub fn new(connected_clients: usize) -> Self {
        Self {
            message: DISCONNECT_MESSAGE.to_string(),
            connected_clients,
        }
    }
}
