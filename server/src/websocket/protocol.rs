//! WebSocket message protocol definitions.
//!
//! All messages are JSON-encoded and tagged by `type` in snake_case.

use quarry_engine::ChangeEvent;
use serde::{Deserialize, Serialize};

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Only receive changes for these tables; an empty list means all.
    Subscribe { tables: Vec<String> },

    /// Keep-alive ping.
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A record, or a whole table, changed.
    Change { event: ChangeEvent },

    /// Acknowledges a subscription.
    Subscribed { tables: Vec<String> },

    /// Response to ping.
    Pong,

    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}
