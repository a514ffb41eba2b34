//! WebSocket connection registry.
//!
//! Tracks active connections and the tables each one listens to, and fans
//! change events out to them.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use quarry_engine::ChangeEvent;
use tokio::sync::mpsc;

use super::ServerMessage;
use crate::sync::ChangeNotifier;

/// Sender for WebSocket messages.
pub type MessageSender = mpsc::UnboundedSender<ServerMessage>;

/// A single WebSocket connection.
#[derive(Debug)]
pub struct Connection {
    pub id: String,
    /// Tables this connection listens to; empty means every table
    pub tables: HashSet<String>,
    pub sender: MessageSender,
}

impl Connection {
    fn wants(&self, table: &str) -> bool {
        self.tables.is_empty() || self.tables.contains(table)
    }
}

/// Manages active WebSocket connections.
///
/// Thread-safe and can be shared across handlers via `Arc`.
#[derive(Debug, Default)]
pub struct ChangeHub {
    connections: DashMap<String, Connection>,
}

impl ChangeHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a new connection listening to every table.
    ///
    /// Returns the connection ID.
    pub fn register(&self, sender: MessageSender) -> String {
        let conn_id = uuid::Uuid::new_v4().to_string();
        self.connections.insert(
            conn_id.clone(),
            Connection {
                id: conn_id.clone(),
                tables: HashSet::new(),
                sender,
            },
        );

        tracing::info!(conn_id = %conn_id, "WebSocket connection registered");
        conn_id
    }

    pub fn unregister(&self, conn_id: &str) {
        if self.connections.remove(conn_id).is_some() {
            tracing::info!(conn_id = %conn_id, "WebSocket connection unregistered");
        }
    }

    /// Replace the table filter of a connection.
    pub fn subscribe(&self, conn_id: &str, tables: impl IntoIterator<Item = String>) -> bool {
        match self.connections.get_mut(conn_id) {
            Some(mut conn) => {
                conn.tables = tables.into_iter().collect();
                tracing::debug!(conn_id = %conn_id, tables = ?conn.tables, "Subscription changed");
                true
            }
            None => false,
        }
    }

    /// Send a change to every connection listening to its table.
    ///
    /// Returns the number of connections that received it.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let mut sent_count = 0;

        for entry in self.connections.iter() {
            let conn = entry.value();
            if conn.wants(&event.table)
                && conn
                    .sender
                    .send(ServerMessage::Change {
                        event: event.clone(),
                    })
                    .is_ok()
            {
                sent_count += 1;
            }
        }

        tracing::debug!(
            table = %event.table,
            kind = %event.kind,
            recipients = sent_count,
            "Published change"
        );
        sent_count
    }

    /// Send a message to a specific connection.
    pub fn send_to(&self, conn_id: &str, message: ServerMessage) -> bool {
        match self.connections.get(conn_id) {
            Some(conn) => conn.sender.send(message).is_ok(),
            None => false,
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl ChangeNotifier for ChangeHub {
    fn notify(&self, event: ChangeEvent) {
        self.publish(event);
    }
}
