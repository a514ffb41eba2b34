//! WebSocket change notifications.
//!
//! Clients connect to `/ws`, optionally narrow the tables they care about,
//! and receive a message for every change made through the server.

mod handler;
mod hub;
mod protocol;

pub use handler::handle_socket;
pub use hub::{ChangeHub, Connection, MessageSender};
pub use protocol::*;
