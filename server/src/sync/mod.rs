//! Offline-first synchronization: a local document cache, a durable queue of
//! mutations made while the remote was unreachable, and the key map linking
//! local identities to the identities the remote assigned.

mod coordinator;
mod keystore;
mod notify;
mod queue;

pub use coordinator::{SyncControl, SyncCoordinator};
pub use keystore::KeyStore;
pub use notify::{BroadcastNotifier, ChangeNotifier};
pub use queue::PendingQueue;
