//! Local/remote identity reconciliation.

use crate::RecordKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One link between a client-assigned and a server-confirmed identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMapping<K> {
    pub local_id: K,
    pub remote_id: K,
}

impl<K> KeyMapping<K> {
    pub fn new(local_id: K, remote_id: K) -> Self {
        Self { local_id, remote_id }
    }
}

/// Bidirectional identity map.
///
/// Each local identity maps to at most one remote identity and vice versa;
/// inserting a mapping replaces any mapping that shared either side.
#[derive(Debug, Clone)]
pub struct KeyMap<K: RecordKey> {
    by_local: HashMap<K, K>,
    by_remote: HashMap<K, K>,
}

impl<K: RecordKey> Default for KeyMap<K> {
    fn default() -> Self {
        Self {
            by_local: HashMap::new(),
            by_remote: HashMap::new(),
        }
    }
}

impl<K: RecordKey> KeyMap<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted mappings. Later entries win on conflict.
    pub fn from_mappings(mappings: impl IntoIterator<Item = KeyMapping<K>>) -> Self {
        let mut map = Self::new();
        for mapping in mappings {
            map.insert(mapping.local_id, mapping.remote_id);
        }
        map
    }

    /// Record a link, returning the mappings it displaced.
    pub fn insert(&mut self, local_id: K, remote_id: K) -> Vec<KeyMapping<K>> {
        let mut displaced = Vec::new();

        if let Some(old_remote) = self.by_local.remove(&local_id) {
            self.by_remote.remove(&old_remote);
            displaced.push(KeyMapping::new(local_id.clone(), old_remote));
        }
        if let Some(old_local) = self.by_remote.remove(&remote_id) {
            self.by_local.remove(&old_local);
            displaced.push(KeyMapping::new(old_local, remote_id.clone()));
        }

        self.by_local.insert(local_id.clone(), remote_id.clone());
        self.by_remote.insert(remote_id, local_id);
        displaced
    }

    pub fn remote_for(&self, local_id: &K) -> Option<&K> {
        self.by_local.get(local_id)
    }

    pub fn local_for(&self, remote_id: &K) -> Option<&K> {
        self.by_remote.get(remote_id)
    }

    /// Remote identity for a local one, falling back to the key itself.
    ///
    /// Unmapped keys are assumed to already live in the remote space.
    pub fn resolve_remote(&self, local_id: &K) -> K {
        self.remote_for(local_id)
            .cloned()
            .unwrap_or_else(|| local_id.clone())
    }

    /// Local identity for a remote one, falling back to the key itself.
    pub fn resolve_local(&self, remote_id: &K) -> K {
        self.local_for(remote_id)
            .cloned()
            .unwrap_or_else(|| remote_id.clone())
    }

    pub fn remove_local(&mut self, local_id: &K) -> Option<KeyMapping<K>> {
        let remote_id = self.by_local.remove(local_id)?;
        self.by_remote.remove(&remote_id);
        Some(KeyMapping::new(local_id.clone(), remote_id))
    }

    pub fn clear(&mut self) {
        self.by_local.clear();
        self.by_remote.clear();
    }

    pub fn len(&self) -> usize {
        self.by_local.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_local.is_empty()
    }

    /// All mappings ordered by local identity.
    pub fn mappings(&self) -> Vec<KeyMapping<K>> {
        let mut out: Vec<_> = self
            .by_local
            .iter()
            .map(|(l, r)| KeyMapping::new(l.clone(), r.clone()))
            .collect();
        out.sort_by(|a, b| a.local_id.cmp(&b.local_id));
        out
    }
}
