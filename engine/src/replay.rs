//! Replay planning for queued mutations.
//!
//! A [`ReplayPass`] walks the pending queue in sequence order. For each entry
//! it decides what to send to the remote backend ([`ReplayStep`]), translating
//! local identities through the [`KeyMap`]. The caller executes the step and
//! reports the outcome back, which is how the pass learns that an insert
//! failed and that later entries for the same record must wait.
//!
//! The pass itself does no IO.

use crate::{error::Result, Entity, KeyMap, MutationKind, PendingMutation, RecordKey};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Default number of failed attempts before an entry is dead-lettered.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// What to send to the remote backend for one queued entry.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayStep<R: Entity> {
    /// Insert `record` remotely, then map `local_key` to the key it receives
    Insert { local_key: R::Key, record: R },
    /// Update the remote copy; `record` already carries `remote_key`
    Update {
        local_key: R::Key,
        remote_key: R::Key,
        record: R,
    },
    Delete {
        local_key: R::Key,
        remote_key: R::Key,
    },
    DeleteAll,
    /// Leave queued; an earlier insert of the same record failed in this pass
    Defer,
}

/// What happened to a failed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Stays queued for the next pass
    Retry,
    /// Moved out of the queue
    DeadLetter,
}

/// Summary of one replay pass, by queue sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    pub replayed: Vec<u64>,
    pub failed: Vec<u64>,
    pub deferred: Vec<u64>,
    pub dead_lettered: Vec<u64>,
}

impl ReplayReport {
    /// Whether every entry reached the remote backend.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.deferred.is_empty() && self.dead_lettered.is_empty()
    }

    pub fn total(&self) -> usize {
        self.replayed.len() + self.failed.len() + self.deferred.len() + self.dead_lettered.len()
    }
}

/// State of one walk over the pending queue.
#[derive(Debug)]
pub struct ReplayPass<K: RecordKey> {
    max_attempts: u32,
    failed_inserts: HashSet<K>,
    report: ReplayReport,
}

impl<K: RecordKey> ReplayPass<K> {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            failed_inserts: HashSet::new(),
            report: ReplayReport::default(),
        }
    }

    /// Decide the remote call for an entry.
    ///
    /// Fails only when the entry itself is malformed (missing snapshot or a
    /// key of the wrong type); the caller treats that as a failed attempt.
    pub fn plan<R>(&self, mutation: &PendingMutation<R>, keys: &KeyMap<K>) -> Result<ReplayStep<R>>
    where
        R: Entity<Key = K>,
    {
        if mutation.kind == MutationKind::DeleteAll {
            return Ok(ReplayStep::DeleteAll);
        }

        let local_key: K = mutation.local_key()?.ok_or_else(|| malformed(mutation, "key"))?;
        if self.failed_inserts.contains(&local_key) {
            return Ok(ReplayStep::Defer);
        }

        let step = match mutation.kind {
            MutationKind::Insert => {
                let record = mutation.record.as_ref().ok_or_else(|| malformed(mutation, "record"))?;
                ReplayStep::Insert {
                    record: remote_insert_copy(record),
                    local_key,
                }
            }
            MutationKind::Update => {
                let record = mutation.record.as_ref().ok_or_else(|| malformed(mutation, "record"))?;
                let remote_key = keys.resolve_remote(&local_key);
                ReplayStep::Update {
                    record: record.with_key(remote_key.clone()),
                    local_key,
                    remote_key,
                }
            }
            MutationKind::Delete => ReplayStep::Delete {
                remote_key: keys.resolve_remote(&local_key),
                local_key,
            },
            MutationKind::DeleteAll => ReplayStep::DeleteAll,
        };

        Ok(step)
    }

    pub fn succeeded(&mut self, sequence: u64) {
        self.report.replayed.push(sequence);
    }

    pub fn deferred(&mut self, sequence: u64) {
        self.report.deferred.push(sequence);
    }

    /// Record a failed attempt on `mutation` and decide whether it stays queued.
    pub fn failed<R>(&mut self, mutation: &mut PendingMutation<R>, error: impl std::fmt::Display) -> FailureOutcome {
        mutation.record_failure(error);

        if mutation.kind == MutationKind::Insert {
            if let Ok(Some(key)) = mutation.local_key::<K>() {
                self.failed_inserts.insert(key);
            }
        }

        if mutation.attempts >= self.max_attempts {
            self.report.dead_lettered.push(mutation.sequence);
            FailureOutcome::DeadLetter
        } else {
            self.report.failed.push(mutation.sequence);
            FailureOutcome::Retry
        }
    }

    pub fn report(&self) -> &ReplayReport {
        &self.report
    }

    pub fn finish(self) -> ReplayReport {
        self.report
    }
}

/// Copy of an offline-inserted record suitable for the remote insert.
///
/// Integer keys and provisional string keys are cleared so the remote side
/// assigns its own; caller-chosen string keys are kept.
pub fn remote_insert_copy<R: Entity>(record: &R) -> R {
    let key = record.key();
    if matches!(R::Key::KIND, crate::KeyKind::String) && !key.is_provisional() {
        record.clone()
    } else {
        record.with_key(R::Key::unset())
    }
}

fn malformed<R>(mutation: &PendingMutation<R>, missing: &str) -> crate::Error {
    crate::Error::Configuration(format!(
        "queued {} #{} has no {missing}",
        mutation.kind, mutation.sequence
    ))
}
