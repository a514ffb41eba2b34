//! Offline-capable repository over a local cache and a remote backend.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use quarry_engine::{
    ChangeEvent, Entity, Error, FailureOutcome, KeyKind, KeyMapping, KeyValue, MutationKind,
    PendingMutation, QueryFilter, RecordKey, ReplayPass, ReplayReport, ReplayStep, Result, Shape,
    DEFAULT_MAX_ATTEMPTS, PROVISIONAL_PREFIX,
};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::keystore::KeyStore;
use super::notify::ChangeNotifier;
use super::queue::PendingQueue;
use crate::storage::{filter_in_memory, DocumentStore, DocumentTable, Repository};

/// Repository that keeps working while the remote backend is unreachable.
///
/// Online, writes go to the remote first and are mirrored into the local
/// document table. Offline (or when the remote reports a transport failure)
/// writes are applied locally and appended to a durable queue, which is
/// replayed in order once connectivity returns. Records are always
/// addressed by their local identity; the key store translates to the
/// remote identity a record received when its insert was replayed.
pub struct SyncCoordinator<R: Entity> {
    local: DocumentTable<R>,
    remote: Arc<dyn Repository<R>>,
    queue: PendingQueue<R>,
    keys: KeyStore<R::Key>,
    notifier: Option<Arc<dyn ChangeNotifier>>,
    online: AtomicBool,
    replay: Mutex<()>,
    max_attempts: u32,
    /// Lowest integer key handed out so far; provisional keys go below it
    provisional_floor: AtomicI64,
}

impl<R: Entity> SyncCoordinator<R> {
    /// Open the local tables for `R` in `store` and pair them with `remote`.
    ///
    /// Starts online with the default retry limit and no notifier.
    pub async fn new(store: Arc<dyn DocumentStore>, remote: Arc<dyn Repository<R>>) -> Result<Self> {
        let local = DocumentTable::<R>::new(Arc::clone(&store)).await?;
        let table = local.table().to_string();
        if remote.table() != table {
            return Err(Error::Configuration(format!(
                "remote table '{}' does not match local table '{table}'",
                remote.table()
            )));
        }

        let queue = PendingQueue::open(Arc::clone(&store), &table).await?;
        let keys = KeyStore::open(store, &table).await?;
        let floor = local
            .keys()
            .await?
            .iter()
            .filter_map(|key| match key.to_key_value() {
                KeyValue::Int(v) => Some(v),
                KeyValue::Text(_) => None,
            })
            .min()
            .unwrap_or(0)
            .min(0);

        Ok(Self {
            local,
            remote,
            queue,
            keys,
            notifier: None,
            online: AtomicBool::new(true),
            replay: Mutex::new(()),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            provisional_floor: AtomicI64::new(floor),
        })
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn ChangeNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_online(self, online: bool) -> Self {
        self.online.store(online, Ordering::SeqCst);
        self
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Connectivity callback.
    ///
    /// An offline to online flip starts a replay pass on the runtime and
    /// returns its handle; any other call only records the new state.
    pub fn on_connectivity_changed(self: &Arc<Self>, online: bool) -> Option<JoinHandle<Result<ReplayReport>>> {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        tracing::info!(table = %self.table(), online, "Connectivity changed");
        if online && !was_online {
            let this = Arc::clone(self);
            Some(tokio::spawn(async move { this.reconcile().await }))
        } else {
            None
        }
    }

    /// Replay every queued mutation against the remote, in sequence order.
    ///
    /// Passes never overlap: a second caller waits for the running pass and
    /// then replays whatever is still queued.
    pub async fn reconcile(&self) -> Result<ReplayReport> {
        let _running = self.replay.lock().await;
        let entries = self.queue.pending().await?;
        tracing::info!(table = %self.table(), entries = entries.len(), "Replaying queued mutations");

        let mut pass = ReplayPass::new(self.max_attempts);
        for mut mutation in entries {
            let sequence = mutation.sequence;
            let keys = self.keys.snapshot().await;
            let outcome = match pass.plan(&mutation, &keys) {
                Ok(ReplayStep::Defer) => {
                    tracing::debug!(table = %self.table(), sequence, "Replay deferred");
                    pass.deferred(sequence);
                    continue;
                }
                Ok(step) => self.apply(step).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(()) => {
                    self.queue.remove(sequence).await?;
                    pass.succeeded(sequence);
                }
                Err(e) => {
                    tracing::warn!(table = %self.table(), sequence, error = %e, "Replay failed");
                    match pass.failed(&mut mutation, &e) {
                        FailureOutcome::Retry => self.queue.save(&mutation).await?,
                        FailureOutcome::DeadLetter => self.queue.dead_letter(&mutation).await?,
                    }
                }
            }
        }

        let report = pass.finish();
        tracing::info!(
            table = %self.table(),
            entries = report.total(),
            replayed = report.replayed.len(),
            failed = report.failed.len(),
            deferred = report.deferred.len(),
            dead_lettered = report.dead_lettered.len(),
            "Replay finished"
        );
        Ok(report)
    }

    pub async fn pending(&self) -> Result<Vec<PendingMutation<R>>> {
        self.queue.pending().await
    }

    pub async fn pending_count(&self) -> Result<usize> {
        self.queue.len().await
    }

    /// Entries that ran out of retries.
    pub async fn dead_letters(&self) -> Result<Vec<PendingMutation<R>>> {
        self.queue.dead_letters().await
    }

    pub async fn key_mappings(&self) -> Vec<KeyMapping<R::Key>> {
        self.keys.mappings().await
    }

    async fn apply(&self, step: ReplayStep<R>) -> Result<()> {
        match step {
            ReplayStep::Insert { local_key, record } => {
                let stored = self.remote.insert(record).await?;
                self.keys.link(local_key.clone(), stored.key()).await?;
                self.announce(&local_key, MutationKind::Insert);
            }
            ReplayStep::Update { local_key, record, .. } => {
                self.remote.update(record).await?;
                self.announce(&local_key, MutationKind::Update);
            }
            ReplayStep::Delete { local_key, remote_key } => {
                self.remote.delete_by_id(&remote_key).await?;
                self.keys.unlink_local(&local_key).await?;
                self.announce(&local_key, MutationKind::Delete);
            }
            ReplayStep::DeleteAll => {
                self.remote.delete_all().await?;
                self.announce_cleared();
            }
            ReplayStep::Defer => {}
        }
        Ok(())
    }

    /// Whether a write to `key` can go straight to the remote.
    ///
    /// Keys with queued entries, and provisional keys that were never
    /// reconciled, stay on the queue so replay order is kept.
    async fn direct(&self, key: &R::Key) -> Result<bool> {
        if !self.is_online() {
            return Ok(false);
        }
        if key.is_provisional() && self.keys.remote_for(key).await.is_none() {
            return Ok(false);
        }
        let target = key.to_key_value();
        let queued = self
            .queue
            .pending()
            .await?
            .iter()
            .any(|m| m.key.as_ref() == Some(&target));
        Ok(!queued)
    }

    /// Switch offline on a transport failure; pass other errors through.
    fn fall_back(&self, err: Error) -> Result<()> {
        match err {
            Error::Transport(reason) => {
                if self.online.swap(false, Ordering::SeqCst) {
                    tracing::warn!(table = %self.table(), %reason, "Remote unreachable, working offline");
                }
                Ok(())
            }
            other => Err(other),
        }
    }

    fn provisional_key(&self) -> Result<R::Key> {
        match R::Key::KIND {
            KeyKind::String => R::Key::from_key_value(KeyValue::Text(format!(
                "{PROVISIONAL_PREFIX}{}",
                uuid::Uuid::new_v4()
            ))),
            KeyKind::Int32 | KeyKind::Int64 => {
                let next = self.provisional_floor.fetch_sub(1, Ordering::SeqCst) - 1;
                R::Key::from_key_value(KeyValue::Int(next))
            }
        }
    }

    /// Local keys that still have queued entries.
    async fn queued_keys(&self) -> Result<HashSet<R::Key>> {
        Ok(self
            .queue
            .pending()
            .await?
            .iter()
            .filter_map(|m| m.local_key::<R::Key>().ok().flatten())
            .collect())
    }

    /// Local identity for a record the remote holds under `remote_key`.
    ///
    /// The remote key is reused unless it already names a different local
    /// record (one mapped elsewhere, or one still waiting to be replayed);
    /// then the record gets a fresh provisional key linked to `remote_key`.
    async fn claim_local(&self, remote_key: &R::Key, queued: &HashSet<R::Key>) -> Result<R::Key> {
        if let Some(local) = self.keys.local_for(remote_key).await {
            return Ok(local);
        }
        let taken = queued.contains(remote_key) || self.keys.remote_for(remote_key).await.is_some();
        if !taken {
            return Ok(remote_key.clone());
        }

        let local = self.provisional_key()?;
        self.keys.link(local.clone(), remote_key.clone()).await?;
        tracing::debug!(table = %self.table(), local = %local, remote = %remote_key, "Remote key taken locally");
        Ok(local)
    }

    /// Upsert remote records into the cache and drop cached records the
    /// remote no longer has. Keys with queued entries are left alone.
    async fn refresh(&self, remote: Vec<R>) -> Result<()> {
        let queued = self.queued_keys().await?;

        let mut seen = HashSet::with_capacity(remote.len());
        for record in remote {
            let local_key = self.claim_local(&record.key(), &queued).await?;
            if !queued.contains(&local_key) {
                self.local.put(&record.with_key(local_key.clone())).await?;
            }
            seen.insert(local_key);
        }

        let mut dropped = 0usize;
        for key in self.local.keys().await? {
            if seen.contains(&key) || queued.contains(&key) {
                continue;
            }
            // provisional keys are kept only until their insert is replayed
            if key.is_provisional() && self.keys.remote_for(&key).await.is_none() {
                continue;
            }
            self.local.delete_by_id(&key).await?;
            self.keys.unlink_local(&key).await?;
            dropped += 1;
        }
        tracing::debug!(table = %self.table(), cached = seen.len(), dropped, "Refreshed local cache");
        Ok(())
    }

    async fn clear_local(&self) -> Result<()> {
        self.local.delete_all().await?;
        self.keys.clear().await?;
        self.queue.clear().await
    }

    fn announce(&self, key: &R::Key, kind: MutationKind) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(ChangeEvent::new(self.table(), Some(key.to_key_value()), kind));
        }
    }

    fn announce_cleared(&self) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(ChangeEvent::cleared(self.table()));
        }
    }
}

#[async_trait]
impl<R: Entity> Repository<R> for SyncCoordinator<R> {
    fn shape(&self) -> &Shape<R> {
        self.local.shape()
    }

    async fn fetch_all(&self) -> Result<Vec<R>> {
        if self.is_online() {
            match self.remote.fetch_all().await {
                Ok(records) => self.refresh(records).await?,
                Err(e) => self.fall_back(e)?,
            }
        }
        self.local.fetch_all().await
    }

    async fn fetch_filtered(&self, filter: &QueryFilter) -> Result<Vec<R>> {
        let records = self.fetch_all().await?;
        filter_in_memory(self.shape(), filter, records)
    }

    async fn fetch_by_id(&self, id: &R::Key) -> Result<Option<R>> {
        if let Some(record) = self.local.fetch_by_id(id).await? {
            return Ok(Some(record));
        }
        if !self.is_online() || id.is_provisional() {
            return Ok(None);
        }

        let remote_key = self.keys.resolve_remote(id).await;
        match self.remote.fetch_by_id(&remote_key).await {
            Ok(Some(record)) => {
                let record = record.with_key(id.clone());
                self.local.put(&record).await?;
                Ok(Some(record))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.fall_back(e)?;
                Ok(None)
            }
        }
    }

    async fn insert(&self, mut record: R) -> Result<R> {
        let key = record.key();
        let direct = if key.is_unset() {
            self.is_online()
        } else {
            self.direct(&key).await?
        };
        if direct {
            match self.remote.insert(record.clone()).await {
                Ok(stored) => {
                    let remote_key = stored.key();
                    let queued = self.queued_keys().await?;
                    let local_key = self.claim_local(&remote_key, &queued).await?;
                    let mirrored = stored.with_key(local_key.clone());
                    self.local.put(&mirrored).await?;
                    self.keys.link(local_key.clone(), remote_key).await?;
                    self.announce(&local_key, MutationKind::Insert);
                    return Ok(mirrored);
                }
                Err(e) => self.fall_back(e)?,
            }
        }

        if record.key().is_unset() {
            record.set_key(self.provisional_key()?);
        }
        let stored = self.local.insert(record).await?;
        let key = stored.key().to_key_value();
        let snapshot = stored.clone();
        self.queue
            .append(move |seq| PendingMutation::insert(seq, key, snapshot))
            .await?;
        Ok(stored)
    }

    async fn update(&self, record: R) -> Result<R> {
        let local_key = record.key();
        if self.direct(&local_key).await? {
            let remote_key = self.keys.resolve_remote(&local_key).await;
            match self.remote.update(record.with_key(remote_key)).await {
                Ok(stored) => {
                    let mirrored = stored.with_key(local_key.clone());
                    self.local.put(&mirrored).await?;
                    self.announce(&local_key, MutationKind::Update);
                    return Ok(mirrored);
                }
                Err(e) => self.fall_back(e)?,
            }
        }

        let stored = self.local.update(record).await?;
        let key = local_key.to_key_value();
        let snapshot = stored.clone();
        self.queue
            .append(move |seq| PendingMutation::update(seq, key, snapshot))
            .await?;
        Ok(stored)
    }

    async fn delete_by_id(&self, id: &R::Key) -> Result<bool> {
        if self.direct(id).await? {
            let remote_key = self.keys.resolve_remote(id).await;
            match self.remote.delete_by_id(&remote_key).await {
                Ok(deleted) => {
                    let cached = self.local.delete_by_id(id).await?;
                    self.keys.unlink_local(id).await?;
                    if deleted {
                        self.announce(id, MutationKind::Delete);
                    }
                    return Ok(deleted || cached);
                }
                Err(e) => self.fall_back(e)?,
            }
        }

        let Some(existing) = self.local.fetch_by_id(id).await? else {
            return Ok(false);
        };
        self.local.delete_by_id(id).await?;
        let key = id.to_key_value();
        self.queue
            .append(move |seq| PendingMutation::delete(seq, key, Some(existing)))
            .await?;
        Ok(true)
    }

    async fn delete_all(&self) -> Result<()> {
        if self.is_online() {
            match self.remote.delete_all().await {
                Ok(()) => {
                    self.clear_local().await?;
                    self.announce_cleared();
                    return Ok(());
                }
                Err(e) => self.fall_back(e)?,
            }
        }

        // earlier entries would only be erased by this one
        self.clear_local().await?;
        self.queue.append(PendingMutation::delete_all).await?;
        Ok(())
    }
}

/// Object-safe view of a coordinator for the sync routes, which handle
/// every configured table without knowing its record type.
#[async_trait]
pub trait SyncControl: Send + Sync {
    fn table_name(&self) -> &str;

    fn online(&self) -> bool;

    fn set_online(self: Arc<Self>, online: bool);

    async fn replay(&self) -> Result<ReplayReport>;

    async fn queued(&self) -> Result<usize>;

    async fn dead_letter_documents(&self) -> Result<Vec<Value>>;
}

#[async_trait]
impl<R: Entity> SyncControl for SyncCoordinator<R> {
    fn table_name(&self) -> &str {
        self.table()
    }

    fn online(&self) -> bool {
        self.is_online()
    }

    fn set_online(self: Arc<Self>, online: bool) {
        // the replay reports through tracing; nobody awaits it here
        let _replay = self.on_connectivity_changed(online);
    }

    async fn replay(&self) -> Result<ReplayReport> {
        self.reconcile().await
    }

    async fn queued(&self) -> Result<usize> {
        self.pending_count().await
    }

    async fn dead_letter_documents(&self) -> Result<Vec<Value>> {
        self.dead_letters()
            .await?
            .iter()
            .map(|m| {
                serde_json::to_value(m)
                    .map_err(|e| Error::Transport(format!("cannot encode dead letter: {e}")))
            })
            .collect()
    }
}
