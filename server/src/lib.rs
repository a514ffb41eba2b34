//! Quarry Server - record tables over interchangeable storage backends.
//!
//! Every table is served through the same [`storage::Repository`] contract;
//! the configured backend decides whether records live in memory, in
//! SQLite, in a document store, or behind a remote quarry server with an
//! offline-capable local cache.

pub mod config;
pub mod error;
pub mod models;
pub mod routes;
pub mod storage;
pub mod sync;
pub mod websocket;

use std::sync::Arc;

use axum::Router;
use quarry_engine::{Entity, Result};
use sqlx::SqlitePool;

use crate::config::{Config, StorageBackend};
use crate::models::{Customer, Note};
use crate::routes::TableState;
use crate::storage::{
    sqlite, DocumentStore, DocumentTable, FileDocumentStore, HttpTable, MemoryDocumentStore,
    MemoryTable, OrmTable, Repository, SqlTable,
};
use crate::sync::{SyncControl, SyncCoordinator};
use crate::websocket::ChangeHub;

/// Application state shared by the table-independent handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<ChangeHub>,
    /// One entry per table when running as a sync client
    pub sync: Vec<Arc<dyn SyncControl>>,
}

/// Everything the router serves.
pub struct Services {
    pub state: AppState,
    pub customers: TableState<Customer>,
    pub notes: TableState<Note>,
}

impl Services {
    /// Open the configured backend for every table.
    pub async fn open(config: &Config) -> Result<Self> {
        let backend = Backend::open(config).await?;
        let hub = ChangeHub::new_shared();
        let mut sync = Vec::new();

        let customers = backend.table::<Customer>(&hub, &mut sync).await?;
        let notes = backend.table::<Note>(&hub, &mut sync).await?;

        Ok(Self {
            state: AppState { hub, sync },
            customers,
            notes,
        })
    }

    pub fn router(self) -> Router {
        Router::new()
            .merge(routes::create_routes())
            .with_state(self.state)
            .merge(routes::records::routes(self.customers))
            .merge(routes::records::routes(self.notes))
    }
}

enum Backend {
    Memory,
    Orm(SqlitePool),
    Sql(SqlitePool),
    Document(Arc<dyn DocumentStore>),
    Sync {
        store: Arc<dyn DocumentStore>,
        remote_url: String,
        max_attempts: u32,
    },
}

impl Backend {
    async fn open(config: &Config) -> Result<Self> {
        if let Some(remote_url) = &config.remote_url {
            tracing::info!(remote = %remote_url, "Running as sync client");
            return Ok(Self::Sync {
                store: document_store(config).await?,
                remote_url: remote_url.clone(),
                max_attempts: config.sync_max_attempts,
            });
        }

        tracing::info!(backend = ?config.storage_backend, "Opening storage");
        Ok(match config.storage_backend {
            StorageBackend::Memory => Self::Memory,
            StorageBackend::Orm => Self::Orm(sqlite::connect(&config.database_url).await?),
            StorageBackend::Sql => Self::Sql(sqlite::connect(&config.database_url).await?),
            StorageBackend::Document => Self::Document(document_store(config).await?),
        })
    }

    async fn table<R: Entity>(
        &self,
        hub: &Arc<ChangeHub>,
        sync: &mut Vec<Arc<dyn SyncControl>>,
    ) -> Result<TableState<R>> {
        let mut publish = true;
        let repo: Arc<dyn Repository<R>> = match self {
            Self::Memory => Arc::new(MemoryTable::<R>::new()?),
            Self::Orm(pool) => Arc::new(OrmTable::<R>::new(pool.clone()).await?),
            Self::Sql(pool) => Arc::new(SqlTable::<R>::new(pool.clone()).await?),
            Self::Document(store) => Arc::new(DocumentTable::<R>::new(Arc::clone(store)).await?),
            Self::Sync {
                store,
                remote_url,
                max_attempts,
            } => {
                let remote: Arc<dyn Repository<R>> = Arc::new(HttpTable::<R>::new(remote_url)?);
                let coordinator = Arc::new(
                    SyncCoordinator::new(Arc::clone(store), remote)
                        .await?
                        .with_max_attempts(*max_attempts)
                        .with_notifier(hub.clone()),
                );
                sync.push(coordinator.clone());
                // the coordinator announces changes once the remote confirms them
                publish = false;
                coordinator
            }
        };

        tracing::info!(table = %repo.table(), "Table ready");
        Ok(TableState {
            repo,
            hub: Arc::clone(hub),
            publish,
        })
    }
}

async fn document_store(config: &Config) -> Result<Arc<dyn DocumentStore>> {
    Ok(match &config.document_dir {
        Some(dir) => Arc::new(FileDocumentStore::open_dir(dir.clone()).await?),
        None => Arc::new(MemoryDocumentStore::new()),
    })
}
