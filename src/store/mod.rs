//! Persistence contracts for orchestration state.
//!
//! Each kind of state has its own store trait, keyed independently:
//!
//! | Trait | Key | Contents |
//! |-------|-----|----------|
//! | [`GraphStore`] | product | [`TaskGraph`] |
//! | [`MessageLog`] | [`MessageKey`] | raw [`AgentMessage`]s, append-only |
//! | [`CheckpointStore`] | product | [`Checkpoint`]s |
//! | [`BlockerStore`] | product | [`BlockerRecord`]s |
//! | [`PerformanceStore`] | agent | [`AgentPerformanceRecord`] |
//! | [`InboxStore`] | agent | queued handoff messages |
//!
//! Stores do not serialize read-modify-write sequences across calls; the
//! router holds a [`KeyedLocks`] guard around each such sequence.

mod file;
mod lock;
mod memory;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{Config, StoreBackend};
use crate::core::{AgentPerformanceRecord, BlockerRecord, Checkpoint, TaskGraph};
use crate::error::Result;
use crate::message::{AgentMessage, MessageKey};

pub use file::FileStore;
pub use lock::{KeyGuard, KeyedLocks};
pub use memory::MemoryStore;

#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn load_graph(&self, product: &str) -> Result<Option<TaskGraph>>;

    /// Create or replace the graph for `graph.product`.
    async fn save_graph(&self, graph: &TaskGraph) -> Result<()>;

    async fn list_products(&self) -> Result<Vec<String>>;
}

#[async_trait]
pub trait MessageLog: Send + Sync {
    /// Record a message under `key`. Returns `false` when the key was
    /// already present, in which case the stored copy is left untouched.
    async fn append(&self, key: &MessageKey, message: &AgentMessage) -> Result<bool>;

    async fn get(&self, key: &MessageKey) -> Result<Option<AgentMessage>>;

    /// All keys in ascending order.
    async fn keys(&self) -> Result<Vec<MessageKey>>;
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Returns `false` if a checkpoint for the same message already exists.
    async fn record_checkpoint(&self, checkpoint: &Checkpoint) -> Result<bool>;

    async fn checkpoints(&self, product: &str) -> Result<Vec<Checkpoint>>;

    async fn resolve_checkpoint(&self, product: &str, id: Uuid, resolution: &str) -> Result<Checkpoint>;
}

#[async_trait]
pub trait BlockerStore: Send + Sync {
    /// Returns `false` if the same blocker from the same message exists.
    async fn record_blocker(&self, blocker: &BlockerRecord) -> Result<bool>;

    async fn blockers(&self, product: &str) -> Result<Vec<BlockerRecord>>;

    async fn resolve_blocker(&self, product: &str, id: Uuid) -> Result<BlockerRecord>;
}

#[async_trait]
pub trait PerformanceStore: Send + Sync {
    async fn load_performance(&self, agent: &str) -> Result<Option<AgentPerformanceRecord>>;

    async fn save_performance(&self, record: &AgentPerformanceRecord) -> Result<()>;
}

#[async_trait]
pub trait InboxStore: Send + Sync {
    /// Queue a message for `agent`. Returns `false` on duplicate delivery.
    async fn deliver(&self, agent: &str, key: &MessageKey, message: &AgentMessage) -> Result<bool>;

    /// Queued messages in key order, left in place.
    async fn inbox(&self, agent: &str) -> Result<Vec<AgentMessage>>;

    /// Queued messages in key order, removed from the inbox.
    async fn take_inbox(&self, agent: &str) -> Result<Vec<AgentMessage>>;
}

fn same_blocker(a: &BlockerRecord, b: &BlockerRecord) -> bool {
    a.message_key == b.message_key && a.blocker == b.blocker
}

/// The set of stores injected into a router.
#[derive(Clone)]
pub struct Stores {
    pub graphs: Arc<dyn GraphStore>,
    pub messages: Arc<dyn MessageLog>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub blockers: Arc<dyn BlockerStore>,
    pub performance: Arc<dyn PerformanceStore>,
    pub inboxes: Arc<dyn InboxStore>,
}

impl Stores {
    /// Back every store with a single backend.
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: GraphStore
            + MessageLog
            + CheckpointStore
            + BlockerStore
            + PerformanceStore
            + InboxStore
            + 'static,
    {
        Self {
            graphs: backend.clone(),
            messages: backend.clone(),
            checkpoints: backend.clone(),
            blockers: backend.clone(),
            performance: backend.clone(),
            inboxes: backend,
        }
    }

    pub fn in_memory() -> Self {
        Self::from_backend(Arc::new(MemoryStore::new()))
    }

    pub fn file(root: &Path) -> Result<Self> {
        Ok(Self::from_backend(Arc::new(FileStore::open(root)?)))
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        match config.store {
            StoreBackend::Memory => Ok(Self::in_memory()),
            StoreBackend::File => Self::file(&config.state_dir()?),
        }
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}
