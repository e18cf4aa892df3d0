//! In-memory store backend for tests and ephemeral runs.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use super::{
    same_blocker, BlockerStore, CheckpointStore, GraphStore, InboxStore, MessageLog,
    PerformanceStore,
};
use crate::core::{AgentPerformanceRecord, BlockerRecord, Checkpoint, TaskGraph};
use crate::error::{Error, Result};
use crate::message::{AgentMessage, MessageKey};

#[derive(Default)]
struct State {
    graphs: HashMap<String, TaskGraph>,
    messages: BTreeMap<MessageKey, AgentMessage>,
    checkpoints: HashMap<String, Vec<Checkpoint>>,
    blockers: HashMap<String, Vec<BlockerRecord>>,
    performance: HashMap<String, AgentPerformanceRecord>,
    inboxes: HashMap<String, BTreeMap<MessageKey, AgentMessage>>,
}

/// HashMap-backed implementation of every store trait.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl GraphStore for MemoryStore {
    async fn load_graph(&self, product: &str) -> Result<Option<TaskGraph>> {
        Ok(self.read().graphs.get(product).cloned())
    }

    async fn save_graph(&self, graph: &TaskGraph) -> Result<()> {
        self.write()
            .graphs
            .insert(graph.product.clone(), graph.clone());
        Ok(())
    }

    async fn list_products(&self) -> Result<Vec<String>> {
        let mut products: Vec<String> = self.read().graphs.keys().cloned().collect();
        products.sort();
        Ok(products)
    }
}

#[async_trait]
impl MessageLog for MemoryStore {
    async fn append(&self, key: &MessageKey, message: &AgentMessage) -> Result<bool> {
        let mut state = self.write();
        if state.messages.contains_key(key) {
            return Ok(false);
        }
        state.messages.insert(key.clone(), message.clone());
        Ok(true)
    }

    async fn get(&self, key: &MessageKey) -> Result<Option<AgentMessage>> {
        Ok(self.read().messages.get(key).cloned())
    }

    async fn keys(&self) -> Result<Vec<MessageKey>> {
        Ok(self.read().messages.keys().cloned().collect())
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn record_checkpoint(&self, checkpoint: &Checkpoint) -> Result<bool> {
        let mut state = self.write();
        let list = state.checkpoints.entry(checkpoint.product.clone()).or_default();
        if list.iter().any(|c| c.message_key == checkpoint.message_key) {
            return Ok(false);
        }
        list.push(checkpoint.clone());
        Ok(true)
    }

    async fn checkpoints(&self, product: &str) -> Result<Vec<Checkpoint>> {
        Ok(self.read().checkpoints.get(product).cloned().unwrap_or_default())
    }

    async fn resolve_checkpoint(&self, product: &str, id: Uuid, resolution: &str) -> Result<Checkpoint> {
        let mut state = self.write();
        let checkpoint = state
            .checkpoints
            .get_mut(product)
            .and_then(|list| list.iter_mut().find(|c| c.id == id))
            .ok_or(Error::CheckpointNotFound(id))?;
        if !checkpoint.is_resolved() {
            checkpoint.resolve(resolution);
        }
        Ok(checkpoint.clone())
    }
}

#[async_trait]
impl BlockerStore for MemoryStore {
    async fn record_blocker(&self, blocker: &BlockerRecord) -> Result<bool> {
        let mut state = self.write();
        let list = state.blockers.entry(blocker.product.clone()).or_default();
        if list.iter().any(|b| same_blocker(b, blocker)) {
            return Ok(false);
        }
        list.push(blocker.clone());
        Ok(true)
    }

    async fn blockers(&self, product: &str) -> Result<Vec<BlockerRecord>> {
        Ok(self.read().blockers.get(product).cloned().unwrap_or_default())
    }

    async fn resolve_blocker(&self, product: &str, id: Uuid) -> Result<BlockerRecord> {
        let mut state = self.write();
        let blocker = state
            .blockers
            .get_mut(product)
            .and_then(|list| list.iter_mut().find(|b| b.id == id))
            .ok_or(Error::BlockerNotFound(id))?;
        if blocker.resolved_at.is_none() {
            blocker.resolved_at = Some(chrono::Utc::now());
        }
        Ok(blocker.clone())
    }
}

#[async_trait]
impl PerformanceStore for MemoryStore {
    async fn load_performance(&self, agent: &str) -> Result<Option<AgentPerformanceRecord>> {
        Ok(self.read().performance.get(agent).cloned())
    }

    async fn save_performance(&self, record: &AgentPerformanceRecord) -> Result<()> {
        self.write()
            .performance
            .insert(record.agent.clone(), record.clone());
        Ok(())
    }
}

#[async_trait]
impl InboxStore for MemoryStore {
    async fn deliver(&self, agent: &str, key: &MessageKey, message: &AgentMessage) -> Result<bool> {
        let mut state = self.write();
        let inbox = state.inboxes.entry(agent.to_string()).or_default();
        if inbox.contains_key(key) {
            return Ok(false);
        }
        inbox.insert(key.clone(), message.clone());
        Ok(true)
    }

    async fn inbox(&self, agent: &str) -> Result<Vec<AgentMessage>> {
        Ok(self
            .read()
            .inboxes
            .get(agent)
            .map(|inbox| inbox.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn take_inbox(&self, agent: &str) -> Result<Vec<AgentMessage>> {
        Ok(self
            .write()
            .inboxes
            .remove(agent)
            .map(|inbox| inbox.into_values().collect())
            .unwrap_or_default())
    }
}
