//! JSON-file store backend.
//!
//! Layout under the state directory:
//!
//! ```text
//! graphs/<product>.json
//! messages/<key>.json
//! checkpoints/<product>.json
//! blockers/<product>.json
//! performance/<agent>.json
//! inbox/<agent>/<key>.json
//! ```
//!
//! Product, agent and key segments are percent-encoded.
//!
//! Whole documents are replaced by writing a sibling temp file and renaming
//! it over the target. Message and inbox entries are created with
//! `create_new`, so a second writer for the same key loses cleanly.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use super::{
    same_blocker, BlockerStore, CheckpointStore, GraphStore, InboxStore, MessageLog,
    PerformanceStore,
};
use crate::core::{AgentPerformanceRecord, BlockerRecord, Checkpoint, TaskGraph};
use crate::error::{Error, Result};
use crate::message::{AgentMessage, MessageKey};

const SUBDIRS: &[&str] = &["graphs", "messages", "checkpoints", "blockers", "performance", "inbox"];

/// Store backend persisting every record as a JSON document.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: &Path) -> Result<Self> {
        for sub in SUBDIRS {
            std::fs::create_dir_all(root.join(sub))?;
        }
        debug!(root = %root.display(), "opened file store");
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn doc(&self, dir: &str, name: &str) -> PathBuf {
        self.root.join(dir).join(format!("{}.json", file_name(name)))
    }

    fn inbox_dir(&self, agent: &str) -> PathBuf {
        self.root.join("inbox").join(file_name(agent))
    }
}

/// Percent-encode every byte outside `[A-Za-z0-9_-]`.
///
/// The encoding is injective, so distinct products and agents never share
/// a document.
fn file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension(format!("json.{}.tmp", Uuid::new_v4().simple()));
    fs::write(&tmp, &bytes).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Write `value` to `path` only if nothing is there yet.
async fn create_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<bool> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let mut file = match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    file.write_all(&bytes).await?;
    file.sync_all().await?;
    Ok(true)
}

/// JSON files in `dir`, sorted by file name.
async fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[async_trait]
impl GraphStore for FileStore {
    async fn load_graph(&self, product: &str) -> Result<Option<TaskGraph>> {
        let path = self.doc("graphs", product);
        let graph: Option<TaskGraph> = read_json(&path).await?;
        match graph {
            Some(graph) if graph.product != product => Err(Error::Store(format!(
                "{} holds product {:?}, expected {:?}",
                path.display(),
                graph.product,
                product
            ))),
            graph => Ok(graph),
        }
    }

    async fn save_graph(&self, graph: &TaskGraph) -> Result<()> {
        write_json(&self.doc("graphs", &graph.product), graph).await
    }

    async fn list_products(&self) -> Result<Vec<String>> {
        let mut products = Vec::new();
        for path in json_files(&self.root.join("graphs")).await? {
            if let Some(graph) = read_json::<TaskGraph>(&path).await? {
                products.push(graph.product);
            }
        }
        products.sort();
        Ok(products)
    }
}

#[async_trait]
impl MessageLog for FileStore {
    async fn append(&self, key: &MessageKey, message: &AgentMessage) -> Result<bool> {
        create_json(&self.doc("messages", key.as_str()), message).await
    }

    async fn get(&self, key: &MessageKey) -> Result<Option<AgentMessage>> {
        read_json(&self.doc("messages", key.as_str())).await
    }

    async fn keys(&self) -> Result<Vec<MessageKey>> {
        let mut keys = Vec::new();
        for path in json_files(&self.root.join("messages")).await? {
            if let Some(message) = read_json::<AgentMessage>(&path).await? {
                keys.push(message.key());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl CheckpointStore for FileStore {
    async fn record_checkpoint(&self, checkpoint: &Checkpoint) -> Result<bool> {
        let path = self.doc("checkpoints", &checkpoint.product);
        let mut list: Vec<Checkpoint> = read_json(&path).await?.unwrap_or_default();
        if list.iter().any(|c| c.message_key == checkpoint.message_key) {
            return Ok(false);
        }
        list.push(checkpoint.clone());
        write_json(&path, &list).await?;
        Ok(true)
    }

    async fn checkpoints(&self, product: &str) -> Result<Vec<Checkpoint>> {
        Ok(read_json(&self.doc("checkpoints", product)).await?.unwrap_or_default())
    }

    async fn resolve_checkpoint(&self, product: &str, id: Uuid, resolution: &str) -> Result<Checkpoint> {
        let path = self.doc("checkpoints", product);
        let mut list: Vec<Checkpoint> = read_json(&path).await?.unwrap_or_default();
        let checkpoint = list
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(Error::CheckpointNotFound(id))?;
        if checkpoint.is_resolved() {
            return Ok(checkpoint.clone());
        }
        checkpoint.resolve(resolution);
        let resolved = checkpoint.clone();
        write_json(&path, &list).await?;
        Ok(resolved)
    }
}

#[async_trait]
impl BlockerStore for FileStore {
    async fn record_blocker(&self, blocker: &BlockerRecord) -> Result<bool> {
        let path = self.doc("blockers", &blocker.product);
        let mut list: Vec<BlockerRecord> = read_json(&path).await?.unwrap_or_default();
        if list.iter().any(|b| same_blocker(b, blocker)) {
            return Ok(false);
        }
        list.push(blocker.clone());
        write_json(&path, &list).await?;
        Ok(true)
    }

    async fn blockers(&self, product: &str) -> Result<Vec<BlockerRecord>> {
        Ok(read_json(&self.doc("blockers", product)).await?.unwrap_or_default())
    }

    async fn resolve_blocker(&self, product: &str, id: Uuid) -> Result<BlockerRecord> {
        let path = self.doc("blockers", product);
        let mut list: Vec<BlockerRecord> = read_json(&path).await?.unwrap_or_default();
        let blocker = list
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or(Error::BlockerNotFound(id))?;
        if blocker.is_resolved() {
            return Ok(blocker.clone());
        }
        blocker.resolved_at = Some(chrono::Utc::now());
        let resolved = blocker.clone();
        write_json(&path, &list).await?;
        Ok(resolved)
    }
}

#[async_trait]
impl PerformanceStore for FileStore {
    async fn load_performance(&self, agent: &str) -> Result<Option<AgentPerformanceRecord>> {
        read_json(&self.doc("performance", agent)).await
    }

    async fn save_performance(&self, record: &AgentPerformanceRecord) -> Result<()> {
        write_json(&self.doc("performance", &record.agent), record).await
    }
}

#[async_trait]
impl InboxStore for FileStore {
    async fn deliver(&self, agent: &str, key: &MessageKey, message: &AgentMessage) -> Result<bool> {
        let dir = self.inbox_dir(agent);
        fs::create_dir_all(&dir).await?;
        create_json(&dir.join(format!("{}.json", file_name(key.as_str()))), message).await
    }

    async fn inbox(&self, agent: &str) -> Result<Vec<AgentMessage>> {
        let mut messages = Vec::new();
        for path in json_files(&self.inbox_dir(agent)).await? {
            if let Some(message) = read_json(&path).await? {
                messages.push(message);
            }
        }
        Ok(messages)
    }

    async fn take_inbox(&self, agent: &str) -> Result<Vec<AgentMessage>> {
        let mut messages = Vec::new();
        for path in json_files(&self.inbox_dir(agent)).await? {
            if let Some(message) = read_json(&path).await? {
                messages.push(message);
            }
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(messages)
    }
}
