//! Durable local copy of the vault.
//!
//! Holds every block the client knows about, split into synced (confirmed
//! by the server) and unsynced (written while offline), plus the session
//! state and the cached type catalog. A block lives in at most one of the
//! two lists; unsynced entries are identified by their exact ciphertext.
//!
//! The whole store is one JSON document, replaced atomically on
//! [`OfflineStore::persist`].

use crate::error::{ClientError, ClientResult};
use crate::state::ClientState;
use lockbox_protocol::{Block, BlockType};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Serialized form of the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreData {
    /// Session state.
    pub state: ClientState,
    /// Blocks confirmed by the server.
    pub synced: Vec<Block>,
    /// Blocks waiting to be written.
    pub unsynced: Vec<Block>,
    /// Cached type catalog.
    pub types: Vec<BlockType>,
}

/// The client's local store.
pub struct OfflineStore {
    path: PathBuf,
    data: Mutex<StoreData>,
}

impl OfflineStore {
    /// Creates a new store file at `path`. Fails if the file exists.
    pub fn create(path: impl Into<PathBuf>, state: ClientState) -> ClientResult<Self> {
        let path = path.into();
        if path.exists() {
            return Err(ClientError::Persistence(format!(
                "{} already exists",
                path.display()
            )));
        }
        let store = Self {
            path,
            data: Mutex::new(StoreData {
                state,
                ..StoreData::default()
            }),
        };
        store.persist()?;
        info!(path = %store.path.display(), "created local store");
        Ok(store)
    }

    /// Loads the store at `path`. A missing or unreadable file is an error.
    pub fn load(path: impl Into<PathBuf>) -> ClientResult<Self> {
        let path = path.into();
        let content = fs::read_to_string(&path).map_err(|e| {
            ClientError::Persistence(format!("cannot read {}: {}", path.display(), e))
        })?;
        let data: StoreData = serde_json::from_str(&content).map_err(|e| {
            ClientError::Persistence(format!("corrupt store {}: {}", path.display(), e))
        })?;
        debug!(
            path = %path.display(),
            synced = data.synced.len(),
            unsynced = data.unsynced.len(),
            "loaded local store"
        );
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    /// Loads the store at `path`, creating it with a fresh state if absent.
    pub fn load_or_create(path: impl Into<PathBuf>) -> ClientResult<Self> {
        let path = path.into();
        if path.exists() {
            Self::load(path)
        } else {
            Self::create(path, ClientState::new())
        }
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns a copy of the session state.
    pub fn state(&self) -> ClientState {
        self.data.lock().state.clone()
    }

    /// Updates the session state in place.
    pub fn update_state<R>(&self, f: impl FnOnce(&mut ClientState) -> R) -> R {
        f(&mut self.data.lock().state)
    }

    /// Queues a block written while offline.
    pub fn save_unsynced(&self, block: Block) {
        self.data.lock().unsynced.push(block);
    }

    /// Records a block the server has confirmed.
    pub fn save_synced(&self, block: Block) {
        let mut data = self.data.lock();
        insert_synced(&mut data.synced, block);
    }

    /// Replaces the synced list with a server snapshot.
    pub fn replace_synced(&self, blocks: Vec<Block>) {
        self.data.lock().synced = blocks;
    }

    /// Returns the queued blocks in queue order.
    pub fn read_unsynced(&self) -> Vec<Block> {
        self.data.lock().unsynced.clone()
    }

    /// Returns the number of queued blocks.
    pub fn count_unsynced(&self) -> usize {
        self.data.lock().unsynced.len()
    }

    /// Returns the confirmed blocks.
    pub fn read_synced(&self) -> Vec<Block> {
        self.data.lock().synced.clone()
    }

    /// Returns synced then unsynced blocks.
    pub fn read_blocks(&self) -> Vec<Block> {
        let data = self.data.lock();
        data.synced
            .iter()
            .chain(data.unsynced.iter())
            .cloned()
            .collect()
    }

    /// Removes the queued block with exactly this ciphertext.
    pub fn delete_by_content(&self, ciphertext: &[u8]) -> bool {
        let mut data = self.data.lock();
        remove_unsynced(&mut data.unsynced, ciphertext).is_some()
    }

    /// Moves a queued block to the synced list.
    ///
    /// `block` is the server's copy (with its id); the queued entry is found
    /// by ciphertext. Returns false if no queued entry matched, in which case
    /// nothing changes.
    pub fn mark_synced(&self, block: Block) -> bool {
        self.mark_synced_all(vec![block]) == 1
    }

    /// Moves several queued blocks to the synced list in one step. Returns
    /// how many matched.
    pub fn mark_synced_all(&self, blocks: Vec<Block>) -> usize {
        let mut data = self.data.lock();
        let mut moved = 0;
        for block in blocks {
            if remove_unsynced(&mut data.unsynced, &block.envelope.ciphertext).is_some() {
                insert_synced(&mut data.synced, block);
                moved += 1;
            }
        }
        moved
    }

    /// Returns the cached type catalog.
    pub fn read_types(&self) -> Vec<BlockType> {
        self.data.lock().types.clone()
    }

    /// Caches the type catalog.
    pub fn save_types(&self, types: Vec<BlockType>) {
        self.data.lock().types = types;
    }

    /// Returns a copy of everything in the store.
    pub fn snapshot(&self) -> StoreData {
        self.data.lock().clone()
    }

    /// Writes the store to disk atomically.
    pub fn persist(&self) -> ClientResult<()> {
        let content = {
            let data = self.data.lock();
            serde_json::to_vec_pretty(&*data)
                .map_err(|e| ClientError::Persistence(format!("encode store: {}", e)))?
        };
        write_atomic(&self.path, &content)
            .map_err(|e| ClientError::Persistence(format!("write {}: {}", self.path.display(), e)))?;
        debug!(path = %self.path.display(), bytes = content.len(), "persisted local store");
        Ok(())
    }
}

fn remove_unsynced(unsynced: &mut Vec<Block>, ciphertext: &[u8]) -> Option<Block> {
    let index = unsynced
        .iter()
        .position(|b| b.envelope.ciphertext == ciphertext)?;
    Some(unsynced.remove(index))
}

fn insert_synced(synced: &mut Vec<Block>, block: Block) {
    match synced
        .iter_mut()
        .find(|b| b.envelope.ciphertext == block.envelope.ciphertext)
    {
        Some(existing) => *existing = block,
        None => synced.push(block),
    }
}

fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut temp_name = path.file_name().unwrap_or_default().to_os_string();
    temp_name.push(".tmp");
    let temp_path = dir.join(temp_name);

    let mut file = File::create(&temp_path)?;
    file.write_all(content)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)?;
    sync_directory(&dir)
}

#[cfg(unix)]
fn sync_directory(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_directory(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}
