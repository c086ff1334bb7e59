//! Block persistence.

use lockbox_protocol::{Block, BlockId, BlockType, TypeId, UserId};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors reported by a [`BlockStore`].
#[derive(Error, Debug)]
pub enum StoreError {
    /// The block references a type that is not in the catalog.
    #[error("unknown block type {0}")]
    UnknownType(TypeId),

    /// The backing store failed.
    #[error("storage backend: {0}")]
    Backend(String),
}

/// Persistent storage for blocks and the type catalog.
pub trait BlockStore: Send + Sync {
    /// Inserts a block and returns it with its assigned ID.
    fn create_block(&self, block: Block) -> Result<Block, StoreError>;

    /// Returns every block owned by `user_id`, ordered by ID, with
    /// `block_type` populated. A user without blocks gets an empty list.
    fn read_user_blocks(&self, user_id: UserId) -> Result<Vec<Block>, StoreError>;

    /// Returns the type catalog.
    fn read_block_types(&self) -> Result<Vec<BlockType>, StoreError>;
}

struct MemoryInner {
    blocks: BTreeMap<BlockId, Block>,
    last_id: BlockId,
}

/// In-memory [`BlockStore`] seeded with the built-in catalog.
pub struct MemoryBlockStore {
    types: Vec<BlockType>,
    inner: RwLock<MemoryInner>,
}

impl MemoryBlockStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::with_types(BlockType::catalog())
    }

    /// Creates an empty store with a custom catalog.
    pub fn with_types(types: Vec<BlockType>) -> Self {
        Self {
            types,
            inner: RwLock::new(MemoryInner {
                blocks: BTreeMap::new(),
                last_id: 0,
            }),
        }
    }

    /// Returns the total number of stored blocks.
    pub fn len(&self) -> usize {
        self.inner.read().blocks.len()
    }

    /// Returns true if no blocks are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn type_for(&self, id: TypeId) -> Option<&BlockType> {
        self.types.iter().find(|t| t.id == id)
    }
}

impl Default for MemoryBlockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockStore for MemoryBlockStore {
    fn create_block(&self, mut block: Block) -> Result<Block, StoreError> {
        let block_type = self
            .type_for(block.type_id)
            .cloned()
            .ok_or(StoreError::UnknownType(block.type_id))?;

        let mut inner = self.inner.write();
        inner.last_id += 1;
        block.id = inner.last_id;
        block.block_type = Some(block_type);
        inner.blocks.insert(block.id, block.clone());
        Ok(block)
    }

    fn read_user_blocks(&self, user_id: UserId) -> Result<Vec<Block>, StoreError> {
        Ok(self
            .inner
            .read()
            .blocks
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect())
    }

    fn read_block_types(&self) -> Result<Vec<BlockType>, StoreError> {
        Ok(self.types.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockbox_crypto::{Envelope, Profile};

    fn block(user_id: UserId, title: &str) -> Block {
        let mut block = Block::new(
            title,
            1,
            Envelope::seal(b"pw", Profile::V1, title.as_bytes()).unwrap(),
        );
        block.user_id = user_id;
        block
    }

    #[test]
    fn ids_are_assigned_in_order() {
        let store = MemoryBlockStore::new();
        let a = store.create_block(block(1, "a")).unwrap();
        let b = store.create_block(block(1, "b")).unwrap();
        assert_eq!((a.id, b.id), (1, 2));
        assert_eq!(a.block_type.unwrap().name, "text");
    }

    #[test]
    fn reads_are_scoped_to_user() {
        let store = MemoryBlockStore::new();
        store.create_block(block(1, "mine")).unwrap();
        store.create_block(block(2, "theirs")).unwrap();
        store.create_block(block(1, "mine too")).unwrap();

        let titles: Vec<_> = store
            .read_user_blocks(1)
            .unwrap()
            .into_iter()
            .map(|b| b.title)
            .collect();
        assert_eq!(titles, ["mine", "mine too"]);
        assert!(store.read_user_blocks(3).unwrap().is_empty());
    }

    #[test]
    fn unknown_type_rejected() {
        let store = MemoryBlockStore::new();
        let mut b = block(1, "x");
        b.type_id = 99;
        assert!(matches!(
            store.create_block(b),
            Err(StoreError::UnknownType(99))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn catalog_is_seeded() {
        let store = MemoryBlockStore::new();
        assert_eq!(store.read_block_types().unwrap().len(), 4);
    }
}
