//! Block operations on top of a [`BlockStore`].

use crate::error::{ServerError, ServerResult};
use crate::registry::SubscriptionRegistry;
use crate::storage::{BlockStore, StoreError};
use lockbox_protocol::{Block, BlockId, BlockType, UserId};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Stores blocks and turns each write into a notification.
pub struct StorageService {
    store: Arc<dyn BlockStore>,
    registry: Arc<SubscriptionRegistry>,
}

impl StorageService {
    /// Creates a service over `store` that notifies through `registry`.
    pub fn new(store: Arc<dyn BlockStore>, registry: Arc<SubscriptionRegistry>) -> Self {
        Self { store, registry }
    }

    /// Validates and stores `block` for `user_id`, then notifies every
    /// subscribed client of that user with the user's new block list.
    ///
    /// The caller's identity always wins over whatever `user_id` the block
    /// carries.
    pub fn save_block(&self, user_id: UserId, mut block: Block) -> ServerResult<BlockId> {
        block
            .validate()
            .map_err(|e| ServerError::InvalidRequest(e.to_string()))?;

        block.id = 0;
        block.user_id = user_id;
        block.block_type = None;

        let created = self.store.create_block(block).map_err(map_store_error)?;
        debug!(user_id, block_id = created.id, "block stored");

        // The write is committed; a failed re-read only costs the notification.
        match self.store.read_user_blocks(user_id) {
            Ok(blocks) => {
                let report = self.registry.notify(user_id, Arc::new(blocks));
                debug!(
                    user_id,
                    delivered = report.delivered,
                    coalesced = report.coalesced,
                    "subscribers notified"
                );
            }
            Err(e) => warn!(user_id, error = %e, "skipping notification, re-read failed"),
        }

        Ok(created.id)
    }

    /// Returns every block of `user_id`. No blocks is an empty success.
    pub fn list_blocks(&self, user_id: UserId) -> ServerResult<Vec<Block>> {
        self.store.read_user_blocks(user_id).map_err(map_store_error)
    }

    /// Returns the type catalog.
    pub fn list_types(&self) -> ServerResult<Vec<BlockType>> {
        self.store.read_block_types().map_err(map_store_error)
    }
}

fn map_store_error(err: StoreError) -> ServerError {
    match err {
        StoreError::UnknownType(id) => {
            ServerError::InvalidRequest(format!("unknown block type {}", id))
        }
        StoreError::Backend(detail) => {
            error!(error = %detail, "storage failure");
            ServerError::Internal("storage failure".into())
        }
    }
}
