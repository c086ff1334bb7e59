//! Secret records and the type catalog.

use crate::error::{ProtocolError, ProtocolResult};
use lockbox_crypto::Envelope;
use serde::{Deserialize, Serialize};

/// Server-assigned user identifier.
pub type UserId = u64;
/// Server-assigned block identifier. Zero until persisted.
pub type BlockId = u64;
/// Catalog type identifier.
pub type TypeId = u32;
/// Random per-installation client identifier.
pub type ClientId = uuid::Uuid;

/// A secret record.
///
/// Created on the client when the user saves, persisted by the server on a
/// successful write and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block ID (0 until persisted).
    pub id: BlockId,
    /// Owning user (filled in by the server from the caller's token).
    pub user_id: UserId,
    /// Catalog type.
    pub type_id: TypeId,
    /// Human-readable title, stored in the clear.
    pub title: String,
    /// Sealed payload.
    pub envelope: Envelope,
    /// Denormalized catalog entry, present on blocks read back from storage.
    #[serde(default)]
    pub block_type: Option<BlockType>,
}

impl Block {
    /// Creates an unsaved block.
    pub fn new(title: impl Into<String>, type_id: TypeId, envelope: Envelope) -> Self {
        Self {
            id: 0,
            user_id: 0,
            type_id,
            title: title.into(),
            envelope,
            block_type: None,
        }
    }

    /// Returns true once the server has assigned an ID.
    pub fn is_persisted(&self) -> bool {
        self.id != 0
    }

    /// Checks that the block is well formed enough to store.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.title.trim().is_empty() {
            return Err(ProtocolError::InvalidBlock("title must not be empty".into()));
        }
        if self.type_id == 0 {
            return Err(ProtocolError::InvalidBlock("type id must be set".into()));
        }
        self.envelope
            .validate()
            .map_err(|e| ProtocolError::InvalidBlock(e.to_string()))
    }
}

/// A catalog entry describing what a block holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockType {
    /// Type ID.
    pub id: TypeId,
    /// Short machine name (`text`, `credentials`, ...).
    pub name: String,
    /// Human description.
    pub description: String,
}

impl BlockType {
    /// Returns the built-in catalog, one entry per [`BlockKind`].
    pub fn catalog() -> Vec<BlockType> {
        BlockKind::ALL.iter().map(|kind| kind.block_type()).collect()
    }
}

/// The built-in kinds of secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    /// Free-form text note.
    Text,
    /// Login and password pair.
    Credentials,
    /// Payment card data.
    BankCard,
    /// Arbitrary binary file.
    File,
}

impl BlockKind {
    /// All kinds in catalog order.
    pub const ALL: [BlockKind; 4] = [
        BlockKind::Text,
        BlockKind::Credentials,
        BlockKind::BankCard,
        BlockKind::File,
    ];

    /// Largest plaintext accepted for a file block.
    pub const MAX_FILE_SIZE: usize = 10 * 1024 * 1024;

    /// Catalog ID.
    pub fn type_id(self) -> TypeId {
        match self {
            BlockKind::Text => 1,
            BlockKind::Credentials => 2,
            BlockKind::BankCard => 3,
            BlockKind::File => 4,
        }
    }

    /// Catalog name.
    pub fn name(self) -> &'static str {
        match self {
            BlockKind::Text => "text",
            BlockKind::Credentials => "credentials",
            BlockKind::BankCard => "bank_card",
            BlockKind::File => "file",
        }
    }

    /// Looks a kind up by catalog name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Looks a kind up by catalog ID.
    pub fn from_type_id(id: TypeId) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.type_id() == id)
    }

    fn description(self) -> &'static str {
        match self {
            BlockKind::Text => "Arbitrary text",
            BlockKind::Credentials => "Login and password",
            BlockKind::BankCard => "Bank card details",
            BlockKind::File => "Binary file",
        }
    }

    /// Builds the catalog entry.
    pub fn block_type(self) -> BlockType {
        BlockType {
            id: self.type_id(),
            name: self.name().to_string(),
            description: self.description().to_string(),
        }
    }
}
