//! Request and response messages.

use crate::block::{Block, BlockId, BlockType, ClientId};
use crate::codec::{decode, encode};
use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A client request: an optional bearer token plus the call itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Bearer token. Required for every call except register and login.
    pub token: Option<String>,
    /// The call being made.
    pub call: Call,
}

impl Request {
    /// Creates a request without credentials.
    pub fn anonymous(call: Call) -> Self {
        Self { token: None, call }
    }

    /// Creates a request carrying a bearer token.
    pub fn authorized(token: impl Into<String>, call: Call) -> Self {
        Self {
            token: Some(token.into()),
            call,
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode(bytes)
    }
}

/// The remote operations.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Call {
    /// Create an account and receive a token.
    Register {
        /// Login name.
        username: String,
        /// Plain password, hashed by the server.
        password: String,
    },
    /// Exchange credentials for a token.
    Login {
        /// Login name.
        username: String,
        /// Plain password.
        password: String,
    },
    /// Authenticated no-op round trip.
    Ping,
    /// Store a new block for the caller.
    WriteBlock {
        /// The block to store. Its `id` and `user_id` are ignored.
        block: Block,
    },
    /// Read all of the caller's blocks.
    ListBlocks {
        /// Requesting client.
        client_id: ClientId,
    },
    /// Read the type catalog.
    ListTypes,
    /// Register (caller, client) for change notifications.
    Subscribe {
        /// Client to register.
        client_id: ClientId,
    },
    /// Remove the (caller, client) registration.
    Unsubscribe {
        /// Client to remove.
        client_id: ClientId,
    },
    /// Hold a stream of snapshots open for a subscribed client.
    Stream {
        /// Subscribed client.
        client_id: ClientId,
    },
}

impl Call {
    /// Returns the call name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Call::Register { .. } => "register",
            Call::Login { .. } => "login",
            Call::Ping => "ping",
            Call::WriteBlock { .. } => "write_block",
            Call::ListBlocks { .. } => "list_blocks",
            Call::ListTypes => "list_types",
            Call::Subscribe { .. } => "subscribe",
            Call::Unsubscribe { .. } => "unsubscribe",
            Call::Stream { .. } => "stream",
        }
    }

    /// Returns true if the call must carry a valid token.
    pub fn requires_auth(&self) -> bool {
        !matches!(self, Call::Register { .. } | Call::Login { .. })
    }

    /// Returns true if the server answers with more than one frame.
    pub fn is_streaming(&self) -> bool {
        matches!(self, Call::Stream { .. })
    }
}

// Passwords never reach logs.
impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Call::Register { username, .. } | Call::Login { username, .. } => f
                .debug_struct(self.name())
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
            Call::WriteBlock { block } => f
                .debug_struct(self.name())
                .field("title", &block.title)
                .field("type_id", &block.type_id)
                .finish(),
            Call::ListBlocks { client_id }
            | Call::Subscribe { client_id }
            | Call::Unsubscribe { client_id }
            | Call::Stream { client_id } => f
                .debug_struct(self.name())
                .field("client_id", client_id)
                .finish(),
            Call::Ping | Call::ListTypes => f.write_str(self.name()),
        }
    }
}

/// Status codes carried by [`Response::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    /// Malformed request or block.
    InvalidArgument,
    /// Missing, invalid or expired credentials.
    Unauthenticated,
    /// The referenced entity or subscription does not exist.
    NotFound,
    /// The entity already exists.
    AlreadyExists,
    /// A stream reached its deadline.
    DeadlineExceeded,
    /// Server-side failure; details stay in the server log.
    Internal,
    /// The server is shutting down or cannot serve the call.
    Unavailable,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusCode::InvalidArgument => "invalid argument",
            StatusCode::Unauthenticated => "unauthenticated",
            StatusCode::NotFound => "not found",
            StatusCode::AlreadyExists => "already exists",
            StatusCode::DeadlineExceeded => "deadline exceeded",
            StatusCode::Internal => "internal",
            StatusCode::Unavailable => "unavailable",
        };
        f.write_str(name)
    }
}

/// A server response frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// Bearer token for register and login.
    Token {
        /// The token.
        token: String,
    },
    /// A block was stored.
    Written {
        /// Assigned ID.
        id: BlockId,
    },
    /// Full list of the caller's blocks, ordered by ID.
    Snapshot {
        /// Blocks.
        blocks: Vec<Block>,
    },
    /// The type catalog.
    Types {
        /// Catalog entries.
        types: Vec<BlockType>,
    },
    /// Generic success.
    Ok,
    /// Ping reply.
    Pong,
    /// Clean end of a stream.
    End,
    /// Failure, unary or terminal stream frame.
    Error {
        /// Classification.
        code: StatusCode,
        /// Human-readable message.
        message: String,
    },
}

impl Response {
    /// Creates an error response.
    pub fn error(code: StatusCode, message: impl Into<String>) -> Self {
        Response::Error {
            code,
            message: message.into(),
        }
    }

    /// Returns the variant name for logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Response::Token { .. } => "token",
            Response::Written { .. } => "written",
            Response::Snapshot { .. } => "snapshot",
            Response::Types { .. } => "types",
            Response::Ok => "ok",
            Response::Pong => "pong",
            Response::End => "end",
            Response::Error { .. } => "error",
        }
    }

    /// Returns true if no further frames follow on a stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Response::End | Response::Error { .. })
    }

    /// Builds the error for a response that does not match the call.
    pub fn unexpected(&self, expected: &'static str) -> ProtocolError {
        ProtocolError::UnexpectedMessage {
            expected,
            actual: self.kind().to_string(),
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode(bytes)
    }
}
