//! # Lockbox Protocol
//!
//! Data model and wire messages shared by the Lockbox server and client.
//!
//! This crate provides:
//! - [`Block`] and [`BlockType`], the records being synchronized
//! - [`Request`]/[`Call`] and [`Response`], one CBOR document per frame
//! - [`StatusCode`], the error taxonomy carried on the wire
//! - Length-delimited framing shared by both ends of a connection
//!
//! This is a pure protocol crate with no I/O operations.
//!
//! ## Call shape
//!
//! Every call opens its own connection. The client writes exactly one
//! [`Request`] frame. Unary calls are answered with one [`Response`] frame.
//! A [`Call::Stream`] is answered with a [`Response::Snapshot`] frame right
//! away, another one after every change, and finally a terminal
//! [`Response::End`] or [`Response::Error`] frame.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod block;
mod codec;
mod error;
mod messages;

pub use block::{Block, BlockId, BlockKind, BlockType, ClientId, TypeId, UserId};
pub use codec::{decode, encode, frame_codec, MAX_FRAME_LENGTH};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{Call, Request, Response, StatusCode};
