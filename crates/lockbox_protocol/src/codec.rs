//! CBOR encoding and frame boundaries.

use crate::error::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::codec::LengthDelimitedCodec;

/// Largest frame either side accepts.
///
/// A snapshot carries every block of a user, including file blocks of up to
/// 10 MiB each.
pub const MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

/// Encodes a message to CBOR.
pub fn encode<T: Serialize>(value: &T) -> ProtocolResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    Ok(bytes)
}

/// Decodes a message from CBOR.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    ciborium::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
}

/// Returns the length-delimited codec both ends frame messages with.
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Response, StatusCode};
    use bytes::{Bytes, BytesMut};
    use proptest::prelude::*;
    use tokio_util::codec::{Decoder, Encoder};

    #[test]
    fn frames_split_back_into_messages() {
        let first = Response::Pong.encode().unwrap();
        let second = Response::error(StatusCode::NotFound, "no subscription")
            .encode()
            .unwrap();

        let mut codec = frame_codec();
        let mut buffer = BytesMut::new();
        codec.encode(Bytes::from(first), &mut buffer).unwrap();
        codec.encode(Bytes::from(second), &mut buffer).unwrap();

        let frame = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(Response::decode(&frame).unwrap(), Response::Pong);

        let frame = codec.decode(&mut buffer).unwrap().unwrap();
        assert!(matches!(
            Response::decode(&frame).unwrap(),
            Response::Error {
                code: StatusCode::NotFound,
                ..
            }
        ));

        assert!(codec.decode(&mut buffer).unwrap().is_none());
    }

    #[test]
    fn partial_frame_waits_for_more() {
        let payload = Response::Ok.encode().unwrap();
        let mut codec = frame_codec();
        let mut full = BytesMut::new();
        codec.encode(Bytes::from(payload), &mut full).unwrap();

        let mut partial = full.split_to(full.len() - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    proptest! {
        #[test]
        fn error_messages_survive_encoding(message in ".{0,200}") {
            let response = Response::error(StatusCode::Internal, message.clone());
            let bytes = encode(&response).unwrap();
            let back: Response = decode(&bytes).unwrap();
            prop_assert_eq!(back, Response::Error { code: StatusCode::Internal, message });
        }
    }
}
