//! Binary Codec
//!
//! Wire format: `[u16 header, little-endian][bincode payload]`.
//!
//! The header identifies which protocol a buffer belongs to. Several
//! encodings can share one socket: a buffer whose header does not match is
//! "not applicable" rather than an error, so the caller can hand it to the
//! next codec in line.

use std::fmt;
use std::marker::PhantomData;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Size of the protocol header in bytes.
pub const HEADER_LEN: usize = 2;

/// Errors raised while building an encoding or encoding a value.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Header does not fit in 16 bits.
    #[error("header {0} does not fit in 16 bits")]
    HeaderOutOfRange(u32),

    /// Payload serialization failed.
    #[error("failed to encode payload: {0}")]
    Encode(#[source] bincode::Error),
}

/// The header matched but the payload could not be decoded.
#[derive(Debug, Error)]
#[error("failed to decode payload for header {header:#06x}: {source}")]
pub struct DecodeError {
    /// Header of the encoding that attempted the decode.
    pub header: u16,
    /// Underlying deserialization failure.
    #[source]
    pub source: bincode::Error,
}

/// A typed binary encoding tagged with a 16-bit protocol header.
pub struct Encoding<T> {
    header: u16,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Encoding<T> {
    /// Create an encoding for the given header.
    ///
    /// Headers above `u16::MAX` are rejected here so a misconfigured pair of
    /// endpoints fails at startup instead of on the first message.
    pub fn new(header: u32) -> Result<Self, CodecError> {
        let header = u16::try_from(header).map_err(|_| CodecError::HeaderOutOfRange(header))?;
        Ok(Self {
            header,
            _marker: PhantomData,
        })
    }

    /// Header value written in front of every payload.
    pub fn header(&self) -> u16 {
        self.header
    }

    /// Check whether a buffer carries this encoding's header.
    pub fn is_applicable(&self, buffer: &[u8]) -> bool {
        read_header(buffer) == Some(self.header)
    }
}

impl<T: Serialize> Encoding<T> {
    /// Encode a value into a header-prefixed buffer.
    pub fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        let payload_len = bincode::serialized_size(value).map_err(CodecError::Encode)? as usize;
        let mut buffer = Vec::with_capacity(HEADER_LEN + payload_len);
        buffer.extend_from_slice(&self.header.to_le_bytes());
        bincode::serialize_into(&mut buffer, value).map_err(CodecError::Encode)?;
        Ok(buffer)
    }
}

impl<T: Serialize + DeserializeOwned> Encoding<T> {
    /// Decode a buffer.
    ///
    /// Returns `None` when the buffer belongs to another protocol (or is too
    /// short to carry a header at all).
    pub fn decode(&self, buffer: &[u8]) -> Option<Result<T, DecodeError>> {
        if !self.is_applicable(buffer) {
            return None;
        }
        let payload = &buffer[HEADER_LEN..];
        Some(
            bincode::deserialize::<T>(payload)
                .and_then(|value| {
                    // bincode tolerates trailing bytes; a buffer with junk after the
                    // payload is corrupted as far as this protocol is concerned.
                    let used = bincode::serialized_size(&value)? as usize;
                    if used != payload.len() {
                        return Err(Box::new(bincode::ErrorKind::Custom(format!(
                            "{} trailing bytes after payload",
                            payload.len() - used
                        ))));
                    }
                    Ok(value)
                })
                .map_err(|source| DecodeError {
                    header: self.header,
                    source,
                }),
        )
    }
}

impl<T> Clone for Encoding<T> {
    fn clone(&self) -> Self {
        Self {
            header: self.header,
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Encoding<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encoding")
            .field("header", &format_args!("{:#06x}", self.header))
            .finish()
    }
}

/// Read the protocol header of a buffer, if it has one.
pub fn read_header(buffer: &[u8]) -> Option<u16> {
    let bytes: [u8; HEADER_LEN] = buffer.get(..HEADER_LEN)?.try_into().ok()?;
    Some(u16::from_le_bytes(bytes))
}

// =============================================================================
// TESTS
// =============================================================================
