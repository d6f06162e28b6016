//! On-disk keys and chunk headers.
//!
//! Both are fixed-layout big-endian, so the store's byte-wise key order
//! equals `(serial, chunk)` order and the files are endianness-portable.
//!
//! ```text
//! key:    [serial: u32] [chunk_index: u32]                      8 octets
//! value:  [serial_to: u32] [chunk_count: u32] [chunk_size: u32] 12-octet
//!         header, then chunk_size octets of changeset payload
//! ```

use zjournal_error::{JournalError, Result};
use zjournal_types::Serial;

/// Encoded key length.
pub const KEY_LEN: usize = 8;

/// Encoded chunk header length.
pub const HEADER_LEN: usize = 12;

/// Maximum size of one chunk value (header included), comfortably under
/// the backing store's record limit.
pub const CHUNK_MAX: usize = 60 * 1024;

/// Key of one physical chunk: the owning changeset's from-serial and the
/// chunk's index within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkKey {
    pub serial: Serial,
    pub chunk_index: u32,
}

impl ChunkKey {
    #[must_use]
    pub fn new(serial: Serial, chunk_index: u32) -> Self {
        Self {
            serial,
            chunk_index,
        }
    }

    /// Encodes to the 8-octet big-endian key.
    #[must_use]
    pub fn encode(self) -> [u8; KEY_LEN] {
        let mut out = [0u8; KEY_LEN];
        out[..4].copy_from_slice(&self.serial.to_be_bytes());
        out[4..].copy_from_slice(&self.chunk_index.to_be_bytes());
        out
    }

    /// Decodes an 8-octet key.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let raw: &[u8; KEY_LEN] = raw.try_into().map_err(|_| JournalError::Malformed {
            detail: format!("chunk key of {} octets", raw.len()),
        })?;
        Ok(Self {
            serial: Serial::from_be_bytes(raw[..4].try_into().unwrap()),
            chunk_index: u32::from_be_bytes(raw[4..].try_into().unwrap()),
        })
    }
}

/// Per-chunk header replicated in every chunk of a changeset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// The changeset's to-serial.
    pub serial_to: Serial,
    /// Total number of chunks of the changeset.
    pub chunk_count: u32,
    /// Payload octets in this chunk.
    pub chunk_size: u32,
}

impl ChunkHeader {
    /// Encodes to the 12-octet big-endian header.
    #[must_use]
    pub fn encode(self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..4].copy_from_slice(&self.serial_to.to_be_bytes());
        out[4..8].copy_from_slice(&self.chunk_count.to_be_bytes());
        out[8..].copy_from_slice(&self.chunk_size.to_be_bytes());
        out
    }

    /// Decodes the header from the front of a chunk value.
    pub fn decode(val: &[u8]) -> Result<Self> {
        if val.len() < HEADER_LEN {
            return Err(JournalError::Malformed {
                detail: format!("chunk value of {} octets", val.len()),
            });
        }
        Ok(Self {
            serial_to: Serial::from_be_bytes(val[..4].try_into().unwrap()),
            chunk_count: u32::from_be_bytes(val[4..8].try_into().unwrap()),
            chunk_size: u32::from_be_bytes(val[8..HEADER_LEN].try_into().unwrap()),
        })
    }

    /// The payload octets of a chunk value, length-checked against the
    /// header.
    pub fn payload<'v>(&self, val: &'v [u8]) -> Result<&'v [u8]> {
        let end = HEADER_LEN + self.chunk_size as usize;
        val.get(HEADER_LEN..end).ok_or_else(|| JournalError::Malformed {
            detail: format!(
                "chunk value of {} octets, header claims {}",
                val.len(),
                self.chunk_size
            ),
        })
    }
}
