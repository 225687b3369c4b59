//! Fixed-size header that precedes every message on the wire.
//!
//! ```text
//! magic:        [u8; 4]  "CGS0"
//! checksum:     u32      first 4 bytes of blake3(body), 0 for an empty body
//! body_length:  u64
//! ```
//! All integers are little-endian.

use crate::error::CogError;

/// Magic bytes identifying a cogstream frame.
pub const MAGIC: [u8; 4] = *b"CGS0";

/// Encoded header size in bytes.
pub const HEADER_SIZE: usize = 16;

pub type FrameHeaderBytes = [u8; HEADER_SIZE];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    checksum: u32,
    body_length: u64,
}

impl FrameHeader {
    /// Build the header for `body`, computing its checksum.
    pub fn for_body(body: &[u8]) -> Self {
        Self {
            checksum: checksum(body),
            body_length: body.len() as u64,
        }
    }

    pub fn to_bytes(&self) -> FrameHeaderBytes {
        let mut buf: FrameHeaderBytes = [0; HEADER_SIZE];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        buf[8..16].copy_from_slice(&self.body_length.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &FrameHeaderBytes) -> Result<Self, CogError> {
        if bytes[0..4] != MAGIC {
            return Err(CogError::InvalidMagic);
        }
        let mut checksum = [0u8; 4];
        checksum.copy_from_slice(&bytes[4..8]);
        let mut body_length = [0u8; 8];
        body_length.copy_from_slice(&bytes[8..16]);
        Ok(Self {
            checksum: u32::from_le_bytes(checksum),
            body_length: u64::from_le_bytes(body_length),
        })
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn body_length(&self) -> u64 {
        self.body_length
    }

    /// Verify `body` against the checksum carried by this header.
    pub fn validate(&self, body: &[u8]) -> Result<(), CogError> {
        if checksum(body) == self.checksum {
            Ok(())
        } else {
            Err(CogError::ChecksumMismatch)
        }
    }
}

fn checksum(body: &[u8]) -> u32 {
    if body.is_empty() {
        return 0;
    }
    let hash = blake3::hash(body);
    let bytes = hash.as_bytes();
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
