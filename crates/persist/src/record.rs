//! Chunk record layout inside a region data file.
//!
//! ```text
//! | biome (1) | last visited (7) | needs generation (1) |
//! | block len (4, BE) | hp len (4, BE) | state len (4, BE) |
//! | block payload | hp payload | state payload |
//! ```

use crate::error::StoreError;

/// Size in bytes of the fixed record header.
pub const HEADER_LEN: usize = 21;
/// Size in bytes of the opaque last-visited timestamp.
pub const TIME_LEN: usize = 7;

/// Per-chunk metadata carried in the record header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Encoded biome id.
    pub biome: u8,
    /// Opaque world-clock stamp of the last visit.
    pub last_visited: [u8; TIME_LEN],
    pub needs_generation: bool,
}

/// The three compressed payloads of one chunk, in on-disk order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkPayloads {
    pub blocks: Vec<u8>,
    pub hp: Vec<u8>,
    pub state: Vec<u8>,
}

impl ChunkPayloads {
    pub fn total_len(&self) -> u64 {
        (self.blocks.len() + self.hp.len() + self.state.len()) as u64
    }
}

/// One persisted chunk: header fields plus payloads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkRecord {
    pub header: ChunkHeader,
    pub payloads: ChunkPayloads,
}

impl ChunkRecord {
    /// Header as written to disk, with payload lengths filled in.
    pub fn record_header(&self) -> Result<RecordHeader, StoreError> {
        let len = |bytes: &Vec<u8>| {
            u32::try_from(bytes.len()).map_err(|_| StoreError::RecordTooLarge {
                size: bytes.len() as u64,
            })
        };
        Ok(RecordHeader {
            chunk: self.header,
            block_len: len(&self.payloads.blocks)?,
            hp_len: len(&self.payloads.hp)?,
            state_len: len(&self.payloads.state)?,
        })
    }

    /// Header plus all payloads.
    pub fn record_len(&self) -> u64 {
        HEADER_LEN as u64 + self.payloads.total_len()
    }
}

/// Decoded fixed-size record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub chunk: ChunkHeader,
    pub block_len: u32,
    pub hp_len: u32,
    pub state_len: u32,
}

impl RecordHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0] = self.chunk.biome;
        out[1..1 + TIME_LEN].copy_from_slice(&self.chunk.last_visited);
        out[8] = u8::from(self.chunk.needs_generation);
        out[9..13].copy_from_slice(&self.block_len.to_be_bytes());
        out[13..17].copy_from_slice(&self.hp_len.to_be_bytes());
        out[17..21].copy_from_slice(&self.state_len.to_be_bytes());
        out
    }

    pub fn decode(bytes: &[u8; HEADER_LEN]) -> Self {
        let be32 = |at: usize| u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let mut last_visited = [0u8; TIME_LEN];
        last_visited.copy_from_slice(&bytes[1..1 + TIME_LEN]);
        Self {
            chunk: ChunkHeader {
                biome: bytes[0],
                last_visited,
                needs_generation: bytes[8] != 0,
            },
            block_len: be32(9),
            hp_len: be32(13),
            state_len: be32(17),
        }
    }

    pub fn payload_len(&self) -> u64 {
        u64::from(self.block_len) + u64::from(self.hp_len) + u64::from(self.state_len)
    }

    /// Total bytes the record occupies in the data file.
    pub fn record_len(&self) -> u64 {
        HEADER_LEN as u64 + self.payload_len()
    }
}
