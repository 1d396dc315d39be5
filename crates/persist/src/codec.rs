//! Boundary to the payload compression collaborator.

use crate::error::StoreError;
use crate::record::ChunkPayloads;
use std::io::{Read, Write};

/// Turns an in-memory chunk into the three stored payloads and back.
pub trait ChunkCodec {
    type Chunk;

    fn encode(&self, chunk: &Self::Chunk) -> Result<ChunkPayloads, StoreError>;

    fn decode(&self, payloads: &ChunkPayloads) -> Result<Self::Chunk, StoreError>;
}

/// Compresses each of the three raw planes independently with zstd.
#[derive(Debug, Clone, Copy)]
pub struct ZstdCodec {
    pub level: i32,
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self { level: 3 }
    }
}

impl ZstdCodec {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, StoreError> {
        let mut encoder = zstd::Encoder::new(Vec::new(), self.level)?;
        encoder.write_all(data)?;
        Ok(encoder.finish()?)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, StoreError> {
        let mut buf = Vec::new();
        zstd::Decoder::new(data)
            .and_then(|mut decoder| decoder.read_to_end(&mut buf))
            .map_err(|e| StoreError::Codec(e.to_string()))?;
        Ok(buf)
    }
}

impl ChunkCodec for ZstdCodec {
    /// Uncompressed planes.
    type Chunk = ChunkPayloads;

    fn encode(&self, chunk: &ChunkPayloads) -> Result<ChunkPayloads, StoreError> {
        Ok(ChunkPayloads {
            blocks: self.compress(&chunk.blocks)?,
            hp: self.compress(&chunk.hp)?,
            state: self.compress(&chunk.state)?,
        })
    }

    fn decode(&self, payloads: &ChunkPayloads) -> Result<ChunkPayloads, StoreError> {
        Ok(ChunkPayloads {
            blocks: self.decompress(&payloads.blocks)?,
            hp: self.decompress(&payloads.hp)?,
            state: self.decompress(&payloads.state)?,
        })
    }
}
