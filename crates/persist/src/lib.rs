//! Region file persistence for chunk records.
//!
//! Each region of `R x R` chunk columns is backed by three files:
//! ```text
//! r{rx}x{rz}.rdf   - variable-length chunk records
//! r{rx}x{rz}.ind   - 16-byte index entries: linear key, record offset
//! r{rx}x{rz}.hle   - 12-byte free-list entries: position, size (<= 0: infinite)
//! ```
//!
//! # Invariants
//! - Every byte of a data file below the open end is either in one live
//!   record or in one hole.
//! - The free list is sorted, non-overlapping, and ends with the only
//!   infinite hole.
//! - Only one region is open at a time; switching persists the previous one.

pub mod allocator;
pub mod codec;
pub mod config;
pub mod error;
pub mod hole;
pub mod manager;
pub mod record;
pub mod region;

pub use allocator::FreeSpaceAllocator;
pub use codec::{ChunkCodec, ZstdCodec};
pub use config::{MergePolicy, StoreConfig};
pub use error::StoreError;
pub use hole::DataHole;
pub use manager::RegionStoreManager;
pub use record::{ChunkHeader, ChunkPayloads, ChunkRecord, RecordHeader};
pub use region::RegionStore;
