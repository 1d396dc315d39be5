//! One region's backing files: data (`.rdf`), index (`.ind`) and holes (`.hle`).

use crate::allocator::FreeSpaceAllocator;
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::hole::DataHole;
use regionstore_common::{ChunkCoord, RegionCoord};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Size in bytes of one index entry: key then offset, both big-endian.
pub const INDEX_ENTRY_LEN: usize = 16;

/// An open region: its three files, in-memory index and free list.
///
/// Index and free list are written back by [`flush`](Self::flush) and
/// [`close`](Self::close).
#[derive(Debug)]
pub struct RegionStore {
    coord: RegionCoord,
    side: i32,
    data: File,
    index_file: File,
    hole_file: File,
    index: BTreeMap<i64, u64>,
    allocator: FreeSpaceAllocator,
    sync_writes: bool,
}

impl RegionStore {
    /// Open the region's files under `config.root`, creating them if missing.
    ///
    /// If any of the three files is missing the region starts fresh: the
    /// surviving files are truncated, the index is empty and the free list is
    /// a single infinite hole at 0.
    pub fn open(config: &StoreConfig, coord: RegionCoord) -> Result<Self, StoreError> {
        let [data_path, index_path, hole_path] = Self::paths(&config.root, coord);
        let (data, data_existed) = open_or_create(&data_path)?;
        let (index_file, index_existed) = open_or_create(&index_path)?;
        let (hole_file, holes_existed) = open_or_create(&hole_path)?;
        let loaded = data_existed && index_existed && holes_existed;

        let (index, allocator) = if loaded {
            let index = read_index(&index_file)?;
            let mut allocator = FreeSpaceAllocator::read_from(&hole_file, config.merge)?;
            let data_len = data.metadata()?.len();
            if allocator.ensure_open_end(data_len) {
                tracing::warn!(region = %coord, data_len, "hole file had no open end; appended one");
            }
            (index, allocator)
        } else {
            data.set_len(0)?;
            index_file.set_len(0)?;
            hole_file.set_len(0)?;
            (BTreeMap::new(), FreeSpaceAllocator::new(config.merge))
        };

        tracing::debug!(
            region = %coord,
            loaded,
            chunks = index.len(),
            holes = allocator.len(),
            "opened region"
        );

        Ok(Self {
            coord,
            side: config.region_side,
            data,
            index_file,
            hole_file,
            index,
            allocator,
            sync_writes: config.sync_writes,
        })
    }

    pub fn coord(&self) -> RegionCoord {
        self.coord
    }

    /// Whether `coord` is stored in this region.
    pub fn belongs_to(&self, coord: ChunkCoord) -> bool {
        self.coord.contains(coord, self.side)
    }

    pub fn is_indexed(&self, coord: ChunkCoord) -> bool {
        self.index.contains_key(&coord.linear_key(self.side))
    }

    /// Data file offset of the chunk's record, if indexed.
    pub fn offset_of(&self, coord: ChunkCoord) -> Option<u64> {
        self.index.get(&coord.linear_key(self.side)).copied()
    }

    pub fn index(&self) -> &BTreeMap<i64, u64> {
        &self.index
    }

    pub fn holes(&self) -> &[DataHole] {
        self.allocator.holes()
    }

    pub fn allocator(&self) -> &FreeSpaceAllocator {
        &self.allocator
    }

    pub fn allocator_mut(&mut self) -> &mut FreeSpaceAllocator {
        &mut self.allocator
    }

    /// Current length of the data file.
    pub fn data_len(&self) -> Result<u64, StoreError> {
        Ok(self.data.metadata()?.len())
    }

    /// Fill `buf` from the data file at `offset`.
    ///
    /// Reading past the end of the file is reported as a corrupt record.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), StoreError> {
        let len = self.data_len()?;
        let end = offset.saturating_add(buf.len() as u64);
        if end > len {
            return Err(StoreError::CorruptRecord {
                offset,
                reason: format!("read of {} bytes ends at {end}, file is {len} bytes", buf.len()),
            });
        }
        let mut file = &self.data;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    /// Write `buf` to the data file at `offset` and flush it.
    pub fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), StoreError> {
        self.data.seek(SeekFrom::Start(offset))?;
        self.data.write_all(buf)?;
        self.data.flush()?;
        if self.sync_writes {
            self.data.sync_data()?;
        }
        tracing::trace!(region = %self.coord, offset, len = buf.len(), "wrote data");
        Ok(())
    }

    /// Point `key` at `offset` in memory. Returns the previous offset.
    pub fn set_offset(&mut self, key: i64, offset: u64) -> Option<u64> {
        self.index.insert(key, offset)
    }

    /// Append one entry to the index file without rewriting it.
    pub fn append_index_entry(&mut self, key: i64, offset: u64) -> Result<(), StoreError> {
        self.index_file.seek(SeekFrom::End(0))?;
        self.index_file.write_all(&encode_index_entry(key, offset))?;
        self.index_file.flush()?;
        Ok(())
    }

    /// Rewrite the whole index file from memory.
    pub fn save_index(&mut self) -> Result<(), StoreError> {
        let mut bytes = Vec::with_capacity(self.index.len() * INDEX_ENTRY_LEN);
        for (&key, &offset) in &self.index {
            bytes.extend_from_slice(&encode_index_entry(key, offset));
        }
        self.index_file.set_len(0)?;
        self.index_file.seek(SeekFrom::Start(0))?;
        self.index_file.write_all(&bytes)?;
        self.index_file.flush()?;
        Ok(())
    }

    /// Truncate the hole file and write the free list back in batches.
    pub fn save_holes(&mut self) -> Result<(), StoreError> {
        self.hole_file.set_len(0)?;
        self.hole_file.seek(SeekFrom::Start(0))?;
        self.allocator.write_to(&self.hole_file)?;
        Ok(())
    }

    /// Run `f`, restoring the in-memory index and free list if it fails.
    ///
    /// Bytes `f` already wrote to the files are not undone.
    pub fn with_rollback<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let allocator = self.allocator.clone();
        let index = self.index.clone();
        let result = f(self);
        if result.is_err() {
            self.allocator = allocator;
            self.index = index;
            tracing::debug!(region = %self.coord, "restored index and free list after failure");
        }
        result
    }

    /// Persist index and free list without closing.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        self.save_index()?;
        self.save_holes()
    }

    /// Persist index and free list, then close all three files.
    pub fn close(mut self) -> Result<(), StoreError> {
        self.flush()?;
        tracing::debug!(region = %self.coord, chunks = self.index.len(), "closed region");
        Ok(())
    }

    /// Paths of the data, index and hole files for `coord` under `root`.
    pub fn paths(root: &Path, coord: RegionCoord) -> [PathBuf; 3] {
        let stem = coord.file_stem();
        ["rdf", "ind", "hle"].map(|ext| root.join(format!("{stem}.{ext}")))
    }
}

fn open_or_create(path: &Path) -> Result<(File, bool), StoreError> {
    match OpenOptions::new().read(true).write(true).open(path) {
        Ok(file) => Ok((file, true)),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            Ok((file, false))
        }
        Err(e) => Err(e.into()),
    }
}

fn encode_index_entry(key: i64, offset: u64) -> [u8; INDEX_ENTRY_LEN] {
    let mut out = [0u8; INDEX_ENTRY_LEN];
    out[..8].copy_from_slice(&key.to_be_bytes());
    out[8..].copy_from_slice(&offset.to_be_bytes());
    out
}

fn read_index(file: &File) -> Result<BTreeMap<i64, u64>, StoreError> {
    let mut bytes = Vec::new();
    let mut reader = file;
    reader.seek(SeekFrom::Start(0))?;
    reader.read_to_end(&mut bytes)?;
    if bytes.len() % INDEX_ENTRY_LEN != 0 {
        return Err(StoreError::CorruptIndex {
            len: bytes.len() as u64,
        });
    }
    let mut index = BTreeMap::new();
    for entry in bytes.chunks_exact(INDEX_ENTRY_LEN) {
        let mut key = [0u8; 8];
        let mut offset = [0u8; 8];
        key.copy_from_slice(&entry[..8]);
        offset.copy_from_slice(&entry[8..]);
        // Later entries win, matching append-after-rewrite order.
        index.insert(i64::from_be_bytes(key), u64::from_be_bytes(offset));
    }
    Ok(index)
}
