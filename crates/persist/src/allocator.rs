//! First-fit free-space allocator over a region data file.
//!
//! # Invariants
//! - Holes are sorted by position and never overlap.
//! - Exactly one hole is infinite and it is the last entry.

use crate::config::MergePolicy;
use crate::error::StoreError;
use crate::hole::{DataHole, HOLE_ENTRY_LEN, MAX_HOLE_POSITION};
use std::io::{Read, Write};

/// Holes written per batch to the hole file.
pub const HOLES_PER_BATCH: usize = 32;
/// Bytes per full batch.
pub const HOLE_BATCH_LEN: usize = HOLES_PER_BATCH * HOLE_ENTRY_LEN;

/// Tracks reusable byte ranges of one data file.
#[derive(Debug, Clone)]
pub struct FreeSpaceAllocator {
    holes: Vec<DataHole>,
    merge: MergePolicy,
}

impl FreeSpaceAllocator {
    /// Allocator for a brand new data file: one infinite hole at 0.
    pub fn new(merge: MergePolicy) -> Self {
        Self {
            holes: vec![DataHole::infinite(0)],
            merge,
        }
    }

    /// Rebuild an allocator from hole file bytes, reading 384-byte batches.
    ///
    /// Finite entries are inserted through [`release`](Self::release) and the
    /// infinite entry is appended. A well-formed file is sorted, so every
    /// entry lands at the end of the list and no two entries are merged, even
    /// when they touch. The result may lack an infinite hole if the file was
    /// truncated; see [`ensure_open_end`](Self::ensure_open_end).
    pub fn read_from(mut reader: impl Read, merge: MergePolicy) -> Result<Self, StoreError> {
        let mut allocator = Self {
            holes: Vec::new(),
            merge,
        };
        let mut batch = Vec::with_capacity(HOLE_BATCH_LEN);
        loop {
            batch.clear();
            reader
                .by_ref()
                .take(HOLE_BATCH_LEN as u64)
                .read_to_end(&mut batch)?;
            if batch.is_empty() {
                break;
            }
            if batch.len() % HOLE_ENTRY_LEN != 0 {
                return Err(StoreError::CorruptHoles(format!(
                    "trailing {} bytes do not form a whole entry",
                    batch.len() % HOLE_ENTRY_LEN
                )));
            }
            for entry in batch.chunks_exact(HOLE_ENTRY_LEN) {
                let mut bytes = [0u8; HOLE_ENTRY_LEN];
                bytes.copy_from_slice(entry);
                let hole = DataHole::decode(&bytes);
                if hole.position > MAX_HOLE_POSITION {
                    return Err(StoreError::CorruptHoles(format!(
                        "entry position {} is past the largest file offset",
                        hole.position
                    )));
                }
                if allocator.holes.last().is_some_and(|h| h.infinite) {
                    return Err(StoreError::CorruptHoles(format!(
                        "entry at {} follows the infinite hole",
                        hole.position
                    )));
                }
                if hole.infinite {
                    allocator.holes.push(hole);
                } else {
                    allocator.release(hole.position, hole.size);
                }
            }
        }
        allocator.check_invariants()?;
        Ok(allocator)
    }

    /// Write the free list as consecutive batches of up to 32 entries.
    pub fn write_to(&self, mut writer: impl Write) -> Result<(), StoreError> {
        let mut buf = [0u8; HOLE_BATCH_LEN];
        let mut index = 0;
        loop {
            let (written, done) = self.serialize_batch(index, &mut buf);
            writer.write_all(&buf[..written])?;
            writer.flush()?;
            if done {
                return Ok(());
            }
            index += 1;
        }
    }

    /// Encode batch number `index` into `buf`.
    ///
    /// Returns the number of bytes written and whether this was the final
    /// batch.
    pub fn serialize_batch(&self, index: usize, buf: &mut [u8; HOLE_BATCH_LEN]) -> (usize, bool) {
        let start = (index * HOLES_PER_BATCH).min(self.holes.len());
        let end = (start + HOLES_PER_BATCH).min(self.holes.len());
        for (slot, hole) in buf.chunks_exact_mut(HOLE_ENTRY_LEN).zip(&self.holes[start..end]) {
            slot.copy_from_slice(&hole.encode());
        }
        ((end - start) * HOLE_ENTRY_LEN, end == self.holes.len())
    }

    /// Reserve `size` bytes and return their offset.
    ///
    /// First fit: the first finite hole at least `size` bytes long is used,
    /// otherwise the range is cut from the front of the infinite hole.
    pub fn allocate(&mut self, size: u32) -> u64 {
        let wanted = i64::from(size);
        if let Some(i) = self
            .holes
            .iter()
            .position(|h| !h.infinite && i64::from(h.size) >= wanted)
        {
            let hole = self.holes[i];
            if i64::from(hole.size) == wanted {
                self.holes.remove(i);
            } else {
                self.holes[i] = DataHole::new(hole.position + u64::from(size), hole.size - size as i32);
            }
            tracing::trace!(offset = hole.position, size, "allocated from hole");
            return hole.position;
        }

        let offset = match self.holes.last_mut() {
            Some(last) if last.infinite => {
                let offset = last.position;
                last.position += u64::from(size);
                offset
            }
            _ => {
                let offset = self.holes.iter().filter_map(DataHole::end).max().unwrap_or(0);
                self.holes.push(DataHole::infinite(offset + u64::from(size)));
                offset
            }
        };
        tracing::trace!(offset, size, "allocated from open end");
        offset
    }

    /// Return `size` bytes at `position` to the free list.
    ///
    /// The new hole is inserted in position order and merged with the hole
    /// right after it when they touch. Under [`MergePolicy::Both`] it is also
    /// merged into a touching hole right before it.
    pub fn release(&mut self, position: u64, size: i32) {
        if size <= 0 {
            return;
        }
        let idx = self.holes.partition_point(|h| h.position <= position);
        if idx == self.holes.len() {
            if self.holes.last().is_some_and(|h| h.infinite) {
                tracing::warn!(position, size, "released range lies past the open end");
                return;
            }
            self.holes.push(DataHole::new(position, size));
            return;
        }

        self.holes.insert(idx, DataHole::new(position, size));
        tracing::trace!(position, size, "released");
        self.merge_next(idx);
        if self.merge == MergePolicy::Both && idx > 0 {
            self.merge_next(idx - 1);
        }
    }

    /// Fold the hole at `idx + 1` into the hole at `idx` if they touch.
    fn merge_next(&mut self, idx: usize) {
        let Some(next) = self.holes.get(idx + 1).copied() else {
            return;
        };
        let current = self.holes[idx];
        if current.end() != Some(next.position) {
            return;
        }
        if next.infinite {
            self.holes[idx] = DataHole::infinite(current.position);
        } else if let Some(size) = current.size.checked_add(next.size) {
            self.holes[idx] = DataHole::new(current.position, size);
        } else {
            return;
        }
        self.holes.remove(idx + 1);
    }

    /// Append an infinite hole at `data_len` if the list has none.
    /// Returns whether a repair was made.
    pub fn ensure_open_end(&mut self, data_len: u64) -> bool {
        if self.holes.iter().any(|h| h.infinite) {
            return false;
        }
        let position = self
            .holes
            .iter()
            .filter_map(DataHole::end)
            .max()
            .unwrap_or(0)
            .max(data_len);
        self.holes.push(DataHole::infinite(position));
        true
    }

    /// Verify ordering, overlap and infinite-hole placement.
    pub fn check_invariants(&self) -> Result<(), StoreError> {
        for (i, hole) in self.holes.iter().enumerate() {
            if hole.infinite && i + 1 != self.holes.len() {
                return Err(StoreError::CorruptHoles(format!(
                    "infinite hole at {} is not the last entry",
                    hole.position
                )));
            }
            if !hole.infinite && hole.size <= 0 {
                return Err(StoreError::CorruptHoles(format!(
                    "hole at {} has size {}",
                    hole.position, hole.size
                )));
            }
        }
        for pair in self.holes.windows(2) {
            let end = pair[0].end().unwrap_or(u64::MAX);
            if end > pair[1].position {
                return Err(StoreError::CorruptHoles(format!(
                    "hole at {} overlaps hole at {}",
                    pair[0].position, pair[1].position
                )));
            }
        }
        Ok(())
    }

    pub fn holes(&self) -> &[DataHole] {
        &self.holes
    }

    /// Number of holes, the infinite one included.
    pub fn len(&self) -> usize {
        self.holes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holes.is_empty()
    }

    /// Total bytes held in finite holes.
    pub fn free_bytes(&self) -> u64 {
        self.holes
            .iter()
            .filter(|h| !h.infinite)
            .map(|h| h.size as u64)
            .sum()
    }

    /// Start of the infinite hole, i.e. the end of allocated space.
    pub fn open_end(&self) -> Option<u64> {
        self.holes.iter().find(|h| h.infinite).map(|h| h.position)
    }
}
