//! Chunk record protocol over one open region at a time.

use crate::codec::ChunkCodec;
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::record::{ChunkHeader, ChunkPayloads, ChunkRecord, HEADER_LEN, RecordHeader};
use crate::region::RegionStore;
use regionstore_common::{ChunkCoord, RegionCoord};

/// Keeps exactly one [`RegionStore`] open and reads and writes chunk records
/// through it.
///
/// The region is opened lazily on first access and switched whenever a
/// coordinate outside it is requested. Switching closes the previous region,
/// writing its index and free list, before the next one is opened.
#[derive(Debug)]
pub struct RegionStoreManager {
    config: StoreConfig,
    current: Option<RegionStore>,
}

impl RegionStoreManager {
    /// Validate `config` and create its root directory. No region is opened
    /// until the first chunk access.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        config.validate()?;
        std::fs::create_dir_all(&config.root)?;
        Ok(Self {
            config,
            current: None,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Region currently open, if any.
    pub fn current_region(&self) -> Option<RegionCoord> {
        self.current.as_ref().map(RegionStore::coord)
    }

    /// Make sure the region owning `coord` is the open one.
    pub fn ensure_region_for(&mut self, coord: ChunkCoord) -> Result<&mut RegionStore, StoreError> {
        let store = match self.current.take() {
            Some(store) if store.belongs_to(coord) => store,
            previous => {
                let target = coord.region(self.config.region_side);
                if let Some(old) = previous {
                    tracing::debug!(from = %old.coord(), to = %target, "switching region");
                    old.close()?;
                }
                RegionStore::open(&self.config, target)?
            }
        };
        Ok(self.current.insert(store))
    }

    pub fn is_indexed(&mut self, coord: ChunkCoord) -> Result<bool, StoreError> {
        Ok(self.ensure_region_for(coord)?.is_indexed(coord))
    }

    /// Read the stored record for `coord`. Payloads are returned as stored.
    pub fn load_chunk(&mut self, coord: ChunkCoord) -> Result<ChunkRecord, StoreError> {
        let _span = tracing::info_span!("load_chunk", %coord).entered();
        let store = self.ensure_region_for(coord)?;
        let offset = store.offset_of(coord).ok_or(StoreError::NotFound { coord })?;
        let header = read_header(store, offset)?;

        let data_len = store.data_len()?;
        let end = offset + header.record_len();
        if end > data_len {
            return Err(StoreError::CorruptRecord {
                offset,
                reason: format!("record ends at {end}, data file is {data_len} bytes"),
            });
        }

        let mut cursor = offset + HEADER_LEN as u64;
        let mut read_payload = |len: u32| -> Result<Vec<u8>, StoreError> {
            let mut buf = vec![0u8; len as usize];
            store.read_at(cursor, &mut buf)?;
            cursor += u64::from(len);
            Ok(buf)
        };
        let payloads = ChunkPayloads {
            blocks: read_payload(header.block_len)?,
            hp: read_payload(header.hp_len)?,
            state: read_payload(header.state_len)?,
        };

        tracing::trace!(offset, len = header.record_len(), "loaded chunk");
        Ok(ChunkRecord {
            header: header.chunk,
            payloads,
        })
    }

    /// Write `record` for `coord` and return the offset it was placed at.
    ///
    /// A previous record is released first, then space for the new one is
    /// allocated and the free list persisted. The index is appended to for a
    /// new chunk, or rewritten if an existing chunk moved. The record bytes
    /// are written last. If any step before the record write fails, the
    /// in-memory index and free list are put back as they were.
    pub fn save_chunk(&mut self, coord: ChunkCoord, record: &ChunkRecord) -> Result<u64, StoreError> {
        let _span = tracing::info_span!("save_chunk", %coord).entered();
        let header = record.record_header()?;
        let total = header.record_len();
        let size = hole_size(total).ok_or(StoreError::RecordTooLarge { size: total })?;
        let key = coord.linear_key(self.config.region_side);
        let flush_after_save = self.config.flush_after_save;

        let store = self.ensure_region_for(coord)?;
        let previous = store.offset_of(coord);
        let offset = store.with_rollback(|store| {
            if let Some(old_offset) = previous {
                let old_len = read_header(store, old_offset)?.record_len();
                let old_size = hole_size(old_len).ok_or_else(|| StoreError::CorruptRecord {
                    offset: old_offset,
                    reason: format!("stored length {old_len} exceeds the hole size limit"),
                })?;
                store.allocator_mut().release(old_offset, old_size as i32);
            }

            let offset = store.allocator_mut().allocate(size);
            store.save_holes()?;

            match previous {
                None => {
                    store.set_offset(key, offset);
                    store.append_index_entry(key, offset)?;
                }
                Some(old_offset) if old_offset != offset => {
                    store.set_offset(key, offset);
                    store.save_index()?;
                }
                Some(_) => {}
            }
            Ok(offset)
        })?;

        let header_bytes = header.encode();
        let payloads = &record.payloads;
        let mut cursor = offset;
        for part in [
            &header_bytes[..],
            &payloads.blocks[..],
            &payloads.hp[..],
            &payloads.state[..],
        ] {
            store.write_at(cursor, part)?;
            cursor += part.len() as u64;
        }

        if flush_after_save {
            store.flush()?;
        }

        tracing::debug!(
            offset,
            len = total,
            moved = previous.is_some_and(|old| old != offset),
            "saved chunk"
        );
        Ok(offset)
    }

    /// Read only the generation flag from the record header.
    pub fn needs_generation(&mut self, coord: ChunkCoord) -> Result<bool, StoreError> {
        let store = self.ensure_region_for(coord)?;
        let offset = store.offset_of(coord).ok_or(StoreError::NotFound { coord })?;
        Ok(read_header(store, offset)?.chunk.needs_generation)
    }

    /// Encode `chunk` with `codec` and save it.
    pub fn save_encoded<C: ChunkCodec>(
        &mut self,
        codec: &C,
        coord: ChunkCoord,
        header: ChunkHeader,
        chunk: &C::Chunk,
    ) -> Result<u64, StoreError> {
        let record = ChunkRecord {
            header,
            payloads: codec.encode(chunk)?,
        };
        self.save_chunk(coord, &record)
    }

    /// Load the record for `coord` and decode its payloads with `codec`.
    pub fn load_decoded<C: ChunkCodec>(
        &mut self,
        codec: &C,
        coord: ChunkCoord,
    ) -> Result<(ChunkHeader, C::Chunk), StoreError> {
        let record = self.load_chunk(coord)?;
        Ok((record.header, codec.decode(&record.payloads)?))
    }

    /// Persist index and free list of the open region, keeping it open.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        match self.current.as_mut() {
            Some(store) => store.flush(),
            None => Ok(()),
        }
    }

    /// Close the open region, persisting its index and free list.
    pub fn close(mut self) -> Result<(), StoreError> {
        match self.current.take() {
            Some(store) => store.close(),
            None => Ok(()),
        }
    }
}

impl Drop for RegionStoreManager {
    fn drop(&mut self) {
        if let Some(store) = self.current.take() {
            let region = store.coord();
            if let Err(e) = store.close() {
                tracing::error!(%region, error = %e, "failed to close region");
            }
        }
    }
}

/// Record length as a hole size. Holes store sizes as signed 32-bit values.
fn hole_size(len: u64) -> Option<u32> {
    u32::try_from(len).ok().filter(|&size| size <= i32::MAX as u32)
}

fn read_header(store: &RegionStore, offset: u64) -> Result<RecordHeader, StoreError> {
    let mut buf = [0u8; HEADER_LEN];
    store.read_at(offset, &mut buf)?;
    Ok(RecordHeader::decode(&buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ZstdCodec;
    use crate::config::MergePolicy;
    use crate::hole::DataHole;
    use std::path::Path;

    fn manager(root: &Path) -> RegionStoreManager {
        RegionStoreManager::open(StoreConfig::with_root(root)).unwrap()
    }

    fn record(blocks: &[u8], hp: &[u8], state: &[u8]) -> ChunkRecord {
        ChunkRecord {
            header: ChunkHeader {
                biome: 2,
                last_visited: [0, 0, 0, 12, 6, 30, 1],
                needs_generation: false,
            },
            payloads: ChunkPayloads {
                blocks: blocks.to_vec(),
                hp: hp.to_vec(),
                state: state.to_vec(),
            },
        }
    }

    fn holes(manager: &mut RegionStoreManager, coord: ChunkCoord) -> Vec<DataHole> {
        manager.ensure_region_for(coord).unwrap().holes().to_vec()
    }

    #[test]
    fn first_save_lands_at_zero() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = manager(tmp.path());
        let coord = ChunkCoord::new(5, 5, 0);
        let rec = record(&[1, 2, 3], &[4], &[5, 6]);

        assert_eq!(m.save_chunk(coord, &rec).unwrap(), 0);
        assert!(m.is_indexed(coord).unwrap());
        assert_eq!(m.load_chunk(coord).unwrap(), rec);
        assert_eq!(holes(&mut m, coord), vec![DataHole::infinite(27)]);
    }

    #[test]
    fn growing_only_record_reuses_its_space() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = manager(tmp.path());
        let coord = ChunkCoord::new(5, 5, 0);
        m.save_chunk(coord, &record(&[1, 2, 3], &[4], &[5, 6])).unwrap();

        // The freed 27 bytes touch the open end and fold into it.
        let bigger = record(&[1, 2, 3, 4, 5], &[4], &[5, 6]);
        assert_eq!(m.save_chunk(coord, &bigger).unwrap(), 0);
        assert_eq!(m.load_chunk(coord).unwrap(), bigger);
        assert_eq!(holes(&mut m, coord), vec![DataHole::infinite(30)]);
    }

    #[test]
    fn growing_record_relocates_and_leaves_hole() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = manager(tmp.path());
        let a = ChunkCoord::new(5, 5, 0);
        let b = ChunkCoord::new(6, 5, 0);
        m.save_chunk(a, &record(&[1, 2, 3], &[4], &[5, 6])).unwrap();
        m.save_chunk(b, &record(&[9, 9, 9], &[9], &[9, 9])).unwrap();

        let bigger = record(&[1, 2, 3, 4, 5], &[4], &[5, 6]);
        assert_eq!(m.save_chunk(a, &bigger).unwrap(), 54);
        assert_eq!(holes(&mut m, a), vec![DataHole::new(0, 27), DataHole::infinite(84)]);
        m.close().unwrap();

        // The moved offset reached the index file.
        let mut m = manager(tmp.path());
        assert_eq!(m.ensure_region_for(a).unwrap().offset_of(a), Some(54));
        assert_eq!(m.load_chunk(a).unwrap(), bigger);
        assert_eq!(m.load_chunk(b).unwrap(), record(&[9, 9, 9], &[9], &[9, 9]));
    }

    #[test]
    fn shrunk_record_hole_is_reused_first_fit() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = manager(tmp.path());
        let a = ChunkCoord::new(0, 0, 0);
        let b = ChunkCoord::new(1, 0, 0);
        let c = ChunkCoord::new(2, 0, 0);
        m.save_chunk(a, &record(&[0; 79], &[], &[])).unwrap(); // 100 bytes
        m.save_chunk(b, &record(&[0; 9], &[], &[])).unwrap(); // 30 bytes at 100
        m.save_chunk(a, &record(&[0; 29], &[], &[])).unwrap(); // 50 bytes at 0
        assert_eq!(holes(&mut m, a), vec![DataHole::new(50, 50), DataHole::infinite(130)]);

        assert_eq!(m.save_chunk(c, &record(&[0; 19], &[], &[])).unwrap(), 50);
        assert_eq!(holes(&mut m, a), vec![DataHole::new(90, 10), DataHole::infinite(130)]);
    }

    #[test]
    fn identical_resave_does_not_leak() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = manager(tmp.path());
        let a = ChunkCoord::new(3, 4, 0);
        let b = ChunkCoord::new(4, 4, 0);
        let rec = record(&[8; 40], &[1, 2], &[3]);
        m.save_chunk(a, &rec).unwrap();
        m.save_chunk(b, &rec).unwrap();
        let before = holes(&mut m, a);

        m.save_chunk(a, &rec).unwrap();
        assert_eq!(holes(&mut m, a), before);
        assert_eq!(m.load_chunk(a).unwrap(), rec);
    }

    #[test]
    fn index_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let coords: Vec<_> = (0..10).map(|i| ChunkCoord::new(i, 31 - i, 0)).collect();
        {
            let mut m = manager(tmp.path());
            for (i, &coord) in coords.iter().enumerate() {
                m.save_chunk(coord, &record(&vec![i as u8; i + 1], &[i as u8], &[])).unwrap();
            }
            m.close().unwrap();
        }

        let mut m = manager(tmp.path());
        assert!(!m.is_indexed(ChunkCoord::new(20, 20, 0)).unwrap());
        for (i, &coord) in coords.iter().enumerate() {
            assert!(m.is_indexed(coord).unwrap());
            assert_eq!(m.load_chunk(coord).unwrap().payloads.blocks, vec![i as u8; i + 1]);
        }
    }

    #[test]
    fn dropping_manager_persists_region() {
        let tmp = tempfile::tempdir().unwrap();
        let coord = ChunkCoord::new(-3, 7, 2);
        let rec = record(&[1], &[2], &[3]);
        {
            let mut m = manager(tmp.path());
            m.save_chunk(coord, &rec).unwrap();
        }
        let mut m = manager(tmp.path());
        assert_eq!(m.current_region(), None);
        assert_eq!(m.load_chunk(coord).unwrap(), rec);
        assert_eq!(m.current_region(), Some(RegionCoord::new(-1, 0)));
    }

    #[test]
    fn switching_regions_flushes_previous() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = manager(tmp.path());
        let a = ChunkCoord::new(5, 5, 0);
        let b = ChunkCoord::new(40, 5, 0);
        let rec_a = record(&[1, 2, 3], &[4], &[5, 6]);
        let rec_b = record(&[7], &[8], &[9]);

        m.save_chunk(a, &rec_a).unwrap();
        assert_eq!(m.current_region(), Some(RegionCoord::new(0, 0)));
        m.save_chunk(b, &rec_b).unwrap();
        assert_eq!(m.current_region(), Some(RegionCoord::new(1, 0)));

        assert_eq!(m.load_chunk(a).unwrap(), rec_a);
        assert_eq!(m.current_region(), Some(RegionCoord::new(0, 0)));
        assert_eq!(m.load_chunk(b).unwrap(), rec_b);
        assert!(tmp.path().join("r0x0.ind").is_file());
        assert!(tmp.path().join("r1x0.hle").is_file());
    }

    #[test]
    fn vertical_layers_are_distinct() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = manager(tmp.path());
        let low = ChunkCoord::new(5, 5, 0);
        let high = ChunkCoord::new(5, 5, 1);
        m.save_chunk(low, &record(&[1], &[], &[])).unwrap();
        assert!(!m.is_indexed(high).unwrap());
        m.save_chunk(high, &record(&[2], &[], &[])).unwrap();
        assert_eq!(m.load_chunk(low).unwrap().payloads.blocks, vec![1]);
        assert_eq!(m.load_chunk(high).unwrap().payloads.blocks, vec![2]);
    }

    #[test]
    fn missing_chunk_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = manager(tmp.path());
        let coord = ChunkCoord::new(1, 2, 0);
        assert!(matches!(
            m.load_chunk(coord),
            Err(StoreError::NotFound { coord: c }) if c == coord
        ));
        assert!(matches!(m.needs_generation(coord), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn needs_generation_reads_header_flag() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = manager(tmp.path());
        let coord = ChunkCoord::new(1, 1, 0);
        let mut rec = record(&[1, 2], &[], &[]);
        rec.header.needs_generation = true;
        m.save_chunk(coord, &rec).unwrap();
        assert!(m.needs_generation(coord).unwrap());

        rec.header.needs_generation = false;
        m.save_chunk(coord, &rec).unwrap();
        assert!(!m.needs_generation(coord).unwrap());
    }

    #[test]
    fn truncated_data_file_is_corrupt_record() {
        let tmp = tempfile::tempdir().unwrap();
        let coord = ChunkCoord::new(0, 0, 0);
        {
            let mut m = manager(tmp.path());
            m.save_chunk(coord, &record(&[1; 100], &[2; 10], &[3])).unwrap();
            m.close().unwrap();
        }
        let data = std::fs::OpenOptions::new()
            .write(true)
            .open(tmp.path().join("r0x0.rdf"))
            .unwrap();
        data.set_len(60).unwrap();
        drop(data);

        let mut m = manager(tmp.path());
        assert!(matches!(
            m.load_chunk(coord),
            Err(StoreError::CorruptRecord { offset: 0, .. })
        ));
    }

    #[test]
    fn flush_after_save_keeps_files_current() {
        let tmp = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            flush_after_save: true,
            merge: MergePolicy::Both,
            ..StoreConfig::with_root(tmp.path())
        };
        let mut m = RegionStoreManager::open(config).unwrap();
        m.save_chunk(ChunkCoord::new(0, 0, 0), &record(&[1], &[], &[])).unwrap();
        m.save_chunk(ChunkCoord::new(1, 0, 0), &record(&[1], &[], &[])).unwrap();

        let index = std::fs::read(tmp.path().join("r0x0.ind")).unwrap();
        assert_eq!(index.len(), 32);
        let holes = std::fs::read(tmp.path().join("r0x0.hle")).unwrap();
        assert_eq!(holes, DataHole::infinite(44).encode());
    }

    #[test]
    fn codec_roundtrip_through_store() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = manager(tmp.path());
        let codec = ZstdCodec::default();
        let coord = ChunkCoord::new(9, -9, 0);
        let raw = ChunkPayloads {
            blocks: (0..2048u32).map(|i| (i % 7) as u8).collect(),
            hp: vec![100; 256],
            state: vec![0; 256],
        };
        let header = ChunkHeader {
            biome: 5,
            ..ChunkHeader::default()
        };
        m.save_encoded(&codec, coord, header, &raw).unwrap();

        let (loaded_header, loaded) = m.load_decoded(&codec, coord).unwrap();
        assert_eq!(loaded_header, header);
        assert_eq!(loaded, raw);
        assert!(m.load_chunk(coord).unwrap().payloads.blocks.len() < raw.blocks.len());
    }

    #[test]
    fn rejects_invalid_config() {
        let tmp = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            region_side: -1,
            ..StoreConfig::with_root(tmp.path())
        };
        assert!(matches!(
            RegionStoreManager::open(config),
            Err(StoreError::InvalidConfig(_))
        ));
    }
}
