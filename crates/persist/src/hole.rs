/// Size in bytes of one encoded hole entry.
pub const HOLE_ENTRY_LEN: usize = 12;
/// Largest position a stored hole may start at. File offsets are signed
/// 64-bit, so anything above cannot name a real byte of a data file.
pub const MAX_HOLE_POSITION: u64 = i64::MAX as u64;

/// A reusable byte range in a region data file.
///
/// An infinite hole runs from `position` to the growable end of the file; its
/// `size` is stored as `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHole {
    pub position: u64,
    pub size: i32,
    pub infinite: bool,
}

impl DataHole {
    pub fn new(position: u64, size: i32) -> Self {
        Self {
            position,
            size,
            infinite: false,
        }
    }

    pub fn infinite(position: u64) -> Self {
        Self {
            position,
            size: -1,
            infinite: true,
        }
    }

    /// First byte past a finite hole. `None` for the infinite hole.
    pub fn end(&self) -> Option<u64> {
        (!self.infinite).then(|| self.position + self.size as u64)
    }

    /// 8-byte big-endian position followed by 4-byte big-endian size.
    pub fn encode(&self) -> [u8; HOLE_ENTRY_LEN] {
        let mut out = [0u8; HOLE_ENTRY_LEN];
        out[..8].copy_from_slice(&self.position.to_be_bytes());
        let size = if self.infinite { -1 } else { self.size };
        out[8..].copy_from_slice(&size.to_be_bytes());
        out
    }

    /// Entries with a size of zero or less decode as infinite.
    pub fn decode(bytes: &[u8; HOLE_ENTRY_LEN]) -> Self {
        let mut position = [0u8; 8];
        position.copy_from_slice(&bytes[..8]);
        let mut size = [0u8; 4];
        size.copy_from_slice(&bytes[8..]);
        let position = u64::from_be_bytes(position);
        let size = i32::from_be_bytes(size);
        if size <= 0 {
            Self::infinite(position)
        } else {
            Self::new(position, size)
        }
    }
}
