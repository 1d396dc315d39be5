use crate::error::StoreError;
use regionstore_common::{DEFAULT_REGION_SIDE, MAX_REGION_SIDE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How a released hole is coalesced with its neighbours.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Merge only with the hole immediately after the released range.
    #[default]
    Forward,
    /// Merge with both the preceding and the following hole.
    Both,
}

/// Store configuration: where region files live and how they are maintained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the `.rdf`, `.ind` and `.hle` files.
    pub root: PathBuf,
    /// Region side length, in chunks.
    pub region_side: i32,
    pub merge: MergePolicy,
    /// Persist index and free list again once a record's bytes are written.
    pub flush_after_save: bool,
    /// fsync the data file after every record write.
    pub sync_writes: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("world"),
            region_side: DEFAULT_REGION_SIDE,
            merge: MergePolicy::Forward,
            flush_after_save: false,
            sync_writes: false,
        }
    }
}

impl StoreConfig {
    /// Default configuration rooted at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let config: Self = serde_json::from_reader(std::fs::File::open(path)?)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if !(1..=MAX_REGION_SIDE).contains(&self.region_side) {
            return Err(StoreError::InvalidConfig(format!(
                "region_side must be in 1..={MAX_REGION_SIDE}, got {}",
                self.region_side
            )));
        }
        Ok(())
    }
}
