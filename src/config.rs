use std::path::PathBuf;
use std::time::Duration;

/// Tunable thresholds and directory for an [`crate::Engine`].
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    /// Active memtable is sealed once its encoded size reaches this many bytes.
    pub max_memtable_bytes: usize,
    /// Sstables at or below this size are eligible for compaction.
    pub max_sstable_size: u64,
    /// How often the flush worker wakes to drain the flush queue.
    pub flush_interval: Duration,
    /// How often the compactor wakes to look for eligible sstables.
    pub compaction_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./.logkv_data"),
            max_memtable_bytes: 10 * 1024 * 1024,
            max_sstable_size: 4 * 1024 * 1024,
            flush_interval: Duration::from_micros(100),
            compaction_interval: Duration::from_millis(500),
        }
    }
}

impl EngineConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_max_memtable_bytes(mut self, bytes: usize) -> Self {
        self.max_memtable_bytes = bytes;
        self
    }

    pub fn with_max_sstable_size(mut self, bytes: u64) -> Self {
        self.max_sstable_size = bytes;
        self
    }
}
