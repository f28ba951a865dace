use serde::{Deserialize, Serialize};

pub const DEFAULT_SPARSE_FACTOR: usize = 4096;

/// Tuning knobs for a [`Store`](super::Store).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Minimum number of bytes between two sampled keys of a sorted file.
    pub sparse_factor: usize,
    /// Log bytes after which the active memtable is sealed and flushed.
    /// Defaults to `sparse_factor * 1024`.
    pub dump_threshold: Option<usize>,
    /// Fsync the log after every put.
    pub sync_wal: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            sparse_factor: DEFAULT_SPARSE_FACTOR,
            dump_threshold: None,
            sync_wal: false,
        }
    }
}

impl Options {
    pub fn sparse_factor(mut self, sparse_factor: usize) -> Self {
        self.sparse_factor = sparse_factor;
        self
    }

    pub fn dump_threshold(mut self, dump_threshold: usize) -> Self {
        self.dump_threshold = Some(dump_threshold);
        self
    }

    pub fn sync_wal(mut self, sync_wal: bool) -> Self {
        self.sync_wal = sync_wal;
        self
    }

    pub fn effective_dump_threshold(&self) -> usize {
        self.dump_threshold
            .unwrap_or_else(|| self.sparse_factor.saturating_mul(1024))
    }

    pub(crate) fn validate(&self) -> anyhow::Result<()> {
        if self.sparse_factor == 0 {
            anyhow::bail!("sparse_factor must be positive");
        }
        if self.effective_dump_threshold() == 0 {
            anyhow::bail!("dump_threshold must be positive");
        }
        Ok(())
    }
}
