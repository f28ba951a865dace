use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::FileId;

/// Sampled `(key, offset)` pairs of one sorted file.
///
/// Keys and offsets are both strictly increasing and the first record of
/// the file is always present, so a target with no sampled key at or below
/// it cannot be in the file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparseIndex {
    entries: Vec<(Vec<u8>, u64)>,
}

/// Where in a file a key could be: `[start, end)`, with `end == None`
/// meaning end of file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl SparseIndex {
    pub fn new() -> Self {
        SparseIndex::default()
    }

    pub(crate) fn push(&mut self, key: &[u8], offset: u64) {
        debug_assert!(self
            .entries
            .last()
            .map_or(true, |(k, o)| k.as_slice() < key && *o < offset));
        self.entries.push((key.to_vec(), offset));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&[u8], u64)> {
        self.entries.iter().map(|(k, o)| (k.as_slice(), *o))
    }

    /// The byte range that must hold `key` if the file has it at all.
    pub fn candidate_range(&self, key: &[u8]) -> Option<ScanRange> {
        let upper_idx = self.entries.partition_point(|(k, _)| k.as_slice() <= key);
        if upper_idx == 0 {
            return None;
        }
        let start = self.entries[upper_idx - 1].1;
        let end = self.entries.get(upper_idx).map(|(_, o)| *o);
        Some(ScanRange { start, end })
    }
}

/// Builds a sparse index while records are written out in order.
#[derive(Debug)]
pub struct SparseIndexBuilder {
    sparse_factor: u64,
    last_indexed: Option<u64>,
    index: SparseIndex,
}

impl SparseIndexBuilder {
    pub fn new(sparse_factor: usize) -> Self {
        SparseIndexBuilder {
            sparse_factor: sparse_factor as u64,
            last_indexed: None,
            index: SparseIndex::new(),
        }
    }

    /// Called with every record's key and the offset it starts at.
    pub fn observe(&mut self, key: &[u8], offset: u64) {
        let due = match self.last_indexed {
            None => true,
            Some(last) => offset >= last + self.sparse_factor,
        };
        if due {
            self.index.push(key, offset);
            self.last_indexed = Some(offset);
        }
    }

    pub fn finish(self) -> SparseIndex {
        self.index
    }
}

/// Every registered sorted file's sparse index, keyed by file id. Larger
/// ids hold newer data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalIndex {
    files: BTreeMap<FileId, SparseIndex>,
}

impl GlobalIndex {
    pub fn new() -> Self {
        GlobalIndex::default()
    }

    pub fn register(&mut self, id: FileId, index: SparseIndex) {
        self.files.insert(id, index);
    }

    pub fn remove(&mut self, id: FileId) -> Option<SparseIndex> {
        self.files.remove(&id)
    }

    pub fn contains(&self, id: FileId) -> bool {
        self.files.contains_key(&id)
    }

    pub fn get(&self, id: FileId) -> Option<&SparseIndex> {
        self.files.get(&id)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// File ids, oldest first.
    pub fn ids(&self) -> impl DoubleEndedIterator<Item = FileId> + '_ {
        self.files.keys().copied()
    }

    pub fn max_id(&self) -> Option<FileId> {
        self.files.keys().next_back().copied()
    }

    /// The files that might hold `key` along with the range to scan in each,
    /// newest file first.
    pub fn candidates(&self, key: &[u8]) -> Vec<(FileId, ScanRange)> {
        self.files
            .iter()
            .rev()
            .filter_map(|(id, index)| index.candidate_range(key).map(|r| (*id, r)))
            .collect()
    }
}
