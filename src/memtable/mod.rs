use std::collections::BTreeMap;

/// The in-memory buffer of writes that have not reached a sorted file yet.
///
/// Keys are compared byte-wise. Writing an existing key replaces its value,
/// so iteration always yields strictly ascending keys with no duplicates.
#[derive(Debug, Default)]
pub struct Memtable {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    // Bytes appended to this memtable's log, duplicates included.
    bytes_logged: usize,
}

impl Memtable {
    pub fn new() -> Self {
        Memtable::default()
    }

    pub fn insert(&mut self, key: Vec<u8>, value: Vec<u8>, logged: usize) {
        self.bytes_logged += logged;
        self.entries.insert(key, value);
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.entries.get(key).map(|v| v.as_slice())
    }

    pub fn bytes_logged(&self) -> usize {
        self.bytes_logged
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.entries
            .iter()
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
    }
}
