pub mod index;
pub mod reader;
pub mod writer;

// This package provides facilities to both read and write sorted files.
//
// A sorted file is an immutable, durable run of records. Sorted files are
// constructed either by flushing a memtable to disk, or by merging two or
// more existing sorted files.
//
// Logically, a sorted file holds a set of key-value pairs ordered on keys
// with no key appearing twice.
//
// Physically, it is nothing but records in the codec's framing laid end to
// end. There is no footer and no embedded index: while a file is written a
// sparse index is sampled from it (the first record, then one record every
// `sparse_factor` bytes or so), and that index lives in the store's global
// index rather than in the file. A lookup uses the samples on either side of
// the target to pick the one byte range it has to read.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::Context;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

const COMPACTING_SUFFIX: &str = ".compacting";

/// Names one sorted file.
///
/// A flush writes version 0 of its generation. A compaction writes the next
/// version of its newest input's generation, so the output sorts directly
/// above every input and below anything flushed later, and it never has the
/// same name as a file the saved index still points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId {
    pub generation: u64,
    pub version: u32,
}

impl FileId {
    pub fn new(generation: u64) -> Self {
        FileId {
            generation,
            version: 0,
        }
    }

    /// The id a compaction whose newest input is `self` writes to.
    pub fn next_version(self) -> Self {
        FileId {
            generation: self.generation,
            version: self.version + 1,
        }
    }
}

impl From<u64> for FileId {
    fn from(generation: u64) -> Self {
        FileId::new(generation)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:020}-{:04}", self.generation, self.version)
    }
}

impl FromStr for FileId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let (generation, version) = s
            .split_once('-')
            .with_context(|| format!("malformed file id {:?}", s))?;
        Ok(FileId {
            generation: generation.parse()?,
            version: version.parse()?,
        })
    }
}

// Ids are map keys in `ROOT`, and JSON object keys have to be strings.
impl Serialize for FileId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FileId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

pub fn sst_path(dir: &Path, id: FileId) -> PathBuf {
    dir.join(format!("sst{}.sst", id))
}

/// Where a compaction writes its output before renaming it to `id`.
pub fn compacting_path(dir: &Path, id: FileId) -> PathBuf {
    let mut name = sst_path(dir, id).into_os_string();
    name.push(COMPACTING_SUFFIX);
    name.into()
}

fn parse_sst_name(name: &str) -> Option<FileId> {
    name.strip_prefix("sst")
        .and_then(|s| s.strip_suffix(".sst"))
        .and_then(|s| s.parse().ok())
}

/// What a directory listing of the sorted-file directory turned up.
#[derive(Debug, Default)]
pub struct SstListing {
    pub ids: Vec<FileId>,
    pub compacting: Vec<PathBuf>,
}

pub fn list_ssts(dir: &Path) -> anyhow::Result<SstListing> {
    let mut listing = SstListing::default();
    for entry in fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.ends_with(COMPACTING_SUFFIX) {
            listing.compacting.push(entry.path());
        } else if let Some(id) = parse_sst_name(name) {
            listing.ids.push(id);
        }
    }
    listing.ids.sort_unstable();
    Ok(listing)
}
