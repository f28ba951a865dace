use std::{
    fs::{self, File, OpenOptions},
    io::{BufReader, Write},
    path::{Path, PathBuf},
};

use anyhow::Context;

use crate::encoding::{RawRecord, RecordReader};

pub fn log_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("wal{:020}.log", id))
}

fn parse_log_name(name: &str) -> Option<u64> {
    name.strip_prefix("wal")
        .and_then(|s| s.strip_suffix(".log"))
        .and_then(|s| s.parse().ok())
}

/// Ids of every log in `dir`, oldest first.
pub fn list_logs(dir: &Path) -> anyhow::Result<Vec<u64>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
        let entry = entry?;
        if let Some(id) = entry.file_name().to_str().and_then(parse_log_name) {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// The write-ahead log of one memtable generation.
#[derive(Debug)]
pub struct Log {
    file: File,
    path: PathBuf,
    sync: bool,
}

impl Log {
    pub fn create(dir: &Path, id: u64, sync: bool) -> anyhow::Result<Self> {
        let path = log_path(dir, id);
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("creating log {}", path.display()))?;
        // Ensure the file is created.
        file.sync_all()?;
        Ok(Log { file, path, sync })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one already-encoded record and returns its length.
    pub fn append(&mut self, record: &[u8]) -> anyhow::Result<usize> {
        self.file.write_all(record)?;
        self.file.flush()?;
        if self.sync {
            self.file.sync_all()?;
        }
        Ok(record.len())
    }
}

pub struct LogReader {
    records: RecordReader<BufReader<File>>,
}

impl LogReader {
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let file = File::open(path.as_ref())
            .with_context(|| format!("opening log {}", path.as_ref().display()))?;
        Ok(LogReader {
            records: RecordReader::new(BufReader::new(file)),
        })
    }
}

impl Iterator for LogReader {
    type Item = anyhow::Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.records.next().map(|r| r.map_err(Into::into))
    }
}
