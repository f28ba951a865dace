use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{bail, Context};

use crate::encoding::{self, check_lengths};

use super::index::{SparseIndex, SparseIndexBuilder};

/// Writes records in strictly ascending key order to a new sorted file,
/// sampling the sparse index as it goes.
pub struct SstWriter {
    w: BufWriter<File>,
    path: PathBuf,
    offset: u64,
    index: SparseIndexBuilder,
    prev_key: Option<Vec<u8>>,
    buf: Vec<u8>,
}

impl SstWriter {
    pub fn create<P: AsRef<Path>>(path: P, sparse_factor: usize) -> anyhow::Result<Self> {
        let path = path.as_ref().to_owned();
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("creating sorted file {}", path.display()))?;
        Ok(SstWriter {
            w: BufWriter::new(file),
            path,
            offset: 0,
            index: SparseIndexBuilder::new(sparse_factor),
            prev_key: None,
            buf: Vec::with_capacity(1024),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add(&mut self, key: &[u8], value: &[u8]) -> anyhow::Result<()> {
        check_lengths(key.len(), value.len())?;
        let compressed = encoding::compress(value)?;
        self.add_compressed(key, &compressed)
    }

    /// Adds a record whose value is already compressed, as when copying
    /// between sorted files.
    pub fn add_compressed(&mut self, key: &[u8], compressed: &[u8]) -> anyhow::Result<()> {
        check_lengths(key.len(), compressed.len())?;
        if let Some(prev) = &self.prev_key {
            if prev.as_slice() >= key {
                bail!("sorted file keys must be strictly ascending");
            }
        }

        self.index.observe(key, self.offset);

        self.buf.clear();
        encoding::write_raw(&mut self.buf, key, compressed);
        self.w.write_all(&self.buf)?;
        self.offset += self.buf.len() as u64;

        match &mut self.prev_key {
            Some(prev) => {
                prev.clear();
                prev.extend(key);
            }
            None => self.prev_key = Some(key.to_vec()),
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.prev_key.is_none()
    }

    /// Flushes and syncs the file, returning its sparse index.
    pub fn finish(self) -> anyhow::Result<SparseIndex> {
        let file = self
            .w
            .into_inner()
            .map_err(|e| e.into_error())
            .with_context(|| format!("flushing {}", self.path.display()))?;
        file.sync_all()?;
        Ok(self.index.finish())
    }
}
