use std::{
    fs::File,
    io::{BufReader, Read, Seek, SeekFrom},
    path::Path,
};

use anyhow::Context;

use crate::encoding::{RawRecord, RecordReader};

use super::{index::ScanRange, FileId};

/// Reads the bytes of `range` out of the file at `path`.
pub fn read_range<P: AsRef<Path>>(path: P, range: ScanRange) -> anyhow::Result<Vec<u8>> {
    let path = path.as_ref();
    let mut file =
        File::open(path).with_context(|| format!("opening sorted file {}", path.display()))?;
    file.seek(SeekFrom::Start(range.start))?;
    let mut data = Vec::new();
    match range.end {
        Some(end) => {
            let len = end.saturating_sub(range.start);
            data.reserve(len as usize);
            file.take(len).read_to_end(&mut data)?;
        }
        None => {
            file.read_to_end(&mut data)?;
        }
    }
    Ok(data)
}

/// Looks for `key` in a slice of consecutive records that starts on a record
/// boundary. Stops at the first key past the target.
pub fn scan_block(data: &[u8], key: &[u8]) -> anyhow::Result<Option<RawRecord>> {
    for record in RecordReader::new(data) {
        let record = record?;
        match record.key.as_slice().cmp(key) {
            std::cmp::Ordering::Less => continue,
            std::cmp::Ordering::Equal => return Ok(Some(record)),
            std::cmp::Ordering::Greater => return Ok(None),
        }
    }
    Ok(None)
}

/// Point lookup in one sorted file, reading only the given range.
pub fn get_in_range<P: AsRef<Path>>(
    path: P,
    range: ScanRange,
    key: &[u8],
) -> anyhow::Result<Option<Vec<u8>>> {
    let data = read_range(path, range)?;
    match scan_block(&data, key)? {
        Some(record) => Ok(Some(record.value()?)),
        None => Ok(None),
    }
}

/// Walks a whole sorted file front to back.
pub struct SstCursor {
    id: FileId,
    records: RecordReader<BufReader<File>>,
    current: Option<RawRecord>,
}

impl SstCursor {
    /// Opens the file and positions the cursor on its first record.
    pub fn open<P: AsRef<Path>>(id: FileId, path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file =
            File::open(path).with_context(|| format!("opening sorted file {}", path.display()))?;
        let mut records = RecordReader::new(BufReader::new(file));
        let current = records.next_record()?;
        Ok(SstCursor {
            id,
            records,
            current,
        })
    }

    pub fn id(&self) -> FileId {
        self.id
    }

    pub fn peek(&self) -> Option<&RawRecord> {
        self.current.as_ref()
    }

    pub fn advance(&mut self) -> anyhow::Result<()> {
        self.current = self.records.next_record()?;
        Ok(())
    }

    pub fn is_exhausted(&self) -> bool {
        self.current.is_none()
    }
}
