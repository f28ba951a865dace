// Records are framed as
//
//   [u32 BE key len][key][u32 BE value len][value]
//
// where the value is compressed on its own with zstd. WALs and sorted files
// are both plain concatenations of records; nothing else delimits them.
use std::io::{self, Cursor, Read};

use thiserror::Error;

const HEADER_LEN: usize = 4;
const COMPRESSION_LEVEL: i32 = 3;

pub const MAX_VALUE_LEN: usize = u32::MAX as usize;
pub const MAX_KEY_LEN: usize = u32::MAX as usize;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("value of {0} bytes is too large to store under a single key")]
    ValueTooLarge(usize),
    #[error("key of {0} bytes is too large")]
    KeyTooLarge(usize),
}

pub fn check_lengths(key_len: usize, value_len: usize) -> Result<(), RecordError> {
    if key_len > MAX_KEY_LEN {
        return Err(RecordError::KeyTooLarge(key_len));
    }
    if value_len > MAX_VALUE_LEN {
        return Err(RecordError::ValueTooLarge(value_len));
    }
    Ok(())
}

pub fn compress(value: &[u8]) -> anyhow::Result<Vec<u8>> {
    Ok(zstd::encode_all(Cursor::new(value), COMPRESSION_LEVEL)?)
}

pub fn decompress(compressed: &[u8]) -> anyhow::Result<Vec<u8>> {
    Ok(zstd::decode_all(Cursor::new(compressed))?)
}

/// Compresses `value` and frames it together with `key`.
pub fn encode_record(key: &[u8], value: &[u8]) -> anyhow::Result<Vec<u8>> {
    check_lengths(key.len(), value.len())?;
    let compressed = compress(value)?;
    // Compression can grow incompressible input a little.
    check_lengths(key.len(), compressed.len())?;
    let mut buf = Vec::with_capacity(2 * HEADER_LEN + key.len() + compressed.len());
    write_raw(&mut buf, key, &compressed);
    Ok(buf)
}

/// Frames a record whose value is already compressed.
pub fn write_raw(buf: &mut Vec<u8>, key: &[u8], compressed: &[u8]) {
    buf.extend((key.len() as u32).to_be_bytes());
    buf.extend(key);
    buf.extend((compressed.len() as u32).to_be_bytes());
    buf.extend(compressed);
}

pub fn encoded_len(key: &[u8], compressed: &[u8]) -> usize {
    2 * HEADER_LEN + key.len() + compressed.len()
}

/// A record as it sits on disk: the key and the still-compressed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub key: Vec<u8>,
    pub compressed: Vec<u8>,
}

impl RawRecord {
    pub fn value(&self) -> anyhow::Result<Vec<u8>> {
        decompress(&self.compressed)
    }

    pub fn encoded_len(&self) -> usize {
        encoded_len(&self.key, &self.compressed)
    }
}

/// Pulls records off a reader one at a time.
///
/// A header or body that ends early is treated as the end of the data: a
/// crash half way through an append only loses that one record.
pub struct RecordReader<R: Read> {
    r: R,
    done: bool,
}

impl<R: Read> RecordReader<R> {
    pub fn new(r: R) -> Self {
        RecordReader { r, done: false }
    }

    fn read_len(&mut self) -> io::Result<Option<usize>> {
        let mut buf = [0_u8; HEADER_LEN];
        if !self.fill(&mut buf)? {
            return Ok(None);
        }
        Ok(Some(u32::from_be_bytes(buf) as usize))
    }

    fn read_body(&mut self, len: usize) -> io::Result<Option<Vec<u8>>> {
        let mut buf = Vec::new();
        let got = (&mut self.r).take(len as u64).read_to_end(&mut buf)?;
        if got < len {
            return Ok(None);
        }
        Ok(Some(buf))
    }

    // Returns false on a short read.
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<bool> {
        match self.r.read_exact(buf) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn next_record(&mut self) -> io::Result<Option<RawRecord>> {
        if self.done {
            return Ok(None);
        }
        let record = self.read_record();
        if !matches!(record, Ok(Some(_))) {
            self.done = true;
        }
        record
    }

    fn read_record(&mut self) -> io::Result<Option<RawRecord>> {
        let key_len = match self.read_len()? {
            Some(n) => n,
            None => return Ok(None),
        };
        let key = match self.read_body(key_len)? {
            Some(k) => k,
            None => return Ok(None),
        };
        let value_len = match self.read_len()? {
            Some(n) => n,
            None => return Ok(None),
        };
        let compressed = match self.read_body(value_len)? {
            Some(v) => v,
            None => return Ok(None),
        };
        Ok(Some(RawRecord { key, compressed }))
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = io::Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_record_layout() {
        let buf = encode_record(b"key", b"value").unwrap();
        assert_eq!(&buf[0..4], &3_u32.to_be_bytes());
        assert_eq!(&buf[4..7], b"key");
        let vlen = u32::from_be_bytes(buf[7..11].try_into().unwrap()) as usize;
        assert_eq!(buf.len(), 11 + vlen);
        assert_eq!(decompress(&buf[11..]).unwrap(), b"value");
    }

    #[test]
    fn test_reader_yields_records_in_order() {
        let mut data = Vec::new();
        for (k, v) in [("b", "2"), ("a", "1"), ("b", "3")] {
            data.extend(encode_record(k.as_bytes(), v.as_bytes()).unwrap());
        }
        let read: Vec<_> = RecordReader::new(Cursor::new(data))
            .map(|r| {
                let r = r.unwrap();
                (
                    String::from_utf8(r.key.clone()).unwrap(),
                    String::from_utf8(r.value().unwrap()).unwrap(),
                )
            })
            .collect();
        assert_eq!(
            read,
            vec![
                ("b".to_owned(), "2".to_owned()),
                ("a".to_owned(), "1".to_owned()),
                ("b".to_owned(), "3".to_owned()),
            ]
        );
    }

    #[test]
    fn test_truncated_tail_is_end_of_data() {
        let first = encode_record(b"apple", b"a red fruit").unwrap();
        let second = encode_record(b"banana", b"yellow").unwrap();
        // Cut the second record at every possible point.
        for cut in 0..second.len() {
            let mut data = first.clone();
            data.extend(&second[..cut]);
            let keys: Vec<_> = RecordReader::new(Cursor::new(data))
                .map(|r| r.unwrap().key)
                .collect();
            assert_eq!(keys, vec![b"apple".to_vec()], "cut at {}", cut);
        }
    }

    #[test]
    fn test_empty_input() {
        assert!(RecordReader::new(Cursor::new(Vec::new())).next().is_none());
    }

    #[test]
    fn test_length_limits() {
        assert_eq!(check_lengths(3, MAX_VALUE_LEN), Ok(()));
        assert_eq!(
            check_lengths(3, MAX_VALUE_LEN + 1),
            Err(RecordError::ValueTooLarge(MAX_VALUE_LEN + 1))
        );
        assert_eq!(
            check_lengths(MAX_KEY_LEN + 1, 0),
            Err(RecordError::KeyTooLarge(MAX_KEY_LEN + 1))
        );
    }
}
