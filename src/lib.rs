//! An embeddable log-structured key-value store.
//!
//! Puts go to a write-ahead log and an in-memory memtable. Once a memtable
//! has logged enough bytes it is sealed and written out in the background as
//! an immutable sorted file, along with a sparse index that is kept in
//! memory and saved in the store's `ROOT` file on close. Sorted files are
//! merged into one by [`Store::compact`]. Logs left behind by a crash are
//! replayed when the store is next opened.
//!
//! ```no_run
//! use sparsedb::{Options, Store};
//!
//! # fn main() -> anyhow::Result<()> {
//! let store = Store::open("/tmp/fruit", Options::default())?;
//! store.put("apple", "a red fruit")?;
//! assert_eq!(store.get("apple")?, Some(b"a red fruit".to_vec()));
//! store.close()?;
//! # Ok(())
//! # }
//! ```

mod db;
pub mod encoding;
pub mod log;
pub mod memtable;
mod root;
pub mod sst;

pub use db::{Options, Store, DEFAULT_SPARSE_FACTOR};
pub use encoding::RecordError;
