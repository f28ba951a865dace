use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{anyhow, Context};
use parking_lot::{Mutex, RwLock};

use crate::{
    encoding::{check_lengths, encode_record},
    log::{list_logs, log_path, Log, LogReader},
    memtable::Memtable,
    root::Root,
    sst::{index::GlobalIndex, list_ssts, reader, sst_path, FileId},
};

mod compact;
mod flush;
mod options;

#[cfg(test)]
mod metamorphic_test;

pub use options::{Options, DEFAULT_SPARSE_FACTOR};

/// The memtable that currently takes writes, and its log.
#[derive(Debug)]
struct Generation {
    id: u64,
    memtable: Memtable,
    log: Log,
}

/// A generation that no longer takes writes and is waiting for (or in the
/// middle of) its flush. Reads still consult it.
#[derive(Debug)]
pub(crate) struct SealedGeneration {
    id: u64,
    memtable: Memtable,
    log_path: PathBuf,
}

pub(crate) struct State {
    active: Generation,
    // Oldest first.
    sealed: Vec<Arc<SealedGeneration>>,
    index: GlobalIndex,
    flushes: Vec<JoinHandle<anyhow::Result<()>>>,
}

pub(crate) struct Shared {
    sst_dir: PathBuf,
    log_dir: PathBuf,
    options: Options,
    last_id: AtomicU64,
    state: Mutex<State>,
    // Held for reading from the moment a get picks its file ranges until it
    // is done reading them; compaction holds it for writing while it swaps
    // files.
    files: RwLock<()>,
    compaction: Mutex<()>,
    root: Mutex<Root<GlobalIndex>>,
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Hands out ids for generations: the current time in nanoseconds, bumped as
/// needed so that every id is larger than the last.
fn fresh_id(last_id: &AtomicU64) -> u64 {
    let now = now_nanos();
    let mut cur = last_id.load(Ordering::SeqCst);
    loop {
        let next = std::cmp::max(now, cur + 1);
        match last_id.compare_exchange(cur, next, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return next,
            Err(actual) => cur = actual,
        }
    }
}

impl Shared {
    fn next_id(&self) -> u64 {
        fresh_id(&self.last_id)
    }

    /// Writes the in-memory global index to the root file.
    fn persist_index(&self) -> anyhow::Result<()> {
        let mut root = self.root.lock();
        let snapshot = self.state.lock().index.clone();
        root.write(snapshot)
    }
}

/// An open store. Dropping it closes it; use [`Store::close`] to see errors.
pub struct Store {
    shared: Arc<Shared>,
    closed: bool,
}

impl Store {
    /// Opens the store rooted at `root`, creating it if needed, and replays
    /// any logs a previous process left behind.
    ///
    /// The new active generation and its log are created first, with an id
    /// above every id already on disk, and the leftover logs are then
    /// replayed oldest first through [`Store::put`] into that generation. So
    /// a replayed record is in the new log before its old log is deleted,
    /// and a large replay seals and flushes generations the way live puts
    /// would. The store is returned only once every leftover log is gone.
    pub fn open<P: AsRef<Path>>(root: P, options: Options) -> anyhow::Result<Self> {
        options.validate()?;
        let root_dir = root.as_ref().to_owned();
        let sst_dir = root_dir.join("sst");
        let log_dir = root_dir.join("log");
        for dir in [&sst_dir, &log_dir] {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }

        let root: Root<GlobalIndex> = Root::load(root_dir.clone())?;
        let index = root.data().clone();

        let listing = list_ssts(&sst_dir)?;
        for path in &listing.compacting {
            tracing::warn!(
                "removing output of an unfinished compaction: {}",
                path.display()
            );
            fs::remove_file(path)?;
        }
        for id in listing.ids.iter().filter(|id| !index.contains(**id)) {
            tracing::warn!(
                "sorted file {} is on disk but not in the index; its contents will not be read",
                id
            );
        }

        let leftover_logs = list_logs(&log_dir)?;

        let last_id = [
            index.max_id().map(|id| id.generation),
            listing.ids.last().map(|id| id.generation),
            leftover_logs.last().copied(),
        ]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(0);
        let last_id = AtomicU64::new(last_id);

        let active_id = fresh_id(&last_id);
        let active = Generation {
            id: active_id,
            memtable: Memtable::new(),
            log: Log::create(&log_dir, active_id, options.sync_wal)?,
        };

        tracing::info!(
            "opened store at {} with {} sorted files",
            root_dir.display(),
            index.len()
        );

        let store = Store {
            shared: Arc::new(Shared {
                sst_dir,
                log_dir,
                options,
                last_id,
                state: Mutex::new(State {
                    active,
                    sealed: Vec::new(),
                    index,
                    flushes: Vec::new(),
                }),
                files: RwLock::new(()),
                compaction: Mutex::new(()),
                root: Mutex::new(root),
            }),
            closed: false,
        };

        for id in leftover_logs {
            store.replay_log(id)?;
        }

        Ok(store)
    }

    fn replay_log(&self, id: u64) -> anyhow::Result<()> {
        let path = log_path(&self.shared.log_dir, id);
        let mut replayed = 0;
        for record in LogReader::open(&path)? {
            let record = record?;
            let value = record
                .value()
                .with_context(|| format!("decompressing a value in {}", path.display()))?;
            self.put(&record.key, &value)?;
            replayed += 1;
        }
        fs::remove_file(&path).with_context(|| format!("removing {}", path.display()))?;
        tracing::info!("recovered {} records from log {}", replayed, id);
        Ok(())
    }

    pub fn options(&self) -> &Options {
        &self.shared.options
    }

    /// Stores `value` under `key`.
    ///
    /// Fails with [`RecordError::ValueTooLarge`](crate::RecordError) before
    /// touching anything if the value does not fit the record format.
    pub fn put<K, V>(&self, key: K, value: V) -> anyhow::Result<()>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let (key, value) = (key.as_ref(), value.as_ref());
        self.put_sized(key, value, value.len())
    }

    // `value_len` is what the size limits are checked against; tests pass a
    // length no real allocation could have.
    fn put_sized(&self, key: &[u8], value: &[u8], value_len: usize) -> anyhow::Result<()> {
        check_lengths(key.len(), value_len)?;
        let record = encode_record(key, value)?;

        let mut state = self.shared.state.lock();
        let logged = state.active.log.append(&record)?;
        state
            .active
            .memtable
            .insert(key.to_vec(), value.to_vec(), logged);

        if state.active.memtable.bytes_logged() >= self.shared.options.effective_dump_threshold()
        {
            flush::seal(&self.shared, &mut state)?;
        }
        Ok(())
    }

    /// Looks up the most recent value written under `key`.
    pub fn get<K: AsRef<[u8]>>(&self, key: K) -> anyhow::Result<Option<Vec<u8>>> {
        let key = key.as_ref();
        let _files = self.shared.files.read();

        let candidates = {
            let state = self.shared.state.lock();
            if let Some(v) = state.active.memtable.get(key) {
                return Ok(Some(v.to_vec()));
            }
            for sealed in state.sealed.iter().rev() {
                if let Some(v) = sealed.memtable.get(key) {
                    return Ok(Some(v.to_vec()));
                }
            }
            state.index.candidates(key)
        };

        for (id, range) in candidates {
            let path = sst_path(&self.shared.sst_dir, id);
            if let Some(v) = reader::get_in_range(&path, range, key)? {
                return Ok(Some(v));
            }
        }
        Ok(None)
    }

    /// Seals the active memtable and schedules its flush without waiting
    /// for it.
    pub fn flush_now(&self) -> anyhow::Result<()> {
        let mut state = self.shared.state.lock();
        flush::seal(&self.shared, &mut state)
    }

    /// Blocks until every flush scheduled before the call has finished.
    ///
    /// Returns the first flush failure, if any. Flushes scheduled while
    /// waiting may or may not be waited for.
    pub fn wait(&self) -> anyhow::Result<()> {
        let handles = std::mem::take(&mut self.shared.state.lock().flushes);
        let mut first_err = None;
        for handle in handles {
            let result = handle
                .join()
                .unwrap_or_else(|_| Err(anyhow!("flush task panicked")));
            if let Err(e) = result {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Merges every sorted file into one, keeping only the newest value of
    /// each key.
    pub fn compact(&self) -> anyhow::Result<()> {
        let _compaction = self.shared.compaction.lock();
        self.wait()?;

        // A generation still being flushed holds data newer than every file
        // below its id, so files from its id upwards must stay out of the
        // merge.
        let inputs: Vec<FileId> = {
            let state = self.shared.state.lock();
            let horizon = state.sealed.iter().map(|s| s.id).min();
            state
                .index
                .ids()
                .filter(|id| horizon.map_or(true, |h| id.generation < h))
                .collect()
        };

        if inputs.len() < 2 {
            tracing::debug!("nothing to compact ({} sorted files)", inputs.len());
            return Ok(());
        }
        compact::compact_files(&self.shared, &inputs)
    }

    /// Ids of the sorted files currently in the index, oldest first.
    pub fn sorted_files(&self) -> Vec<FileId> {
        self.shared.state.lock().index.ids().collect()
    }

    /// Waits for outstanding flushes and persists the index.
    pub fn close(mut self) -> anyhow::Result<()> {
        self.closed = true;
        self.shutdown()
    }

    fn shutdown(&self) -> anyhow::Result<()> {
        // A failed flush never registered anything, so the index is still
        // worth saving.
        let waited = self.wait();
        self.shared.persist_index()?;
        waited?;
        tracing::info!("closed store");
        Ok(())
    }

    /// Drops the store the way a crash would: nothing is persisted.
    #[cfg(test)]
    pub(crate) fn abandon(mut self) {
        self.closed = true;
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.shutdown() {
                tracing::error!("closing store failed: {:#}", e);
            }
        }
    }
}
