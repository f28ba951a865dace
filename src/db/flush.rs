use std::{fs, sync::Arc, thread};

use anyhow::Context;

use crate::{
    log::Log,
    memtable::Memtable,
    sst::{index::SparseIndex, sst_path, writer::SstWriter, FileId},
};

use super::{Generation, SealedGeneration, Shared, State};

/// Swaps the active generation for an empty one with a fresh log and hands
/// the old one to a background flush.
///
/// Must be called with the state lock held, so that no put can land between
/// the old log and the new one.
pub(crate) fn seal(shared: &Arc<Shared>, state: &mut State) -> anyhow::Result<()> {
    let id = shared.next_id();
    let log = Log::create(&shared.log_dir, id, shared.options.sync_wal)?;
    let Generation {
        id: sealed_id,
        memtable,
        log: old_log,
    } = std::mem::replace(
        &mut state.active,
        Generation {
            id,
            memtable: Memtable::new(),
            log,
        },
    );

    let sealed = Arc::new(SealedGeneration {
        id: sealed_id,
        memtable,
        log_path: old_log.path().to_owned(),
    });
    drop(old_log);
    tracing::debug!(
        "sealed generation {} ({} keys), new active generation {}",
        sealed.id,
        sealed.memtable.len(),
        id
    );

    state.sealed.push(Arc::clone(&sealed));

    let task_shared = Arc::clone(shared);
    let handle = thread::Builder::new()
        .name(format!("flush-{}", sealed.id))
        .spawn(move || run_flush(&task_shared, &sealed))
        .context("spawning flush task")?;
    state.flushes.push(handle);

    Ok(())
}

/// The body of one background flush.
///
/// On failure the generation stays in the sealed list and its log stays on
/// disk, so reads keep seeing its data and the next open replays it.
fn run_flush(shared: &Shared, sealed: &SealedGeneration) -> anyhow::Result<()> {
    let result = flush_generation(shared, sealed);
    if let Err(e) = &result {
        tracing::error!("flush of generation {} failed: {:#}", sealed.id, e);
    }
    result
}

fn flush_generation(shared: &Shared, sealed: &SealedGeneration) -> anyhow::Result<()> {
    if !sealed.memtable.is_empty() {
        let index = write_sorted_file(shared, sealed)?;
        let mut state = shared.state.lock();
        state.index.register(FileId::new(sealed.id), index);
    }

    fs::remove_file(&sealed.log_path)
        .with_context(|| format!("removing log {}", sealed.log_path.display()))?;

    let mut state = shared.state.lock();
    state.sealed.retain(|s| s.id != sealed.id);
    drop(state);

    tracing::info!(
        "flushed generation {} ({} keys)",
        sealed.id,
        sealed.memtable.len()
    );
    Ok(())
}

fn write_sorted_file(shared: &Shared, sealed: &SealedGeneration) -> anyhow::Result<SparseIndex> {
    let path = sst_path(&shared.sst_dir, FileId::new(sealed.id));
    let mut writer = SstWriter::create(&path, shared.options.sparse_factor)?;
    for (k, v) in sealed.memtable.iter() {
        writer.add(k, v)?;
    }
    writer.finish()
}
