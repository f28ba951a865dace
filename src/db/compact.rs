use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context};

use crate::sst::{
    compacting_path, index::SparseIndex, reader::SstCursor, sst_path, writer::SstWriter, FileId,
};

use super::Shared;

/// Removes a half-written output unless the compaction got far enough to
/// install it.
struct PendingOutput {
    path: PathBuf,
    installed: bool,
}

impl Drop for PendingOutput {
    fn drop(&mut self) {
        if !self.installed {
            if let Err(e) = fs::remove_file(&self.path) {
                tracing::warn!(
                    "could not remove compaction output {}: {}",
                    self.path.display(),
                    e
                );
            }
        }
    }
}

/// Index of the cursor holding the smallest key. On a tie the cursor over
/// the newest file wins.
fn lowest(cursors: &[SstCursor]) -> Option<usize> {
    cursors
        .iter()
        .enumerate()
        .filter_map(|(idx, c)| c.peek().map(|r| (idx, r.key.as_slice(), c.id())))
        .min_by(|(_, k1, id1), (_, k2, id2)| k1.cmp(k2).then(id2.cmp(id1)))
        .map(|(idx, _, _)| idx)
}

/// Merges the cursors into `out`, writing every key once with the value from
/// the newest file that has it.
pub(crate) fn merge(mut cursors: Vec<SstCursor>, out: &mut SstWriter) -> anyhow::Result<usize> {
    let mut written = 0;
    cursors.retain(|c| !c.is_exhausted());
    while let Some(idx) = lowest(&cursors) {
        let winner = match cursors[idx].peek() {
            Some(r) => r.clone(),
            None => break,
        };
        out.add_compressed(&winner.key, &winner.compressed)?;
        written += 1;

        for c in cursors.iter_mut() {
            if c.peek().map_or(false, |r| r.key == winner.key) {
                c.advance()?;
            }
        }
        cursors.retain(|c| !c.is_exhausted());
    }
    Ok(written)
}

/// Merges the sorted files `inputs` (ascending ids) into one new file ranked
/// just above the newest input.
///
/// The output gets a name of its own, so until the index that lists it has
/// been saved, every file the saved index refers to is still on disk
/// unchanged. Inputs are only deleted after that.
pub(crate) fn compact_files(shared: &Shared, inputs: &[FileId]) -> anyhow::Result<()> {
    let output_id = match inputs.last() {
        Some(id) => id.next_version(),
        None => return Ok(()),
    };

    let mut output = PendingOutput {
        path: compacting_path(&shared.sst_dir, output_id),
        installed: false,
    };

    // Open every input up front; they are all closed when `cursors` is
    // consumed by the merge, whichever way it ends.
    let cursors = inputs
        .iter()
        .map(|id| SstCursor::open(*id, sst_path(&shared.sst_dir, *id)))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut writer = SstWriter::create(&output.path, shared.options.sparse_factor)?;
    let written = merge(cursors, &mut writer)?;
    let index = writer.finish()?;

    install(shared, inputs, output_id, &output.path, index)?;
    output.installed = true;

    shared.persist_index()?;

    for id in inputs {
        let path = sst_path(&shared.sst_dir, *id);
        fs::remove_file(&path).with_context(|| format!("removing {}", path.display()))?;
    }

    tracing::info!(
        "compacted {} sorted files into {} ({} keys)",
        inputs.len(),
        output_id,
        written
    );
    Ok(())
}

// Gives the output its final name and swaps the index entries while no
// reader is between picking a range and reading it.
fn install(
    shared: &Shared,
    inputs: &[FileId],
    output_id: FileId,
    output_path: &Path,
    index: SparseIndex,
) -> anyhow::Result<()> {
    let _files = shared.files.write();
    let mut state = shared.state.lock();
    if state.index.contains(output_id) {
        bail!("compaction output {} is already a live file", output_id);
    }
    fs::rename(output_path, sst_path(&shared.sst_dir, output_id))
        .context("installing compaction output")?;
    for id in inputs {
        state.index.remove(*id);
    }
    state.index.register(output_id, index);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::merge;
    use crate::sst::{
        index::SparseIndex,
        reader::{get_in_range, SstCursor},
        writer::SstWriter,
    };

    fn write(dir: &std::path::Path, id: u64, kvs: &[(&str, &str)]) -> std::path::PathBuf {
        let path = dir.join(format!("{}.sst", id));
        let mut w = SstWriter::create(&path, 16).unwrap();
        for (k, v) in kvs {
            w.add(k.as_bytes(), v.as_bytes()).unwrap();
        }
        w.finish().unwrap();
        path
    }

    fn lookup(path: &std::path::Path, index: &SparseIndex, key: &str) -> Option<String> {
        let range = index.candidate_range(key.as_bytes())?;
        get_in_range(path, range, key.as_bytes())
            .unwrap()
            .map(|v| String::from_utf8(v).unwrap())
    }

    #[test]
    fn test_merge_prefers_newest_file() {
        let dir = tempfile::tempdir().unwrap();
        let old = write(dir.path(), 1, &[("apple", "old"), ("kiwi", "k"), ("orange", "v1")]);
        let new = write(dir.path(), 2, &[("banana", "b"), ("orange", "v2")]);
        let newest = write(dir.path(), 3, &[("apple", "newest")]);

        // Cursor order must not matter, only ids.
        let cursors = vec![
            SstCursor::open(3.into(), &newest).unwrap(),
            SstCursor::open(1.into(), &old).unwrap(),
            SstCursor::open(2.into(), &new).unwrap(),
        ];
        let out_path = dir.path().join("out.sst");
        let mut out = SstWriter::create(&out_path, 16).unwrap();
        assert_eq!(merge(cursors, &mut out).unwrap(), 4);
        let index = out.finish().unwrap();

        assert_eq!(lookup(&out_path, &index, "apple").as_deref(), Some("newest"));
        assert_eq!(lookup(&out_path, &index, "banana").as_deref(), Some("b"));
        assert_eq!(lookup(&out_path, &index, "kiwi").as_deref(), Some("k"));
        assert_eq!(lookup(&out_path, &index, "orange").as_deref(), Some("v2"));
        assert_eq!(lookup(&out_path, &index, "pear"), None);

        let mut c = SstCursor::open(9.into(), &out_path).unwrap();
        let mut keys = Vec::new();
        while let Some(r) = c.peek() {
            keys.push(String::from_utf8(r.key.clone()).unwrap());
            c.advance().unwrap();
        }
        assert_eq!(keys, vec!["apple", "banana", "kiwi", "orange"]);
    }

    #[test]
    fn test_merge_with_empty_input() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.sst");
        std::fs::write(&empty, b"").unwrap();
        let full = write(dir.path(), 2, &[("a", "1")]);

        let cursors = vec![
            SstCursor::open(1.into(), &empty).unwrap(),
            SstCursor::open(2.into(), &full).unwrap(),
        ];
        let out_path = dir.path().join("out.sst");
        let mut out = SstWriter::create(&out_path, 16).unwrap();
        assert_eq!(merge(cursors, &mut out).unwrap(), 1);
    }
}
