use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::{de::DeserializeOwned, Serialize};

const ROOT_NAME: &str = "ROOT";
const ROOT_TMP_NAME: &str = "ROOT_TMP";

/// The `ROOT` file at the top of a store directory, holding one JSON value.
///
/// Saving writes the new value beside the old one and renames it into
/// place, so a reader of the directory sees either the old value or the
/// new one in full.
pub struct Root<T> {
    dir: PathBuf,
    data: T,
}

impl<T> Root<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    /// Reads `<dir>/ROOT`. A store that has never saved one starts from
    /// `T::default()`, which is written out straight away.
    pub fn load<P: Into<PathBuf>>(dir: P) -> anyhow::Result<Self> {
        let dir = dir.into();
        let path = dir.join(ROOT_NAME);
        let data = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("parsing {}", path.display()))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let mut root = Root {
                    dir,
                    data: T::default(),
                };
                root.write(T::default())?;
                return Ok(root);
            }
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        Ok(Root { dir, data })
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    /// Replaces the saved value with `data`. Once this returns the new value
    /// survives a crash.
    pub fn write(&mut self, data: T) -> anyhow::Result<()> {
        let encoded = serde_json::to_vec(&data)?;
        let tmp = self.dir.join(ROOT_TMP_NAME);
        {
            let mut file =
                File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
            file.write_all(&encoded)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, self.dir.join(ROOT_NAME)).context("replacing ROOT")?;
        sync_dir(&self.dir)?;
        self.data = data;
        Ok(())
    }
}

// The rename is an update to the directory, which has its own fsync.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> anyhow::Result<()> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .with_context(|| format!("syncing {}", dir.display()))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> anyhow::Result<()> {
    Ok(())
}
