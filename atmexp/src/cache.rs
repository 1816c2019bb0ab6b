//! Filesystem helpers shared by the data and shapefile caches. Files only become visible under
//! their final name once completely written.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::debug;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::error::{AtmExpError, AtmExpResult};

/// Number of hex characters of the request hash used in file names.
pub const REQUEST_HASH_LEN: usize = 12;

/// Suffix of the file describing the request a data file was downloaded for.
pub const REQUEST_SIDECAR_SUFFIX: &str = ".request.json";

/// A persisted file of the data cache.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CacheEntry {
    path: PathBuf,
}

impl CacheEntry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
    }

    pub fn sidecar_path(&self) -> PathBuf {
        sidecar_path(&self.path)
    }
}

pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(REQUEST_SIDECAR_SUFFIX);
    PathBuf::from(name)
}

/// Deterministic short hash of the canonical JSON form of `identity`. Sets must be ordered
/// collections so equal requests serialise identically.
pub fn request_hash(identity: &impl Serialize) -> AtmExpResult<String> {
    let canonical = serde_json::to_vec(identity)?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(REQUEST_HASH_LEN);
    Ok(digest)
}

/// Files written under temporary names next to their destination. Nothing is visible under a
/// final name before `commit`; dropping an uncommitted batch deletes its temporary files and
/// leaves existing files untouched.
#[derive(Debug, Default)]
pub struct StagedFiles {
    staged: Vec<(NamedTempFile, PathBuf)>,
}

impl StagedFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    pub fn stage(&mut self, path: &Path, contents: &[u8]) -> AtmExpResult<()> {
        let mut tmp = Self::temp_file_for(path)?;
        tmp.write_all(contents)?;
        self.push(tmp, path)
    }

    /// Stages whatever `reader` yields, without holding it in memory.
    pub fn stage_reader(&mut self, path: &Path, reader: &mut impl io::Read) -> AtmExpResult<()> {
        let mut tmp = Self::temp_file_for(path)?;
        io::copy(reader, &mut tmp)?;
        self.push(tmp, path)
    }

    fn temp_file_for(path: &Path) -> AtmExpResult<NamedTempFile> {
        let dir = path
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
        fs::create_dir_all(dir)?;
        Ok(NamedTempFile::new_in(dir)?)
    }

    fn push(&mut self, tmp: NamedTempFile, path: &Path) -> AtmExpResult<()> {
        tmp.as_file().sync_all()?;
        self.staged.push((tmp, path.to_path_buf()));
        Ok(())
    }

    /// Renames every staged file to its destination, in staging order.
    pub fn commit(self) -> AtmExpResult<Vec<PathBuf>> {
        let mut committed = Vec::with_capacity(self.staged.len());
        for (tmp, path) in self.staged {
            tmp.persist(&path).map_err(|e| AtmExpError::IOError(e.error))?;
            debug!("wrote {}", path.display());
            committed.push(path);
        }
        Ok(committed)
    }
}

/// Files directly inside `dir` whose name starts with `prefix` and has `extension`, sorted by
/// file name. A missing directory holds no entries.
pub fn list_entries(dir: &Path, prefix: &str, extension: &str) -> AtmExpResult<Vec<CacheEntry>> {
    let read_dir = match fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(e.into()),
    };
    let mut entries = vec![];
    for item in read_dir {
        let path = item?.path();
        let matches = path.is_file()
            && path.extension().and_then(|e| e.to_str()) == Some(extension)
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(prefix));
        if matches {
            entries.push(CacheEntry::new(path));
        }
    }
    entries.sort();
    Ok(entries)
}

/// Every file with `extension` below `dir`, sorted by path.
pub fn list_entries_recursive(dir: &Path, extension: &str) -> AtmExpResult<Vec<CacheEntry>> {
    let mut entries = vec![];
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let read_dir = match fs::read_dir(&current) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        for item in read_dir {
            let path = item?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().and_then(|e| e.to_str()) == Some(extension) {
                entries.push(CacheEntry::new(path));
            }
        }
    }
    entries.sort();
    Ok(entries)
}

fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Deletes the entries and their request sidecars. Entries already gone are ignored.
pub fn remove_entries(entries: &[CacheEntry]) -> AtmExpResult<()> {
    for entry in entries {
        remove_file_if_exists(entry.path())?;
        remove_file_if_exists(&entry.sidecar_path())?;
        debug!("removed {}", entry.path().display());
    }
    Ok(())
}

/// Deletes `dir` and everything below it, if it exists.
pub fn remove_dir_if_exists(dir: &Path) -> AtmExpResult<()> {
    match fs::remove_dir_all(dir) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}
