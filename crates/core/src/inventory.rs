//! Inventory building (C4): the two-sided listing a reconciliation pass
//! compares. Remote entries come from the object store's blob listing;
//! local entries come from a filesystem walk that skips symlinks so the
//! engine never silently follows one outside the synced tree.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use crate::chunker::{self, ChunkFingerprint, ChunkingParams};
use crate::metadata::{self, FileStat};
use crate::progress::{ProgressSink, TaskProgress};
use crate::store::{BlobRecord, ObjectStore};
use crate::{Error, Result};

/// What the engine knows about one remote blob before reconciliation.
/// `name` is the blob's real, full name in the object store (what
/// `ObjectStore` calls expect); the inventory map this lives in is keyed by
/// that name relativized against the scan prefix, so it lines up with
/// `build_local_inventory`'s root-relative keys.
#[derive(Debug, Clone)]
pub struct RemoteEntry {
    pub name: String,
    pub size: u64,
    pub content_md5: Option<String>,
    pub stat: FileStat,
}

/// What the engine knows about one local file before reconciliation.
#[derive(Debug, Clone)]
pub struct LocalEntry {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub stat: FileStat,
}

/// Build the remote side of the inventory, scoped to blobs whose name
/// starts with `prefix` (the scan path, in blob-name form; see
/// [`scan_prefix`]). Returned keys are relativized against `prefix` so they
/// line up with `build_local_inventory`'s root-relative keys.
pub fn build_remote_inventory(
    store: &dyn ObjectStore,
    prefix: &str,
    progress: &dyn ProgressSink,
) -> Result<BTreeMap<String, RemoteEntry>> {
    let blobs: Vec<BlobRecord> = store.list(prefix)?;
    let mut inventory = BTreeMap::new();
    for (i, blob) in blobs.into_iter().enumerate() {
        let stat = metadata::decode_filestat(&blob.metadata, blob.last_modified);
        let relative = blob.name.strip_prefix(prefix).unwrap_or(&blob.name).to_string();
        inventory.insert(
            relative,
            RemoteEntry {
                name: blob.name,
                size: blob.size,
                content_md5: blob.content_md5,
                stat,
            },
        );
        if i % 1000 == 0 {
            progress.on_progress(TaskProgress {
                entries_done: Some(i as u64),
                ..TaskProgress::phase("listing-remote")
            });
        }
    }
    Ok(inventory)
}

/// The blob-name prefix `P` a scan of `root` is scoped to (§4.4): `root`'s
/// own path string, forward-slashed and trailing-slashed so it only matches
/// blobs actually under that subtree rather than a sibling with the same
/// leading characters (`/data/photo` must not match `/data/photos/x`).
pub fn scan_prefix(root: &Path) -> String {
    let raw = root.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/");
    if raw.is_empty() || raw.ends_with('/') {
        raw
    } else {
        format!("{raw}/")
    }
}

/// Resolve a relative blob/local name to a filesystem path rooted at `base`,
/// splitting on `/` rather than joining the whole string so the result uses
/// the host's own path separator regardless of how the name was encoded.
pub fn local_path_under(base: &Path, name: &str) -> PathBuf {
    let mut path = base.to_path_buf();
    for part in name.split('/') {
        path.push(part);
    }
    path
}

pub fn build_local_inventory(root: &Path, progress: &dyn ProgressSink) -> Result<BTreeMap<String, LocalEntry>> {
    let mut inventory = BTreeMap::new();
    let mut count = 0u64;
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .expect("walked entry is under root")
            .to_path_buf();
        let name = relative.to_str().ok_or_else(|| Error::NonUtf8Path {
            path: relative.clone(),
        })?;
        // Blob names use forward slashes regardless of host path separator.
        let name = name.replace(std::path::MAIN_SEPARATOR, "/");

        let meta = entry.metadata().map_err(Error::from)?;
        let stat = local_stat(&meta);
        inventory.insert(
            name.clone(),
            LocalEntry {
                name,
                path: entry.path().to_path_buf(),
                size: meta.len(),
                stat,
            },
        );

        count += 1;
        if count % 1000 == 0 {
            progress.on_progress(TaskProgress {
                entries_done: Some(count),
                ..TaskProgress::phase("listing-local")
            });
        }
    }
    Ok(inventory)
}

#[cfg(unix)]
fn local_stat(meta: &std::fs::Metadata) -> FileStat {
    use std::os::unix::fs::MetadataExt;
    FileStat {
        mode: meta.mode(),
        uid: meta.uid(),
        gid: meta.gid(),
        mtime: meta.mtime() as f64 + (meta.mtime_nsec() as f64 / 1_000_000_000.0),
    }
}

#[cfg(not(unix))]
fn local_stat(meta: &std::fs::Metadata) -> FileStat {
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    FileStat {
        mode: 0,
        uid: 0,
        gid: 0,
        mtime,
    }
}

/// Chunk a local file and compute its whole-file id, used when the fast
/// path (size + mtime) can't decide skip vs. modify.
pub fn chunk_local_file(path: &Path, params: &ChunkingParams) -> Result<Vec<ChunkFingerprint>> {
    chunker::chunk_file(path, params)
}

pub fn last_modified_placeholder() -> DateTime<Utc> {
    Utc::now()
}
