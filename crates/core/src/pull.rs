//! Pull execution (C7) and stat application (§4.8). A pull writes to a
//! temp file in the destination directory, then renames it into place, so
//! a crash mid-write never leaves a half-written target behind.

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::chunker::{self, ChunkingParams};
use crate::metadata::FileStat;
use crate::store::ObjectStore;
use crate::{Error, Result};

pub struct PullOutcome {
    pub bytes_downloaded: u64,
    pub bytes_reused: u64,
}

/// Pull `blob_name` into `local_path`. If `local_path` already exists, its
/// chunks are reused by id instead of downloading ranges the remote already
/// agrees with us on.
pub fn pull_file(
    store: &dyn ObjectStore,
    blob_name: &str,
    local_path: &Path,
    remote_stat: &FileStat,
    params: &ChunkingParams,
    no_write: bool,
) -> Result<PullOutcome> {
    let remote_blocks = store.get_block_list(blob_name)?;

    let local_offsets: HashMap<String, (u64, u64)> = match chunker::chunk_file(local_path, params) {
        Ok(fps) => chunker::offset_map(&fps)
            .into_iter()
            .map(|(id, v)| (id.to_string(), v))
            .collect(),
        Err(_) => HashMap::new(),
    };

    if no_write {
        let bytes_reused: u64 = remote_blocks
            .iter()
            .filter(|b| local_offsets.contains_key(&b.id))
            .map(|b| b.length)
            .sum();
        let bytes_downloaded: u64 = remote_blocks.iter().map(|b| b.length).sum::<u64>() - bytes_reused;
        return Ok(PullOutcome {
            bytes_downloaded,
            bytes_reused,
        });
    }

    let dest_dir = local_path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dest_dir).map_err(Error::Io)?;
    let mut temp = NamedTempFile::new_in(dest_dir).map_err(Error::Io)?;

    let mut local_file = File::open(local_path).ok();
    let mut bytes_downloaded = 0u64;
    let mut bytes_reused = 0u64;
    let mut remote_offset = 0u64;

    for block in &remote_blocks {
        if let Some((offset, length)) = local_offsets.get(&block.id) {
            if let Some(ref mut f) = local_file {
                let mut buf = vec![0u8; *length as usize];
                read_exact_at(f, *offset, &mut buf)?;
                temp.write_all(&buf).map_err(Error::Io)?;
                bytes_reused += *length;
                remote_offset += block.length;
                continue;
            }
        }

        let bytes = store.get_blob_range(blob_name, remote_offset, block.length)?;
        temp.write_all(&bytes).map_err(Error::Io)?;
        bytes_downloaded += block.length;
        remote_offset += block.length;
    }

    temp.flush().map_err(Error::Io)?;
    temp.as_file().sync_all().map_err(Error::Io)?;
    let temp_path = temp.into_temp_path();
    temp_path.persist(local_path).map_err(|e| Error::Io(e.error))?;

    apply_stat(local_path, remote_stat)?;

    debug!(event = "pull.written", blob = blob_name, bytes_downloaded, bytes_reused);
    info!(event = "pull.committed", blob = blob_name, path = %local_path.display());

    Ok(PullOutcome {
        bytes_downloaded,
        bytes_reused,
    })
}

#[cfg(unix)]
fn read_exact_at(file: &mut File, offset: u64, buf: &mut [u8]) -> Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset).map_err(Error::Io)
}

#[cfg(not(unix))]
fn read_exact_at(file: &mut File, offset: u64, buf: &mut [u8]) -> Result<()> {
    use std::io::{Read, Seek, SeekFrom};
    file.seek(SeekFrom::Start(offset)).map_err(Error::Io)?;
    file.read_exact(buf).map_err(Error::Io)
}

/// Apply the remote-recorded stat to a just-written file, strictly after
/// the rename landed it: chown (root only) before utime, utime before the
/// final chmod, so a partial failure never leaves wider permissions than
/// intended mid-sequence.
#[cfg(unix)]
pub fn apply_stat(path: &Path, stat: &FileStat) -> Result<()> {
    use nix::sys::stat::{UtimensatFlags, utimensat};
    use nix::sys::time::TimeSpec;
    use nix::unistd::{Gid, Uid, chown};

    if nix::unistd::geteuid().is_root() {
        chown(path, Some(Uid::from_raw(stat.uid)), Some(Gid::from_raw(stat.gid)))
            .map_err(|e| Error::Io(std::io::Error::from(e)))?;
    }

    let whole_secs = stat.mtime.trunc() as i64;
    let nanos = ((stat.mtime.fract()) * 1_000_000_000.0) as i64;
    let ts = TimeSpec::new(whole_secs, nanos);
    utimensat(None, path, &ts, &ts, UtimensatFlags::FollowSymlink)
        .map_err(|e| Error::Io(std::io::Error::from(e)))?;

    let perms = std::fs::Permissions::from_mode(stat.mode & 0o7777);
    std::fs::set_permissions(path, perms).map_err(Error::Io)?;
    Ok(())
}

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

#[cfg(not(unix))]
pub fn apply_stat(path: &Path, stat: &FileStat) -> Result<()> {
    let now = std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs_f64(stat.mtime.max(0.0));
    let file = std::fs::OpenOptions::new().write(true).open(path).map_err(Error::Io)?;
    file.set_modified(now).map_err(Error::Io)
}
