//! Push execution (C6): turn a `PushNew`/`PushModify` action into committed
//! blocks. Blocks already present on the remote (by content id) are reused
//! instead of re-uploaded; only genuinely new bytes travel over the wire.

use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use tracing::{debug, info, warn};

use crate::chunker::{self, ChunkingParams};
use crate::metadata::{self, FileStat};
use crate::store::ObjectStore;
use crate::{Error, Result};

pub struct PushOutcome {
    pub bytes_uploaded: u64,
    pub bytes_reused: u64,
}

/// Push `local_path` to `blob_name`, reusing any block the remote already
/// has committed under the same content id. Returns `Ok(None)` rather than
/// an error if the file disappeared out from under us mid-run, since a
/// vanished source file abandons this one push without failing the pass.
pub fn push_file(
    store: &dyn ObjectStore,
    local_path: &Path,
    blob_name: &str,
    local_stat: &FileStat,
    params: &ChunkingParams,
    no_write: bool,
) -> Result<Option<PushOutcome>> {
    let fingerprints = match chunker::chunk_file(local_path, params) {
        Ok(fps) => fps,
        Err(Error::ChunkerFailure { path, reason }) => {
            if !local_path.exists() {
                warn!(event = "push.source_vanished", path = %local_path.display(), "file disappeared before it could be pushed; skipping");
                return Ok(None);
            }
            return Err(Error::ChunkerFailure { path, reason });
        }
        Err(e) => return Err(e),
    };

    let already_committed: HashSet<String> = store
        .get_block_list(blob_name)
        .map(|blocks| blocks.into_iter().map(|b| b.id).collect())
        .unwrap_or_default();

    let mut file = match File::open(local_path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(event = "push.source_vanished", path = %local_path.display(), "file disappeared before it could be pushed; skipping");
            return Ok(None);
        }
        Err(e) => return Err(Error::Io(e)),
    };

    let mut block_ids = Vec::new();
    let mut bytes_uploaded = 0u64;
    let mut bytes_reused = 0u64;
    let mut offset = 0u64;

    for fp in &fingerprints {
        if fp.is_terminator() {
            continue;
        }
        block_ids.push(fp.id.clone());

        if already_committed.contains(&fp.id) {
            bytes_reused += fp.length;
            offset += fp.length;
            continue;
        }

        let mut buf = vec![0u8; fp.length as usize];
        file.seek(SeekFrom::Start(offset)).map_err(Error::Io)?;
        file.read_exact(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::ChunkerFailure {
                    path: local_path.to_path_buf(),
                    reason: "file shrank while being pushed".to_string(),
                }
            } else {
                Error::Io(e)
            }
        })?;

        if !no_write {
            store.put_block(blob_name, &fp.id, &buf)?;
        }
        bytes_uploaded += fp.length;
        offset += fp.length;
    }

    debug!(
        event = "push.blocks_planned",
        blob = blob_name,
        total_blocks = block_ids.len(),
        reused_blocks = already_committed.len(),
    );

    if !no_write {
        let metadata = metadata::build_metadata(local_stat)?;
        store.commit_block_list(blob_name, &block_ids, &metadata)?;
    }

    info!(
        event = "push.committed",
        blob = blob_name,
        bytes_uploaded,
        bytes_reused,
        no_write,
    );

    Ok(Some(PushOutcome {
        bytes_uploaded,
        bytes_reused,
    }))
}
