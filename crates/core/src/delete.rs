//! Delete propagation (C8): nuke-mode legality and the two delete passes
//! that run after a push or pull has already reconciled content.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::info;

use crate::inventory::{self, LocalEntry, RemoteEntry};
use crate::store::ObjectStore;
use crate::{Error, Result};

/// The exactly-one-of push/pull-plus-delete rule: `push+pull+delete` would
/// leave the direction of propagation ambiguous, so it's rejected before
/// any I/O happens rather than resolved by a fallback ordering.
pub fn check_nuke_legality(push: bool, pull: bool, delete: bool) -> Result<()> {
    if delete && push && pull {
        return Err(Error::IllegalNukeCombination);
    }
    Ok(())
}

/// After a push, remove remote blobs that have no local counterpart.
pub fn delete_remote_only(
    store: &dyn ObjectStore,
    local: &BTreeMap<String, LocalEntry>,
    remote: &BTreeMap<String, RemoteEntry>,
    no_write: bool,
) -> Result<u64> {
    let mut deleted = 0u64;
    for (name, entry) in remote {
        if !local.contains_key(name) {
            if !no_write {
                store.delete(&entry.name)?;
            }
            info!(event = "delete.remote", blob = %entry.name, no_write);
            deleted += 1;
        }
    }
    Ok(deleted)
}

/// After a pull, remove local-only files. The target lives under
/// `write_prefix` rather than wherever the scanned source tree put it
/// (§6.4): the same safety barrier pull writes land under also bounds the
/// files pulling is allowed to delete.
pub fn delete_local_only(
    write_prefix: &Path,
    local: &BTreeMap<String, LocalEntry>,
    remote: &BTreeMap<String, RemoteEntry>,
    no_write: bool,
) -> Result<u64> {
    let mut deleted = 0u64;
    for name in local.keys() {
        if !remote.contains_key(name) {
            let path = inventory::local_path_under(write_prefix, name);
            if !no_write {
                std::fs::remove_file(&path).map_err(Error::Io)?;
            }
            info!(event = "delete.local", path = %path.display(), no_write);
            deleted += 1;
        }
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::FileStat;
    use crate::store::InMemoryObjectStore;
    use std::path::PathBuf;

    fn stat() -> FileStat {
        FileStat {
            mode: 0,
            uid: 0,
            gid: 0,
            mtime: 0.0,
        }
    }

    #[test]
    fn rejects_push_pull_delete_together() {
        assert!(check_nuke_legality(true, true, true).is_err());
    }

    #[test]
    fn allows_push_plus_delete() {
        assert!(check_nuke_legality(true, false, true).is_ok());
    }

    #[test]
    fn allows_pull_plus_delete() {
        assert!(check_nuke_legality(false, true, true).is_ok());
    }

    #[test]
    fn deletes_remote_blobs_with_no_local_match() {
        let store = InMemoryObjectStore::new();
        store.put_block("orphan", "x", b"data").unwrap();
        store
            .commit_block_list("orphan", &["x".to_string()], &Default::default())
            .unwrap();

        let local = BTreeMap::new();
        let mut remote = BTreeMap::new();
        remote.insert(
            "orphan".to_string(),
            RemoteEntry {
                name: "orphan".to_string(),
                size: 4,
                content_md5: None,
                stat: stat(),
            },
        );

        let deleted = delete_remote_only(&store, &local, &remote, false).unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get_blob("orphan").is_err());
    }

    #[test]
    fn deletes_local_files_with_no_remote_match() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orphan.txt");
        std::fs::write(&path, b"data").unwrap();

        let mut local = BTreeMap::new();
        local.insert(
            "orphan.txt".to_string(),
            LocalEntry {
                name: "orphan.txt".to_string(),
                path: path.clone(),
                size: 4,
                stat: stat(),
            },
        );
        let remote = BTreeMap::new();

        let deleted = delete_local_only(dir.path(), &local, &remote, false).unwrap();
        assert_eq!(deleted, 1);
        assert!(!path.exists());
    }

    #[test]
    fn nowrite_counts_without_deleting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orphan.txt");
        std::fs::write(&path, b"data").unwrap();

        let mut local = BTreeMap::new();
        local.insert(
            "orphan.txt".to_string(),
            LocalEntry {
                name: "orphan.txt".to_string(),
                path: path.clone(),
                size: 4,
                stat: stat(),
            },
        );
        let remote = BTreeMap::new();

        let deleted = delete_local_only(dir.path(), &local, &remote, true).unwrap();
        assert_eq!(deleted, 1);
        assert!(path.exists());
    }
}
