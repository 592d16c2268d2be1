//! Reconciliation (C5): decide, for every name appearing on either side,
//! whether it needs pushing, pulling, or nothing at all. This module never
//! touches the network or the filesystem beyond what `inventory` already
//! read; it is pure classification over two maps.

use std::collections::BTreeMap;

use crate::chunker::ChunkingParams;
use crate::inventory::{LocalEntry, RemoteEntry};

/// A tagged action, replacing the positional "what to do" tuples this kind
/// of reconciler traditionally returns; each variant carries exactly the
/// data its executor needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    PushNew { name: String },
    PushModify { name: String },
    PullNew { name: String },
    PullModify { name: String },
}

impl Action {
    pub fn name(&self) -> &str {
        match self {
            Action::PushNew { name }
            | Action::PushModify { name }
            | Action::PullNew { name }
            | Action::PullModify { name } => name,
        }
    }

    pub fn is_push(&self) -> bool {
        matches!(self, Action::PushNew { .. } | Action::PushModify { .. })
    }

    pub fn is_pull(&self) -> bool {
        matches!(self, Action::PullNew { .. } | Action::PullModify { .. })
    }
}

/// Classify every name present locally, remotely, or both. `want_push` and
/// `want_pull` gate which directions are even considered, mirroring the
/// `--push`/`--pull` flags; a dry run passes both `false` and gets an empty
/// plan, which callers use purely for counting.
pub fn reconcile(
    local: &BTreeMap<String, LocalEntry>,
    remote: &BTreeMap<String, RemoteEntry>,
    want_push: bool,
    want_pull: bool,
) -> Vec<Action> {
    let mut actions = Vec::new();

    for (name, local_entry) in local {
        match remote.get(name) {
            None => {
                if want_push {
                    actions.push(Action::PushNew { name: name.clone() });
                }
            }
            Some(remote_entry) => {
                if let Some(action) = classify_present_on_both(name, local_entry, remote_entry) {
                    if (action.is_push() && want_push) || (action.is_pull() && want_pull) {
                        actions.push(action);
                    }
                }
            }
        }
    }

    for name in remote.keys() {
        if !local.contains_key(name) && want_pull {
            actions.push(Action::PullNew { name: name.clone() });
        }
    }

    actions
}

/// Decide what to do, if anything, for a name present on both sides. A
/// `None` result means the two sides already agree.
fn classify_present_on_both(
    name: &str,
    local_entry: &LocalEntry,
    remote_entry: &RemoteEntry,
) -> Option<Action> {
    if local_entry.size == remote_entry.size && local_entry.stat.mtime == remote_entry.stat.mtime {
        return None;
    }

    if let Some(remote_md5) = &remote_entry.content_md5 {
        if hashes_match(local_entry, remote_md5) {
            return None;
        }
    }

    // Local wins a tie: if mtimes agree exactly but sizes or hashes
    // disagree, or local is not older, treat it as a push rather than a pull.
    if local_entry.stat.mtime >= remote_entry.stat.mtime {
        Some(Action::PushModify { name: name.to_string() })
    } else {
        Some(Action::PullModify { name: name.to_string() })
    }
}

fn hashes_match(local_entry: &LocalEntry, remote_md5: &str) -> bool {
    match crate::inventory::chunk_local_file(&local_entry.path, &ChunkingParams::default()) {
        Ok(fps) => crate::chunker::whole_file_id(&fps) == Some(remote_md5),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::FileStat;
    use std::path::PathBuf;

    fn stat(mtime: f64) -> FileStat {
        FileStat {
            mode: 0o644,
            uid: 0,
            gid: 0,
            mtime,
        }
    }

    fn local(name: &str, size: u64, mtime: f64) -> LocalEntry {
        LocalEntry {
            name: name.to_string(),
            path: PathBuf::from(name),
            size,
            stat: stat(mtime),
        }
    }

    fn remote(name: &str, size: u64, mtime: f64, md5: Option<&str>) -> RemoteEntry {
        RemoteEntry {
            name: name.to_string(),
            size,
            content_md5: md5.map(str::to_string),
            stat: stat(mtime),
        }
    }

    #[test]
    fn local_only_is_push_new_when_pushing() {
        let mut l = BTreeMap::new();
        l.insert("a".to_string(), local("a", 10, 100.0));
        let r = BTreeMap::new();
        let actions = reconcile(&l, &r, true, true);
        assert_eq!(actions, vec![Action::PushNew { name: "a".to_string() }]);
    }

    #[test]
    fn local_only_is_skipped_when_not_pushing() {
        let mut l = BTreeMap::new();
        l.insert("a".to_string(), local("a", 10, 100.0));
        let r = BTreeMap::new();
        assert!(reconcile(&l, &r, false, true).is_empty());
    }

    #[test]
    fn remote_only_is_pull_new_when_pulling() {
        let l = BTreeMap::new();
        let mut r = BTreeMap::new();
        r.insert("a".to_string(), remote("a", 10, 100.0, None));
        let actions = reconcile(&l, &r, true, true);
        assert_eq!(actions, vec![Action::PullNew { name: "a".to_string() }]);
    }

    #[test]
    fn matching_size_and_mtime_is_skip() {
        let mut l = BTreeMap::new();
        l.insert("a".to_string(), local("a", 10, 100.0));
        let mut r = BTreeMap::new();
        r.insert("a".to_string(), remote("a", 10, 100.0, None));
        assert!(reconcile(&l, &r, true, true).is_empty());
    }

    #[test]
    fn tie_on_mtime_with_differing_size_prefers_push() {
        let mut l = BTreeMap::new();
        l.insert("a".to_string(), local("a", 20, 100.0));
        let mut r = BTreeMap::new();
        r.insert("a".to_string(), remote("a", 10, 100.0, None));
        let actions = reconcile(&l, &r, true, true);
        assert_eq!(actions, vec![Action::PushModify { name: "a".to_string() }]);
    }

    #[test]
    fn newer_remote_is_pull_modify() {
        let mut l = BTreeMap::new();
        l.insert("a".to_string(), local("a", 20, 100.0));
        let mut r = BTreeMap::new();
        r.insert("a".to_string(), remote("a", 10, 200.0, None));
        let actions = reconcile(&l, &r, true, true);
        assert_eq!(actions, vec![Action::PullModify { name: "a".to_string() }]);
    }

    #[test]
    fn newer_local_is_push_modify() {
        let mut l = BTreeMap::new();
        l.insert("a".to_string(), local("a", 20, 300.0));
        let mut r = BTreeMap::new();
        r.insert("a".to_string(), remote("a", 10, 100.0, None));
        let actions = reconcile(&l, &r, true, true);
        assert_eq!(actions, vec![Action::PushModify { name: "a".to_string() }]);
    }
}
