//! The orchestrator (C9): ties inventory, reconciliation, push, pull, and
//! delete together behind one explicit context struct. Nothing here is
//! global or thread-local; a host can run several `SyncContext`s in the
//! same process without them stepping on each other.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::chunker::ChunkingParams;
use crate::delete;
use crate::inventory::{self, LocalEntry, RemoteEntry};
use crate::progress::{NullProgressSink, ProgressSink, TaskProgress};
use crate::pull;
use crate::push;
use crate::reconcile::{self, Action};
use crate::store::ObjectStore;
use crate::Result;

/// Which directions this run is allowed to act in. Constructed once per
/// invocation and threaded through every phase instead of read back out of
/// global flags.
#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    pub push: bool,
    pub pull: bool,
    pub delete: bool,
    pub no_write: bool,
}

/// Tallies from one completed pass over one path, returned to the caller
/// for reporting (and asserted against in tests).
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SyncReport {
    pub pushed: u64,
    pub pulled: u64,
    pub deleted: u64,
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
    pub bytes_reused: u64,
}

/// Everything a sync pass needs that isn't per-call data: the object store
/// handle, chunking parameters, an optional progress sink, and the write
/// prefix every pull destination and local-only delete is rooted under
/// (§6.4's safety barrier).
pub struct SyncContext<'a> {
    pub store: &'a dyn ObjectStore,
    pub chunking: ChunkingParams,
    pub progress: &'a dyn ProgressSink,
    pub write_prefix: PathBuf,
}

impl<'a> SyncContext<'a> {
    pub fn new(store: &'a dyn ObjectStore) -> Self {
        Self {
            store,
            chunking: ChunkingParams::default(),
            progress: &NullProgressSink,
            write_prefix: PathBuf::new(),
        }
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_chunking(mut self, chunking: ChunkingParams) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn with_write_prefix(mut self, write_prefix: PathBuf) -> Self {
        self.write_prefix = write_prefix;
        self
    }
}

/// Run one full pass over `root`: build both inventories, reconcile, then
/// execute (or, with neither push nor pull requested, just report) the
/// resulting plan.
pub fn sync_path(ctx: &SyncContext<'_>, root: &Path, options: &SyncOptions) -> Result<SyncReport> {
    delete::check_nuke_legality(options.push, options.pull, options.delete)?;
    options.chunking_is_valid(&ctx.chunking)?;

    let prefix = inventory::scan_prefix(root);
    ctx.progress.on_progress(TaskProgress::phase("listing-remote"));
    let remote = inventory::build_remote_inventory(ctx.store, &prefix, ctx.progress)?;

    ctx.progress.on_progress(TaskProgress::phase("listing-local"));
    let local = inventory::build_local_inventory(root, ctx.progress)?;

    ctx.progress.on_progress(TaskProgress::phase("reconciling"));
    let actions = reconcile::reconcile(&local, &remote, options.push, options.pull);

    let mut report = SyncReport::default();

    if options.push || options.pull {
        ctx.progress.on_progress(TaskProgress::phase("applying"));
        apply_actions(ctx, &prefix, &actions, &local, &remote, options, &mut report)?;
    } else {
        info!(event = "sync.dry_run", planned = actions.len(), "dry run: no I/O performed");
    }

    if options.delete {
        ctx.progress.on_progress(TaskProgress::phase("deleting"));
        if options.push {
            report.deleted += delete::delete_remote_only(ctx.store, &local, &remote, options.no_write)?;
        }
        if options.pull {
            report.deleted +=
                delete::delete_local_only(&ctx.write_prefix, &local, &remote, options.no_write)?;
        }
    }

    Ok(report)
}

fn apply_actions(
    ctx: &SyncContext<'_>,
    prefix: &str,
    actions: &[Action],
    local: &std::collections::BTreeMap<String, LocalEntry>,
    remote: &std::collections::BTreeMap<String, RemoteEntry>,
    options: &SyncOptions,
    report: &mut SyncReport,
) -> Result<()> {
    for action in actions {
        match action {
            Action::PushNew { name } | Action::PushModify { name } => {
                let entry = match local.get(name) {
                    Some(entry) => entry,
                    None => continue,
                };
                let blob_name = format!("{prefix}{name}");
                let outcome = push::push_file(
                    ctx.store,
                    &entry.path,
                    &blob_name,
                    &entry.stat,
                    &ctx.chunking,
                    options.no_write,
                )?;
                if let Some(outcome) = outcome {
                    report.pushed += 1;
                    report.bytes_uploaded += outcome.bytes_uploaded;
                    report.bytes_reused += outcome.bytes_reused;
                }
            }
            Action::PullNew { name } | Action::PullModify { name } => {
                let remote_entry = match remote.get(name) {
                    Some(entry) => entry,
                    None => continue,
                };
                let local_path = inventory::local_path_under(&ctx.write_prefix, name);
                let outcome = pull::pull_file(
                    ctx.store,
                    &remote_entry.name,
                    &local_path,
                    &remote_entry.stat,
                    &ctx.chunking,
                    options.no_write,
                )?;
                report.pulled += 1;
                report.bytes_downloaded += outcome.bytes_downloaded;
                report.bytes_reused += outcome.bytes_reused;
            }
        }
    }
    Ok(())
}

impl SyncOptions {
    fn chunking_is_valid(&self, chunking: &ChunkingParams) -> Result<()> {
        chunking.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryObjectStore;

    #[test]
    fn illegal_nuke_combination_rejected_before_any_io() {
        let store = InMemoryObjectStore::new();
        let ctx = SyncContext::new(&store);
        let dir = tempfile::tempdir().unwrap();
        let options = SyncOptions {
            push: true,
            pull: true,
            delete: true,
            no_write: false,
        };
        let result = sync_path(&ctx, dir.path(), &options);
        assert!(result.is_err());
    }

    #[test]
    fn dry_run_reports_nothing_and_writes_nothing() {
        let store = InMemoryObjectStore::new();
        let ctx = SyncContext::new(&store);
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();

        let options = SyncOptions {
            push: false,
            pull: false,
            delete: false,
            no_write: false,
        };
        let report = sync_path(&ctx, dir.path(), &options).unwrap();
        assert_eq!(report, SyncReport::default());
        assert!(store.list("").unwrap().is_empty());
    }

    #[test]
    fn push_only_uploads_new_local_file() {
        let store = InMemoryObjectStore::new();
        let ctx = SyncContext::new(&store);
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), vec![1u8; 4096]).unwrap();

        let options = SyncOptions {
            push: true,
            pull: false,
            delete: false,
            no_write: false,
        };
        let report = sync_path(&ctx, dir.path(), &options).unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(store.list("").unwrap().len(), 1);
    }

    #[test]
    fn pull_writes_land_under_write_prefix_not_scan_root() {
        use std::collections::HashMap;

        let store = InMemoryObjectStore::new();
        let root_dir = tempfile::tempdir().unwrap();
        let write_dir = tempfile::tempdir().unwrap();

        let prefix = inventory::scan_prefix(root_dir.path());
        let blob_name = format!("{prefix}a.txt");
        store.put_block(&blob_name, "blk", b"hello world").unwrap();
        store
            .commit_block_list(&blob_name, &["blk".to_string()], &HashMap::new())
            .unwrap();

        let ctx = SyncContext::new(&store).with_write_prefix(write_dir.path().to_path_buf());
        let options = SyncOptions {
            push: false,
            pull: true,
            delete: false,
            no_write: false,
        };
        let report = sync_path(&ctx, root_dir.path(), &options).unwrap();
        assert_eq!(report.pulled, 1);
        assert_eq!(std::fs::read(write_dir.path().join("a.txt")).unwrap(), b"hello world");
        assert!(!root_dir.path().join("a.txt").exists());
    }
}
