use std::path::PathBuf;
use std::process::ExitCode;

use azsync_core::{AzureBlockBlobStore, SyncContext, SyncOptions, SyncConfig};
use clap::Parser;
use tracing::{error, info};

/// Bidirectionally sync a local directory tree with an Azure-Blob-backed
/// block store, using content-defined chunking to avoid re-transferring
/// unchanged bytes.
#[derive(Debug, Parser)]
#[command(name = "azure-sync", version, about)]
struct Args {
    /// Upload local files that are new or newer than their remote copy.
    #[arg(long)]
    push: bool,

    /// Download remote blobs that are new or newer than their local copy.
    #[arg(long)]
    pull: bool,

    /// Remove the side not covered by --push/--pull. Illegal together with
    /// both --push and --pull at once.
    #[arg(long)]
    delete: bool,

    /// One or more directories to sync.
    #[arg(required = true)]
    paths: Vec<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match SyncConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("azure-sync: {e}");
            return ExitCode::from(1);
        }
    };

    azsync_core::init_logging(&config);

    let store = match AzureBlockBlobStore::new(config.account.clone(), &config.key, config.container.clone()) {
        Ok(s) => s,
        Err(e) => {
            error!(event = "startup.store_init_failed", error = %e);
            return ExitCode::from(1);
        }
    };

    let options = SyncOptions {
        push: args.push,
        pull: args.pull,
        delete: args.delete,
        no_write: config.no_write,
    };

    let ctx = SyncContext::new(&store).with_write_prefix(config.write_prefix.clone());

    let mut failed = false;
    for path in &args.paths {
        info!(event = "sync.start", path = %path.display(), push = options.push, pull = options.pull, delete = options.delete);
        match azsync_core::sync_path(&ctx, path, &options) {
            Ok(report) => {
                info!(
                    event = "sync.finish",
                    path = %path.display(),
                    pushed = report.pushed,
                    pulled = report.pulled,
                    deleted = report.deleted,
                    bytes_uploaded = report.bytes_uploaded,
                    bytes_downloaded = report.bytes_downloaded,
                    bytes_reused = report.bytes_reused,
                );
            }
            Err(e) => {
                error!(event = "sync.failed", path = %path.display(), error = %e);
                failed = true;
            }
        }
    }

    if failed {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}
