mod chunker;
mod config;
mod delete;
mod error;
mod inventory;
mod logging;
mod metadata;
mod orchestrator;
mod progress;
mod pull;
mod push;
mod reconcile;
mod store;

pub const APP_NAME: &str = "azure-sync";

pub use chunker::{ChunkFingerprint, ChunkingParams, chunk_file, offset_map, whole_file_id};
pub use config::SyncConfig;
pub use error::{Error, Result};
pub use inventory::{LocalEntry, RemoteEntry, build_local_inventory, build_remote_inventory};
pub use logging::init as init_logging;
pub use metadata::{FileStat, build_metadata, decode_filestat, encode_filestat};
pub use orchestrator::{SyncContext, SyncOptions, SyncReport, sync_path};
pub use progress::{NullProgressSink, ProgressSink, TaskProgress};
pub use pull::{PullOutcome, apply_stat, pull_file};
pub use push::{PushOutcome, push_file};
pub use reconcile::{Action, reconcile};
pub use store::{AzureBlockBlobStore, BlobRecord, CommittedBlock, InMemoryObjectStore, ObjectStore};
