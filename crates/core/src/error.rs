use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("walkdir error: {0}")]
    Walkdir(#[from] walkdir::Error),

    #[error("chunker failure: path={path} reason={reason}")]
    ChunkerFailure { path: PathBuf, reason: String },

    #[error("object store error: {message}")]
    ObjectStore { message: String },

    #[error("integrity check failed: {message}")]
    Integrity { message: String },

    #[error("unsupported path (must be UTF-8): {path:?}")]
    NonUtf8Path { path: PathBuf },

    #[error("illegal flag combination: push, pull and delete cannot all be set")]
    IllegalNukeCombination,
}
