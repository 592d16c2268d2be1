//! The blob metadata codec (C3): the sole place that knows about the two
//! on-disk stat encodings a blob's metadata dictionary may carry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Error, Result};

/// Filesystem attributes recorded alongside a blob, or read off a local file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FileStat {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// Seconds since the epoch. Real-valued so sub-second mtimes round-trip.
    pub mtime: f64,
}

impl FileStat {
    pub fn atime(&self) -> f64 {
        self.mtime
    }

    pub fn ctime(&self) -> f64 {
        self.mtime
    }
}

const FILESTAT_KEY: &str = "filestat";
const LOCALTIMESTAMP_KEY: &str = "localtimestamp";

/// The v0.2 wire shape of `filestat`: `[mode, uid, gid, mtime]`.
#[derive(Debug, Serialize, Deserialize)]
struct FilestatTuple(u32, u32, u32, f64);

/// Encode `stat` into the `filestat` metadata entry. Never emits the legacy key.
pub fn encode_filestat(stat: &FileStat) -> Result<String> {
    let tuple = FilestatTuple(stat.mode, stat.uid, stat.gid, stat.mtime);
    serde_json::to_string(&tuple).map_err(|e| Error::InvalidConfig {
        message: format!("failed to encode filestat: {e}"),
    })
}

/// Build the metadata dictionary to attach to a freshly committed blob.
pub fn build_metadata(stat: &FileStat) -> Result<std::collections::HashMap<String, String>> {
    let mut md = std::collections::HashMap::new();
    md.insert(FILESTAT_KEY.to_string(), encode_filestat(stat)?);
    Ok(md)
}

/// Decode a blob's recorded stat, following the version-migration order in §4.3:
/// `filestat` (v0.2) takes priority, then legacy `localtimestamp` (v0.1), then the
/// object store's own `last_modified`, logging a warning in the last case.
pub fn decode_filestat(
    metadata: &std::collections::HashMap<String, String>,
    last_modified: DateTime<Utc>,
) -> FileStat {
    if let Some(raw) = metadata.get(FILESTAT_KEY) {
        match serde_json::from_str::<FilestatTuple>(raw) {
            Ok(FilestatTuple(mode, uid, gid, mtime)) => {
                return FileStat {
                    mode,
                    uid,
                    gid,
                    mtime,
                };
            }
            Err(e) => {
                warn!(
                    event = "metadata.filestat_unparseable",
                    error = %e,
                    "filestat metadata present but unparseable; falling back"
                );
            }
        }
    }

    if let Some(raw) = metadata.get(LOCALTIMESTAMP_KEY) {
        match DateTime::parse_from_rfc3339(raw) {
            Ok(parsed) => {
                let mtime = parsed.with_timezone(&Utc).timestamp() as f64
                    + (parsed.timestamp_subsec_nanos() as f64 / 1_000_000_000.0);
                return FileStat {
                    mode: 0,
                    uid: 0,
                    gid: 0,
                    mtime,
                };
            }
            Err(e) => {
                warn!(
                    event = "metadata.localtimestamp_unparseable",
                    error = %e,
                    "localtimestamp metadata present but unparseable; falling back"
                );
            }
        }
    }

    warn!(
        event = "metadata.missing_timestamp",
        "no filestat or localtimestamp metadata; using object store last_modified"
    );
    let mtime = last_modified.timestamp() as f64
        + (last_modified.timestamp_subsec_nanos() as f64 / 1_000_000_000.0);
    FileStat {
        mode: 0,
        uid: 0,
        gid: 0,
        mtime,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn round_trips_filestat() {
        let stat = FileStat {
            mode: 0o644,
            uid: 1000,
            gid: 1000,
            mtime: 1_700_000_000.5,
        };
        let mut md = HashMap::new();
        md.insert(FILESTAT_KEY.to_string(), encode_filestat(&stat).unwrap());
        let decoded = decode_filestat(&md, Utc::now());
        assert_eq!(decoded, stat);
    }

    #[test]
    fn reads_legacy_localtimestamp() {
        let mut md = HashMap::new();
        md.insert(
            LOCALTIMESTAMP_KEY.to_string(),
            "2021-05-01T12:00:00+00:00".to_string(),
        );
        let decoded = decode_filestat(&md, Utc::now());
        assert_eq!(decoded.mode, 0);
        assert_eq!(decoded.uid, 0);
        assert_eq!(decoded.gid, 0);
        assert!((decoded.mtime - 1_619_870_400.0).abs() < 1.0);
    }

    #[test]
    fn falls_back_to_last_modified() {
        let md = HashMap::new();
        let lm = DateTime::parse_from_rfc3339("2022-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let decoded = decode_filestat(&md, lm);
        assert_eq!(decoded.mode, 0);
        assert!((decoded.mtime - lm.timestamp() as f64).abs() < 1.0);
    }

    #[test]
    fn filestat_takes_priority_over_localtimestamp() {
        let stat = FileStat {
            mode: 0o600,
            uid: 1,
            gid: 2,
            mtime: 42.0,
        };
        let mut md = HashMap::new();
        md.insert(FILESTAT_KEY.to_string(), encode_filestat(&stat).unwrap());
        md.insert(
            LOCALTIMESTAMP_KEY.to_string(),
            "2021-05-01T12:00:00+00:00".to_string(),
        );
        let decoded = decode_filestat(&md, Utc::now());
        assert_eq!(decoded, stat);
    }
}
