//! The content-defined chunker (C1).
//!
//! Boundaries are chosen by a rolling hash over the data (FastCDC), not by
//! fixed offsets, so a localized edit only perturbs the chunks it overlaps
//! (P-local in §4.1) while leaving the rest of the sequence bit-identical
//! (P-stable). Re-implemented in-process against the fingerprint contract
//! rather than shelling out to an external helper.

use std::fs::File;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use fastcdc::v2020::{
    AVERAGE_MAX, AVERAGE_MIN, MAXIMUM_MAX, MAXIMUM_MIN, MINIMUM_MAX, MINIMUM_MIN, StreamCDC,
};

use crate::{Error, Result};

/// A single `(length, id)` fingerprint record. `id` is the base64 MD5 of the
/// chunk's bytes. The terminating record of a sequence has `length == 0` and
/// `id` equal to the whole-file MD5; it is the authoritative content identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFingerprint {
    pub length: u64,
    pub id: String,
}

impl ChunkFingerprint {
    pub fn is_terminator(&self) -> bool {
        self.length == 0
    }
}

/// Boundary-selection parameters for the chunker. Must satisfy
/// `min_bytes <= avg_bytes <= max_bytes` and fall within FastCDC's accepted
/// ranges; use [`ChunkingParams::validate`] before calling [`chunk_file`].
#[derive(Debug, Clone, Copy)]
pub struct ChunkingParams {
    pub min_bytes: u32,
    pub avg_bytes: u32,
    pub max_bytes: u32,
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            min_bytes: 256 * 1024,
            avg_bytes: 1024 * 1024,
            max_bytes: 4 * 1024 * 1024,
        }
    }
}

impl ChunkingParams {
    pub fn validate(&self) -> Result<()> {
        if self.min_bytes == 0 || self.avg_bytes == 0 || self.max_bytes == 0 {
            return Err(Error::InvalidConfig {
                message: "chunk sizes must be > 0".to_string(),
            });
        }
        if !(self.min_bytes <= self.avg_bytes && self.avg_bytes <= self.max_bytes) {
            return Err(Error::InvalidConfig {
                message: "chunk sizes must satisfy min <= avg <= max".to_string(),
            });
        }
        let min_ok = (MINIMUM_MIN..=MINIMUM_MAX).contains(&self.min_bytes);
        let avg_ok = (AVERAGE_MIN..=AVERAGE_MAX).contains(&self.avg_bytes);
        let max_ok = (MAXIMUM_MIN..=MAXIMUM_MAX).contains(&self.max_bytes);
        if !(min_ok && avg_ok && max_ok) {
            return Err(Error::InvalidConfig {
                message: format!(
                    "chunk sizes out of bounds (min={}..={}, avg={}..={}, max={}..={})",
                    MINIMUM_MIN, MINIMUM_MAX, AVERAGE_MIN, AVERAGE_MAX, MAXIMUM_MIN, MAXIMUM_MAX
                ),
            });
        }
        Ok(())
    }
}

/// Produce the ordered fingerprint sequence for `path`, reading the file once.
pub fn chunk_file(path: &Path, params: &ChunkingParams) -> Result<Vec<ChunkFingerprint>> {
    let file = File::open(path).map_err(|e| Error::ChunkerFailure {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    chunk_reader(file, params).map_err(|e| Error::ChunkerFailure {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn chunk_reader<R: std::io::Read>(
    reader: R,
    params: &ChunkingParams,
) -> std::result::Result<Vec<ChunkFingerprint>, String> {
    let chunker = StreamCDC::new(reader, params.min_bytes, params.avg_bytes, params.max_bytes);

    let mut fingerprints = Vec::new();
    let mut whole_file = md5::Context::new();

    for result in chunker {
        let chunk = result.map_err(|e| e.to_string())?;
        whole_file.consume(&chunk.data);
        let digest = md5::compute(&chunk.data);
        fingerprints.push(ChunkFingerprint {
            length: chunk.length as u64,
            id: BASE64.encode(digest.0),
        });
    }

    let whole_hash = whole_file.compute();
    fingerprints.push(ChunkFingerprint {
        length: 0,
        id: BASE64.encode(whole_hash.0),
    });

    Ok(fingerprints)
}

/// The whole-file MD5 id: the last (terminating) fingerprint's id.
pub fn whole_file_id(fingerprints: &[ChunkFingerprint]) -> Option<&str> {
    fingerprints.last().map(|f| f.id.as_str())
}

/// Build an `id -> (offset, length)` map over the non-terminating chunks,
/// computed once per file rather than re-summing prior lengths at every
/// lookup (§9, "per-chunk offset recomputation").
pub fn offset_map(fingerprints: &[ChunkFingerprint]) -> std::collections::HashMap<&str, (u64, u64)> {
    let mut map = std::collections::HashMap::new();
    let mut offset = 0u64;
    for fp in fingerprints {
        if fp.is_terminator() {
            break;
        }
        map.entry(fp.id.as_str()).or_insert((offset, fp.length));
        offset += fp.length;
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn params() -> ChunkingParams {
        ChunkingParams {
            min_bytes: MINIMUM_MIN,
            avg_bytes: AVERAGE_MIN,
            max_bytes: MAXIMUM_MIN,
        }
    }

    #[test]
    fn validate_rejects_out_of_order_bounds() {
        let p = ChunkingParams {
            min_bytes: 100,
            avg_bytes: 50,
            max_bytes: 200,
        };
        assert!(p.validate().is_err());
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(ChunkingParams::default().validate().is_ok());
    }

    #[test]
    fn terminator_hash_is_whole_file_md5() {
        let data = vec![7u8; 5 * 1024 * 1024];
        let fps = chunk_reader(Cursor::new(data.clone()), &params()).unwrap();
        assert!(fps.last().unwrap().is_terminator());
        let expected = base64::engine::general_purpose::STANDARD.encode(md5::compute(&data).0);
        assert_eq!(fps.last().unwrap().id, expected);
    }

    #[test]
    fn stable_on_identical_input() {
        let data = (0..(3 * 1024 * 1024)).map(|i| (i % 251) as u8).collect::<Vec<_>>();
        let a = chunk_reader(Cursor::new(data.clone()), &params()).unwrap();
        let b = chunk_reader(Cursor::new(data), &params()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn non_terminating_lengths_sum_to_file_size() {
        let data = (0..(2 * 1024 * 1024)).map(|i| (i % 191) as u8).collect::<Vec<_>>();
        let fps = chunk_reader(Cursor::new(data.clone()), &params()).unwrap();
        let sum: u64 = fps.iter().filter(|f| !f.is_terminator()).map(|f| f.length).sum();
        assert_eq!(sum, data.len() as u64);
    }

    #[test]
    fn offset_map_matches_cumulative_lengths() {
        let data = (0..(2 * 1024 * 1024)).map(|i| (i % 173) as u8).collect::<Vec<_>>();
        let fps = chunk_reader(Cursor::new(data), &params()).unwrap();
        let map = offset_map(&fps);
        let mut offset = 0u64;
        for fp in &fps {
            if fp.is_terminator() {
                break;
            }
            assert_eq!(map[fp.id.as_str()], (offset, fp.length));
            offset += fp.length;
        }
    }
}
