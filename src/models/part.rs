//! Multipart object parts and the derived offset index.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::{MetaError, MetaResult};

/// One stored piece of a multipart object, keyed by its 1-based part
/// number within the parent (bucket, key, version).
#[derive(Clone, Debug, PartialEq)]
pub struct Part {
    pub part_number: i64,
    pub size: i64,
    /// Storage id of the part's payload in the blob backend.
    pub object_id: String,
    /// Byte offset of this part within the assembled object.
    pub offset: i64,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
    pub initialization_vector: Vec<u8>,
}

/// Offset index over a multipart object's parts, ordered by part
/// number, for locating which part covers a byte of the assembled
/// object.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PartIndex {
    offsets: Vec<i64>,
}

impl PartIndex {
    /// Builds the index from one version's part set. Returns `None`
    /// for an empty set (plain object). Part numbers must be exactly
    /// `1..=N`; a gap means the stored part rows are corrupt.
    pub fn build(parts: &BTreeMap<i64, Part>) -> MetaResult<Option<PartIndex>> {
        if parts.is_empty() {
            return Ok(None);
        }
        let mut offsets = vec![0i64; parts.len()];
        let mut seen = vec![false; parts.len()];
        for (&number, part) in parts {
            let slot = usize::try_from(number)
                .ok()
                .and_then(|n| n.checked_sub(1))
                .filter(|&n| n < offsets.len())
                .ok_or_else(|| {
                    MetaError::Corrupt(format!(
                        "part number {number} outside 1..={}",
                        offsets.len()
                    ))
                })?;
            offsets[slot] = part.offset;
            seen[slot] = true;
        }
        if seen.iter().any(|s| !s) {
            return Err(MetaError::Corrupt("gap in multipart part numbers".to_string()));
        }
        Ok(Some(PartIndex { offsets }))
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn offsets(&self) -> &[i64] {
        &self.offsets
    }

    /// Part number covering `offset`, plus the byte position inside
    /// that part. `None` for offsets before the first part.
    pub fn locate(&self, offset: i64) -> Option<(i64, i64)> {
        let idx = self.offsets.partition_point(|&start| start <= offset);
        if idx == 0 {
            return None;
        }
        Some((idx as i64, offset - self.offsets[idx - 1]))
    }
}
