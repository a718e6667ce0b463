//! Invalidation contract for the external bucket/user cache.
//!
//! The cache itself lives outside this crate; stores only need a way
//! to drop entries after a successful commit. Invalidation runs
//! strictly after commit, so a stale read in that window is expected
//! bounded staleness, and a failed invalidation is logged by the
//! caller rather than failing the mutation.

use crate::error::MetaResult;

pub trait CacheInvalidator: Send + Sync {
    /// Drop the cached record for one bucket.
    fn invalidate_bucket(&self, bucket: &str) -> MetaResult<()>;

    /// Drop the cached bucket list for one owner.
    fn invalidate_user_buckets(&self, user_id: &str) -> MetaResult<()>;
}

/// Used when no cache layer is wired in.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopInvalidator;

impl CacheInvalidator for NoopInvalidator {
    fn invalidate_bucket(&self, _bucket: &str) -> MetaResult<()> {
        Ok(())
    }

    fn invalidate_user_buckets(&self, _user_id: &str) -> MetaResult<()> {
        Ok(())
    }
}
