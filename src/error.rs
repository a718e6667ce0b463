//! Closed error taxonomy for the metadata engine.
//!
//! Every anticipated failure is a distinct variant carrying enough
//! bucket/key context to explain itself; unanticipated backend failures
//! pass through as [`MetaError::Database`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetaError {
    #[error("bucket `{0}` not found")]
    NoSuchBucket(String),
    #[error("object `{key}` not found in bucket `{bucket}`")]
    NoSuchKey { bucket: String, key: String },
    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),
    #[error("access to bucket `{0}` forbidden")]
    AccessForbidden(String),
    #[error("owner `{0}` has reached the bucket limit")]
    TooManyBuckets(String),
    #[error("bucket `{0}` is not empty")]
    BucketNotEmpty(String),
    #[error("invalid or corrupt opaque token")]
    InvalidToken,
    #[error("malformed bucket policy")]
    MalformedPolicy,
    #[error("bucket `{0}` has no lifecycle configuration")]
    NoSuchLifecycle(String),
    #[error("bucket `{0}` has no CORS configuration")]
    NoSuchCors(String),
    #[error("corrupt metadata: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type MetaResult<T> = Result<T, MetaError>;
