//! Object version records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::{MetaError, MetaResult};
use crate::models::bucket::Acl;
use crate::models::part::{Part, PartIndex};
use crate::version;

/// Storage layout of an object's payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ObjectKind {
    #[default]
    Normal,
    Appendable,
    Multipart,
}

impl ObjectKind {
    pub fn as_i64(&self) -> i64 {
        match self {
            ObjectKind::Normal => 0,
            ObjectKind::Appendable => 1,
            ObjectKind::Multipart => 2,
        }
    }

    pub fn from_i64(raw: i64) -> MetaResult<Self> {
        match raw {
            0 => Ok(ObjectKind::Normal),
            1 => Ok(ObjectKind::Appendable),
            2 => Ok(ObjectKind::Multipart),
            other => Err(MetaError::Corrupt(format!("unknown object type {other}"))),
        }
    }
}

/// Server-side encryption applied to the payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SseType {
    #[default]
    None,
    S3,
    Kms,
    Customer,
}

impl SseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SseType::None => "",
            SseType::S3 => "S3",
            SseType::Kms => "KMS",
            SseType::Customer => "C",
        }
    }

    pub fn parse(text: &str) -> MetaResult<Self> {
        match text {
            "" => Ok(SseType::None),
            "S3" => Ok(SseType::S3),
            "KMS" => Ok(SseType::Kms),
            "C" => Ok(SseType::Customer),
            other => Err(MetaError::Corrupt(format!("unknown SSE type `{other}`"))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StorageClass {
    #[default]
    Standard,
    StandardIa,
    Glacier,
}

impl StorageClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageClass::Standard => "STANDARD",
            StorageClass::StandardIa => "STANDARD_IA",
            StorageClass::Glacier => "GLACIER",
        }
    }

    pub fn parse(text: &str) -> MetaResult<Self> {
        match text {
            "STANDARD" => Ok(StorageClass::Standard),
            "STANDARD_IA" => Ok(StorageClass::StandardIa),
            "GLACIER" => Ok(StorageClass::Glacier),
            other => Err(MetaError::Corrupt(format!(
                "unknown storage class `{other}`"
            ))),
        }
    }
}

/// One object version. Identity is (bucket, key, version); the version
/// column is derived from `last_modified` (see [`crate::version`]), so
/// a put is always an insert and never rewrites an existing version.
#[derive(Clone, Debug, PartialEq)]
pub struct Object {
    pub bucket_name: String,
    pub name: String,
    /// Placement of the payload in the blob backend.
    pub location: String,
    pub pool: String,
    pub owner_id: String,
    pub size: i64,
    /// Content-addressable id of the payload.
    pub object_id: String,
    pub last_modified: DateTime<Utc>,
    pub etag: String,
    pub content_type: String,
    pub custom_attributes: BTreeMap<String, String>,
    pub acl: Acl,
    /// Set when the bucket was unversioned at write time; the version
    /// id reported for such an object is the literal `null`.
    pub null_version: bool,
    pub delete_marker: bool,
    pub sse_type: SseType,
    pub encryption_key: Vec<u8>,
    pub initialization_vector: Vec<u8>,
    pub kind: ObjectKind,
    pub storage_class: StorageClass,
    /// Client-facing version identifier, attached when the row is read
    /// back from the store.
    pub version_id: Option<String>,
    pub parts: BTreeMap<i64, Part>,
    pub parts_index: Option<PartIndex>,
}

impl Object {
    pub fn new(
        bucket_name: impl Into<String>,
        name: impl Into<String>,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            bucket_name: bucket_name.into(),
            name: name.into(),
            location: String::new(),
            pool: String::new(),
            owner_id: owner_id.into(),
            size: 0,
            object_id: String::new(),
            last_modified: Utc::now(),
            etag: String::new(),
            content_type: String::new(),
            custom_attributes: BTreeMap::new(),
            acl: Acl::default(),
            null_version: false,
            delete_marker: false,
            sse_type: SseType::default(),
            encryption_key: Vec::new(),
            initialization_vector: Vec::new(),
            kind: ObjectKind::default(),
            storage_class: StorageClass::default(),
            version_id: None,
            parts: BTreeMap::new(),
            parts_index: None,
        }
    }

    /// Stored sort key for this record, derived from its creation time.
    pub fn version_key(&self) -> MetaResult<String> {
        version::sort_key(&self.last_modified)
    }
}
