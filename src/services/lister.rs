//! The three S3 listing protocols over the object table.
//!
//! v1 resumes from a plain key marker, v2 from a start-after key or an
//! encrypted continuation token, and version enumeration from a
//! (key marker, version-id marker) pair. All three share one scan
//! shape: a lexicographic walk over (name, version) with per-page
//! truncation, delimiter grouping, and client-facing shaping.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use sqlx::FromRow;
use sqlx::sqlite::SqlitePool;

use crate::auth::{self, Credential, CredentialLookup};
use crate::error::MetaResult;
use crate::models::bucket::Bucket;
use crate::version::{self, NULL_VERSION_ID, VersionCipher};

/// S3 caps a listing page at 1000 keys.
pub const MAX_LISTING_KEYS: usize = 1000;

/// Rows fetched per backend round trip while scanning.
const SCAN_BATCH: i64 = 1000;

/// Pagination state distinguishes the three listing protocols.
#[derive(Clone, Debug)]
pub enum Pagination {
    /// Legacy listing: a plain key marker.
    V1 { marker: Option<String> },
    /// ListObjectsV2: start-after key, superseded by a continuation
    /// token once one has been handed out.
    V2 {
        start_after: Option<String>,
        continuation_token: Option<String>,
    },
    /// Version enumeration: may resume mid version group.
    Versioned {
        key_marker: Option<String>,
        version_id_marker: Option<String>,
    },
}

impl Default for Pagination {
    fn default() -> Self {
        Pagination::V1 { marker: None }
    }
}

#[derive(Clone, Debug)]
pub struct ListObjectsQuery {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub max_keys: usize,
    pub fetch_owner: bool,
    /// Only `url` encoding is supported, matching S3's
    /// `encoding-type`.
    pub url_encode: bool,
    pub pagination: Pagination,
}

impl Default for ListObjectsQuery {
    fn default() -> Self {
        Self {
            prefix: None,
            delimiter: None,
            max_keys: MAX_LISTING_KEYS,
            fetch_owner: false,
            url_encode: false,
            pagination: Pagination::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListedOwner {
    pub id: String,
    pub display_name: String,
}

#[derive(Clone, Debug)]
pub struct ObjectEntry {
    pub key: String,
    pub last_modified: DateTime<Utc>,
    /// Quoted, as S3 clients expect it on the wire.
    pub etag: String,
    pub size: i64,
    pub storage_class: String,
    pub owner: Option<ListedOwner>,
}

#[derive(Clone, Debug, Default)]
pub struct ListObjectsPage {
    pub entries: Vec<ObjectEntry>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    /// v1 only; v2 carries the resume point in the token instead.
    pub next_marker: Option<String>,
    pub next_continuation_token: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VersionEntryKind {
    Version,
    DeleteMarker,
}

#[derive(Clone, Debug)]
pub struct VersionEntry {
    pub key: String,
    pub version_id: String,
    pub kind: VersionEntryKind,
    pub last_modified: DateTime<Utc>,
    pub etag: String,
    pub size: i64,
    pub storage_class: String,
    pub owner: Option<ListedOwner>,
}

#[derive(Clone, Debug, Default)]
pub struct ListVersionsPage {
    pub entries: Vec<VersionEntry>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_key_marker: Option<String>,
    pub next_version_id_marker: Option<String>,
}

#[derive(FromRow)]
struct ListRow {
    name: String,
    version: String,
    ownerid: String,
    size: i64,
    etag: String,
    nullversion: bool,
    deletemarker: bool,
}

struct RawPage {
    rows: Vec<ListRow>,
    prefixes: Vec<String>,
    is_truncated: bool,
    next_marker: String,
}

struct RawVersionPage {
    rows: Vec<ListRow>,
    prefixes: Vec<String>,
    is_truncated: bool,
    next_key: String,
    next_version_id: Option<String>,
}

/// Builds listing requests into store queries and shapes the results
/// for the three listing protocols.
pub struct Lister {
    db: Arc<SqlitePool>,
    cipher: Arc<VersionCipher>,
    identity: Arc<dyn CredentialLookup>,
}

impl Lister {
    pub fn new(
        db: Arc<SqlitePool>,
        cipher: Arc<VersionCipher>,
        identity: Arc<dyn CredentialLookup>,
    ) -> Self {
        Self {
            db,
            cipher,
            identity,
        }
    }

    /// Current-version listing (v1 and v2 protocols).
    pub async fn list_objects(
        &self,
        bucket: &Bucket,
        credential: &Credential,
        query: &ListObjectsQuery,
    ) -> MetaResult<ListObjectsPage> {
        auth::check_bucket_read(bucket, credential)?;
        let marker = self.resolve_marker(&query.pagination)?;
        let max_keys = query.max_keys.clamp(1, MAX_LISTING_KEYS);
        let raw = self
            .scan_current(
                &bucket.name,
                &marker,
                query.prefix.as_deref(),
                query.delimiter.as_deref(),
                max_keys,
            )
            .await?;

        // a next marker is only actionable when the page was truncated
        // AND the scan produced a non-empty resume key
        let mut next_marker = if raw.is_truncated && !raw.next_marker.is_empty() {
            Some(raw.next_marker)
        } else {
            None
        };
        let next_continuation_token = match (&query.pagination, &next_marker) {
            (Pagination::V2 { .. }, Some(marker)) => {
                Some(self.cipher.continuation_token(marker)?)
            }
            _ => None,
        };
        if matches!(query.pagination, Pagination::V2 { .. }) {
            next_marker = None;
        }

        let mut entries = Vec::with_capacity(raw.rows.len());
        for row in raw.rows {
            let last_modified = version::time_of_sort_key(&row.version)?;
            let owner = self.owner_for(query.fetch_owner, &row.ownerid)?;
            let key = if query.url_encode {
                url_encode(&row.name)
            } else {
                row.name
            };
            entries.push(ObjectEntry {
                key,
                last_modified,
                etag: format!("\"{}\"", row.etag),
                size: row.size,
                storage_class: "STANDARD".to_string(),
                owner,
            });
        }

        let mut common_prefixes = raw.prefixes;
        if query.url_encode {
            common_prefixes = common_prefixes.iter().map(|p| url_encode(p)).collect();
            next_marker = next_marker.map(|m| url_encode(&m));
        }

        Ok(ListObjectsPage {
            entries,
            common_prefixes,
            is_truncated: raw.is_truncated,
            next_marker,
            next_continuation_token,
        })
    }

    /// Version enumeration, tagging each row as a version or a delete
    /// marker.
    pub async fn list_object_versions(
        &self,
        bucket: &Bucket,
        credential: &Credential,
        query: &ListObjectsQuery,
    ) -> MetaResult<ListVersionsPage> {
        auth::check_bucket_read(bucket, credential)?;
        let key_marker = self.resolve_marker(&query.pagination)?;
        let version_marker = match &query.pagination {
            Pagination::Versioned {
                key_marker: Some(km),
                version_id_marker: Some(id),
            } if !id.is_empty() => Some(self.versioned_resume(&bucket.name, km, id).await?),
            _ => None,
        };
        let max_keys = query.max_keys.clamp(1, MAX_LISTING_KEYS);
        let raw = self
            .scan_versions(
                &bucket.name,
                &key_marker,
                version_marker.as_deref(),
                query.prefix.as_deref(),
                query.delimiter.as_deref(),
                max_keys,
            )
            .await?;

        let (mut next_key_marker, next_version_id_marker) =
            if raw.is_truncated && !raw.next_key.is_empty() {
                (Some(raw.next_key), raw.next_version_id)
            } else {
                (None, None)
            };

        let mut entries = Vec::with_capacity(raw.rows.len());
        for row in raw.rows {
            let last_modified = version::time_of_sort_key(&row.version)?;
            let owner = self.owner_for(query.fetch_owner, &row.ownerid)?;
            let version_id = if row.nullversion {
                NULL_VERSION_ID.to_string()
            } else {
                self.cipher.version_id(&row.version)?
            };
            let key = if query.url_encode {
                url_encode(&row.name)
            } else {
                row.name
            };
            entries.push(VersionEntry {
                key,
                version_id,
                kind: if row.deletemarker {
                    VersionEntryKind::DeleteMarker
                } else {
                    VersionEntryKind::Version
                },
                last_modified,
                etag: format!("\"{}\"", row.etag),
                size: row.size,
                storage_class: "STANDARD".to_string(),
                owner,
            });
        }

        let mut common_prefixes = raw.prefixes;
        if query.url_encode {
            common_prefixes = common_prefixes.iter().map(|p| url_encode(p)).collect();
            next_key_marker = next_key_marker.map(|m| url_encode(&m));
        }

        Ok(ListVersionsPage {
            entries,
            common_prefixes,
            is_truncated: raw.is_truncated,
            next_key_marker,
            next_version_id_marker,
        })
    }

    fn resolve_marker(&self, pagination: &Pagination) -> MetaResult<String> {
        Ok(match pagination {
            Pagination::V1 { marker } => marker.clone().unwrap_or_default(),
            Pagination::V2 {
                start_after,
                continuation_token,
            } => match continuation_token {
                Some(token) => self.cipher.key_of_token(token)?,
                None => start_after.clone().unwrap_or_default(),
            },
            Pagination::Versioned { key_marker, .. } => key_marker.clone().unwrap_or_default(),
        })
    }

    fn owner_for(&self, fetch_owner: bool, owner_id: &str) -> MetaResult<Option<ListedOwner>> {
        if !fetch_owner {
            return Ok(None);
        }
        let credential = self.identity.credential_for(owner_id)?;
        Ok(Some(ListedOwner {
            id: credential.user_id,
            display_name: credential.display_name,
        }))
    }

    /// Resolves a client version-id marker into a stored sort key.
    async fn versioned_resume(
        &self,
        bucket: &str,
        key: &str,
        version_id: &str,
    ) -> MetaResult<String> {
        if version_id == NULL_VERSION_ID {
            let stored: Option<String> = sqlx::query_scalar(
                "SELECT version FROM objects WHERE bucketname = ? AND name = ? AND \
                 nullversion = 1 ORDER BY version LIMIT 1",
            )
            .bind(bucket)
            .bind(key)
            .fetch_optional(&*self.db)
            .await?;
            return stored.ok_or(crate::error::MetaError::InvalidToken);
        }
        self.cipher.sort_key_of_version_id(version_id)
    }

    /// Walks keys in lexicographic order, keeping the newest version
    /// of each key (the first row of its group) and dropping keys
    /// whose newest version is a delete marker.
    async fn scan_current(
        &self,
        bucket: &str,
        marker: &str,
        prefix: Option<&str>,
        delimiter: Option<&str>,
        max_keys: usize,
    ) -> MetaResult<RawPage> {
        let mut rows_out: Vec<ListRow> = Vec::new();
        let mut prefixes: BTreeSet<String> = BTreeSet::new();
        let mut is_truncated = false;
        let mut next_marker = String::new();
        let mut cursor = marker.to_string();
        let mut last_key = String::new();

        'scan: loop {
            let batch: Vec<ListRow> = sqlx::query_as(
                "SELECT name, version, ownerid, size, etag, nullversion, deletemarker \
                 FROM objects WHERE bucketname = ? AND name > ? AND name LIKE ? ESCAPE '\\' \
                 ORDER BY name, version LIMIT ?",
            )
            .bind(bucket)
            .bind(&cursor)
            .bind(like_prefix(prefix.unwrap_or("")))
            .bind(SCAN_BATCH)
            .fetch_all(&*self.db)
            .await?;
            if batch.is_empty() {
                break;
            }
            let batch_len = batch.len();

            for row in batch {
                if row.name == last_key {
                    // older version of a key already decided
                    continue;
                }
                last_key = row.name.clone();
                if row.deletemarker {
                    continue;
                }
                if let Some(delim) = delimiter {
                    if let Some(group) = common_prefix(&row.name, prefix, delim) {
                        // a group at or before the marker was already
                        // delivered on an earlier page
                        if group.as_str() <= marker {
                            continue;
                        }
                        if !prefixes.contains(&group) {
                            if rows_out.len() + prefixes.len() == max_keys {
                                is_truncated = true;
                                break 'scan;
                            }
                            next_marker = group.clone();
                            prefixes.insert(group);
                        }
                        continue;
                    }
                }
                if rows_out.len() + prefixes.len() == max_keys {
                    is_truncated = true;
                    break 'scan;
                }
                next_marker = row.name.clone();
                rows_out.push(row);
            }

            if (batch_len as i64) < SCAN_BATCH {
                break;
            }
            // resume past the last key group we fully decided
            cursor = last_key.clone();
        }

        Ok(RawPage {
            rows: rows_out,
            prefixes: prefixes.into_iter().collect(),
            is_truncated,
            next_marker,
        })
    }

    /// Walks every version row in (key, version) order.
    async fn scan_versions(
        &self,
        bucket: &str,
        key_marker: &str,
        version_marker: Option<&str>,
        prefix: Option<&str>,
        delimiter: Option<&str>,
        max_keys: usize,
    ) -> MetaResult<RawVersionPage> {
        let mut rows_out: Vec<ListRow> = Vec::new();
        let mut prefixes: BTreeSet<String> = BTreeSet::new();
        let mut is_truncated = false;
        let mut next_key = String::new();
        let mut next_version_id: Option<String> = None;
        let mut cursor_key = key_marker.to_string();
        let mut cursor_version: Option<String> = version_marker.map(str::to_string);
        let like = like_prefix(prefix.unwrap_or(""));

        'scan: loop {
            let batch: Vec<ListRow> = match &cursor_version {
                Some(cv) => {
                    sqlx::query_as(
                        "SELECT name, version, ownerid, size, etag, nullversion, deletemarker \
                         FROM objects WHERE bucketname = ? AND \
                         (name > ? OR (name = ? AND version > ?)) AND name LIKE ? ESCAPE '\\' \
                         ORDER BY name, version LIMIT ?",
                    )
                    .bind(bucket)
                    .bind(&cursor_key)
                    .bind(&cursor_key)
                    .bind(cv)
                    .bind(&like)
                    .bind(SCAN_BATCH)
                    .fetch_all(&*self.db)
                    .await?
                }
                None => {
                    sqlx::query_as(
                        "SELECT name, version, ownerid, size, etag, nullversion, deletemarker \
                         FROM objects WHERE bucketname = ? AND name > ? AND name LIKE ? ESCAPE '\\' \
                         ORDER BY name, version LIMIT ?",
                    )
                    .bind(bucket)
                    .bind(&cursor_key)
                    .bind(&like)
                    .bind(SCAN_BATCH)
                    .fetch_all(&*self.db)
                    .await?
                }
            };
            if batch.is_empty() {
                break;
            }
            let batch_len = batch.len();

            for row in batch {
                cursor_key = row.name.clone();
                cursor_version = Some(row.version.clone());
                if let Some(delim) = delimiter {
                    if let Some(group) = common_prefix(&row.name, prefix, delim) {
                        // a group at or before the key marker was
                        // already delivered on an earlier page
                        if group.as_str() <= key_marker {
                            continue;
                        }
                        if !prefixes.contains(&group) {
                            if rows_out.len() + prefixes.len() == max_keys {
                                is_truncated = true;
                                break 'scan;
                            }
                            next_key = group.clone();
                            next_version_id = None;
                            prefixes.insert(group);
                        }
                        continue;
                    }
                }
                if rows_out.len() + prefixes.len() == max_keys {
                    is_truncated = true;
                    break 'scan;
                }
                next_key = row.name.clone();
                next_version_id = Some(if row.nullversion {
                    NULL_VERSION_ID.to_string()
                } else {
                    self.cipher.version_id(&row.version)?
                });
                rows_out.push(row);
            }

            if (batch_len as i64) < SCAN_BATCH {
                break;
            }
        }

        Ok(RawVersionPage {
            rows: rows_out,
            prefixes: prefixes.into_iter().collect(),
            is_truncated,
            next_key,
            next_version_id,
        })
    }
}

fn url_encode(raw: &str) -> String {
    utf8_percent_encode(raw, NON_ALPHANUMERIC).to_string()
}

/// `LIKE` pattern matching keys under `prefix` literally. Wildcard and
/// escape characters in the prefix are escaped; the pattern is paired
/// with `ESCAPE '\'` in the query.
fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

/// Synthetic common prefix for delimiter grouping: the key's remainder
/// past the requested prefix, cut at the first delimiter occurrence.
fn common_prefix(key: &str, requested_prefix: Option<&str>, delimiter: &str) -> Option<String> {
    let after_prefix = match requested_prefix {
        Some(prefix) => key.strip_prefix(prefix)?,
        None => key,
    };
    let pos = after_prefix.find(delimiter)?;
    let mut combined = String::new();
    if let Some(prefix) = requested_prefix {
        combined.push_str(prefix);
    }
    combined.push_str(&after_prefix[..pos + delimiter.len()]);
    Some(combined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_prefix_groups_under_delimiter() {
        assert_eq!(
            common_prefix("photos/2024/a.jpg", None, "/"),
            Some("photos/".to_string())
        );
        assert_eq!(
            common_prefix("photos/2024/a.jpg", Some("photos/"), "/"),
            Some("photos/2024/".to_string())
        );
        assert_eq!(common_prefix("readme.txt", None, "/"), None);
        assert_eq!(common_prefix("other/key", Some("photos/"), "/"), None);
    }

    #[test]
    fn like_prefix_escapes_wildcards() {
        assert_eq!(like_prefix("photos/"), "photos/%");
        assert_eq!(like_prefix("a_c"), "a\\_c%");
        assert_eq!(like_prefix("50%off"), "50\\%off%");
        assert_eq!(like_prefix("a\\b"), "a\\\\b%");
        assert_eq!(like_prefix(""), "%");
    }
}
