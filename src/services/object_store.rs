//! SQL-level CRUD and transactional mutation of object and part rows.
//!
//! Mutations come in pairs: the plain method opens its own transaction
//! and commits, while the `_tx` variant runs inside a caller-held
//! transaction obtained from [`ObjectStore::begin`]. A transaction
//! dropped without commit rolls back, so no partial object+parts state
//! ever survives an error.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::{FromRow, Sqlite, SqliteConnection, Transaction};
use tracing::debug;

use crate::error::{MetaError, MetaResult};
use crate::models::bucket::Acl;
use crate::models::object::{Object, ObjectKind, SseType, StorageClass};
use crate::models::part::{Part, PartIndex};
use crate::version::{self, NULL_VERSION_ID, VersionCipher};

const READ_COLUMNS: &str = "bucketname, name, version, location, pool, ownerid, size, objectid, \
     etag, contenttype, customattributes, acl, nullversion, deletemarker, ssetype, \
     encryptionkey, initializationvector, \"type\", storageclass";

#[derive(FromRow)]
struct ObjectRow {
    bucketname: String,
    name: String,
    version: String,
    location: String,
    pool: String,
    ownerid: String,
    size: i64,
    objectid: String,
    etag: String,
    contenttype: String,
    customattributes: String,
    acl: String,
    nullversion: bool,
    deletemarker: bool,
    ssetype: String,
    encryptionkey: Vec<u8>,
    initializationvector: Vec<u8>,
    #[sqlx(rename = "type")]
    kind: i64,
    storageclass: String,
}

impl ObjectRow {
    fn into_object(self, cipher: &VersionCipher) -> MetaResult<Object> {
        let last_modified = version::time_of_sort_key(&self.version)?;
        let acl: Acl = serde_json::from_str(&self.acl).map_err(|err| {
            MetaError::Corrupt(format!(
                "object acl for `{}/{}`: {err}",
                self.bucketname, self.name
            ))
        })?;
        let custom_attributes: BTreeMap<String, String> =
            serde_json::from_str(&self.customattributes).map_err(|err| {
                MetaError::Corrupt(format!(
                    "custom attributes for `{}/{}`: {err}",
                    self.bucketname, self.name
                ))
            })?;
        let version_id = if self.nullversion {
            NULL_VERSION_ID.to_string()
        } else {
            cipher.version_id(&self.version)?
        };
        Ok(Object {
            bucket_name: self.bucketname,
            name: self.name,
            location: self.location,
            pool: self.pool,
            owner_id: self.ownerid,
            size: self.size,
            object_id: self.objectid,
            last_modified,
            etag: self.etag,
            content_type: self.contenttype,
            custom_attributes,
            acl,
            null_version: self.nullversion,
            delete_marker: self.deletemarker,
            sse_type: SseType::parse(&self.ssetype)?,
            encryption_key: self.encryptionkey,
            initialization_vector: self.initializationvector,
            kind: ObjectKind::from_i64(self.kind)?,
            storage_class: StorageClass::parse(&self.storageclass)?,
            version_id: Some(version_id),
            parts: BTreeMap::new(),
            parts_index: None,
        })
    }
}

#[derive(FromRow)]
struct PartRow {
    partnumber: i64,
    size: i64,
    objectid: String,
    offset: i64,
    etag: String,
    lastmodified: DateTime<Utc>,
    initializationvector: Vec<u8>,
}

/// CRUD and transactional mutation of object and part records.
#[derive(Clone)]
pub struct ObjectStore {
    db: Arc<SqlitePool>,
    cipher: Arc<VersionCipher>,
}

impl ObjectStore {
    pub fn new(db: Arc<SqlitePool>, cipher: Arc<VersionCipher>) -> Self {
        Self { db, cipher }
    }

    /// Open a transaction for callers composing several store calls
    /// into one atomic unit.
    pub async fn begin(&self) -> MetaResult<Transaction<'static, Sqlite>> {
        Ok(self.db.begin().await?)
    }

    /// Fetch one object. Without `version` this returns the newest
    /// stored row: the version column holds `u64::MAX - nanos`, so an
    /// ascending scan with `LIMIT 1` lands on the most recent write.
    /// The full part set is attached, with an offset index when the
    /// object is multipart.
    pub async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        version: Option<&str>,
    ) -> MetaResult<Object> {
        let row: Option<ObjectRow> = match version {
            None => {
                let sql = format!(
                    "SELECT {READ_COLUMNS} FROM objects WHERE bucketname = ? AND name = ? \
                     ORDER BY bucketname, name, version LIMIT 1"
                );
                sqlx::query_as(&sql)
                    .bind(bucket)
                    .bind(key)
                    .fetch_optional(&*self.db)
                    .await?
            }
            Some(v) => {
                let sql = format!(
                    "SELECT {READ_COLUMNS} FROM objects WHERE bucketname = ? AND name = ? \
                     AND version = ?"
                );
                sqlx::query_as(&sql)
                    .bind(bucket)
                    .bind(key)
                    .bind(v)
                    .fetch_optional(&*self.db)
                    .await?
            }
        };
        let row = row.ok_or_else(|| MetaError::NoSuchKey {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })?;
        let stored_version = row.version.clone();
        let mut object = row.into_object(&self.cipher)?;
        object.parts = self.parts_for(bucket, key, &stored_version).await?;
        object.parts_index = PartIndex::build(&object.parts)?;
        Ok(object)
    }

    /// Fetch by a client-facing version identifier. The literal `null`
    /// selects the bucket's unversioned write for this key.
    pub async fn get_object_by_version_id(
        &self,
        bucket: &str,
        key: &str,
        version_id: &str,
    ) -> MetaResult<Object> {
        if version_id == NULL_VERSION_ID {
            let stored = self
                .null_version_key(bucket, key)
                .await?
                .ok_or_else(|| MetaError::NoSuchKey {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })?;
            return self.get_object(bucket, key, Some(&stored)).await;
        }
        let stored = self.cipher.sort_key_of_version_id(version_id)?;
        self.get_object(bucket, key, Some(&stored)).await
    }

    /// Every stored version of a key, newest first (the version column
    /// enumerates in ascending order, which is descending creation
    /// time).
    pub async fn get_all_versions(&self, bucket: &str, key: &str) -> MetaResult<Vec<Object>> {
        let versions: Vec<String> = sqlx::query_scalar(
            "SELECT version FROM objects WHERE bucketname = ? AND name = ? ORDER BY version",
        )
        .bind(bucket)
        .bind(key)
        .fetch_all(&*self.db)
        .await?;
        let mut objects = Vec::with_capacity(versions.len());
        for v in &versions {
            objects.push(self.get_object(bucket, key, Some(v)).await?);
        }
        Ok(objects)
    }

    /// Insert one object row plus all its part rows, all or nothing.
    pub async fn put_object(&self, object: &Object) -> MetaResult<()> {
        let mut tx = self.begin().await?;
        self.put_object_tx(&mut tx, object).await?;
        tx.commit().await?;
        Ok(())
    }

    /// As [`ObjectStore::put_object`], inside a caller-held
    /// transaction.
    pub async fn put_object_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        object: &Object,
    ) -> MetaResult<()> {
        let version = object.version_key()?;
        insert_object(&mut *tx, object, &version).await?;
        for part in object.parts.values() {
            insert_part(&mut *tx, &object.bucket_name, &object.name, &version, part).await?;
        }
        debug!(
            bucket = %object.bucket_name,
            key = %object.name,
            parts = object.parts.len(),
            "stored object version"
        );
        Ok(())
    }

    /// Rewrite the mutable attribute columns of the exact version the
    /// caller holds.
    pub async fn update_object_attrs(&self, object: &Object) -> MetaResult<()> {
        let version = object.version_key()?;
        let custom_attributes = to_json(&object.custom_attributes, "custom attributes")?;
        sqlx::query(
            "UPDATE objects SET contenttype = ?, customattributes = ?, storageclass = ? \
             WHERE bucketname = ? AND name = ? AND version = ?",
        )
        .bind(&object.content_type)
        .bind(&custom_attributes)
        .bind(object.storage_class.as_str())
        .bind(&object.bucket_name)
        .bind(&object.name)
        .bind(&version)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    /// Rewrite the ACL column of the exact version the caller holds.
    pub async fn update_object_acl(&self, object: &Object) -> MetaResult<()> {
        let version = object.version_key()?;
        let acl = to_json(&object.acl, "object acl")?;
        sqlx::query(
            "UPDATE objects SET acl = ? WHERE bucketname = ? AND name = ? AND version = ?",
        )
        .bind(&acl)
        .bind(&object.bucket_name)
        .bind(&object.name)
        .bind(&version)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    /// Server-side key rename: rewrites the key across the object row
    /// set and its part rows.
    pub async fn rename_object(&self, object: &Object, source_key: &str) -> MetaResult<()> {
        let mut tx = self.begin().await?;
        self.rename_object_tx(&mut tx, object, source_key).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn rename_object_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        object: &Object,
        source_key: &str,
    ) -> MetaResult<()> {
        sqlx::query("UPDATE objects SET name = ? WHERE bucketname = ? AND name = ?")
            .bind(&object.name)
            .bind(&object.bucket_name)
            .bind(source_key)
            .execute(&mut **tx)
            .await?;
        sqlx::query("UPDATE objectpart SET objectname = ? WHERE bucketname = ? AND objectname = ?")
            .bind(&object.name)
            .bind(&object.bucket_name)
            .bind(source_key)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Size/location bookkeeping after an append write. The row keeps
    /// its version; no new version is created.
    pub async fn append_object(&self, object: &Object) -> MetaResult<()> {
        let mut tx = self.begin().await?;
        self.append_object_tx(&mut tx, object).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn append_object_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        object: &Object,
    ) -> MetaResult<()> {
        let version = object.version_key()?;
        sqlx::query(
            "UPDATE objects SET size = ?, location = ?, pool = ?, objectid = ?, etag = ?, \
             lastmodifiedtime = ? WHERE bucketname = ? AND name = ? AND version = ?",
        )
        .bind(object.size)
        .bind(&object.location)
        .bind(&object.pool)
        .bind(&object.object_id)
        .bind(&object.etag)
        .bind(object.last_modified)
        .bind(&object.bucket_name)
        .bind(&object.name)
        .bind(&version)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Delete one exact (bucket, key, version) together with its part
    /// rows, both or neither.
    pub async fn delete_object(&self, object: &Object) -> MetaResult<()> {
        let mut tx = self.begin().await?;
        self.delete_object_tx(&mut tx, object).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn delete_object_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        object: &Object,
    ) -> MetaResult<()> {
        let version = object.version_key()?;
        sqlx::query("DELETE FROM objects WHERE name = ? AND bucketname = ? AND version = ?")
            .bind(&object.name)
            .bind(&object.bucket_name)
            .bind(&version)
            .execute(&mut **tx)
            .await?;
        sqlx::query("DELETE FROM objectpart WHERE objectname = ? AND bucketname = ? AND version = ?")
            .bind(&object.name)
            .bind(&object.bucket_name)
            .bind(&version)
            .execute(&mut **tx)
            .await?;
        debug!(
            bucket = %object.bucket_name,
            key = %object.name,
            "deleted object version"
        );
        Ok(())
    }

    async fn parts_for(
        &self,
        bucket: &str,
        key: &str,
        version: &str,
    ) -> MetaResult<BTreeMap<i64, Part>> {
        let rows: Vec<PartRow> = sqlx::query_as(
            "SELECT partnumber, size, objectid, \"offset\", etag, lastmodified, \
             initializationvector FROM objectpart \
             WHERE bucketname = ? AND objectname = ? AND version = ?",
        )
        .bind(bucket)
        .bind(key)
        .bind(version)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| {
                (
                    r.partnumber,
                    Part {
                        part_number: r.partnumber,
                        size: r.size,
                        object_id: r.objectid,
                        offset: r.offset,
                        etag: r.etag,
                        last_modified: r.lastmodified,
                        initialization_vector: r.initializationvector,
                    },
                )
            })
            .collect())
    }

    async fn null_version_key(&self, bucket: &str, key: &str) -> MetaResult<Option<String>> {
        Ok(sqlx::query_scalar(
            "SELECT version FROM objects WHERE bucketname = ? AND name = ? AND nullversion = 1 \
             ORDER BY version LIMIT 1",
        )
        .bind(bucket)
        .bind(key)
        .fetch_optional(&*self.db)
        .await?)
    }
}

fn to_json<T: serde::Serialize>(value: &T, what: &str) -> MetaResult<String> {
    serde_json::to_string(value).map_err(|err| MetaError::Corrupt(format!("serialize {what}: {err}")))
}

async fn insert_object(
    conn: &mut SqliteConnection,
    object: &Object,
    version: &str,
) -> MetaResult<()> {
    let custom_attributes = to_json(&object.custom_attributes, "custom attributes")?;
    let acl = to_json(&object.acl, "object acl")?;
    sqlx::query(
        "INSERT INTO objects (bucketname, name, version, location, pool, ownerid, size, objectid, \
         lastmodifiedtime, etag, contenttype, customattributes, acl, nullversion, deletemarker, \
         ssetype, encryptionkey, initializationvector, \"type\", storageclass) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&object.bucket_name)
    .bind(&object.name)
    .bind(version)
    .bind(&object.location)
    .bind(&object.pool)
    .bind(&object.owner_id)
    .bind(object.size)
    .bind(&object.object_id)
    .bind(object.last_modified)
    .bind(&object.etag)
    .bind(&object.content_type)
    .bind(&custom_attributes)
    .bind(&acl)
    .bind(object.null_version)
    .bind(object.delete_marker)
    .bind(object.sse_type.as_str())
    .bind(object.encryption_key.as_slice())
    .bind(object.initialization_vector.as_slice())
    .bind(object.kind.as_i64())
    .bind(object.storage_class.as_str())
    .execute(conn)
    .await?;
    Ok(())
}

async fn insert_part(
    conn: &mut SqliteConnection,
    bucket: &str,
    key: &str,
    version: &str,
    part: &Part,
) -> MetaResult<()> {
    sqlx::query(
        "INSERT INTO objectpart (bucketname, objectname, version, partnumber, size, objectid, \
         \"offset\", etag, lastmodified, initializationvector) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(bucket)
    .bind(key)
    .bind(version)
    .bind(part.part_number)
    .bind(part.size)
    .bind(&part.object_id)
    .bind(part.offset)
    .bind(&part.etag)
    .bind(part.last_modified)
    .bind(part.initialization_vector.as_slice())
    .execute(conn)
    .await?;
    Ok(())
}
