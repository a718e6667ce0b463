//! Bucket lifecycle, sub-resource administration, and per-owner
//! enumeration.
//!
//! All mutations are owner-only; the ACL can open a bucket for reads
//! but never for administration. Every successful mutation drops the
//! corresponding cache entries, strictly after the write. A cache
//! failure is logged and the mutation still succeeds.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use sqlx::sqlite::SqlitePool;
use tracing::{info, warn};

use crate::auth::{self, Credential};
use crate::cache::CacheInvalidator;
use crate::error::{MetaError, MetaResult};
use crate::models::bucket::{
    Acl, Bucket, Cors, Lifecycle, Policy, Versioning, WebsiteConfiguration,
};

/// Default ceiling on buckets owned by one principal.
pub const DEFAULT_BUCKET_LIMIT: usize = 100;

#[derive(FromRow)]
struct BucketRow {
    name: String,
    ownerid: String,
    createtime: DateTime<Utc>,
    acl: String,
    policy: String,
    lifecycle: String,
    cors: String,
    website: String,
    versioning: String,
}

impl BucketRow {
    fn into_bucket(self) -> MetaResult<Bucket> {
        let corrupt = |what: &str, err: serde_json::Error| {
            MetaError::Corrupt(format!("bucket `{}` {what}: {err}", self.name))
        };
        Ok(Bucket {
            acl: serde_json::from_str(&self.acl).map_err(|e| corrupt("acl", e))?,
            policy: Policy::from_json(&self.policy)?,
            lifecycle: serde_json::from_str(&self.lifecycle).map_err(|e| corrupt("lifecycle", e))?,
            cors: serde_json::from_str(&self.cors).map_err(|e| corrupt("cors", e))?,
            website: serde_json::from_str(&self.website).map_err(|e| corrupt("website", e))?,
            versioning: Versioning::parse(&self.versioning)?,
            name: self.name,
            owner_id: self.ownerid,
            create_time: self.createtime,
        })
    }
}

/// Bucket administration over the `buckets` table.
#[derive(Clone)]
pub struct BucketStore {
    db: Arc<SqlitePool>,
    cache: Arc<dyn CacheInvalidator>,
    bucket_limit: usize,
}

impl BucketStore {
    pub fn new(db: Arc<SqlitePool>, cache: Arc<dyn CacheInvalidator>) -> Self {
        Self {
            db,
            cache,
            bucket_limit: DEFAULT_BUCKET_LIMIT,
        }
    }

    pub fn with_bucket_limit(mut self, limit: usize) -> Self {
        self.bucket_limit = limit;
        self
    }

    /// Create a bucket owned by `credential`, enforcing the per-owner
    /// ceiling before the insert. A name collision surfaces as
    /// `BucketAlreadyExists`.
    pub async fn create_bucket(
        &self,
        name: &str,
        acl: Acl,
        credential: &Credential,
    ) -> MetaResult<Bucket> {
        let owned = self.user_buckets(&credential.user_id).await?;
        if owned.len() + 1 > self.bucket_limit {
            return Err(MetaError::TooManyBuckets(credential.user_id.clone()));
        }

        let mut bucket = Bucket::new(name, credential.user_id.clone());
        bucket.acl = acl;

        let result = sqlx::query(
            "INSERT INTO buckets (name, ownerid, createtime, acl, policy, lifecycle, cors, \
             website, versioning) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&bucket.name)
        .bind(&bucket.owner_id)
        .bind(bucket.create_time)
        .bind(to_json(&bucket.acl, name, "acl")?)
        .bind(bucket.policy.to_json()?)
        .bind(to_json(&bucket.lifecycle, name, "lifecycle")?)
        .bind(to_json(&bucket.cors, name, "cors")?)
        .bind(to_json(&bucket.website, name, "website")?)
        .bind(bucket.versioning.as_str())
        .execute(&*self.db)
        .await;

        match result {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(MetaError::BucketAlreadyExists(name.to_string()));
            }
            Err(err) => return Err(err.into()),
        }

        info!(bucket = name, owner = %credential.user_id, "created bucket");
        self.drop_user_cache(&credential.user_id);
        Ok(bucket)
    }

    /// Raw record fetch, no ACL applied. For internal callers.
    pub async fn get_bucket(&self, name: &str) -> MetaResult<Bucket> {
        let row: Option<BucketRow> = sqlx::query_as(
            "SELECT name, ownerid, createtime, acl, policy, lifecycle, cors, website, versioning \
             FROM buckets WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&*self.db)
        .await?;
        row.ok_or_else(|| MetaError::NoSuchBucket(name.to_string()))?
            .into_bucket()
    }

    /// Record fetch with the read guard applied.
    pub async fn get_bucket_info(
        &self,
        name: &str,
        credential: &Credential,
    ) -> MetaResult<Bucket> {
        let bucket = self.get_bucket(name).await?;
        auth::check_bucket_read(&bucket, credential)?;
        Ok(bucket)
    }

    pub async fn set_bucket_acl(
        &self,
        name: &str,
        acl: Acl,
        credential: &Credential,
    ) -> MetaResult<()> {
        self.rewrite_as_owner(name, credential, |bucket| bucket.acl = acl)
            .await
    }

    pub async fn get_bucket_acl(&self, name: &str, credential: &Credential) -> MetaResult<Acl> {
        let bucket = self.get_bucket(name).await?;
        auth::check_bucket_owner(&bucket, credential)?;
        Ok(bucket.acl)
    }

    pub async fn set_bucket_policy(
        &self,
        name: &str,
        policy: Policy,
        credential: &Credential,
    ) -> MetaResult<()> {
        self.rewrite_as_owner(name, credential, |bucket| bucket.policy = policy)
            .await
    }

    pub async fn get_bucket_policy(
        &self,
        name: &str,
        credential: &Credential,
    ) -> MetaResult<Policy> {
        let bucket = self.get_bucket(name).await?;
        auth::check_bucket_owner(&bucket, credential)?;
        Ok(bucket.policy)
    }

    pub async fn delete_bucket_policy(
        &self,
        name: &str,
        credential: &Credential,
    ) -> MetaResult<()> {
        self.rewrite_as_owner(name, credential, |bucket| bucket.policy = Policy::default())
            .await
    }

    /// Store lifecycle rules and register the bucket with the
    /// lifecycle-processing index.
    pub async fn set_bucket_lifecycle(
        &self,
        name: &str,
        lifecycle: Lifecycle,
        credential: &Credential,
    ) -> MetaResult<()> {
        self.rewrite_as_owner(name, credential, |bucket| bucket.lifecycle = lifecycle)
            .await?;
        sqlx::query("INSERT OR REPLACE INTO lifecycle (bucketname, status) VALUES (?, 'Pending')")
            .bind(name)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    pub async fn get_bucket_lifecycle(
        &self,
        name: &str,
        credential: &Credential,
    ) -> MetaResult<Lifecycle> {
        let bucket = self.get_bucket(name).await?;
        auth::check_bucket_owner(&bucket, credential)?;
        if bucket.lifecycle.is_empty() {
            return Err(MetaError::NoSuchLifecycle(name.to_string()));
        }
        Ok(bucket.lifecycle)
    }

    pub async fn delete_bucket_lifecycle(
        &self,
        name: &str,
        credential: &Credential,
    ) -> MetaResult<()> {
        self.rewrite_as_owner(name, credential, |bucket| {
            bucket.lifecycle = Lifecycle::default()
        })
        .await?;
        self.remove_from_lifecycle_index(name).await
    }

    pub async fn set_bucket_cors(
        &self,
        name: &str,
        cors: Cors,
        credential: &Credential,
    ) -> MetaResult<()> {
        self.rewrite_as_owner(name, credential, |bucket| bucket.cors = cors)
            .await
    }

    pub async fn get_bucket_cors(&self, name: &str, credential: &Credential) -> MetaResult<Cors> {
        let bucket = self.get_bucket(name).await?;
        auth::check_bucket_owner(&bucket, credential)?;
        if bucket.cors.is_empty() {
            return Err(MetaError::NoSuchCors(name.to_string()));
        }
        Ok(bucket.cors)
    }

    pub async fn delete_bucket_cors(&self, name: &str, credential: &Credential) -> MetaResult<()> {
        self.rewrite_as_owner(name, credential, |bucket| bucket.cors = Cors::default())
            .await
    }

    pub async fn set_bucket_website(
        &self,
        name: &str,
        website: WebsiteConfiguration,
        credential: &Credential,
    ) -> MetaResult<()> {
        self.rewrite_as_owner(name, credential, |bucket| bucket.website = website)
            .await
    }

    /// Website configuration is served to any caller; the website
    /// endpoint itself fronts anonymous traffic.
    pub async fn get_bucket_website(&self, name: &str) -> MetaResult<WebsiteConfiguration> {
        Ok(self.get_bucket(name).await?.website)
    }

    pub async fn delete_bucket_website(
        &self,
        name: &str,
        credential: &Credential,
    ) -> MetaResult<()> {
        self.rewrite_as_owner(name, credential, |bucket| {
            bucket.website = WebsiteConfiguration::default()
        })
        .await
    }

    pub async fn set_bucket_versioning(
        &self,
        name: &str,
        versioning: Versioning,
        credential: &Credential,
    ) -> MetaResult<()> {
        self.rewrite_as_owner(name, credential, |bucket| bucket.versioning = versioning)
            .await
    }

    /// Versioning state is readable by any caller.
    pub async fn get_bucket_versioning(&self, name: &str) -> MetaResult<Versioning> {
        Ok(self.get_bucket(name).await?.versioning)
    }

    /// All buckets owned by the caller, resolved to full records.
    pub async fn list_buckets(&self, credential: &Credential) -> MetaResult<Vec<Bucket>> {
        let names = self.user_buckets(&credential.user_id).await?;
        let mut buckets = Vec::with_capacity(names.len());
        for name in &names {
            buckets.push(self.get_bucket(name).await?);
        }
        Ok(buckets)
    }

    pub async fn is_empty_bucket(&self, name: &str) -> MetaResult<bool> {
        let row: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM objects WHERE bucketname = ? LIMIT 1")
                .bind(name)
                .fetch_optional(&*self.db)
                .await?;
        Ok(row.is_none())
    }

    /// Delete a bucket. Owner only, and only when no object row
    /// remains under it.
    pub async fn delete_bucket(&self, name: &str, credential: &Credential) -> MetaResult<()> {
        let bucket = self.get_bucket(name).await?;
        auth::check_bucket_owner(&bucket, credential)?;
        if !self.is_empty_bucket(name).await? {
            return Err(MetaError::BucketNotEmpty(name.to_string()));
        }

        let result = sqlx::query("DELETE FROM buckets WHERE name = ?")
            .bind(name)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(MetaError::NoSuchBucket(name.to_string()));
        }

        info!(bucket = name, owner = %credential.user_id, "deleted bucket");
        self.drop_user_cache(&credential.user_id);
        self.drop_bucket_cache(name);

        if !bucket.lifecycle.is_empty() {
            if let Err(err) = self.remove_from_lifecycle_index(name).await {
                warn!(bucket = name, %err, "failed to deregister bucket from lifecycle index");
            }
        }
        Ok(())
    }

    /// Full-row rewrite of the caller-mutated record, followed by
    /// cache invalidation.
    async fn rewrite_as_owner<F>(
        &self,
        name: &str,
        credential: &Credential,
        mutate: F,
    ) -> MetaResult<()>
    where
        F: FnOnce(&mut Bucket),
    {
        let mut bucket = self.get_bucket(name).await?;
        auth::check_bucket_owner(&bucket, credential)?;
        mutate(&mut bucket);
        self.put_bucket(&bucket).await?;
        self.drop_bucket_cache(name);
        Ok(())
    }

    async fn put_bucket(&self, bucket: &Bucket) -> MetaResult<()> {
        let result = sqlx::query(
            "UPDATE buckets SET ownerid = ?, createtime = ?, acl = ?, policy = ?, lifecycle = ?, \
             cors = ?, website = ?, versioning = ? WHERE name = ?",
        )
        .bind(&bucket.owner_id)
        .bind(bucket.create_time)
        .bind(to_json(&bucket.acl, &bucket.name, "acl")?)
        .bind(bucket.policy.to_json()?)
        .bind(to_json(&bucket.lifecycle, &bucket.name, "lifecycle")?)
        .bind(to_json(&bucket.cors, &bucket.name, "cors")?)
        .bind(to_json(&bucket.website, &bucket.name, "website")?)
        .bind(bucket.versioning.as_str())
        .bind(&bucket.name)
        .execute(&*self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(MetaError::NoSuchBucket(bucket.name.clone()));
        }
        Ok(())
    }

    async fn user_buckets(&self, user_id: &str) -> MetaResult<Vec<String>> {
        Ok(
            sqlx::query_scalar("SELECT name FROM buckets WHERE ownerid = ? ORDER BY name")
                .bind(user_id)
                .fetch_all(&*self.db)
                .await?,
        )
    }

    async fn remove_from_lifecycle_index(&self, name: &str) -> MetaResult<()> {
        sqlx::query("DELETE FROM lifecycle WHERE bucketname = ?")
            .bind(name)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    fn drop_bucket_cache(&self, name: &str) {
        if let Err(err) = self.cache.invalidate_bucket(name) {
            warn!(bucket = name, %err, "bucket cache invalidation failed");
        }
    }

    fn drop_user_cache(&self, user_id: &str) {
        if let Err(err) = self.cache.invalidate_user_buckets(user_id) {
            warn!(owner = user_id, %err, "user bucket list invalidation failed");
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T, bucket: &str, what: &str) -> MetaResult<String> {
    serde_json::to_string(value)
        .map_err(|err| MetaError::Corrupt(format!("serialize {what} for bucket `{bucket}`: {err}")))
}

/// True if the backend reported a unique-constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
