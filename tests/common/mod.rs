#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;

use meta_store::db;
use meta_store::models::object::Object;
use meta_store::models::part::Part;
use meta_store::version::{KEY_SIZE, VersionCipher};

/// One connection so every query in a test sees the same in-memory
/// database.
pub async fn test_pool() -> Arc<SqlitePool> {
    let pool = db::connect("sqlite::memory:", 1)
        .await
        .expect("in-memory pool");
    db::migrate(&pool).await.expect("apply schema");
    pool
}

pub fn test_cipher() -> Arc<VersionCipher> {
    Arc::new(VersionCipher::new([42u8; KEY_SIZE]))
}

pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).expect("fixture timestamp")
}

pub fn object_at(bucket: &str, key: &str, owner: &str, time: DateTime<Utc>) -> Object {
    let mut object = Object::new(bucket, key, owner);
    object.last_modified = time;
    object.etag = format!("etag-{key}-{}", time.timestamp());
    object.content_type = "application/octet-stream".to_string();
    object.size = 3;
    object
}

pub fn part_at(number: i64, offset: i64, size: i64) -> Part {
    Part {
        part_number: number,
        size,
        object_id: format!("blob-{number}"),
        offset,
        etag: format!("part-etag-{number}"),
        last_modified: at(1_700_000_000),
        initialization_vector: Vec::new(),
    }
}
