mod common;

use std::sync::Arc;

use common::{at, object_at, test_cipher, test_pool};
use meta_store::MetaError;
use meta_store::auth::{Credential, StaticCredentials};
use meta_store::models::bucket::{Acl, Bucket, CannedAcl};
use meta_store::services::lister::{
    ListObjectsQuery, Lister, Pagination, VersionEntryKind,
};
use meta_store::services::object_store::ObjectStore;
use meta_store::version::VersionCipher;
use sqlx::sqlite::SqlitePool;

struct Fixture {
    objects: ObjectStore,
    lister: Lister,
    cipher: Arc<VersionCipher>,
    bucket: Bucket,
}

async fn fixture() -> Fixture {
    fixture_with_acl(CannedAcl::Private).await
}

async fn fixture_with_acl(acl: CannedAcl) -> Fixture {
    let pool: Arc<SqlitePool> = test_pool().await;
    let cipher = test_cipher();
    let mut identities = StaticCredentials::default();
    identities.insert("alice", "Alice");
    let mut bucket = Bucket::new("photos", "alice");
    bucket.acl = Acl::canned(acl);
    Fixture {
        objects: ObjectStore::new(pool.clone(), cipher.clone()),
        lister: Lister::new(pool, cipher.clone(), Arc::new(identities)),
        cipher,
        bucket,
    }
}

fn alice() -> Credential {
    Credential::authenticated("alice", "Alice")
}

async fn seed_keys(fx: &Fixture, keys: &[&str]) {
    for (i, key) in keys.iter().enumerate() {
        fx.objects
            .put_object(&object_at("photos", key, "alice", at(1_700_000_000 + i as i64)))
            .await
            .unwrap();
    }
}

fn query(max_keys: usize, pagination: Pagination) -> ListObjectsQuery {
    ListObjectsQuery {
        max_keys,
        pagination,
        ..ListObjectsQuery::default()
    }
}

#[tokio::test]
async fn v1_pages_walk_the_bucket_in_key_order() {
    let fx = fixture().await;
    seed_keys(&fx, &["a", "b", "c", "d", "e"]).await;

    let page1 = fx
        .lister
        .list_objects(&fx.bucket, &alice(), &query(2, Pagination::V1 { marker: None }))
        .await
        .unwrap();
    let keys: Vec<&str> = page1.entries.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["a", "b"]);
    assert!(page1.is_truncated);
    assert_eq!(page1.next_marker.as_deref(), Some("b"));

    let page2 = fx
        .lister
        .list_objects(
            &fx.bucket,
            &alice(),
            &query(2, Pagination::V1 { marker: page1.next_marker.clone() }),
        )
        .await
        .unwrap();
    let keys: Vec<&str> = page2.entries.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["c", "d"]);
    assert!(page2.is_truncated);

    let page3 = fx
        .lister
        .list_objects(
            &fx.bucket,
            &alice(),
            &query(2, Pagination::V1 { marker: page2.next_marker.clone() }),
        )
        .await
        .unwrap();
    let keys: Vec<&str> = page3.entries.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["e"]);
    assert!(!page3.is_truncated);
    assert!(page3.next_marker.is_none());
}

#[tokio::test]
async fn v2_resumes_from_the_continuation_token() {
    let fx = fixture().await;
    seed_keys(&fx, &["a", "b", "c", "d", "e"]).await;

    let page1 = fx
        .lister
        .list_objects(
            &fx.bucket,
            &alice(),
            &query(
                2,
                Pagination::V2 { start_after: None, continuation_token: None },
            ),
        )
        .await
        .unwrap();
    assert!(page1.is_truncated);
    // v2 never exposes a plain marker, only the sealed token
    assert!(page1.next_marker.is_none());
    let token = page1.next_continuation_token.clone().unwrap();
    assert_eq!(fx.cipher.key_of_token(&token).unwrap(), "b");

    let page2 = fx
        .lister
        .list_objects(
            &fx.bucket,
            &alice(),
            &query(
                2,
                Pagination::V2 { start_after: None, continuation_token: Some(token) },
            ),
        )
        .await
        .unwrap();
    let keys: Vec<&str> = page2.entries.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["c", "d"]);
}

#[tokio::test]
async fn v2_start_after_skips_earlier_keys() {
    let fx = fixture().await;
    seed_keys(&fx, &["a", "b", "c"]).await;

    let page = fx
        .lister
        .list_objects(
            &fx.bucket,
            &alice(),
            &query(
                1000,
                Pagination::V2 {
                    start_after: Some("a".to_string()),
                    continuation_token: None,
                },
            ),
        )
        .await
        .unwrap();
    let keys: Vec<&str> = page.entries.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["b", "c"]);
}

#[tokio::test]
async fn tampered_continuation_token_is_rejected() {
    let fx = fixture().await;
    seed_keys(&fx, &["a"]).await;

    let err = fx
        .lister
        .list_objects(
            &fx.bucket,
            &alice(),
            &query(
                2,
                Pagination::V2 {
                    start_after: None,
                    continuation_token: Some("deadbeef".to_string()),
                },
            ),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, MetaError::InvalidToken));
}

#[tokio::test]
async fn delimiter_groups_keys_into_common_prefixes() {
    let fx = fixture().await;
    seed_keys(&fx, &["docs/x", "photos/a", "photos/b", "readme"]).await;

    let q = ListObjectsQuery {
        delimiter: Some("/".to_string()),
        ..ListObjectsQuery::default()
    };
    let page = fx.lister.list_objects(&fx.bucket, &alice(), &q).await.unwrap();
    let keys: Vec<&str> = page.entries.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["readme"]);
    assert_eq!(page.common_prefixes, vec!["docs/", "photos/"]);

    let q = ListObjectsQuery {
        prefix: Some("photos/".to_string()),
        delimiter: Some("/".to_string()),
        ..ListObjectsQuery::default()
    };
    let page = fx.lister.list_objects(&fx.bucket, &alice(), &q).await.unwrap();
    let keys: Vec<&str> = page.entries.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["photos/a", "photos/b"]);
    assert!(page.common_prefixes.is_empty());
}

#[tokio::test]
async fn delimiter_pages_advance_past_a_prefix_group() {
    let fx = fixture().await;
    seed_keys(&fx, &["a/one", "a/two", "b"]).await;

    let q = ListObjectsQuery {
        delimiter: Some("/".to_string()),
        ..query(1, Pagination::V1 { marker: None })
    };
    let page1 = fx.lister.list_objects(&fx.bucket, &alice(), &q).await.unwrap();
    assert!(page1.entries.is_empty());
    assert_eq!(page1.common_prefixes, vec!["a/"]);
    assert!(page1.is_truncated);
    assert_eq!(page1.next_marker.as_deref(), Some("a/"));

    // resuming from a delivered group must not re-emit it
    let q = ListObjectsQuery {
        delimiter: Some("/".to_string()),
        ..query(1, Pagination::V1 { marker: page1.next_marker.clone() })
    };
    let page2 = fx.lister.list_objects(&fx.bucket, &alice(), &q).await.unwrap();
    let keys: Vec<&str> = page2.entries.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["b"]);
    assert!(page2.common_prefixes.is_empty());
    assert!(!page2.is_truncated);
    assert!(page2.next_marker.is_none());
}

#[tokio::test]
async fn versioned_delimiter_pages_advance_past_a_prefix_group() {
    let fx = fixture().await;
    seed_keys(&fx, &["a/one", "b"]).await;

    let q = ListObjectsQuery {
        delimiter: Some("/".to_string()),
        ..query(1, Pagination::Versioned { key_marker: None, version_id_marker: None })
    };
    let page1 = fx
        .lister
        .list_object_versions(&fx.bucket, &alice(), &q)
        .await
        .unwrap();
    assert!(page1.entries.is_empty());
    assert_eq!(page1.common_prefixes, vec!["a/"]);
    assert!(page1.is_truncated);
    assert_eq!(page1.next_key_marker.as_deref(), Some("a/"));
    assert!(page1.next_version_id_marker.is_none());

    let q = ListObjectsQuery {
        delimiter: Some("/".to_string()),
        ..query(
            1,
            Pagination::Versioned {
                key_marker: page1.next_key_marker.clone(),
                version_id_marker: None,
            },
        )
    };
    let page2 = fx
        .lister
        .list_object_versions(&fx.bucket, &alice(), &q)
        .await
        .unwrap();
    let keys: Vec<&str> = page2.entries.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["b"]);
    assert!(page2.common_prefixes.is_empty());
    assert!(!page2.is_truncated);
}

#[tokio::test]
async fn prefix_wildcards_match_literally() {
    let fx = fixture().await;
    seed_keys(&fx, &["a_c", "abc", "axc"]).await;

    let q = ListObjectsQuery {
        prefix: Some("a_c".to_string()),
        ..ListObjectsQuery::default()
    };
    let page = fx.lister.list_objects(&fx.bucket, &alice(), &q).await.unwrap();
    let keys: Vec<&str> = page.entries.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["a_c"]);
}

#[tokio::test]
async fn keys_whose_newest_version_is_a_delete_marker_are_hidden() {
    let fx = fixture().await;
    seed_keys(&fx, &["a", "b", "c"]).await;
    let mut marker = object_at("photos", "b", "alice", at(1_700_009_999));
    marker.delete_marker = true;
    fx.objects.put_object(&marker).await.unwrap();

    let page = fx
        .lister
        .list_objects(&fx.bucket, &alice(), &ListObjectsQuery::default())
        .await
        .unwrap();
    let keys: Vec<&str> = page.entries.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["a", "c"]);
}

#[tokio::test]
async fn version_listing_enumerates_newest_first_with_kinds() {
    let fx = fixture().await;
    let mut first = object_at("photos", "doc", "alice", at(1_700_000_000));
    first.null_version = true;
    let second = object_at("photos", "doc", "alice", at(1_700_000_100));
    let mut marker = object_at("photos", "doc", "alice", at(1_700_000_200));
    marker.delete_marker = true;
    fx.objects.put_object(&first).await.unwrap();
    fx.objects.put_object(&second).await.unwrap();
    fx.objects.put_object(&marker).await.unwrap();

    let page = fx
        .lister
        .list_object_versions(&fx.bucket, &alice(), &ListObjectsQuery::default())
        .await
        .unwrap();
    assert_eq!(page.entries.len(), 3);
    assert!(!page.is_truncated);

    assert_eq!(page.entries[0].kind, VersionEntryKind::DeleteMarker);
    assert_eq!(page.entries[0].last_modified, marker.last_modified);
    assert_eq!(page.entries[1].kind, VersionEntryKind::Version);
    assert_eq!(page.entries[1].last_modified, second.last_modified);
    assert_eq!(page.entries[2].version_id, "null");
    assert_eq!(page.entries[2].last_modified, first.last_modified);

    // the second entry's id decodes to its own stored sort key
    let decoded = fx
        .cipher
        .sort_key_of_version_id(&page.entries[1].version_id)
        .unwrap();
    assert_eq!(
        meta_store::version::time_of_sort_key(&decoded).unwrap(),
        second.last_modified
    );
}

#[tokio::test]
async fn version_listing_resumes_mid_key() {
    let fx = fixture().await;
    let v1 = object_at("photos", "doc", "alice", at(1_700_000_000));
    let v2 = object_at("photos", "doc", "alice", at(1_700_000_100));
    let v3 = object_at("photos", "doc", "alice", at(1_700_000_200));
    for v in [&v1, &v2, &v3] {
        fx.objects.put_object(v).await.unwrap();
    }

    let page1 = fx
        .lister
        .list_object_versions(
            &fx.bucket,
            &alice(),
            &query(2, Pagination::Versioned { key_marker: None, version_id_marker: None }),
        )
        .await
        .unwrap();
    assert_eq!(page1.entries.len(), 2);
    assert!(page1.is_truncated);
    assert_eq!(page1.next_key_marker.as_deref(), Some("doc"));
    let id_marker = page1.next_version_id_marker.clone().unwrap();

    let page2 = fx
        .lister
        .list_object_versions(
            &fx.bucket,
            &alice(),
            &query(
                2,
                Pagination::Versioned {
                    key_marker: Some("doc".to_string()),
                    version_id_marker: Some(id_marker),
                },
            ),
        )
        .await
        .unwrap();
    assert_eq!(page2.entries.len(), 1);
    assert!(!page2.is_truncated);
    // oldest version arrives last
    assert_eq!(page2.entries[0].last_modified, v1.last_modified);
}

#[tokio::test]
async fn read_access_follows_the_bucket_acl() {
    let open = fixture_with_acl(CannedAcl::PublicRead).await;
    seed_keys(&open, &["a"]).await;
    let page = open
        .lister
        .list_objects(&open.bucket, &Credential::anonymous(), &ListObjectsQuery::default())
        .await
        .unwrap();
    assert_eq!(page.entries.len(), 1);

    let closed = fixture().await;
    seed_keys(&closed, &["a"]).await;
    let err = closed
        .lister
        .list_objects(&closed.bucket, &Credential::anonymous(), &ListObjectsQuery::default())
        .await
        .unwrap_err();
    assert!(matches!(err, MetaError::AccessForbidden(_)));
}

#[tokio::test]
async fn fetch_owner_resolves_display_names() {
    let fx = fixture().await;
    seed_keys(&fx, &["a"]).await;

    let q = ListObjectsQuery {
        fetch_owner: true,
        ..ListObjectsQuery::default()
    };
    let page = fx.lister.list_objects(&fx.bucket, &alice(), &q).await.unwrap();
    let owner = page.entries[0].owner.as_ref().unwrap();
    assert_eq!(owner.id, "alice");
    assert_eq!(owner.display_name, "Alice");

    let page = fx
        .lister
        .list_objects(&fx.bucket, &alice(), &ListObjectsQuery::default())
        .await
        .unwrap();
    assert!(page.entries[0].owner.is_none());
}

#[tokio::test]
async fn url_encoding_applies_to_keys_and_prefixes() {
    let fx = fixture().await;
    seed_keys(&fx, &["my photos/cat 1.jpg"]).await;

    let q = ListObjectsQuery {
        delimiter: Some("/".to_string()),
        url_encode: true,
        ..ListObjectsQuery::default()
    };
    let page = fx.lister.list_objects(&fx.bucket, &alice(), &q).await.unwrap();
    assert_eq!(page.common_prefixes, vec!["my%20photos%2F"]);

    let q = ListObjectsQuery {
        url_encode: true,
        ..ListObjectsQuery::default()
    };
    let page = fx.lister.list_objects(&fx.bucket, &alice(), &q).await.unwrap();
    assert_eq!(page.entries[0].key, "my%20photos%2Fcat%201%2Ejpg");
}

#[tokio::test]
async fn listed_entries_carry_quoted_etags() {
    let fx = fixture().await;
    seed_keys(&fx, &["a"]).await;

    let page = fx
        .lister
        .list_objects(&fx.bucket, &alice(), &ListObjectsQuery::default())
        .await
        .unwrap();
    let etag = &page.entries[0].etag;
    assert!(etag.starts_with('"') && etag.ends_with('"'));
}
