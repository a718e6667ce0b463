//! Owner/ACL based authorization shared by bucket and listing
//! operations.

use std::collections::BTreeMap;

use crate::error::{MetaError, MetaResult};
use crate::models::bucket::{Bucket, CannedAcl};

/// Resolved caller identity. An anonymous caller carries an empty
/// `user_id`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Credential {
    pub user_id: String,
    pub display_name: String,
    /// Internal callers may bypass the ACL check entirely.
    pub allow_other_user_access: bool,
}

impl Credential {
    pub fn authenticated(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            allow_other_user_access: false,
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_empty()
    }
}

/// Read-style access: the canned ACL can open a bucket to non-owners.
/// `public-read`/`public-read-write` admit anyone, `authenticated-read`
/// admits any non-anonymous caller, everything else is owner only.
pub fn check_bucket_read(bucket: &Bucket, credential: &Credential) -> MetaResult<()> {
    if credential.allow_other_user_access || bucket.owner_id == credential.user_id {
        return Ok(());
    }
    match bucket.acl.canned_acl {
        CannedAcl::PublicRead | CannedAcl::PublicReadWrite => Ok(()),
        CannedAcl::AuthenticatedRead if !credential.is_anonymous() => Ok(()),
        _ => Err(MetaError::AccessForbidden(bucket.name.clone())),
    }
}

/// Mutating access: owner only, independent of the ACL.
pub fn check_bucket_owner(bucket: &Bucket, credential: &Credential) -> MetaResult<()> {
    if bucket.owner_id == credential.user_id {
        Ok(())
    } else {
        Err(MetaError::AccessForbidden(bucket.name.clone()))
    }
}

/// Identity collaborator: resolves an owner id to a displayable
/// credential for listing enrichment.
pub trait CredentialLookup: Send + Sync {
    fn credential_for(&self, user_id: &str) -> MetaResult<Credential>;
}

/// Map-backed lookup for embedders that manage identities statically
/// and for tests.
#[derive(Clone, Debug, Default)]
pub struct StaticCredentials {
    entries: BTreeMap<String, String>,
}

impl StaticCredentials {
    pub fn insert(&mut self, user_id: impl Into<String>, display_name: impl Into<String>) {
        self.entries.insert(user_id.into(), display_name.into());
    }
}

impl CredentialLookup for StaticCredentials {
    fn credential_for(&self, user_id: &str) -> MetaResult<Credential> {
        let display_name = self
            .entries
            .get(user_id)
            .ok_or_else(|| MetaError::Corrupt(format!("unknown owner `{user_id}`")))?;
        Ok(Credential::authenticated(user_id, display_name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::bucket::Acl;

    fn bucket_with_acl(acl: CannedAcl) -> Bucket {
        let mut bucket = Bucket::new("demo", "alice");
        bucket.acl = Acl::canned(acl);
        bucket
    }

    #[test]
    fn owner_always_reads_and_mutates() {
        let bucket = bucket_with_acl(CannedAcl::Private);
        let owner = Credential::authenticated("alice", "Alice");
        assert!(check_bucket_read(&bucket, &owner).is_ok());
        assert!(check_bucket_owner(&bucket, &owner).is_ok());
    }

    #[test]
    fn public_read_admits_anonymous() {
        let bucket = bucket_with_acl(CannedAcl::PublicRead);
        assert!(check_bucket_read(&bucket, &Credential::anonymous()).is_ok());
    }

    #[test]
    fn private_rejects_non_owner() {
        let bucket = bucket_with_acl(CannedAcl::Private);
        let other = Credential::authenticated("bob", "Bob");
        assert!(matches!(
            check_bucket_read(&bucket, &other),
            Err(MetaError::AccessForbidden(_))
        ));
        assert!(matches!(
            check_bucket_owner(&bucket, &other),
            Err(MetaError::AccessForbidden(_))
        ));
    }

    #[test]
    fn authenticated_read_requires_identity() {
        let bucket = bucket_with_acl(CannedAcl::AuthenticatedRead);
        assert!(matches!(
            check_bucket_read(&bucket, &Credential::anonymous()),
            Err(MetaError::AccessForbidden(_))
        ));
        let bob = Credential::authenticated("bob", "Bob");
        assert!(check_bucket_read(&bucket, &bob).is_ok());
    }

    #[test]
    fn acl_never_opens_mutation() {
        let bucket = bucket_with_acl(CannedAcl::PublicReadWrite);
        let other = Credential::authenticated("bob", "Bob");
        assert!(matches!(
            check_bucket_owner(&bucket, &other),
            Err(MetaError::AccessForbidden(_))
        ));
    }

    #[test]
    fn internal_bypass_reads_private_bucket() {
        let bucket = bucket_with_acl(CannedAcl::Private);
        let mut internal = Credential::authenticated("system", "system");
        internal.allow_other_user_access = true;
        assert!(check_bucket_read(&bucket, &internal).is_ok());
    }
}
