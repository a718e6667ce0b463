//! Bucket records and their serialized sub-resources.
//!
//! ACL, policy, lifecycle, CORS, and website configuration live in the
//! bucket row as JSON text columns; in memory they are always the
//! structured values below, with [`serde_json`] applied only at the
//! persistence edge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MetaError, MetaResult};

/// Canned ACL vocabulary accepted on buckets and objects.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CannedAcl {
    #[default]
    #[serde(rename = "private")]
    Private,
    #[serde(rename = "public-read")]
    PublicRead,
    #[serde(rename = "public-read-write")]
    PublicReadWrite,
    #[serde(rename = "authenticated-read")]
    AuthenticatedRead,
}

/// Explicit grant carried alongside the canned setting.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Grant {
    pub grantee: String,
    pub permission: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Acl {
    #[serde(default)]
    pub canned_acl: CannedAcl,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub grants: Vec<Grant>,
}

impl Acl {
    pub fn canned(canned_acl: CannedAcl) -> Self {
        Self {
            canned_acl,
            grants: Vec::new(),
        }
    }
}

/// Bucket versioning state machine: `Disabled` until first enabled,
/// then toggles between `Enabled` and `Suspended`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Versioning {
    #[default]
    Disabled,
    Enabled,
    Suspended,
}

impl Versioning {
    /// Wire status string; S3 reports an empty status while versioning
    /// has never been enabled.
    pub fn status(&self) -> &'static str {
        match self {
            Versioning::Disabled => "",
            Versioning::Enabled => "Enabled",
            Versioning::Suspended => "Suspended",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Versioning::Disabled => "Disabled",
            Versioning::Enabled => "Enabled",
            Versioning::Suspended => "Suspended",
        }
    }

    pub fn parse(text: &str) -> MetaResult<Self> {
        match text {
            "Disabled" => Ok(Versioning::Disabled),
            "Enabled" => Ok(Versioning::Enabled),
            "Suspended" => Ok(Versioning::Suspended),
            other => Err(MetaError::Corrupt(format!(
                "unknown versioning state `{other}`"
            ))),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct LifecycleRule {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub expiration_days: Option<u32>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Lifecycle {
    #[serde(default)]
    pub rules: Vec<LifecycleRule>,
}

impl Lifecycle {
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct CorsRule {
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default)]
    pub allowed_methods: Vec<String>,
    #[serde(default)]
    pub allowed_headers: Vec<String>,
    #[serde(default)]
    pub expose_headers: Vec<String>,
    #[serde(default)]
    pub max_age_seconds: Option<u32>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Cors {
    #[serde(default)]
    pub rules: Vec<CorsRule>,
}

impl Cors {
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct WebsiteConfiguration {
    #[serde(default)]
    pub index_document: Option<String>,
    #[serde(default)]
    pub error_document: Option<String>,
    #[serde(default)]
    pub redirect_all_requests_to: Option<String>,
}

impl WebsiteConfiguration {
    pub fn is_empty(&self) -> bool {
        self.index_document.is_none()
            && self.error_document.is_none()
            && self.redirect_all_requests_to.is_none()
    }
}

/// One statement of a bucket policy document. Principal, action, and
/// resource keep their JSON shape; the engine stores and returns them
/// without interpreting the grammar.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Statement {
    #[serde(default, rename = "Effect")]
    pub effect: String,
    #[serde(default, rename = "Principal")]
    pub principal: serde_json::Value,
    #[serde(default, rename = "Action")]
    pub action: serde_json::Value,
    #[serde(default, rename = "Resource")]
    pub resource: serde_json::Value,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Policy {
    #[serde(default, rename = "Version")]
    pub version: String,
    #[serde(default, rename = "Statement")]
    pub statement: Vec<Statement>,
}

impl Policy {
    pub fn is_empty(&self) -> bool {
        self.statement.is_empty()
    }

    /// Parses a submitted or stored policy document.
    pub fn from_json(text: &str) -> MetaResult<Self> {
        serde_json::from_str(text).map_err(|_| MetaError::MalformedPolicy)
    }

    pub fn to_json(&self) -> MetaResult<String> {
        serde_json::to_string(self).map_err(|_| MetaError::MalformedPolicy)
    }
}

/// A bucket record as stored in the `buckets` table.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Bucket {
    /// Globally unique bucket name.
    pub name: String,
    /// Owning principal; all mutations are restricted to this id.
    pub owner_id: String,
    pub create_time: DateTime<Utc>,
    pub acl: Acl,
    pub policy: Policy,
    pub lifecycle: Lifecycle,
    pub cors: Cors,
    pub website: WebsiteConfiguration,
    pub versioning: Versioning,
}

impl Bucket {
    pub fn new(name: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner_id: owner_id.into(),
            create_time: Utc::now(),
            acl: Acl::default(),
            policy: Policy::default(),
            lifecycle: Lifecycle::default(),
            cors: Cors::default(),
            website: WebsiteConfiguration::default(),
            versioning: Versioning::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canned_acl_serializes_to_s3_names() {
        let acl = Acl::canned(CannedAcl::PublicRead);
        let json = serde_json::to_string(&acl).unwrap();
        assert!(json.contains("\"public-read\""));
        let back: Acl = serde_json::from_str(&json).unwrap();
        assert_eq!(back, acl);
    }

    #[test]
    fn versioning_status_is_empty_while_disabled() {
        assert_eq!(Versioning::Disabled.status(), "");
        assert_eq!(Versioning::Suspended.status(), "Suspended");
        assert_eq!(Versioning::parse("Enabled").unwrap(), Versioning::Enabled);
        assert!(Versioning::parse("bogus").is_err());
    }

    #[test]
    fn bad_policy_document_is_malformed() {
        assert!(matches!(
            Policy::from_json("{not json"),
            Err(MetaError::MalformedPolicy)
        ));
        let p = Policy::from_json(
            r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Action":"s3:GetObject"}]}"#,
        )
        .unwrap();
        assert_eq!(p.statement.len(), 1);
        assert!(!p.is_empty());
    }
}
