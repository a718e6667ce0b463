//! Data model of the metadata engine.
//!
//! These entities mirror the relational schema: buckets, object
//! versions, and multipart parts. Serialized sub-resources (ACL,
//! policy, custom attributes) cross the persistence edge as JSON text
//! and are structured values everywhere else.

pub mod bucket;
pub mod object;
pub mod part;
