//! Metadata engine for an S3-compatible object store.
//!
//! Bucket, object-version, and multipart bookkeeping over SQLite, with
//! the three S3 listing protocols and ACL-based access checks. Data
//! bytes live elsewhere; this crate only tracks where they are.

pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod version;

pub use error::{MetaError, MetaResult};
