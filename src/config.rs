use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Development-only key; real deployments must set META_STORE_SECRET_KEY.
const DEV_SECRET_KEY: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    /// 32-byte AES key for version ids and continuation tokens, hex.
    pub secret_key: String,
    pub max_buckets: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Object storage metadata engine")]
pub struct Args {
    /// Database URL (overrides META_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Hex-encoded 32-byte listing/version key (overrides META_STORE_SECRET_KEY)
    #[arg(long)]
    pub secret_key: Option<String>,

    /// Per-user bucket limit (overrides META_STORE_MAX_BUCKETS)
    #[arg(long)]
    pub max_buckets: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_db = env::var("META_STORE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta_store.db".into());
        let env_key =
            env::var("META_STORE_SECRET_KEY").unwrap_or_else(|_| DEV_SECRET_KEY.into());
        let env_max_buckets = match env::var("META_STORE_MAX_BUCKETS") {
            Ok(value) => value
                .parse::<usize>()
                .with_context(|| format!("parsing META_STORE_MAX_BUCKETS value `{}`", value))?,
            Err(env::VarError::NotPresent) => crate::services::bucket_store::DEFAULT_BUCKET_LIMIT,
            Err(err) => return Err(err).context("reading META_STORE_MAX_BUCKETS"),
        };

        // --- Merge ---
        let cfg = Self {
            database_url: args.database_url.unwrap_or(env_db),
            secret_key: args.secret_key.unwrap_or(env_key),
            max_buckets: args.max_buckets.unwrap_or(env_max_buckets),
        };

        if cfg.secret_key.len() != 64 {
            anyhow::bail!("secret key must be 64 hex characters (32 bytes)");
        }

        Ok((cfg, args.migrate))
    }
}
