use anyhow::Result;
use tracing_subscriber::EnvFilter;

use meta_store::{config, db};

/// Admin entry point: creates or migrates the metadata database and
/// reports row counts. The serving surface embeds the library crate
/// directly.
#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting meta-store admin against {}", cfg.database_url);

    let pool = db::connect(&cfg.database_url, 5).await?;

    if migrate {
        db::migrate(&pool).await?;
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Status report ---
    let buckets: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM buckets")
        .fetch_one(&*pool)
        .await?;
    let objects: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM objects")
        .fetch_one(&*pool)
        .await?;
    let parts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM objectpart")
        .fetch_one(&*pool)
        .await?;
    tracing::info!(buckets, objects, parts, "metadata store status");
    println!("buckets: {buckets}\nobjects: {objects}\nparts:   {parts}");

    Ok(())
}
