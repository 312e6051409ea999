use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use upstage_cli::{init_tracing, GcArgs};
use upstage_core::Config;
use upstage_db::create_stores;
use upstage_services::{create_storage, AssetGarbageCollector};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = GcArgs::parse();

    let config = Config::from_env().context("Failed to load configuration")?;
    config
        .validate()
        .context("Configuration validation failed")?;

    let stores = create_stores(&config).await?;
    let storage = create_storage(&config)
        .await
        .context("Failed to initialize blob storage")?;

    let collector = AssetGarbageCollector::new(stores.assets.clone(), storage);
    let result = collector
        .run(args.options(config.gc_pending_limit(), Utc::now()))
        .await
        .context("Garbage collection failed")?;

    println!(
        "{}",
        serde_json::to_string_pretty(&result).context("Serialize result")?
    );

    if !result.errors.is_empty() {
        anyhow::bail!("{} expired uploads could not be collected", result.errors.len());
    }
    Ok(())
}
