use anyhow::Context;
use upstage_api::setup;
use upstage_api::telemetry::{init_telemetry, LogFormat};
use upstage_core::Config;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // .env is read by Config::from_env; load it here too so RUST_LOG and LOG_FORMAT apply
    dotenvy::dotenv().ok();
    init_telemetry(LogFormat::from_env()).context("Failed to initialize telemetry")?;

    let config = Config::from_env()?;
    let (_state, router) = setup::initialize_app(config.clone()).await?;

    setup::server::start_server(&config, router).await?;

    Ok(())
}
