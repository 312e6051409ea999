//! Operator tooling for upstage.

use chrono::{DateTime, Utc};
use clap::Parser;
use upstage_services::GcOptions;

/// Delete staged uploads whose upload window closed before completion
#[derive(Parser, Debug)]
#[command(name = "assets-gc")]
#[command(about = "Garbage-collect expired unfinished uploads")]
pub struct GcArgs {
    /// Count candidates without deleting anything
    #[arg(long)]
    pub dry_run: bool,

    /// Maximum expired uploads examined in one run (defaults to GC_PENDING_LIMIT)
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(i64).range(1..))]
    pub pending_limit: Option<i64>,
}

impl GcArgs {
    pub fn options(&self, configured_limit: i64, now: DateTime<Utc>) -> GcOptions {
        GcOptions {
            now,
            pending_limit: self.pending_limit.unwrap_or(configured_limit),
            dry_run: self.dry_run,
        }
    }
}

/// Initialize tracing for CLI binaries.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}
