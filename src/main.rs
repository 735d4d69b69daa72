//! CLI entry point for tagged-harvest.

use anyhow::Result;
use clap::Parser;
use harvest_core::enumerator::MobileSiteEnumerator;
use harvest_core::pipeline;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod cli;

use cli::Args;

/// Exit code used when a second interrupt aborts the drain.
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");
    info!(directory = %args.directory.display(), "tagged-harvest starting");

    let session = args.session_source()?;
    let config = args.pipeline_config();
    let enumerator = MobileSiteEnumerator::new(args.site_config());

    let cancel = CancellationToken::new();
    tokio::spawn(watch_interrupts(cancel.clone()));

    let report = pipeline::run(&enumerator, session, &config, cancel).await?;

    info!(
        written = report.pool.written,
        skipped = report.pool.skipped,
        failed = report.pool.failed,
        retried = report.pool.retries,
        next_offset = report.enumeration.next_offset,
        "harvest complete"
    );
    if report.pool.failed > 0 {
        warn!(
            failed = report.pool.failed,
            "some items failed; rerun to retry them (existing files are skipped)"
        );
    }

    Ok(())
}

/// First Ctrl-C drains the queue gracefully; a second one exits immediately.
async fn watch_interrupts(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    info!("interrupt received, finishing queued items (press Ctrl-C again to abort)");
    cancel.cancel();

    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("second interrupt, aborting");
        std::process::exit(INTERRUPTED_EXIT_CODE);
    }
}
