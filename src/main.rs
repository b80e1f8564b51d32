//! Repricer entry point.
//!
//! Loads configuration and credentials, initialises structured logging,
//! wires the spreadsheet cache, crawler and marketplace client together
//! and runs repricing cycles until Ctrl+C.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use repricer::config::{self, AppConfig};
use repricer::crawler::http::HttpCrawler;
use repricer::engine::pool::{PoolSettings, WorkerPool};
use repricer::engine::processor::ListingProcessor;
use repricer::engine::report::log_cycle_report;
use repricer::engine::Repricer;
use repricer::marketplace::gameboost::GameboostClient;
use repricer::marketplace::{DryRunMarketplace, MarketplaceClient};
use repricer::pricing::PricingEngine;
use repricer::sheets::cache::ConfigCache;
use repricer::sheets::google::GoogleSheetsStore;
use repricer::sheets::rows::{RowSchema, RowStore};
use repricer::types::SheetKey;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".into());
    let cfg = AppConfig::load(&config_path)?;

    init_logging();

    info!(
        name = %cfg.runner.name,
        workers = cfg.runner.worker_count,
        cycle_pause_secs = cfg.runner.cycle_pause_secs,
        dry_run = cfg.marketplace.dry_run,
        "Repricer starting up"
    );

    let secrets = cfg.resolve_secrets().context("Missing credentials")?;

    // -- Initialise components -------------------------------------------

    let store = GoogleSheetsStore::new(
        cfg.sheet.base_url.clone(),
        secrets.sheets_token,
        Duration::from_secs(cfg.sheet.timeout_secs),
    )?;
    let cache = Arc::new(ConfigCache::new(Arc::new(store), cfg.retry.sheets.clone()));

    let schema = RowSchema::standard()?;
    let rows = RowStore::new(
        cache.clone(),
        SheetKey::new(cfg.sheet.main_sheet_id.clone(), cfg.sheet.main_sheet_name.clone()),
        schema,
        cfg.runner.run_flags.clone(),
    );

    let marketplace: Arc<dyn MarketplaceClient> = match secrets.marketplace_key {
        Some(key) if !cfg.marketplace.dry_run => Arc::new(GameboostClient::new(
            cfg.marketplace.base_url.clone(),
            key,
            Duration::from_secs(cfg.marketplace.timeout_secs),
        )?),
        _ => {
            warn!("Dry-run mode: marketplace updates are logged, not sent");
            Arc::new(DryRunMarketplace)
        }
    };

    if secrets.own_seller.is_none() {
        warn!("No own seller configured; own price detection disabled");
    }
    let pricing = PricingEngine::new(secrets.own_seller, cfg.pricing.fallback);

    let processor = Arc::new(ListingProcessor::new(
        rows.clone(),
        pricing,
        marketplace,
        cfg.retry.marketplace.clone(),
    ));
    let pool = WorkerPool::new(
        processor,
        Arc::new(HttpCrawler::new(cfg.crawler.clone())),
        cache.clone(),
        pool_settings(&cfg.runner),
    );
    let repricer = Repricer::new(cache, rows, pool, cfg.runner.refresh_each_cycle);

    // -- Main loop -------------------------------------------------------

    let pause = Duration::from_secs(cfg.runner.cycle_pause_secs);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("Entering main loop. Press Ctrl+C to stop.");

    let mut cycle: u64 = 0;
    loop {
        cycle += 1;
        tokio::select! {
            result = repricer.run_cycle(cycle) => match result {
                Ok((report, pool_report)) => log_cycle_report(&report, &pool_report),
                Err(e) => error!(cycle, error = %e, "Cycle failed, continuing to next"),
            },
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }

        if cfg.runner.max_cycles.is_some_and(|max| cycle >= max) {
            info!(cycles = cycle, "Cycle limit reached");
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    // Notes staged by an interrupted cycle still go out.
    let flush = repricer.flush().await;
    if !flush.failed.is_empty() {
        warn!(sheets = flush.failed.len(), "Final flush left entries unwritten");
    }
    info!(cycles = cycle, "Repricer shut down cleanly.");

    Ok(())
}

fn pool_settings(runner: &config::RunnerConfig) -> PoolSettings {
    PoolSettings {
        workers: runner.worker_count,
        join_timeout: Duration::from_secs(runner.join_timeout_secs),
        flush_interval: (runner.flush_interval_secs > 0)
            .then(|| Duration::from_secs(runner.flush_interval_secs)),
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("repricer=info"));

    let json_logging = std::env::var("REPRICER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
