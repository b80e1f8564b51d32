//! Worker pool behavior: exactly-once processing and fault isolation.

use async_trait::async_trait;
use rust_decimal_macros::dec;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use repricer::crawler::{CrawlSession, Crawler};
use repricer::engine::pool::{PoolSettings, WorkerPool};
use repricer::engine::processor::ListingProcessor;
use repricer::marketplace::DryRunMarketplace;
use repricer::pricing::{FallbackPrice, PricingEngine};
use repricer::retry::RetryPolicy;
use repricer::types::{ListingOutcome, ListingState, RepricerError};

use crate::mocks::*;

/// Rows 2..=last on the main sheet, each with one competitor at 10.00.
fn setup(last: u32) -> Harness {
    let specs: Vec<RowSpec> = (2..=last).map(RowSpec::currency).collect();
    let bounds: Vec<(u32, &str, &str, &str)> = (2..=last).map(|r| (r, "5", "15", "100")).collect();

    let store = MemoryStore::new();
    store.set_grid(MAIN_ID, MAIN_NAME, main_grid(&specs));
    store.set_grid(CFG_ID, BOUNDS, bounds_grid(&bounds));

    let crawler = ScriptedCrawler::new();
    for spec in &specs {
        crawler.page(&spec.url, PageScript::Offers(vec![offer("A", dec!(10.00))]));
    }
    Harness::new(store, crawler, RecordingMarketplace::new())
}

fn assert_each_once(outcomes: &[ListingOutcome], expected: &[u32]) {
    let indices: Vec<u32> = outcomes.iter().map(ListingOutcome::index).collect();
    let unique: HashSet<u32> = indices.iter().copied().collect();
    assert_eq!(indices.len(), unique.len(), "an index was processed twice: {indices:?}");
    assert_eq!(unique, expected.iter().copied().collect());
}

#[tokio::test]
async fn test_ten_listings_three_workers_failure_isolated() {
    let h = setup(11);
    // fourth listing of the batch
    h.market.fail_listing("5");

    let indices: Vec<u32> = (2..=11).collect();
    let report = h.pool(Harness::settings(3)).run(indices.clone()).await;

    assert_eq!(report.outcomes.len(), 10);
    assert_each_once(&report.outcomes, &indices);
    assert_eq!(report.updated(), 9);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.timed_out_workers, 0);

    match report.outcome(5).unwrap() {
        ListingOutcome::Failed { state, error, .. } => {
            assert_eq!(*state, ListingState::Decided);
            assert!(error.contains("HTTP 502"));
        }
        other => panic!("expected failure, got {other:?}"),
    }

    for index in indices.iter().filter(|&&i| i != 5) {
        let calls = h.market.calls_for(&index.to_string());
        assert_eq!(calls.len(), 1, "listing {index}");
        assert!(calls[0].price >= dec!(9.50) && calls[0].price <= dec!(9.90));
        assert_eq!(calls[0].stock, Some(100));
    }
    // one attempt plus one retry
    assert_eq!(h.market.calls_for("5").len(), 2);

    assert_eq!(h.crawler.fetched.lock().unwrap().len(), 10);
    assert_eq!(h.crawler.opened.load(Ordering::SeqCst), 3);
    assert_eq!(h.crawler.closed.load(Ordering::SeqCst), 3);

    let note = h.rows.pending_update(5).await.unwrap().note;
    assert!(note.contains("Error (decided)"));
}

#[tokio::test]
async fn test_panicking_listing_does_not_stop_the_batch() {
    let h = setup(7);
    h.crawler.page("https://market.test/offers/4", PageScript::Panic);

    let indices: Vec<u32> = (2..=7).collect();
    let report = h.pool(Harness::settings(2)).run(indices.clone()).await;

    assert_each_once(&report.outcomes, &indices);
    assert_eq!(report.updated(), 5);
    match report.outcome(4).unwrap() {
        ListingOutcome::Failed { error, .. } => assert!(error.contains("panicked")),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(h.market.calls_for("4").is_empty());

    let note = h.rows.pending_update(4).await.unwrap().note;
    assert!(note.contains("panicked"));
}

#[tokio::test]
async fn test_crawl_failure_is_priced_at_fallback() {
    let h = setup(3);
    h.crawler.page(
        "https://market.test/offers/3",
        PageScript::Fail("HTTP 403 from market.test".into()),
    );

    let report = h.pool(Harness::settings(2)).run(vec![2, 3]).await;

    assert_eq!(report.updated(), 2);
    assert_eq!(h.market.calls_for("3")[0].price, dec!(15));
    let note = h.rows.pending_update(3).await.unwrap().note;
    assert!(note.contains("No valid competitor"));
    assert!(note.contains("Crawl failed"));
}

#[tokio::test]
async fn test_duplicate_indices_processed_once() {
    let h = setup(3);
    let report = h.pool(Harness::settings(4)).run(vec![2, 3, 2, 3, 2]).await;

    assert_each_once(&report.outcomes, &[2, 3]);
    assert_eq!(h.market.calls().len(), 2);
    // never more workers than listings
    assert_eq!(h.crawler.opened.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_empty_batch_starts_no_workers() {
    let h = setup(3);
    let report = h.pool(Harness::settings(3)).run(Vec::new()).await;

    assert!(report.outcomes.is_empty());
    assert_eq!(h.crawler.opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_stuck_worker_is_aborted_after_join_timeout() {
    let h = setup(5);
    h.crawler.page("https://market.test/offers/3", PageScript::Hang);

    let settings = PoolSettings {
        workers: 2,
        join_timeout: Duration::from_millis(200),
        flush_interval: None,
    };
    let report = tokio::time::timeout(Duration::from_secs(10), h.pool(settings).run(vec![2, 3, 4, 5]))
        .await
        .expect("pool must return once the join timeout expires");

    assert_eq!(report.timed_out_workers, 1);
    assert_each_once(&report.outcomes, &[2, 3, 4, 5]);
    assert_eq!(report.updated(), 3);
    match report.outcome(3).unwrap() {
        ListingOutcome::Failed { error, .. } => assert!(error.contains("not processed")),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(h.crawler.closed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_lone_stuck_worker_is_aborted_and_its_session_closed() {
    let h = setup(2);
    h.crawler.page("https://market.test/offers/2", PageScript::Hang);

    let settings = PoolSettings {
        workers: 1,
        join_timeout: Duration::from_millis(200),
        flush_interval: None,
    };
    let report = tokio::time::timeout(Duration::from_secs(3), h.pool(settings).run(vec![2]))
        .await
        .expect("join timeout must start once the last listing is taken");

    assert_eq!(report.timed_out_workers, 1);
    assert!(report.outcome(2).unwrap().is_failed());
    assert_eq!(h.crawler.opened.load(Ordering::SeqCst), 1);
    assert_eq!(h.crawler.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_no_relax_after_last_listing() {
    let h = setup(2);
    let mut spec = RowSpec::currency(2);
    spec.relax = "30";
    h.store.set_grid(MAIN_ID, MAIN_NAME, main_grid(&[spec]));

    let report = tokio::time::timeout(
        Duration::from_secs(3),
        h.pool(Harness::settings(1)).run(vec![2]),
    )
    .await
    .expect("a batch must not wait out the relax time of its final listing");

    assert_eq!(report.updated(), 1);
    assert_eq!(h.crawler.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_periodic_flush_writes_during_batch() {
    let h = setup(3);
    let settings = PoolSettings {
        workers: 1,
        join_timeout: Duration::from_secs(5),
        flush_interval: Some(Duration::from_millis(20)),
    };
    // relax after row 2 keeps the batch running past a few ticks
    let mut specs: Vec<RowSpec> = (2..=3).map(RowSpec::currency).collect();
    specs[0].relax = "0.2";
    h.store.set_grid(MAIN_ID, MAIN_NAME, main_grid(&specs));

    h.pool(settings).run(vec![2, 3]).await;

    assert!(h.store.write_calls_for(MAIN_NAME) >= 1);
    assert!(h.main_cell("C2").contains("Price updated"));
}

// ---------------------------------------------------------------------------
// Session failures
// ---------------------------------------------------------------------------

struct BrokenCrawler;

#[async_trait]
impl Crawler for BrokenCrawler {
    async fn open_session(&self) -> Result<Box<dyn CrawlSession>, RepricerError> {
        Err(RepricerError::Crawl("browser failed to start".into()))
    }
}

#[tokio::test]
async fn test_unopenable_sessions_leave_listings_failed() {
    let h = setup(4);
    let processor = ListingProcessor::new(
        h.rows.clone(),
        PricingEngine::new(None, FallbackPrice::MaxOrMin),
        Arc::new(DryRunMarketplace),
        RetryPolicy::none(),
    );
    let pool = WorkerPool::new(
        Arc::new(processor),
        Arc::new(BrokenCrawler),
        h.cache.clone(),
        Harness::settings(2),
    );

    let report = pool.run(vec![2, 3, 4]).await;

    assert_eq!(report.failed(), 3);
    assert_each_once(&report.outcomes, &[2, 3, 4]);
    assert!(h.rows.pending_update(2).await.unwrap().note.contains("not processed"));
}
