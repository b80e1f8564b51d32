//! End-to-end cycles through `Repricer::run_cycle`.

use rust_decimal_macros::dec;
use std::sync::atomic::Ordering;
use tokio_test::assert_ok;

use repricer::types::{ListingCategory, ListingOutcome};

use crate::mocks::*;

fn store_with(specs: &[RowSpec], bounds: &[(u32, &str, &str, &str)]) -> MemoryStore {
    let store = MemoryStore::new();
    store.set_grid(MAIN_ID, MAIN_NAME, main_grid(specs));
    store.set_grid(CFG_ID, BOUNDS, bounds_grid(bounds));
    store
}

#[tokio::test]
async fn test_undercut_cycle_updates_price_and_notes() {
    let mut spec = RowSpec::currency(2);
    spec.max_cell = None;
    spec.blacklist = Some("A1:A3");
    let store = store_with(&[spec.clone()], &[(2, "8.00", "", "250")]);
    store.set_grid(CFG_ID, BLACKLIST, vec![vec!["B".to_string()]]);

    let crawler = ScriptedCrawler::new();
    crawler.page(
        &spec.url,
        PageScript::Offers(vec![
            offer("A", dec!(10.00)),
            offer(OWN_SELLER, dec!(12.00)),
            offer("B", dec!(9.00)),
        ]),
    );
    let h = Harness::new(store, crawler, RecordingMarketplace::new());

    let (report, pool) = assert_ok!(h.repricer(Harness::settings(2)).run_cycle(1).await);

    assert_eq!(report.listings, 1);
    assert_eq!(report.updated, 1);
    assert_eq!(report.cells_flushed, 2);
    assert_eq!(report.cells_still_dirty, 0);

    let calls = h.market.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].category, ListingCategory::Currency);
    assert_eq!(calls[0].listing_id, "2");
    assert!(calls[0].price >= dec!(9.50) && calls[0].price <= dec!(9.90));
    assert_eq!(calls[0].stock, Some(250));

    match pool.outcome(2).unwrap() {
        ListingOutcome::Updated { decision, .. } => {
            assert_eq!(decision.compare_offer.as_ref().unwrap().seller, "A");
            assert_eq!(decision.own_price, Some(dec!(12.00)));
        }
        other => panic!("expected update, got {other:?}"),
    }

    let note = h.main_cell("C2");
    assert!(note.contains("Price updated"));
    assert!(note.contains("Compared = A - 10.00"));
    assert!(note.contains("Cheaper sellers: B - 9.00"));
    assert!(!h.main_cell("D2").is_empty());
    assert!(note.starts_with(&h.main_cell("D2")));
}

#[tokio::test]
async fn test_no_competitor_falls_back_to_max() {
    let spec = RowSpec::currency(2);
    let store = store_with(&[spec], &[(2, "5", "15", "")]);
    // no page scripted: the crawl finds no offers
    let h = Harness::new(store, ScriptedCrawler::new(), RecordingMarketplace::new());

    let (report, _) = assert_ok!(h.repricer(Harness::settings(1)).run_cycle(1).await);

    assert_eq!(report.updated, 1);
    let calls = h.market.calls();
    assert_eq!(calls[0].price, dec!(15.00));
    assert_eq!(calls[0].stock, None);
    assert!(h.main_cell("C2").contains("No valid competitor"));
}

#[tokio::test]
async fn test_notes_flushed_in_one_batch_per_sheet() {
    let specs: Vec<RowSpec> = (2..=6).map(RowSpec::currency).collect();
    let bounds: Vec<(u32, &str, &str, &str)> = (2..=6).map(|r| (r, "5", "15", "10")).collect();
    let h = Harness::new(
        store_with(&specs, &bounds),
        ScriptedCrawler::new(),
        RecordingMarketplace::new(),
    );

    let (report, _) = assert_ok!(h.repricer(Harness::settings(3)).run_cycle(1).await);

    assert_eq!(report.updated, 5);
    assert_eq!(report.cells_flushed, 10);
    // bounds are only read; only the main sheet is written, once
    assert_eq!(h.store.write_calls(), 1);
    assert_eq!(h.store.write_calls_for(MAIN_NAME), 1);
    // main sheet and bounds sheet, one bulk read each
    assert_eq!(h.store.reads.load(Ordering::SeqCst), 2);
    for row in 2..=6 {
        assert!(h.main_cell(&format!("C{row}")).contains("Price updated"));
    }
}

#[tokio::test]
async fn test_only_flagged_rows_run() {
    let mut idle = RowSpec::currency(3);
    idle.flag = "0";
    let specs = vec![RowSpec::currency(2), idle, RowSpec::currency(4)];
    let bounds = [(2, "5", "15", ""), (3, "5", "15", ""), (4, "5", "15", "")];
    let h = Harness::new(
        store_with(&specs, &bounds),
        ScriptedCrawler::new(),
        RecordingMarketplace::new(),
    );

    let (report, pool) = assert_ok!(h.repricer(Harness::settings(2)).run_cycle(1).await);

    assert_eq!(report.listings, 2);
    assert!(pool.outcome(3).is_none());
    assert!(h.market.calls_for("3").is_empty());
    assert!(h.main_cell("C3").is_empty());
}

#[tokio::test]
async fn test_invalid_row_gets_error_note_without_marketplace_call() {
    let mut bad = RowSpec::currency(2);
    bad.category = "Weapons";
    let specs = vec![bad, RowSpec::currency(3)];
    let h = Harness::new(
        store_with(&specs, &[(2, "5", "15", ""), (3, "5", "15", "")]),
        ScriptedCrawler::new(),
        RecordingMarketplace::new(),
    );

    let (report, _) = assert_ok!(h.repricer(Harness::settings(2)).run_cycle(1).await);

    assert_eq!(report.failed, 1);
    assert_eq!(report.updated, 1);
    assert!(h.market.calls_for("2").is_empty());
    let note = h.main_cell("C2");
    assert!(note.contains("Error (needs-crawl)"));
    assert!(note.contains("Weapons"));
}

#[tokio::test]
async fn test_disabled_compare_lists_at_min_without_crawling() {
    let mut spec = RowSpec::currency(2);
    spec.compare = "0";
    let h = Harness::new(
        store_with(&[spec], &[(2, "7.25", "15", "")]),
        ScriptedCrawler::new(),
        RecordingMarketplace::new(),
    );

    assert_ok!(h.repricer(Harness::settings(1)).run_cycle(1).await);

    assert_eq!(h.market.calls()[0].price, dec!(7.25));
    assert!(h.crawler.fetched.lock().unwrap().is_empty());
    assert!(h.main_cell("C2").contains("Comparison disabled"));
}

#[tokio::test]
async fn test_account_rows_update_every_id_without_stock() {
    let mut spec = RowSpec::currency(2);
    spec.category = "Accounts";
    spec.ids = "acc-1; acc-2".into();
    let h = Harness::new(
        store_with(&[spec], &[(2, "20", "40", "3")]),
        ScriptedCrawler::new(),
        RecordingMarketplace::new(),
    );

    assert_ok!(h.repricer(Harness::settings(1)).run_cycle(1).await);

    let calls = h.market.calls();
    let ids: Vec<&str> = calls.iter().map(|c| c.listing_id.as_str()).collect();
    assert_eq!(ids, vec!["acc-1", "acc-2"]);
    assert!(calls.iter().all(|c| c.stock.is_none() && c.price == dec!(40)));
}

#[tokio::test]
async fn test_failed_flush_keeps_notes_for_next_flush() {
    let h = Harness::new(
        store_with(&[RowSpec::currency(2)], &[(2, "5", "15", "")]),
        ScriptedCrawler::new(),
        RecordingMarketplace::new(),
    );
    let repricer = h.repricer(Harness::settings(1));

    h.store.set_fail_writes(true);
    let (report, _) = assert_ok!(repricer.run_cycle(1).await);
    assert_eq!(report.flush_failures, 1);
    assert_eq!(report.cells_still_dirty, 2);
    assert!(h.main_cell("C2").is_empty());

    h.store.set_fail_writes(false);
    let flush = repricer.flush().await;
    assert_eq!(flush.cells_written, 2);
    assert!(h.main_cell("C2").contains("Price updated"));
}

#[tokio::test]
async fn test_each_cycle_rereads_the_sheets() {
    let h = Harness::new(
        store_with(&[RowSpec::currency(2)], &[(2, "5", "15", "")]),
        ScriptedCrawler::new(),
        RecordingMarketplace::new(),
    );
    let repricer = h.repricer(Harness::settings(1));

    assert_ok!(repricer.run_cycle(1).await);
    // operator raises the floor between cycles
    h.store.set_grid(CFG_ID, BOUNDS, bounds_grid(&[(2, "20", "", "")]));
    assert_ok!(repricer.run_cycle(2).await);

    let prices: Vec<_> = h.market.calls().iter().map(|c| c.price).collect();
    assert_eq!(prices, vec![dec!(15), dec!(20)]);
}

#[tokio::test]
async fn test_empty_main_sheet_is_a_quiet_cycle() {
    let h = Harness::new(MemoryStore::new(), ScriptedCrawler::new(), RecordingMarketplace::new());
    // an empty main sheet is not an error: nothing to do
    let (report, _) = assert_ok!(h.repricer(Harness::settings(1)).run_cycle(1).await);
    assert_eq!(report.listings, 0);
    assert_eq!(h.store.write_calls(), 0);
}
