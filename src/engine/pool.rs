//! Worker pool for one batch of listings.
//!
//! N workers drain a shared queue of row indices. Each worker opens its
//! own crawl session when it starts and closes it when the queue is
//! empty. A listing that fails, or panics, is turned into an error note
//! and the worker moves on. Once the last index has been taken the pool
//! waits a bounded time for in-flight listings, aborts the stragglers and
//! closes their sessions itself.

use futures::FutureExt;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::any::Any;
use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::processor::ListingProcessor;
use crate::crawler::{CrawlSession, Crawler};
use crate::sheets::cache::ConfigCache;
use crate::types::{ListingOutcome, ListingState};

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub workers: usize,
    /// Grace period for in-flight listings once the queue is empty.
    pub join_timeout: Duration,
    /// Flush dirty cells this often while the batch runs.
    pub flush_interval: Option<Duration>,
}

/// Per-listing outcomes of one batch.
#[derive(Debug, Clone, Default)]
pub struct PoolReport {
    pub outcomes: Vec<ListingOutcome>,
    pub timed_out_workers: usize,
}

impl PoolReport {
    pub fn updated(&self) -> usize {
        self.count(|o| matches!(o, ListingOutcome::Updated { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ListingOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(ListingOutcome::is_failed)
    }

    fn count(&self, pred: impl Fn(&ListingOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|&o| pred(o)).count()
    }

    pub fn outcome(&self, index: u32) -> Option<&ListingOutcome> {
        self.outcomes.iter().find(|o| o.index() == index)
    }
}

type Queue = Arc<Mutex<VecDeque<u32>>>;
type Outcomes = Arc<Mutex<Vec<ListingOutcome>>>;
/// A worker's crawl session. Held locked by the worker while it runs, so
/// the pool can only reach it once the worker has finished or been aborted.
type SessionSlot = Arc<tokio::sync::Mutex<Option<Box<dyn CrawlSession>>>>;

/// Next index, and whether it was the last one queued.
fn pop(queue: &Queue) -> Option<(u32, bool)> {
    let mut queue = queue.lock().unwrap_or_else(|e| e.into_inner());
    queue.pop_front().map(|index| (index, queue.is_empty()))
}

fn is_empty(queue: &Queue) -> bool {
    queue.lock().unwrap_or_else(|e| e.into_inner()).is_empty()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub struct WorkerPool {
    processor: Arc<ListingProcessor>,
    crawler: Arc<dyn Crawler>,
    cache: Arc<ConfigCache>,
    settings: PoolSettings,
}

impl WorkerPool {
    pub fn new(
        processor: Arc<ListingProcessor>,
        crawler: Arc<dyn Crawler>,
        cache: Arc<ConfigCache>,
        settings: PoolSettings,
    ) -> Self {
        Self {
            processor,
            crawler,
            cache,
            settings,
        }
    }

    /// Process every index once. Duplicates are dropped; order across
    /// listings is not guaranteed.
    pub async fn run(&self, indices: Vec<u32>) -> PoolReport {
        let mut seen = HashSet::new();
        let unique: Vec<u32> = indices.into_iter().filter(|i| seen.insert(*i)).collect();
        if unique.is_empty() {
            return PoolReport::default();
        }

        let workers = self.settings.workers.max(1).min(unique.len());
        info!(listings = unique.len(), workers, "Starting batch");

        let queue: Queue = Arc::new(Mutex::new(unique.iter().copied().collect()));
        let outcomes: Outcomes = Arc::new(Mutex::new(Vec::with_capacity(unique.len())));
        let (drained_tx, mut drained_rx) = watch::channel(false);

        let handles: Vec<(JoinHandle<()>, SessionSlot)> = (0..workers)
            .map(|id| {
                let slot: SessionSlot = Arc::new(tokio::sync::Mutex::new(None));
                let worker = Worker {
                    id,
                    processor: self.processor.clone(),
                    crawler: self.crawler.clone(),
                    queue: queue.clone(),
                    outcomes: outcomes.clone(),
                    drained: drained_tx.clone(),
                    session: slot.clone(),
                };
                (tokio::spawn(worker.run()), slot)
            })
            .collect();
        drop(drained_tx);

        let flusher = self.settings.flush_interval.map(|every| {
            let cache = self.cache.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(every);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let report = cache.flush(None).await;
                    debug!(cells = report.cells_written, "Periodic flush");
                }
            })
        });

        // Set as soon as the last index is taken; returns early with Err
        // once every worker has exited.
        let _ = drained_rx.wait_for(|drained| *drained).await;

        let deadline = tokio::time::Instant::now() + self.settings.join_timeout;
        let mut timed_out_workers = 0;
        for (id, (mut handle, slot)) in handles.into_iter().enumerate() {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(worker = id, error = %e, "Worker task failed"),
                Err(_) => {
                    warn!(worker = id, "Worker did not finish in time, aborting");
                    handle.abort();
                    // wait for the cancellation so the worker releases its session
                    let _ = handle.await;
                    timed_out_workers += 1;
                }
            }
            if let Some(mut session) = slot.lock().await.take() {
                session.close().await;
                debug!(worker = id, "Closed session left by worker");
            }
        }
        if let Some(flusher) = flusher {
            flusher.abort();
        }

        let mut outcomes = std::mem::take(&mut *outcomes.lock().unwrap_or_else(|e| e.into_inner()));

        // Listings left in the queue or lost with an aborted worker.
        let done: HashSet<u32> = outcomes.iter().map(ListingOutcome::index).collect();
        for index in unique.into_iter().filter(|i| !done.contains(i)) {
            let outcome = self
                .processor
                .record_failure(index, ListingState::NeedsCrawl, "not processed: no worker available")
                .await;
            outcomes.push(outcome);
        }

        let report = PoolReport {
            outcomes,
            timed_out_workers,
        };
        info!(
            updated = report.updated(),
            skipped = report.skipped(),
            failed = report.failed(),
            timed_out_workers,
            "Batch finished"
        );
        report
    }
}

struct Worker {
    id: usize,
    processor: Arc<ListingProcessor>,
    crawler: Arc<dyn Crawler>,
    queue: Queue,
    outcomes: Outcomes,
    drained: watch::Sender<bool>,
    session: SessionSlot,
}

impl Worker {
    async fn run(self) {
        let mut slot = self.session.clone().lock_owned().await;
        let session = match self.crawler.open_session().await {
            Ok(s) => slot.insert(s),
            Err(e) => {
                error!(worker = self.id, error = %e, "Could not open crawl session");
                return;
            }
        };
        let mut rng = SmallRng::from_rng(&mut rand::rng());
        debug!(worker = self.id, "Worker started");

        loop {
            let Some((index, last)) = pop(&self.queue) else {
                let _ = self.drained.send(true);
                break;
            };
            if last {
                let _ = self.drained.send(true);
            }

            let mut state = ListingState::NeedsCrawl;
            let result = AssertUnwindSafe(self.processor.process_tracked(
                index,
                session.as_mut(),
                &mut rng,
                &mut state,
            ))
            .catch_unwind()
            .await;

            let processed = match result {
                Ok(p) => p,
                Err(payload) => {
                    let msg = format!("panicked: {}", panic_message(payload.as_ref()));
                    let outcome = self.processor.record_failure(index, state, &msg).await;
                    self.push(outcome);
                    continue;
                }
            };
            self.push(processed.outcome);

            // no pause after the last listing of the batch
            if let Some(pause) = processed.relax.filter(|d| !d.is_zero() && !is_empty(&self.queue)) {
                debug!(worker = self.id, index, pause_ms = pause.as_millis() as u64, "Relaxing");
                tokio::time::sleep(pause).await;
            }
        }

        if let Some(mut session) = slot.take() {
            session.close().await;
        }
        debug!(worker = self.id, "Worker finished");
    }

    fn push(&self, outcome: ListingOutcome) {
        self.outcomes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(outcome);
    }
}
