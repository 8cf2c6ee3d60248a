//! One scheduled publication cycle: upload pass, then timeout sweep.
//!
//! The cycle is driven externally (a timer in the server binary, or a
//! direct call in tests). Overlapping invocations are refused rather than
//! queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use blockpub_catalog::CatalogClient;
use blockpub_core::{PublisherConfig, Result};
use blockpub_store::BufferStore;

use crate::sweeper::BlockSweeper;
use crate::types::{CancelHandle, CycleReport};
use crate::uploader::Uploader;

pub struct PublishCycle {
    store: Arc<BufferStore>,
    catalog: Arc<dyn CatalogClient>,
    block_open_timeout: Duration,
    request_timeout: Duration,
    concurrency: usize,
    cancel: CancelHandle,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag however the cycle ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl PublishCycle {
    /// Validates `config` before anything can run.
    pub fn new(
        config: &PublisherConfig,
        store: Arc<BufferStore>,
        catalog: Arc<dyn CatalogClient>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            catalog,
            block_open_timeout: config.block_open_timeout(),
            request_timeout: config.catalog.request_timeout(),
            concurrency: config.group_concurrency_limit,
            cancel: CancelHandle::new(),
            in_flight: AtomicBool::new(false),
        })
    }

    /// Handle for stopping the running cycle and every later one.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn store(&self) -> &Arc<BufferStore> {
        &self.store
    }

    pub async fn run(&self) -> CycleReport {
        self.run_at(None).await
    }

    /// Run with the sweeper clock pinned to `now` when given.
    pub async fn run_at(&self, now: Option<i64>) -> CycleReport {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Previous publication cycle still running, skipping");
            return CycleReport {
                skipped: true,
                ..Default::default()
            };
        }
        let _guard = InFlight(&self.in_flight);
        let started = Instant::now();

        let upload = Uploader::new(&self.store, self.catalog.as_ref(), self.request_timeout)
            .with_concurrency(self.concurrency)
            .run(&self.cancel)
            .await;

        let sweeper = BlockSweeper::new(
            &self.store,
            self.catalog.as_ref(),
            self.block_open_timeout,
            self.request_timeout,
        );
        let sweep = match now {
            Some(now) => sweeper.run_at(now, &self.cancel).await,
            None => sweeper.run(&self.cancel).await,
        };

        let report = CycleReport {
            upload,
            sweep,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            skipped: false,
        };
        info!(
            "Publication cycle done in {}ms: {} files published, {} blocks closed, {} group failures",
            report.duration_ms,
            report.upload.files_published,
            report.sweep.closed.len(),
            report.upload.failures.len()
        );
        report
    }
}
