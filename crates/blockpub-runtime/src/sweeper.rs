//! Block timeout sweeper.
//!
//! Blocks the catalog leaves open would otherwise wait for a file count
//! that may never come. Anything open longer than the configured timeout
//! is closed and migrated in one batch per cycle.

use std::collections::HashSet;
use std::time::Duration;

use tracing::{debug, info, warn};

use blockpub_catalog::CatalogClient;
use blockpub_core::{Error, Result};
use blockpub_store::{Block, BufferStore};

use crate::types::{CancelHandle, PassFailure, SweepReport};

/// True once a block has been open strictly longer than `timeout`.
pub fn is_stale(block: &Block, now: i64, timeout: Duration) -> bool {
    let timeout = i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX);
    now.saturating_sub(block.created_at) > timeout
}

pub struct BlockSweeper<'a> {
    store: &'a BufferStore,
    catalog: &'a dyn CatalogClient,
    block_open_timeout: Duration,
    request_timeout: Duration,
}

impl<'a> BlockSweeper<'a> {
    pub fn new(
        store: &'a BufferStore,
        catalog: &'a dyn CatalogClient,
        block_open_timeout: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            store,
            catalog,
            block_open_timeout,
            request_timeout,
        }
    }

    pub async fn run(&self, cancel: &CancelHandle) -> SweepReport {
        self.run_at(chrono::Utc::now().timestamp(), cancel).await
    }

    /// Sweep as if the clock read `now` (unix seconds).
    pub async fn run_at(&self, now: i64, cancel: &CancelHandle) -> SweepReport {
        let mut report = SweepReport::default();
        if cancel.is_cancelled() {
            report.skipped = true;
            return report;
        }
        if let Err(e) = self.sweep(now, &mut report).await {
            warn!("Block sweep failed ({}): {}", e.kind(), e);
            report.error = Some(PassFailure::from(&e));
        }
        report
    }

    async fn sweep(&self, now: i64, report: &mut SweepReport) -> Result<()> {
        let open = self.store.list_open_blocks()?;
        report.open_blocks = open.len();

        let stale: Vec<Block> = open
            .into_iter()
            .filter(|b| is_stale(b, now, self.block_open_timeout))
            .collect();
        report.stale_blocks = stale.len();
        if stale.is_empty() {
            debug!("No stale blocks among {} open", report.open_blocks);
            return Ok(());
        }

        let names: Vec<String> = stale.iter().map(|b| b.name.clone()).collect();
        info!("Closing {} stale blocks", names.len());

        let closed = tokio::time::timeout(self.request_timeout, self.catalog.close_and_migrate(names))
            .await
            .map_err(|_| {
                Error::CatalogRegistration(format!(
                    "close_and_migrate timed out after {:?}",
                    self.request_timeout
                ))
            })??;

        let confirmed: HashSet<String> = closed.into_iter().map(|c| c.name).collect();
        let (done, rejected): (Vec<Block>, Vec<Block>) =
            stale.into_iter().partition(|b| confirmed.contains(&b.name));

        self.store.write(|tx| {
            for block in &done {
                let closed = Block {
                    is_open: false,
                    ..block.clone()
                };
                tx.persist_block(&closed)?;
            }
            Ok(())
        })?;

        report.closed = done.into_iter().map(|b| b.name).collect();
        report.rejected = rejected.into_iter().map(|b| b.name).collect();
        if !report.rejected.is_empty() {
            warn!(
                "Catalog left {} stale blocks open, retrying next cycle",
                report.rejected.len()
            );
        }
        Ok(())
    }
}
