//! Upload orchestrator: drains pending files into the catalog, one DAS
//! group at a time, each group in its own local transaction.

use std::collections::HashSet;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use blockpub_catalog::{CatalogClient, PublishOutcome, PublishRequest};
use blockpub_core::{Error, Result};
use blockpub_store::{Algorithm, Block, BufferStore, Dataset, Pairing, PendingFileRow};

use crate::types::*;

/// Algorithm, dataset and pairing shared by every row of a DAS group.
///
/// Any row will do: the pairing is the only source of that mapping.
pub fn group_descriptor(rows: &[PendingFileRow]) -> Option<(Algorithm, Dataset, Pairing)> {
    rows.first()
        .map(|r| (r.algorithm.clone(), r.dataset.clone(), r.pairing.clone()))
}

enum GroupOutcome {
    Published(GroupStats),
    Skipped(i64),
    Cancelled(i64),
    Failed(GroupFailure),
}

struct GroupStats {
    files: usize,
    blocks: usize,
    algorithm_registered: bool,
    pairing_registered: bool,
}

/// Publishes every pending DAS group.
pub struct Uploader<'a> {
    store: &'a BufferStore,
    catalog: &'a dyn CatalogClient,
    request_timeout: Duration,
    concurrency: usize,
}

impl<'a> Uploader<'a> {
    pub fn new(store: &'a BufferStore, catalog: &'a dyn CatalogClient, request_timeout: Duration) -> Self {
        Self {
            store,
            catalog,
            request_timeout,
            concurrency: 1,
        }
    }

    /// Publish up to `limit` groups at once (minimum 1).
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency = limit.max(1);
        self
    }

    /// One reconciliation pass. Never fails: every error is recorded
    /// against its group and the pass moves on.
    pub async fn run(&self, cancel: &CancelHandle) -> UploadReport {
        let mut report = UploadReport::default();

        let groups = match self.store.find_pending_grouped_by_das() {
            Ok(g) => g,
            Err(e) => {
                warn!("Failed to list pending files: {}", e);
                report.error = Some(PassFailure::from(&e));
                return report;
            }
        };
        if groups.is_empty() {
            debug!("No pending files");
            return report;
        }
        report.groups_total = groups.len();

        let tasks: Vec<_> = groups
            .into_iter()
            .map(|(das_id, rows)| self.process_group(das_id, rows, cancel))
            .collect();
        let outcomes: Vec<GroupOutcome> = stream::iter(tasks)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                GroupOutcome::Published(stats) => {
                    report.groups_succeeded += 1;
                    report.files_published += stats.files;
                    report.blocks_touched += stats.blocks;
                    report.algorithms_registered += usize::from(stats.algorithm_registered);
                    report.pairings_registered += usize::from(stats.pairing_registered);
                }
                GroupOutcome::Skipped(das_id) => report.skipped_groups.push(das_id),
                GroupOutcome::Cancelled(das_id) => report.cancelled_groups.push(das_id),
                GroupOutcome::Failed(failure) => report.failures.push(failure),
            }
        }
        report.failures.sort_by_key(|f| f.das_id);
        report.skipped_groups.sort_unstable();
        report.cancelled_groups.sort_unstable();

        info!(
            "Upload pass: {}/{} groups published, {} files, {} blocks, {} failed",
            report.groups_succeeded,
            report.groups_total,
            report.files_published,
            report.blocks_touched,
            report.failures.len()
        );
        report
    }

    async fn process_group(&self, das_id: i64, rows: Vec<PendingFileRow>, cancel: &CancelHandle) -> GroupOutcome {
        if cancel.is_cancelled() {
            debug!("Cycle cancelled, leaving DAS {} for later", das_id);
            return GroupOutcome::Cancelled(das_id);
        }
        match self.publish_group(das_id, &rows).await {
            Ok(Some(stats)) => GroupOutcome::Published(stats),
            Ok(None) => GroupOutcome::Skipped(das_id),
            Err(e) => {
                warn!("DAS {} not published ({}): {}", das_id, e.kind(), e);
                GroupOutcome::Failed(GroupFailure::new(das_id, &e))
            }
        }
    }

    async fn publish_group(&self, das_id: i64, rows: &[PendingFileRow]) -> Result<Option<GroupStats>> {
        let ids: Vec<i64> = rows.iter().map(|r| r.file_id).collect();
        let files = self.store.hydrate_files(&ids)?;
        let Some((algorithm, dataset, pairing)) = group_descriptor(rows).filter(|_| !files.is_empty()) else {
            warn!("{}", Error::DataIntegrity(format!("DAS {} has no hydratable files", das_id)));
            return Ok(None);
        };

        let known: HashSet<String> = files.iter().map(|f| f.logical_name.clone()).collect();
        let request = PublishRequest {
            algorithm: algorithm.clone(),
            dataset: dataset.clone(),
            pairing: pairing.clone(),
            files,
        };
        debug!(
            "Publishing {} files for DAS {} ({})",
            request.files.len(),
            das_id,
            dataset.path
        );

        let outcome = tokio::time::timeout(self.request_timeout, self.catalog.publish(request))
            .await
            .map_err(|_| {
                Error::CatalogRegistration(format!(
                    "publish for {} timed out after {:?}",
                    dataset.path, self.request_timeout
                ))
            })??;

        let blocks = confirmed_blocks(das_id, &outcome, &known);
        let confirmed: Vec<String> = blocks.iter().flat_map(|b| b.files.iter().cloned()).collect();

        let files_marked = self.store.write(|tx| {
            if !algorithm.in_catalog {
                tx.mark_algorithm_registered(algorithm.id)?;
            }
            if !pairing.in_catalog {
                tx.mark_dataset_pairing_registered(pairing.id)?;
            }
            let marked = tx.mark_files_in_catalog(&confirmed)?;
            for block in &blocks {
                tx.persist_block(block)?;
                tx.attach_files_to_block(&block.name, &block.files)?;
            }
            Ok(marked)
        })?;

        if confirmed.len() < known.len() {
            info!(
                "DAS {}: {} of {} files placed in blocks, rest stay pending",
                das_id,
                confirmed.len(),
                known.len()
            );
        }

        Ok(Some(GroupStats {
            files: files_marked,
            blocks: blocks.len(),
            algorithm_registered: outcome.algorithm_registered,
            pairing_registered: outcome.pairing_registered,
        }))
    }
}

/// Blocks from a publish outcome, restricted to files this group sent.
fn confirmed_blocks(das_id: i64, outcome: &PublishOutcome, known: &HashSet<String>) -> Vec<Block> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut blocks = Vec::with_capacity(outcome.blocks.len());
    for published in &outcome.blocks {
        let mut files = Vec::with_capacity(published.files.len());
        for lfn in &published.files {
            if !known.contains(lfn) {
                warn!(
                    "{}",
                    Error::DataIntegrity(format!(
                        "catalog placed unknown file {} in block {} for DAS {}",
                        lfn, published.name, das_id
                    ))
                );
                continue;
            }
            if seen.insert(lfn.as_str()) {
                files.push(lfn.clone());
            }
        }
        blocks.push(Block {
            id: 0,
            name: published.name.clone(),
            locations: published.locations.clone(),
            is_open: published.is_open,
            is_published_downstream: false,
            created_at: published.created_at,
            files,
        });
    }
    blocks
}
