//! Runtime types: cycle reports and cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use blockpub_core::{Error, ErrorKind};

/// A failure isolated to one DAS group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupFailure {
    #[serde(rename = "dasId")]
    pub das_id: i64,
    pub kind: ErrorKind,
    pub message: String,
}

impl GroupFailure {
    pub fn new(das_id: i64, error: &Error) -> Self {
        Self {
            das_id,
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// A failure that stopped a whole pass (e.g. the pending scan itself).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for PassFailure {
    fn from(error: &Error) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Result of the upload pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadReport {
    #[serde(rename = "groupsTotal")]
    pub groups_total: usize,
    #[serde(rename = "groupsSucceeded")]
    pub groups_succeeded: usize,
    #[serde(rename = "filesPublished")]
    pub files_published: usize,
    #[serde(rename = "blocksTouched")]
    pub blocks_touched: usize,
    #[serde(rename = "algorithmsRegistered")]
    pub algorithms_registered: usize,
    #[serde(rename = "pairingsRegistered")]
    pub pairings_registered: usize,
    pub failures: Vec<GroupFailure>,
    /// Groups with nothing hydratable.
    #[serde(rename = "skippedGroups")]
    pub skipped_groups: Vec<i64>,
    /// Groups never started because the cycle was cancelled.
    #[serde(rename = "cancelledGroups")]
    pub cancelled_groups: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PassFailure>,
}

impl UploadReport {
    pub fn failed_das_ids(&self) -> Vec<i64> {
        self.failures.iter().map(|f| f.das_id).collect()
    }
}

/// Result of the block timeout sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    #[serde(rename = "openBlocks")]
    pub open_blocks: usize,
    #[serde(rename = "staleBlocks")]
    pub stale_blocks: usize,
    pub closed: Vec<String>,
    /// Stale blocks the catalog did not close; retried next cycle.
    pub rejected: Vec<String>,
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PassFailure>,
}

/// Summary handed back to the scheduler after every cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub upload: UploadReport,
    pub sweep: SweepReport,
    #[serde(rename = "durationMs")]
    pub duration_ms: u64,
    /// Another cycle was still in flight; nothing ran.
    pub skipped: bool,
}

/// Cooperative cancellation shared between the scheduler and a cycle.
///
/// Checked before each DAS group starts; groups already running finish
/// their commit or rollback.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
