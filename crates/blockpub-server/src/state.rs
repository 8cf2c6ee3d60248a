//! Shared application state.

use std::sync::Arc;

use blockpub_core::PublisherConfig;
use blockpub_runtime::CycleReport;
use blockpub_store::BufferStore;
use parking_lot::RwLock;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    pub config: PublisherConfig,
    pub store: Arc<BufferStore>,
    /// Summary of the most recent completed cycle, if any.
    pub last_cycle: RwLock<Option<CycleReport>>,
}

impl AppState {
    pub fn new(config: PublisherConfig, store: Arc<BufferStore>) -> Self {
        Self {
            config,
            store,
            last_cycle: RwLock::new(None),
        }
    }

    pub fn record_cycle(&self, report: CycleReport) {
        if !report.skipped {
            *self.last_cycle.write() = Some(report);
        }
    }
}
