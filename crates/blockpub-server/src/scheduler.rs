//! Periodic driver for the publication cycle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use blockpub_runtime::PublishCycle;

use crate::state::AppState;

/// Background loop running one cycle per tick.
pub struct CycleLoop {
    cycle: Arc<PublishCycle>,
    stop: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl CycleLoop {
    /// Spawn the loop. A tick that lands while the previous cycle is
    /// still running is delayed, never stacked.
    pub fn start(cycle: Arc<PublishCycle>, state: Arc<AppState>, period: Duration) -> Self {
        let stop = Arc::new(Notify::new());
        let handle = tokio::spawn(run_loop(cycle.clone(), state, period, stop.clone()));
        Self { cycle, stop, handle }
    }

    /// Cancel pending groups, let the running cycle finish its current
    /// commit or rollback, then wait for the loop to exit.
    pub async fn shutdown(self) {
        self.cycle.cancel_handle().cancel();
        self.stop.notify_one();
        if let Err(e) = self.handle.await {
            error!("Publication loop ended abnormally: {}", e);
        }
        info!("Publication loop stopped");
    }
}

async fn run_loop(cycle: Arc<PublishCycle>, state: Arc<AppState>, period: Duration, stop: Arc<Notify>) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("Publication loop started, every {:?}", period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.notified() => break,
        }
        if cycle.cancel_handle().is_cancelled() {
            break;
        }
        let report = cycle.run().await;
        if let Some(e) = &report.upload.error {
            error!("Upload pass aborted ({}): {}", e.kind, e.message);
        }
        if let Some(e) = &report.sweep.error {
            error!("Block sweep aborted ({}): {}", e.kind, e.message);
        }
        state.record_cycle(report);
    }
}
