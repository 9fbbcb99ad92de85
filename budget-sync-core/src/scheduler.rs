//! Drives automatic sync: once at startup, then on the configured interval.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::orchestrator::{SyncOrchestrator, SyncTrigger};

/// Timer loop around an orchestrator.
pub struct SyncScheduler<'a> {
    orchestrator: &'a SyncOrchestrator,
}

impl<'a> SyncScheduler<'a> {
    pub fn new(orchestrator: &'a SyncOrchestrator) -> Self {
        Self { orchestrator }
    }

    /// Runs until `shutdown` turns true. The interval is re-read from the
    /// config before every wait so `config set` applies without a restart.
    /// A cycle in flight at shutdown is cancelled and awaited.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if self.cycle(SyncTrigger::Startup, &mut shutdown).await {
            return;
        }

        loop {
            let minutes = self.orchestrator.config().sync_interval_minutes.max(1);
            let wait = Duration::from_secs(u64::from(minutes) * 60);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            if self.cycle(SyncTrigger::Interval, &mut shutdown).await {
                break;
            }
        }
        info!("Sync scheduler stopped");
    }

    /// Runs one cycle. Returns true when shutdown was requested meanwhile.
    async fn cycle(&self, trigger: SyncTrigger, shutdown: &mut watch::Receiver<bool>) -> bool {
        if *shutdown.borrow() {
            return true;
        }

        let cycle = self.orchestrator.trigger(trigger);
        tokio::pin!(cycle);

        let (result, stopping) = loop {
            tokio::select! {
                result = &mut cycle => break (result, false),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        self.orchestrator.cancel();
                        break ((&mut cycle).await, true);
                    }
                }
            }
        };

        match result {
            Ok(state) => info!(%trigger, status = %state.status, "Scheduled sync finished"),
            Err(e) => warn!(%trigger, error = %e, "Scheduled sync could not save state"),
        }
        stopping
    }
}
