//! Background pruning of expired settlement and requirement state.

use crate::event::{GateEvent, GateEventsSender};
use crate::payment::cache::SettlementCache;
use crate::payment::registry::RequirementRegistry;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Handle to a running sweeper.
///
/// Dropping the handle also stops the sweeper.
pub struct SweeperHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }

    /// Whether the sweeper task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawn a task that prunes `cache` and `registry` every `interval`.
///
/// The first sweep happens one full interval after spawning.
#[must_use]
pub fn spawn_sweeper(
    cache: SettlementCache,
    registry: RequirementRegistry,
    interval: Duration,
    events_tx: Option<GateEventsSender>,
) -> SweeperHandle {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("Sweeper started, interval {:?}", interval);

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let settlements = cache.cleanup();
                    let requirements = registry.cleanup();
                    if settlements > 0 || requirements > 0 {
                        debug!(
                            "Swept {} settlements and {} requirements",
                            settlements, requirements
                        );
                    }
                    if let Some(ref tx) = events_tx {
                        let _ = tx.send(GateEvent::CacheSwept { settlements, requirements });
                    }
                }
            }
        }

        info!("Sweeper stopped");
    });

    SweeperHandle { shutdown_tx, task }
}
