use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use atomflow_core::event::EventBus;
use atomflow_core::types::{ChainEvent, ChainOutcome};

/// Run outcomes for one workflow.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub success: u64,
    pub error: u64,
    pub failed: u64,
}

/// In-process run outcome counters, keyed by workflow id.
#[derive(Default)]
pub struct RunMetrics {
    counts: Mutex<BTreeMap<String, OutcomeCounts>>,
}

impl RunMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, workflow_id: &str, outcome: ChainOutcome) {
        let mut counts = match self.counts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = counts.entry(workflow_id.to_string()).or_default();
        match outcome {
            ChainOutcome::Success => entry.success += 1,
            ChainOutcome::Error => entry.error += 1,
            ChainOutcome::Failed => entry.failed += 1,
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, OutcomeCounts> {
        match self.counts.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Count `RunCompleted` events from the bus until `shutdown` fires.
pub fn spawn_collector(
    event_bus: &EventBus,
    metrics: Arc<RunMetrics>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let mut rx = event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = rx.recv() => match event {
                    Ok(ChainEvent::RunCompleted { workflow_id, outcome, .. }) => {
                        metrics.record(&workflow_id, outcome);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Metrics collector lagged, some runs were not counted");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    })
}
