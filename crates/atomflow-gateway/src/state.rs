use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use atomflow_engine::ChainExecutor;

use crate::metrics::RunMetrics;

/// Shared application state for axum handlers.
pub struct AppState {
    pub executor: Arc<ChainExecutor>,
    pub metrics: Arc<RunMetrics>,
    /// Parent of every run's cancellation token.
    pub shutdown: CancellationToken,
    pub started_at: DateTime<Utc>,
}
