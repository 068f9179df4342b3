use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use atomflow_core::config::GatewayConfig;
use atomflow_engine::ChainExecutor;

use crate::metrics::{spawn_collector, RunMetrics};
use crate::routes;
use crate::state::AppState;

/// HTTP gateway server built on axum.
pub struct GatewayServer {
    config: GatewayConfig,
    executor: Arc<ChainExecutor>,
    metrics: Arc<RunMetrics>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, executor: Arc<ChainExecutor>) -> Self {
        Self {
            config,
            executor,
            metrics: Arc::new(RunMetrics::new()),
        }
    }

    /// The route table, with state attached.
    pub fn router(&self, shutdown: CancellationToken) -> Router {
        let state = Arc::new(AppState {
            executor: self.executor.clone(),
            metrics: self.metrics.clone(),
            shutdown,
            started_at: Utc::now(),
        });

        Router::new()
            .route("/", get(routes::status))
            .route("/api/health", get(routes::health))
            .route("/api/metrics", get(routes::metrics))
            .route("/api/v1/run_chain", post(routes::run_chain))
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Run the gateway server until the cancellation token is triggered.
    ///
    /// Runs still in flight at shutdown are cancelled.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let collector = spawn_collector(
            self.executor.event_bus(),
            self.metrics.clone(),
            shutdown.clone(),
        );
        let app = self.router(shutdown.clone());

        let listener = TcpListener::bind(&self.config.bind).await?;
        info!(bind = %self.config.bind, "Gateway listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        collector.await.ok();
        info!("Gateway shut down");
        Ok(())
    }

    pub fn metrics(&self) -> &Arc<RunMetrics> {
        &self.metrics
    }
}
