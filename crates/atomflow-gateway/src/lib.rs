mod metrics;
mod routes;
mod server;
mod state;

pub use metrics::{OutcomeCounts, RunMetrics};
pub use server::GatewayServer;
