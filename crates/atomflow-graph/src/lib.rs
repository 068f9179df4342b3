pub mod neo4j;
pub mod sqlite;

use std::sync::Arc;

use atomflow_core::config::{expand_home, GraphBackend, GraphConfig};
use atomflow_core::error::Result;
use atomflow_core::traits::GraphStore;

pub use neo4j::Neo4jHttpStore;
pub use sqlite::SqliteGraphStore;

/// Open the graph store selected by `[graph] backend`.
pub fn open_store(config: &GraphConfig) -> Result<Arc<dyn GraphStore>> {
    match config.backend {
        GraphBackend::Sqlite => Ok(Arc::new(SqliteGraphStore::open(&expand_home(&config.path))?)),
        GraphBackend::Neo4j => Ok(Arc::new(Neo4jHttpStore::from_config(config)?)),
    }
}
