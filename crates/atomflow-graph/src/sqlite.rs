use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use atomflow_core::error::{AtomflowError, Result};
use atomflow_core::traits::GraphStore;
use atomflow_core::types::{NodeUpsert, UpsertedNode};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS nodes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        element_id TEXT NOT NULL UNIQUE,
        label TEXT NOT NULL,
        key_name TEXT NOT NULL,
        key_value TEXT NOT NULL,
        properties TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (label, key_name, key_value)
    );

    CREATE INDEX IF NOT EXISTS idx_nodes_label ON nodes(label);";

fn db_err(e: rusqlite::Error) -> AtomflowError {
    AtomflowError::Store(e.to_string())
}

/// Embedded property-graph store backed by a single SQLite table.
///
/// Nodes are unique per `(label, key_name, key_value)`; the key value is
/// stored in its JSON form so `1` and `"1"` stay distinct.
pub struct SqliteGraphStore {
    conn: Mutex<Connection>,
}

impl SqliteGraphStore {
    /// Open or create a graph database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AtomflowError::StoreUnavailable(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AtomflowError::StoreUnavailable(e.to_string()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!(path = %path.display(), "Graph store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AtomflowError::StoreUnavailable(e.to_string()))?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Properties of the node with this element id, if any.
    pub fn node_properties(
        &self,
        element_id: &str,
    ) -> Result<Option<serde_json::Map<String, serde_json::Value>>> {
        let conn = self.conn.lock().map_err(|e| AtomflowError::Store(e.to_string()))?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT properties FROM nodes WHERE element_id = ?1",
                params![element_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        raw.map(|s| serde_json::from_str(&s).map_err(AtomflowError::from))
            .transpose()
    }

    /// Number of nodes carrying `label`.
    pub fn count(&self, label: &str) -> Result<usize> {
        let conn = self.conn.lock().map_err(|e| AtomflowError::Store(e.to_string()))?;
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM nodes WHERE label = ?1",
                params![label],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(n as usize)
    }

    fn upsert_sync(&self, node: NodeUpsert) -> Result<UpsertedNode> {
        let mut conn = self.conn.lock().map_err(|e| AtomflowError::Store(e.to_string()))?;
        let tx = conn.transaction().map_err(db_err)?;
        let key_value = node.key_value.to_string();
        let now = Utc::now().to_rfc3339();

        let existing: Option<(String, String)> = tx
            .query_row(
                "SELECT element_id, properties FROM nodes
                 WHERE label = ?1 AND key_name = ?2 AND key_value = ?3",
                params![node.label, node.key, key_value],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db_err)?;

        let result = match existing {
            Some((element_id, raw)) => {
                let mut props: serde_json::Map<String, serde_json::Value> =
                    serde_json::from_str(&raw)?;
                props.extend(node.properties);
                tx.execute(
                    "UPDATE nodes SET properties = ?1, updated_at = ?2 WHERE element_id = ?3",
                    params![serde_json::Value::Object(props).to_string(), now, element_id],
                )
                .map_err(db_err)?;
                UpsertedNode {
                    node_id: element_id,
                    created: false,
                }
            }
            None => {
                let element_id = format!("{}:{}", node.label, uuid::Uuid::new_v4());
                tx.execute(
                    "INSERT INTO nodes
                        (element_id, label, key_name, key_value, properties, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                    params![
                        element_id,
                        node.label,
                        node.key,
                        key_value,
                        serde_json::Value::Object(node.properties).to_string(),
                        now
                    ],
                )
                .map_err(db_err)?;
                UpsertedNode {
                    node_id: element_id,
                    created: true,
                }
            }
        };

        tx.commit().map_err(db_err)?;
        Ok(result)
    }
}

impl GraphStore for SqliteGraphStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn upsert_node(&self, node: NodeUpsert) -> BoxFuture<'_, Result<UpsertedNode>> {
        Box::pin(async move { self.upsert_sync(node) })
    }

    fn ping(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let conn = self.conn.lock().map_err(|e| AtomflowError::Store(e.to_string()))?;
            conn.query_row("SELECT 1", [], |_| Ok(()))
                .map_err(|e| AtomflowError::StoreUnavailable(e.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn student(id: serde_json::Value, extra: serde_json::Value) -> NodeUpsert {
        let mut properties = extra.as_object().cloned().unwrap_or_default();
        properties.insert("id".into(), id.clone());
        NodeUpsert {
            label: "Student".into(),
            key: "id".into(),
            key_value: id,
            properties,
        }
    }

    #[tokio::test]
    async fn test_upsert_creates_then_merges() {
        let store = SqliteGraphStore::in_memory().unwrap();

        let first = store
            .upsert_node(student(json!("A-17"), json!({"name": "Ana", "grade": 7})))
            .await
            .unwrap();
        assert!(first.created);

        let second = store
            .upsert_node(student(json!("A-17"), json!({"grade": 8, "school": "Central"})))
            .await
            .unwrap();
        assert!(!second.created);
        assert_eq!(first.node_id, second.node_id);
        assert_eq!(store.count("Student").unwrap(), 1);

        let props = store.node_properties(&first.node_id).unwrap().unwrap();
        assert_eq!(props["name"], "Ana");
        assert_eq!(props["grade"], 8);
        assert_eq!(props["school"], "Central");
    }

    #[tokio::test]
    async fn test_key_value_type_matters() {
        let store = SqliteGraphStore::in_memory().unwrap();
        store.upsert_node(student(json!(1), json!({}))).await.unwrap();
        store.upsert_node(student(json!("1"), json!({}))).await.unwrap();
        assert_eq!(store.count("Student").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_labels_are_separate() {
        let store = SqliteGraphStore::in_memory().unwrap();
        store.upsert_node(student(json!("x"), json!({}))).await.unwrap();
        let mut doc = student(json!("x"), json!({}));
        doc.label = "Document".into();
        assert!(store.upsert_node(doc).await.unwrap().created);
        assert_eq!(store.count("Student").unwrap(), 1);
        assert_eq!(store.count("Document").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("graph.db");

        let id = {
            let store = SqliteGraphStore::open(&path).unwrap();
            store.ping().await.unwrap();
            store
                .upsert_node(student(json!("B-2"), json!({"name": "Bruno"})))
                .await
                .unwrap()
                .node_id
        };

        let store = SqliteGraphStore::open(&path).unwrap();
        let props = store.node_properties(&id).unwrap().unwrap();
        assert_eq!(props["name"], "Bruno");
    }
}
