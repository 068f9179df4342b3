use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use atomflow_core::error::{AtomflowError, Result};
use atomflow_core::traits::GraphStore;
use atomflow_core::types::{is_identifier, InternalFunction, NodeUpsert};

const DEFAULT_ENTITY_TYPE: &str = "Document";

/// Call an internal function with its resolved step input.
///
/// `store` is `None` when the engine runs without a graph backend.
pub async fn invoke(
    function: InternalFunction,
    store: Option<&dyn GraphStore>,
    input: Value,
) -> Result<Value> {
    match function {
        InternalFunction::SaveToGraphDb => {
            let store = store.ok_or_else(|| {
                AtomflowError::StoreUnavailable("no graph store is connected".into())
            })?;
            save_to_graph_db(store, input).await
        }
    }
}

#[derive(Deserialize)]
struct SaveInput {
    #[serde(default)]
    params: SaveParams,
    data: serde_json::Map<String, Value>,
}

#[derive(Deserialize, Default)]
struct SaveParams {
    #[serde(default)]
    entity_type: Option<String>,
    #[serde(default)]
    primary_key: Option<String>,
}

fn invalid(message: impl Into<String>) -> AtomflowError {
    AtomflowError::InvalidToolInput {
        tool: InternalFunction::SaveToGraphDb.as_str().to_string(),
        message: message.into(),
    }
}

/// Upsert `data` as a node labelled `params.entity_type`, keyed by
/// `data[params.primary_key]`. Returns `{status: "success", node_id}`.
pub async fn save_to_graph_db(store: &dyn GraphStore, input: Value) -> Result<Value> {
    let input: SaveInput = serde_json::from_value(input)
        .map_err(|e| invalid(format!("expected {{params, data}}: {}", e)))?;

    let label = input
        .params
        .entity_type
        .unwrap_or_else(|| DEFAULT_ENTITY_TYPE.to_string());
    if !is_identifier(&label) {
        return Err(invalid(format!("entity_type '{}' is not a valid label", label)));
    }

    let key = input
        .params
        .primary_key
        .ok_or_else(|| invalid("params.primary_key is required"))?;
    if !is_identifier(&key) {
        return Err(invalid(format!("primary_key '{}' is not a valid property name", key)));
    }

    let key_value = match input.data.get(&key) {
        Some(v) if !v.is_null() => v.clone(),
        _ => return Err(invalid(format!("data has no value for primary key '{}'", key))),
    };

    let node = store
        .upsert_node(NodeUpsert {
            label: label.clone(),
            key: key.clone(),
            key_value,
            properties: input.data,
        })
        .await?;

    info!(
        store = store.name(),
        label = %label,
        node_id = %node.node_id,
        created = node.created,
        "Saved node to graph"
    );

    Ok(json!({ "status": "success", "node_id": node.node_id }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use atomflow_test_utils::MemoryGraphStore;

    #[tokio::test]
    async fn test_saves_and_merges() {
        let store = MemoryGraphStore::new();
        let first = save_to_graph_db(
            &store,
            json!({
                "params": {"entity_type": "Student", "primary_key": "matricula"},
                "data": {"matricula": "2024-001", "nome": "Ana"}
            }),
        )
        .await
        .unwrap();
        assert_eq!(first["status"], "success");

        let second = save_to_graph_db(
            &store,
            json!({
                "params": {"entity_type": "Student", "primary_key": "matricula"},
                "data": {"matricula": "2024-001", "turma": "7B"}
            }),
        )
        .await
        .unwrap();
        assert_eq!(first["node_id"], second["node_id"]);

        let nodes = store.nodes();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].label, "Student");
        assert_eq!(nodes[0].properties["nome"], "Ana");
        assert_eq!(nodes[0].properties["turma"], "7B");
    }

    #[tokio::test]
    async fn test_entity_type_defaults_to_document() {
        let store = MemoryGraphStore::new();
        save_to_graph_db(
            &store,
            json!({"params": {"primary_key": "id"}, "data": {"id": 7}}),
        )
        .await
        .unwrap();
        assert_eq!(store.nodes()[0].label, "Document");
    }

    #[tokio::test]
    async fn test_rejects_bad_input() {
        let store = MemoryGraphStore::new();
        let cases = [
            json!({"params": {"entity_type": "Student"}, "data": {"id": 1}}),
            json!({"params": {"primary_key": "id"}, "data": {"name": "x"}}),
            json!({"params": {"primary_key": "id"}, "data": {"id": null}}),
            json!({"params": {"entity_type": "Bad Label", "primary_key": "id"}, "data": {"id": 1}}),
            json!({"params": {"primary_key": "id"}, "data": "not an object"}),
            json!("just a string"),
        ];
        for case in cases {
            let err = save_to_graph_db(&store, case.clone()).await.unwrap_err();
            assert!(
                matches!(err, AtomflowError::InvalidToolInput { .. }),
                "{case} gave {err}"
            );
        }
        assert!(store.nodes().is_empty());
    }

    #[tokio::test]
    async fn test_missing_store() {
        let err = invoke(InternalFunction::SaveToGraphDb, None, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, AtomflowError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_unreachable_store() {
        let store = MemoryGraphStore::unreachable();
        let err = invoke(
            InternalFunction::SaveToGraphDb,
            Some(&store as &dyn GraphStore),
            json!({"params": {"primary_key": "id"}, "data": {"id": 1}}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AtomflowError::StoreUnavailable(_)));
    }
}
