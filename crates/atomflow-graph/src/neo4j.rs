use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use atomflow_core::config::GraphConfig;
use atomflow_core::error::{AtomflowError, Result};
use atomflow_core::traits::GraphStore;
use atomflow_core::types::{is_identifier, NodeUpsert, UpsertedNode};

/// Neo4j store speaking the transactional HTTP API
/// (`POST {url}/db/{database}/tx/commit`).
pub struct Neo4jHttpStore {
    http: Client,
    url: String,
    database: String,
    user: Option<String>,
    password: Option<String>,
}

impl Neo4jHttpStore {
    pub fn new(url: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            http: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
            url: url.into().trim_end_matches('/').to_string(),
            database: database.into(),
            user: None,
            password: None,
        }
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    pub fn from_config(config: &GraphConfig) -> Result<Self> {
        let url = config.url.as_deref().ok_or_else(|| {
            AtomflowError::Config("graph.url is required for the neo4j backend".into())
        })?;
        let mut store = Self::new(url, &config.database);
        if let Some(ref user) = config.user {
            store = store.with_credentials(user, config.password.clone().unwrap_or_default());
        }
        Ok(store)
    }

    fn commit_url(&self) -> String {
        format!("{}/db/{}/tx/commit", self.url, self.database)
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.user {
            Some(ref user) => req.basic_auth(user, self.password.as_deref()),
            None => req,
        }
    }
}

#[derive(Serialize)]
struct CommitRequest {
    statements: Vec<Statement>,
}

#[derive(Serialize)]
struct Statement {
    statement: String,
    parameters: serde_json::Value,
}

#[derive(Deserialize, Debug)]
struct CommitResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    errors: Vec<Neo4jError>,
}

#[derive(Deserialize, Debug)]
struct StatementResult {
    #[serde(default)]
    data: Vec<Row>,
}

#[derive(Deserialize, Debug)]
struct Row {
    row: Vec<serde_json::Value>,
}

#[derive(Deserialize, Debug)]
struct Neo4jError {
    code: String,
    message: String,
}

/// Build the MERGE statement. Label and key are interpolated, so both must be
/// plain identifiers; everything else travels as parameters.
fn upsert_statement(node: &NodeUpsert) -> Result<Statement> {
    for part in [&node.label, &node.key] {
        if !is_identifier(part) {
            return Err(AtomflowError::Store(format!(
                "'{}' is not a valid label or property name",
                part
            )));
        }
    }
    let statement = format!(
        "MERGE (n:`{label}` {{`{key}`: $key_value}}) \
         ON CREATE SET n.created_at = datetime() \
         ON MATCH SET n.updated_at = datetime() \
         WITH n, n.updated_at IS NULL AS created \
         SET n += $props \
         RETURN elementId(n), created",
        label = node.label,
        key = node.key,
    );
    Ok(Statement {
        statement,
        parameters: serde_json::json!({
            "key_value": node.key_value,
            "props": node.properties,
        }),
    })
}

fn parse_commit(body: &str) -> Result<UpsertedNode> {
    let response: CommitResponse =
        serde_json::from_str(body).map_err(|e| AtomflowError::Store(e.to_string()))?;
    if let Some(err) = response.errors.first() {
        return Err(AtomflowError::Store(format!("{}: {}", err.code, err.message)));
    }
    let row = response
        .results
        .first()
        .and_then(|r| r.data.first())
        .ok_or_else(|| AtomflowError::Store("MERGE returned no rows".into()))?;
    let node_id = row
        .row
        .first()
        .and_then(|v| v.as_str())
        .ok_or_else(|| AtomflowError::Store("missing element id".into()))?
        .to_string();
    let created = row.row.get(1).and_then(|v| v.as_bool()).unwrap_or(false);
    Ok(UpsertedNode { node_id, created })
}

fn request_error(e: reqwest::Error) -> AtomflowError {
    if e.is_connect() || e.is_timeout() {
        AtomflowError::StoreUnavailable(e.to_string())
    } else {
        AtomflowError::Store(e.to_string())
    }
}

impl GraphStore for Neo4jHttpStore {
    fn name(&self) -> &str {
        "neo4j"
    }

    fn upsert_node(&self, node: NodeUpsert) -> BoxFuture<'_, Result<UpsertedNode>> {
        Box::pin(async move {
            let body = CommitRequest {
                statements: vec![upsert_statement(&node)?],
            };
            let url = self.commit_url();
            debug!(url = %url, label = %node.label, "Upserting node");

            let response = self
                .authed(self.http.post(&url))
                .json(&body)
                .send()
                .await
                .map_err(request_error)?;

            let status = response.status();
            let text = response.text().await.map_err(request_error)?;
            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(AtomflowError::StoreUnavailable(format!(
                    "authentication rejected by {}",
                    self.url
                )));
            }
            if !status.is_success() {
                return Err(AtomflowError::Store(format!("HTTP {}: {}", status, text)));
            }

            parse_commit(&text)
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let body = CommitRequest {
                statements: vec![Statement {
                    statement: "RETURN 1".into(),
                    parameters: serde_json::json!({}),
                }],
            };
            let response = self
                .authed(self.http.post(self.commit_url()))
                .json(&body)
                .send()
                .await
                .map_err(|e| AtomflowError::StoreUnavailable(e.to_string()))?;
            if response.status().is_success() {
                Ok(())
            } else {
                Err(AtomflowError::StoreUnavailable(format!(
                    "HTTP {} from {}",
                    response.status(),
                    self.url
                )))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(label: &str) -> NodeUpsert {
        NodeUpsert {
            label: label.into(),
            key: "id".into(),
            key_value: json!("A-17"),
            properties: json!({"id": "A-17", "name": "Ana"})
                .as_object()
                .cloned()
                .unwrap(),
        }
    }

    #[test]
    fn test_statement_shape() {
        let stmt = upsert_statement(&node("Student")).unwrap();
        assert!(stmt.statement.starts_with("MERGE (n:`Student` {`id`: $key_value})"));
        assert!(stmt.statement.contains("SET n += $props"));
        assert!(stmt.statement.contains("RETURN elementId(n)"));
        assert_eq!(stmt.parameters["key_value"], "A-17");
        assert_eq!(stmt.parameters["props"]["name"], "Ana");
    }

    #[test]
    fn test_created_flag_taken_before_props_applied() {
        let stmt = upsert_statement(&node("Student")).unwrap();
        let text = &stmt.statement;
        let flag = text.find("n.updated_at IS NULL AS created").unwrap();
        let props = text.find("SET n += $props").unwrap();
        assert!(flag < props);
        assert!(text.ends_with("RETURN elementId(n), created"));
    }

    #[test]
    fn test_rejects_injected_label() {
        assert!(upsert_statement(&node("Student`) DETACH DELETE n //")).is_err());
    }

    #[test]
    fn test_parse_commit() {
        let body = r#"{"results":[{"columns":["elementId(n)","created"],"data":[{"row":["4:abc:12",true],"meta":[null,null]}]}],"errors":[]}"#;
        let node = parse_commit(body).unwrap();
        assert_eq!(node.node_id, "4:abc:12");
        assert!(node.created);
    }

    #[test]
    fn test_parse_commit_error() {
        let body = r#"{"results":[],"errors":[{"code":"Neo.ClientError.Statement.SyntaxError","message":"bad"}]}"#;
        let err = parse_commit(body).unwrap_err();
        assert!(err.to_string().contains("SyntaxError"));
    }

    #[test]
    fn test_from_config_requires_url() {
        let config = GraphConfig::default();
        assert!(Neo4jHttpStore::from_config(&config).is_err());

        let config = GraphConfig {
            url: Some("http://neo4j:7474/".into()),
            ..GraphConfig::default()
        };
        let store = Neo4jHttpStore::from_config(&config).unwrap();
        assert_eq!(store.commit_url(), "http://neo4j:7474/db/neo4j/tx/commit");
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let store = Neo4jHttpStore::new("http://127.0.0.1:9", "neo4j");
        let err = store.ping().await.unwrap_err();
        assert!(matches!(err, AtomflowError::StoreUnavailable(_)));
    }
}
