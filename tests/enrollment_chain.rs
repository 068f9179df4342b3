#![cfg(unix)]

use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use atomflow_core::error::{AtomflowError, FailureClass};
use atomflow_core::event::EventBus;
use atomflow_core::types::Role;
use atomflow_engine::{Backends, ChainExecutor, DirPromptLibrary, FileDefinitionLoader, JsonSchemaAdapter};
use atomflow_test_utils::{write_script, MemoryGraphStore, MockChatModel};
use atomflow_tools::ProcessScriptRunner;

const OCR_SCRIPT: &str = r##"cat > /dev/null
printf '%s' '{"raw_markdown_content": "# Ficha de matricula\nNome: Ana Souza\nRA: 2024-001"}'"##;

const ENROLLMENT_WORKFLOW: &str = r#"
name: Student enrollment
steps:
  - name: OCR
    agent: agent_ocr.yaml
    input: "$.input_trigger.file_path"
  - name: Extract
    agent: agent_extract
    input: "$.steps[0].raw_markdown_content"
    prompt: "Extract the student record."
output_report:
  deliver_to: ui
  template: enrollment_summary
  data: "$.steps[1].student"
"#;

const SAVE_WORKFLOW: &str = r#"
steps:
  - name: OCR
    agent: agent_ocr.yaml
    input: "$.input_trigger.file_path"
  - name: Extract
    agent: agent_extract
    input: "$.steps[0].raw_markdown_content"
  - name: Save
    agent: agent_save
    input: "$.steps[1].graph_payload"
output_report:
  deliver_to: ui
  data: "$.steps[2].node_id"
"#;

struct Fixture {
    _dir: tempfile::TempDir,
    executor: ChainExecutor,
    model: Arc<MockChatModel>,
    graph: Arc<MemoryGraphStore>,
}

fn write(path: &Path, content: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn fixture(model: MockChatModel) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    write(&root.join("workflows/enrollment.yaml"), ENROLLMENT_WORKFLOW);
    write(&root.join("workflows/enrollment_save.yaml"), SAVE_WORKFLOW);
    write(
        &root.join("agents/agent_ocr.yaml"),
        "type: local_tool\nscript_path: run_ocr.sh\ntimeout_secs: 10\n",
    );
    write(
        &root.join("agents/agent_extract.yaml"),
        "type: llm_chat\nmodel: mistral:7b-instruct\noutput_schema: json\nprompt_modules: [persona, rules]\n",
    );
    write(
        &root.join("agents/agent_save.yaml"),
        "type: internal_tool\nfunction_name: save_to_graph_db\n",
    );
    write(&root.join("prompts/persona.md"), "You are a school secretary.\n");
    write(&root.join("prompts/rules.md"), "Answer with JSON only.\n");

    std::fs::create_dir_all(root.join("tools")).unwrap();
    write_script(&root.join("tools"), "run_ocr.sh", OCR_SCRIPT);

    let model = Arc::new(model);
    let graph = Arc::new(MemoryGraphStore::new());
    let backends = Backends::new(
        Arc::new(ProcessScriptRunner::new(2)),
        Arc::new(DirPromptLibrary::new(root.join("prompts"))),
    )
    .with_model(model.clone())
    .with_graph(graph.clone())
    .with_schema_adapter(Arc::new(JsonSchemaAdapter::new()))
    .with_tools_dir(root.join("tools"));

    let executor = ChainExecutor::new(
        Arc::new(FileDefinitionLoader::new(root.join("workflows"), root.join("agents"))),
        Arc::new(backends),
        Arc::new(EventBus::default()),
    );

    Fixture {
        _dir: dir,
        executor,
        model,
        graph,
    }
}

#[tokio::test]
async fn test_ocr_then_extract() {
    let fx = fixture(MockChatModel::with_replies([
        r#"```json
{"student": {"name": "Ana Souza", "ra": "2024-001"}}
```"#,
    ]));

    let result = fx
        .executor
        .run_chain(
            "enrollment",
            json!({"file_path": "/tmp/doc.pdf"}),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.deliver_to.as_deref(), Some("ui"));
    assert_eq!(result.template.as_deref(), Some("enrollment_summary"));
    assert_eq!(result.data, json!({"name": "Ana Souza", "ra": "2024-001"}));

    let requests = fx.model.requests();
    assert_eq!(requests.len(), 1);
    let (model, messages) = &requests[0];
    assert_eq!(model, "mistral:7b-instruct");
    assert_eq!(messages[0].role, Role::System);
    assert_eq!(
        messages[0].content,
        "You are a school secretary.\n\nAnswer with JSON only."
    );
    assert_eq!(messages[1].role, Role::User);
    assert_eq!(
        messages[1].content,
        "# Ficha de matricula\nNome: Ana Souza\nRA: 2024-001\n\nExtract the student record."
    );
    assert_eq!(fx.executor.dispatched(), 2);
}

#[tokio::test]
async fn test_extract_saved_to_graph() {
    let fx = fixture(MockChatModel::with_replies([json!({
        "graph_payload": {
            "params": {"entity_type": "Student", "primary_key": "ra"},
            "data": {"ra": "2024-001", "name": "Ana Souza"}
        }
    })
    .to_string()]));

    let result = fx
        .executor
        .run_chain(
            "enrollment_save",
            json!({"file_path": "/tmp/doc.pdf"}),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let nodes = fx.graph.nodes();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].label, "Student");
    assert_eq!(nodes[0].properties["name"], "Ana Souza");
    assert_eq!(result.data, json!(nodes[0].node_id));
}

#[tokio::test]
async fn test_unparseable_model_reply_is_wrapped() {
    let fx = fixture(MockChatModel::with_replies(["I could not read the form."]));

    let err = fx
        .executor
        .run_chain(
            "enrollment",
            json!({"file_path": "/tmp/doc.pdf"}),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

    // The extract step yields {raw_text}, so the report reference has no `student` key.
    assert!(matches!(err, AtomflowError::Reference { .. }));
    assert_eq!(err.classify(), FailureClass::BadInput);
}

#[tokio::test]
async fn test_missing_trigger_key_stops_before_ocr() {
    let fx = fixture(MockChatModel::new());

    let err = fx
        .executor
        .run_chain("enrollment", json!({}), CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.step_index(), Some(0));
    assert_eq!(err.classify(), FailureClass::BadInput);
    assert_eq!(fx.executor.dispatched(), 0);
    assert_eq!(fx.model.calls(), 0);
}

#[tokio::test]
async fn test_unknown_workflow() {
    let fx = fixture(MockChatModel::new());

    let err = fx
        .executor
        .run_chain("graduation", json!({}), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, AtomflowError::DefinitionNotFound(_)));
    assert_eq!(err.classify(), FailureClass::NotFound);
}
