use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use tracing::debug;

use atomflow_core::config::EngineConfig;
use atomflow_core::error::{AtomflowError, Result};
use atomflow_core::traits::DefinitionLoader;
use atomflow_core::types::{AgentDefinition, AgentDocument, WorkflowDefinition};

/// Reads workflow and agent definitions from YAML files.
///
/// - workflows: `<workflows_dir>/<id>.yaml`
/// - agents: `<agents_dir>/<name>`, with `.yaml` appended when the name has
///   no extension
pub struct FileDefinitionLoader {
    workflows_dir: PathBuf,
    agents_dir: PathBuf,
}

impl FileDefinitionLoader {
    pub fn new(workflows_dir: impl Into<PathBuf>, agents_dir: impl Into<PathBuf>) -> Self {
        Self {
            workflows_dir: workflows_dir.into(),
            agents_dir: agents_dir.into(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(&config.workflows_dir, &config.agents_dir)
    }

    pub fn workflow_path(&self, id: &str) -> PathBuf {
        self.workflows_dir.join(format!("{}.yaml", id))
    }

    pub fn agent_path(&self, name: &str) -> PathBuf {
        if Path::new(name).extension().is_some() {
            self.agents_dir.join(name)
        } else {
            self.agents_dir.join(format!("{}.yaml", name))
        }
    }

    /// Ids of every workflow file in the workflows directory, sorted.
    pub fn list_workflows(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.workflows_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("yaml") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Reject ids that would escape the definitions directory.
fn check_name(name: &str, not_found: impl Fn() -> AtomflowError) -> Result<()> {
    if name.is_empty() || name.contains("..") || Path::new(name).is_absolute() {
        return Err(not_found());
    }
    Ok(())
}

async fn read_definition(
    path: &Path,
    not_found: impl Fn() -> AtomflowError,
) -> Result<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(not_found()),
        Err(e) => Err(AtomflowError::Io(e)),
    }
}

impl DefinitionLoader for FileDefinitionLoader {
    fn load_workflow(&self, id: &str) -> BoxFuture<'_, Result<WorkflowDefinition>> {
        let id = id.to_string();
        Box::pin(async move {
            let not_found = || AtomflowError::DefinitionNotFound(id.clone());
            check_name(&id, not_found)?;
            let path = self.workflow_path(&id);
            let text = read_definition(&path, not_found).await?;

            let mut workflow: WorkflowDefinition =
                serde_yaml::from_str(&text).map_err(|e| AtomflowError::Definition {
                    name: id.clone(),
                    message: e.to_string(),
                })?;
            if workflow.id.is_empty() {
                workflow.id = id.clone();
            }
            debug!(workflow = %id, steps = workflow.steps.len(), "Loaded workflow");
            Ok(workflow)
        })
    }

    fn load_agent(&self, name: &str) -> BoxFuture<'_, Result<AgentDefinition>> {
        let name = name.to_string();
        Box::pin(async move {
            let not_found = || AtomflowError::AgentNotFound(name.clone());
            check_name(&name, not_found)?;
            let path = self.agent_path(&name);
            let text = read_definition(&path, not_found).await?;

            let doc: AgentDocument =
                serde_yaml::from_str(&text).map_err(|e| AtomflowError::Definition {
                    name: name.clone(),
                    message: e.to_string(),
                })?;
            let agent = AgentDefinition::from_document(&name, doc)?;
            debug!(agent = %name, kind = agent.kind.type_tag(), "Loaded agent");
            Ok(agent)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atomflow_core::types::{AgentKind, OutputSchema};

    fn setup() -> (tempfile::TempDir, FileDefinitionLoader) {
        let dir = tempfile::tempdir().unwrap();
        let workflows = dir.path().join("workflows");
        let agents = dir.path().join("agents");
        std::fs::create_dir_all(&workflows).unwrap();
        std::fs::create_dir_all(&agents).unwrap();

        std::fs::write(
            workflows.join("student_enrollment.yaml"),
            r#"
name: Student enrollment
steps:
  - name: OCR
    agent: agent_ocr.yaml
    input: $.input_trigger.file_path
  - name: Extract
    agent: agent_extract
    input: $.steps[0].raw_markdown_content
    prompt: Extract the student record.
output_report:
  deliver_to: ui
  template: student_card
  data: $.steps[1].student
"#,
        )
        .unwrap();
        std::fs::write(
            agents.join("agent_ocr.yaml"),
            "type: local_tool\nscript_path: run_ocr.py\ninterpreter: python3\n",
        )
        .unwrap();
        std::fs::write(
            agents.join("agent_extract.yaml"),
            "type: llm_chat\nmodel: mistral:7b-instruct\nsystem_prompt: Extract.\noutput_schema: json\n",
        )
        .unwrap();
        std::fs::write(agents.join("agent_bad.yaml"), "type: carrier_pigeon\n").unwrap();

        let loader = FileDefinitionLoader::new(workflows, agents);
        (dir, loader)
    }

    #[tokio::test]
    async fn test_load_workflow() {
        let (_dir, loader) = setup();
        let wf = loader.load_workflow("student_enrollment").await.unwrap();
        assert_eq!(wf.id, "student_enrollment");
        assert_eq!(wf.steps.len(), 2);
        assert_eq!(wf.steps[0].agent, "agent_ocr.yaml");
        assert_eq!(
            wf.steps[1].prompt,
            Some(serde_json::json!("Extract the student record."))
        );
        assert_eq!(wf.output_report.template.as_deref(), Some("student_card"));
        assert_eq!(loader.list_workflows().unwrap(), vec!["student_enrollment"]);
    }

    #[tokio::test]
    async fn test_load_agents_with_and_without_extension() {
        let (_dir, loader) = setup();
        let ocr = loader.load_agent("agent_ocr.yaml").await.unwrap();
        assert_eq!(ocr.kind.type_tag(), "local_tool");

        let extract = loader.load_agent("agent_extract").await.unwrap();
        match extract.kind {
            AgentKind::ModelChat(cfg) => assert_eq!(cfg.output_schema, OutputSchema::Json),
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_not_found() {
        let (_dir, loader) = setup();
        assert!(matches!(
            loader.load_workflow("missing").await.unwrap_err(),
            AtomflowError::DefinitionNotFound(_)
        ));
        assert!(matches!(
            loader.load_agent("agent_missing").await.unwrap_err(),
            AtomflowError::AgentNotFound(_)
        ));
        assert!(matches!(
            loader.load_workflow("../agents/agent_ocr").await.unwrap_err(),
            AtomflowError::DefinitionNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_unknown_type_rejected_at_load() {
        let (_dir, loader) = setup();
        assert!(matches!(
            loader.load_agent("agent_bad").await.unwrap_err(),
            AtomflowError::UnknownAgentType { .. }
        ));
    }

    #[tokio::test]
    async fn test_malformed_yaml() {
        let (dir, loader) = setup();
        std::fs::write(
            dir.path().join("workflows").join("broken.yaml"),
            "steps: [unclosed",
        )
        .unwrap();
        assert!(matches!(
            loader.load_workflow("broken").await.unwrap_err(),
            AtomflowError::Definition { .. }
        ));
    }
}
