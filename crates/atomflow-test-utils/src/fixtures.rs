use std::path::{Path, PathBuf};

use atomflow_core::types::{OutputReport, StepSpec, WorkflowDefinition};

/// Build a step whose input is the given literal or reference.
pub fn step(name: &str, agent: &str, input: serde_json::Value) -> StepSpec {
    StepSpec {
        name: name.to_string(),
        agent: agent.to_string(),
        input: Some(input),
        prompt: None,
    }
}

/// Build a model-chat step with a prompt.
pub fn chat_step(name: &str, agent: &str, input: serde_json::Value, prompt: serde_json::Value) -> StepSpec {
    StepSpec {
        prompt: Some(prompt),
        ..step(name, agent, input)
    }
}

/// Build a workflow whose report data is the given literal or reference.
pub fn workflow(id: &str, steps: Vec<StepSpec>, data: serde_json::Value) -> WorkflowDefinition {
    WorkflowDefinition {
        id: id.to_string(),
        name: None,
        description: None,
        steps,
        output_report: OutputReport {
            deliver_to: Some("ui".to_string()),
            template: Some("default".to_string()),
            data: Some(data),
        },
    }
}

/// Write a shell script into `dir` and make it executable.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("write script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&path).expect("script metadata").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).expect("chmod script");
    }
    path
}
