use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use tracing::debug;

use atomflow_core::error::{AtomflowError, Result};
use atomflow_core::traits::PromptLibrary;

/// Prompt modules stored as files in one directory.
///
/// A module name without an extension maps to `<dir>/<name>.md`.
pub struct DirPromptLibrary {
    dir: PathBuf,
}

impl DirPromptLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn module_path(&self, name: &str) -> PathBuf {
        if Path::new(name).extension().is_some() {
            self.dir.join(name)
        } else {
            self.dir.join(format!("{}.md", name))
        }
    }
}

impl PromptLibrary for DirPromptLibrary {
    fn assemble(&self, modules: &[String]) -> BoxFuture<'_, Result<String>> {
        let modules = modules.to_vec();
        Box::pin(async move {
            let mut parts = Vec::with_capacity(modules.len());
            for name in &modules {
                let path = self.module_path(name);
                let text = tokio::fs::read_to_string(&path).await.map_err(|e| {
                    AtomflowError::Definition {
                        name: name.clone(),
                        message: format!("cannot read prompt module {}: {}", path.display(), e),
                    }
                })?;
                parts.push(text.trim().to_string());
            }
            debug!(modules = modules.len(), "Assembled system prompt");
            Ok(parts.join("\n\n"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_assembles_in_declared_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("persona_expert.md"), "You are an expert.\n").unwrap();
        std::fs::write(dir.path().join("format.txt"), "Answer in JSON.").unwrap();

        let library = DirPromptLibrary::new(dir.path());
        let prompt = library
            .assemble(&["format.txt".into(), "persona_expert".into()])
            .await
            .unwrap();
        assert_eq!(prompt, "Answer in JSON.\n\nYou are an expert.");
    }

    #[tokio::test]
    async fn test_missing_module() {
        let dir = tempfile::tempdir().unwrap();
        let library = DirPromptLibrary::new(dir.path());
        let err = library.assemble(&["nope".into()]).await.unwrap_err();
        assert!(matches!(err, AtomflowError::Definition { ref name, .. } if name == "nope"));
    }
}
