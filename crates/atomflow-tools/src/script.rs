use std::process::Stdio;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use atomflow_core::config::ScriptConfig;
use atomflow_core::error::{AtomflowError, Result};
use atomflow_core::traits::ScriptRunner;
use atomflow_core::types::ScriptInvocation;

const MAX_STDERR: usize = 8000;

/// Runs local scripts as child processes speaking JSON over stdio.
///
/// The resolved input is written to stdin as one JSON document and stdin is
/// closed; stdout is parsed as one JSON document after the child exits.
/// A shared semaphore bounds how many children are alive at once.
pub struct ProcessScriptRunner {
    permits: Arc<Semaphore>,
}

impl ProcessScriptRunner {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn from_config(config: &ScriptConfig) -> Self {
        Self::new(config.max_concurrent)
    }

    /// Permits currently free in the pool.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

enum Finished {
    Exited(std::io::Result<(std::process::ExitStatus, Vec<u8>, Vec<u8>)>),
    TimedOut,
    Cancelled,
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

fn truncate(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
        s.push_str("\n... (truncated)");
    }
    s
}

fn command_for(invocation: &ScriptInvocation) -> Command {
    match invocation.interpreter {
        Some(ref interpreter) => {
            let mut cmd = Command::new(interpreter);
            cmd.arg(&invocation.script);
            cmd
        }
        None => Command::new(&invocation.script),
    }
}

impl ScriptRunner for ProcessScriptRunner {
    fn run(
        &self,
        invocation: ScriptInvocation,
        input: serde_json::Value,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move {
            let script = invocation.display_name();
            let input_bytes = serde_json::to_vec(&input)?;

            let _permit = tokio::select! {
                permit = self.permits.acquire() => permit.map_err(|_| AtomflowError::Cancelled)?,
                _ = cancel.cancelled() => return Err(AtomflowError::Cancelled),
            };

            debug!(script = %script, interpreter = ?invocation.interpreter, "Spawning script");

            let mut child = command_for(&invocation)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| AtomflowError::ScriptExecution {
                    script: script.clone(),
                    code: None,
                    stderr: format!("failed to spawn: {}", e),
                })?;

            let stdin = child.stdin.take();
            let stdout = child.stdout.take();
            let stderr = child.stderr.take();

            let finished = {
                let io = async {
                    let write = async move {
                        if let Some(mut stdin) = stdin {
                            // A script that ignores its input may close stdin early.
                            if let Err(e) = stdin.write_all(&input_bytes).await {
                                if e.kind() != std::io::ErrorKind::BrokenPipe {
                                    return Err(e);
                                }
                            }
                        }
                        Ok(())
                    };
                    let (written, out, err) =
                        tokio::join!(write, read_pipe(stdout), read_pipe(stderr));
                    written?;
                    let status = child.wait().await?;
                    Ok::<_, std::io::Error>((status, out?, err?))
                };

                tokio::select! {
                    result = io => Finished::Exited(result),
                    _ = tokio::time::sleep(invocation.timeout) => Finished::TimedOut,
                    _ = cancel.cancelled() => Finished::Cancelled,
                }
            };

            let (status, out, err) = match finished {
                Finished::Exited(result) => result.map_err(|e| AtomflowError::ScriptExecution {
                    script: script.clone(),
                    code: None,
                    stderr: e.to_string(),
                })?,
                Finished::TimedOut => {
                    warn!(script = %script, timeout_secs = invocation.timeout.as_secs(), "Script timed out, killing");
                    let _ = child.kill().await;
                    return Err(AtomflowError::ScriptTimeout {
                        script,
                        timeout_secs: invocation.timeout.as_secs(),
                    });
                }
                Finished::Cancelled => {
                    debug!(script = %script, "Run cancelled, killing script");
                    let _ = child.kill().await;
                    return Err(AtomflowError::Cancelled);
                }
            };

            let stderr_text = String::from_utf8_lossy(&err).to_string();
            if !stderr_text.is_empty() {
                debug!(script = %script, stderr = %stderr_text.trim_end(), "Script diagnostics");
            }

            if !status.success() {
                return Err(AtomflowError::ScriptExecution {
                    script,
                    code: status.code(),
                    stderr: truncate(stderr_text, MAX_STDERR),
                });
            }

            serde_json::from_slice(&out).map_err(|e| AtomflowError::ScriptOutput {
                script,
                message: e.to_string(),
            })
        })
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use atomflow_test_utils::write_script;
    use serde_json::json;
    use std::time::Duration;

    fn invocation(path: std::path::PathBuf, timeout_secs: u64) -> ScriptInvocation {
        ScriptInvocation {
            script: path,
            interpreter: None,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    #[tokio::test]
    async fn test_echo_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_script(dir.path(), "echo.sh", "cat");
        let runner = ProcessScriptRunner::new(2);

        let input = json!({
            "file_path": "/tmp/doc.pdf",
            "pages": [1, 2, 3],
            "nested": {"ok": true, "note": "ação"}
        });
        let output = runner
            .run(invocation(path, 5), input.clone(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output, input);
    }

    #[tokio::test]
    async fn test_string_input_is_not_wrapped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_script(dir.path(), "echo.sh", "cat");
        let runner = ProcessScriptRunner::new(1);
        let output = runner
            .run(invocation(path, 5), json!("plain text"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output, json!("plain text"));
    }

    #[tokio::test]
    async fn test_interpreter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("emit.sh");
        std::fs::write(&path, "echo '{\"via\": \"sh\"}'\n").unwrap();
        let runner = ProcessScriptRunner::new(1);
        let inv = ScriptInvocation {
            script: path,
            interpreter: Some("sh".into()),
            timeout: Duration::from_secs(5),
        };
        let output = runner
            .run(inv, json!({}), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output, json!({"via": "sh"}));
    }

    #[tokio::test]
    async fn test_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_script(
            dir.path(),
            "fail.sh",
            "echo '{\"ignored\": true}'\necho 'tesseract missing' >&2\nexit 3",
        );
        let runner = ProcessScriptRunner::new(1);
        let err = runner
            .run(invocation(path, 5), json!({}), CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            AtomflowError::ScriptExecution { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert!(stderr.contains("tesseract missing"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unparseable_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_script(dir.path(), "text.sh", "echo 'not json'");
        let runner = ProcessScriptRunner::new(1);
        let err = runner
            .run(invocation(path, 5), json!({}), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AtomflowError::ScriptOutput { .. }));
    }

    #[tokio::test]
    async fn test_script_ignoring_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_script(dir.path(), "const.sh", "echo '[1, 2]'");
        let runner = ProcessScriptRunner::new(1);
        let big = json!({"blob": "x".repeat(512 * 1024)});
        let output = runner
            .run(invocation(path, 5), big, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output, json!([1, 2]));
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("finished");
        let path = write_script(
            dir.path(),
            "slow.sh",
            &format!("sleep 3\ntouch {}\necho '{{}}'", marker.display()),
        );
        let runner = ProcessScriptRunner::new(1);
        let started = std::time::Instant::now();
        let err = runner
            .run(invocation(path, 1), json!({}), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AtomflowError::ScriptTimeout { timeout_secs: 1, .. }));
        assert!(started.elapsed() < Duration::from_secs(3));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!marker.exists());
        assert_eq!(runner.available(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_script(dir.path(), "slow.sh", "sleep 30\necho '{}'");
        let runner = ProcessScriptRunner::new(1);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let err = runner
            .run(invocation(path, 60), json!({}), cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AtomflowError::Cancelled));
    }

    #[tokio::test]
    async fn test_missing_script() {
        let runner = ProcessScriptRunner::new(1);
        let err = runner
            .run(
                invocation("/nonexistent/run_ocr.py".into(), 5),
                json!({}),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AtomflowError::ScriptExecution { code: None, .. }));
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let s = truncate("ééééé".to_string(), 3);
        assert!(s.starts_with('é'));
        assert!(s.ends_with("(truncated)"));
    }
}
