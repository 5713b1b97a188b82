use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio_util::sync::CancellationToken;

use super::{ProviderRegistry, StageInvoker, StageRequest, StageResponse};
use crate::artifacts::files_modified_since;
use crate::errors::StageFailure;

/// Runs stages as provider CLI processes in the working directory.
///
/// The prompt is written to stdin. A non-zero exit is logged but is not a
/// failure by itself; the orchestrator judges the call by the artifacts it left.
pub struct ProcessInvoker {
    registry: ProviderRegistry,
    cancel_grace: Duration,
}

enum Waited {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

impl ProcessInvoker {
    pub fn new(registry: ProviderRegistry, cancel_grace: Duration) -> Self {
        Self {
            registry,
            cancel_grace,
        }
    }

    /// Kill the child and give it `cancel_grace` to exit.
    async fn terminate(&self, child: &mut Child, program: &str) {
        if let Err(e) = child.start_kill() {
            tracing::debug!(program, error = %e, "kill signal not delivered");
        }
        match tokio::time::timeout(self.cancel_grace, child.wait()).await {
            Ok(_) => tracing::debug!(program, "process exited after kill"),
            Err(_) => tracing::warn!(
                program,
                grace_secs = self.cancel_grace.as_secs(),
                "process did not exit within grace period; force-terminated"
            ),
        }
    }
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let Some(mut reader) = reader else {
        return String::new();
    };
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        tracing::debug!(error = %e, "failed to read process output");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Write the prompt and close stdin. A child that exits or stops reading
/// early breaks the pipe; its exit status tells the rest.
async fn write_prompt(mut stdin: ChildStdin, input: String) {
    if let Err(e) = stdin.write_all(input.as_bytes()).await {
        tracing::debug!(error = %e, "prompt not fully written to stdin");
        return;
    }
    if let Err(e) = stdin.shutdown().await {
        tracing::debug!(error = %e, "failed to close stdin");
    }
}

fn launch_failure(program: &str, e: std::io::Error) -> StageFailure {
    StageFailure::Launch {
        program: program.to_string(),
        message: e.to_string(),
    }
}

#[async_trait]
impl StageInvoker for ProcessInvoker {
    async fn invoke(
        &self,
        request: &StageRequest,
        cancel: &CancellationToken,
    ) -> Result<StageResponse, StageFailure> {
        let provider = self.registry.resolve(&request.provider.provider)?;
        provider.validate_availability()?;
        ensure_working_dir(&request.working_dir)?;

        let command = provider.build_request(&request.prompt, request.provider.model.as_deref());
        let program = command.program.clone();
        let started = SystemTime::now();

        tracing::info!(
            stage = %request.stage,
            provider = %request.provider,
            timeout_secs = request.timeout.as_secs(),
            prompt_chars = request.prompt.len(),
            "launching stage process"
        );

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .current_dir(&request.working_dir)
            .stdin(if command.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => StageFailure::environment(
                    format!("'{}' could not be started", program),
                    "check that the provider CLI is installed and on PATH",
                ),
                _ => launch_failure(&program, e),
            })?;

        let stdout = tokio::spawn(read_all(child.stdout.take()));
        let stderr = tokio::spawn(read_all(child.stderr.take()));
        // The write must never hold up the timeout or cancel arms below
        let writer = match (command.stdin, child.stdin.take()) {
            (Some(input), Some(stdin)) => Some(tokio::spawn(write_prompt(stdin, input))),
            _ => None,
        };

        let waited = tokio::select! {
            status = child.wait() => Waited::Exited(status),
            _ = tokio::time::sleep(request.timeout) => Waited::TimedOut,
            _ = cancel.cancelled() => Waited::Cancelled,
        };

        if let Some(writer) = &writer {
            writer.abort();
        }

        let status = match waited {
            Waited::Exited(status) => status.map_err(|e| launch_failure(&program, e))?,
            Waited::TimedOut => {
                tracing::warn!(stage = %request.stage, "stage timed out");
                self.terminate(&mut child, &program).await;
                return Err(StageFailure::Timeout(request.timeout));
            }
            Waited::Cancelled => {
                tracing::info!(stage = %request.stage, "stage cancelled in flight");
                self.terminate(&mut child, &program).await;
                return Err(StageFailure::Cancelled);
            }
        };

        let output = stdout.await.unwrap_or_default();
        let errors = stderr.await.unwrap_or_default();

        if !status.success() {
            tracing::warn!(
                stage = %request.stage,
                exit_code = ?status.code(),
                stderr = %errors.trim(),
                "stage process exited with non-zero status"
            );
        }

        Ok(StageResponse {
            output,
            files_written: files_modified_since(&request.working_dir, started),
            exit_code: status.code(),
        })
    }
}

fn ensure_working_dir(dir: &Path) -> Result<(), StageFailure> {
    if dir.is_dir() {
        Ok(())
    } else {
        Err(StageFailure::environment(
            format!("working directory {} is not usable", dir.display()),
            "create the directory or run from an existing project",
        ))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::errors::FailureClass;
    use crate::stage::{Provider, ProviderCommand, ProviderSelection, StageId};
    use std::sync::Arc;
    use tempfile::tempdir;

    /// Runs the prompt as a shell script.
    struct ShellProvider;

    impl Provider for ShellProvider {
        fn id(&self) -> &str {
            "sh"
        }

        fn build_request(&self, prompt: &str, _model: Option<&str>) -> ProviderCommand {
            ProviderCommand {
                program: "sh".into(),
                args: vec!["-c".into(), prompt.into()],
                stdin: None,
            }
        }

        fn validate_availability(&self) -> Result<(), StageFailure> {
            Ok(())
        }
    }

    /// Pipes the prompt to a child that never reads stdin.
    struct DeafProvider;

    impl Provider for DeafProvider {
        fn id(&self) -> &str {
            "deaf"
        }

        fn build_request(&self, prompt: &str, _model: Option<&str>) -> ProviderCommand {
            ProviderCommand {
                program: "sh".into(),
                args: vec!["-c".into(), "sleep 20".into()],
                stdin: Some(prompt.into()),
            }
        }

        fn validate_availability(&self) -> Result<(), StageFailure> {
            Ok(())
        }
    }

    fn invoker() -> ProcessInvoker {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(ShellProvider));
        registry.register(Arc::new(DeafProvider));
        ProcessInvoker::new(registry, Duration::from_millis(500))
    }

    fn unread_prompt(dir: &Path, timeout: Duration) -> StageRequest {
        StageRequest {
            provider: ProviderSelection::new("deaf", ""),
            // Far larger than a pipe buffer
            ..request(dir, &"x".repeat(1 << 20), timeout)
        }
    }

    fn request(dir: &Path, script: &str, timeout: Duration) -> StageRequest {
        StageRequest {
            stage: StageId::Execution,
            prompt: script.to_string(),
            provider: ProviderSelection::new("sh", ""),
            timeout,
            working_dir: dir.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn captures_output_and_written_files() {
        let dir = tempdir().unwrap();
        let req = request(
            dir.path(),
            "echo hello; echo body > notes.md",
            Duration::from_secs(10),
        );
        let resp = invoker().invoke(&req, &CancellationToken::new()).await.unwrap();
        assert_eq!(resp.output.trim(), "hello");
        assert_eq!(resp.exit_code, Some(0));
        assert!(resp.files_written.iter().any(|p| p.ends_with("notes.md")));
    }

    #[tokio::test]
    async fn non_zero_exit_is_not_a_failure() {
        let dir = tempdir().unwrap();
        let req = request(dir.path(), "exit 3", Duration::from_secs(10));
        let resp = invoker().invoke(&req, &CancellationToken::new()).await.unwrap();
        assert_eq!(resp.exit_code, Some(3));
    }

    #[tokio::test]
    async fn timeout_is_transient() {
        let dir = tempdir().unwrap();
        let req = request(dir.path(), "sleep 5", Duration::from_millis(100));
        let err = invoker().invoke(&req, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.class(), FailureClass::Transient);
    }

    #[tokio::test]
    async fn cancellation_kills_the_process() {
        let dir = tempdir().unwrap();
        let req = request(dir.path(), "sleep 5", Duration::from_secs(30));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let err = invoker().invoke(&req, &cancel).await.unwrap_err();
        assert_eq!(err, StageFailure::Cancelled);
    }

    #[tokio::test]
    async fn unread_stdin_still_times_out() {
        let dir = tempdir().unwrap();
        let req = unread_prompt(dir.path(), Duration::from_millis(200));
        let err = tokio::time::timeout(
            Duration::from_secs(5),
            invoker().invoke(&req, &CancellationToken::new()),
        )
        .await
        .expect("invoke stuck writing stdin")
        .unwrap_err();
        assert_eq!(err, StageFailure::Timeout(Duration::from_millis(200)));
        assert_eq!(err.class(), FailureClass::Transient);
    }

    #[tokio::test]
    async fn unread_stdin_still_cancels() {
        let dir = tempdir().unwrap();
        let req = unread_prompt(dir.path(), Duration::from_secs(30));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });
        let err = tokio::time::timeout(Duration::from_secs(5), invoker().invoke(&req, &cancel))
            .await
            .expect("invoke stuck writing stdin")
            .unwrap_err();
        assert_eq!(err, StageFailure::Cancelled);
    }

    #[tokio::test]
    async fn missing_working_dir_is_environment_failure() {
        let dir = tempdir().unwrap();
        let req = request(&dir.path().join("gone"), "true", Duration::from_secs(5));
        let err = invoker().invoke(&req, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.class(), FailureClass::Environment);
    }
}
