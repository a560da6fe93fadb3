//! Pipeline command builder and runner.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use vproc_models::Resolution;

use crate::error::{PipelineError, PipelineResult};

/// One pipeline invocation: program plus the three positional arguments.
#[derive(Debug, Clone)]
pub struct PipelineCommand {
    program: PathBuf,
    owner_id: u64,
    project_name: String,
    resolution: Resolution,
}

impl PipelineCommand {
    /// Create a new pipeline command.
    pub fn new(
        program: impl AsRef<Path>,
        owner_id: u64,
        project_name: impl Into<String>,
        resolution: Resolution,
    ) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            owner_id,
            project_name: project_name.into(),
            resolution,
        }
    }

    /// Build the positional argument list.
    pub fn build_args(&self) -> Vec<String> {
        vec![
            self.owner_id.to_string(),
            self.project_name.clone(),
            self.resolution.as_str().to_string(),
        ]
    }
}

/// Captured output of a finished pipeline process.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Exit code; `None` when killed by a signal
    pub exit_code: Option<i32>,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

impl PipelineOutput {
    /// Stdout and stderr joined for marker scanning.
    pub fn combined(&self) -> String {
        let mut combined = String::with_capacity(self.stdout.len() + self.stderr.len() + 1);
        combined.push_str(&self.stdout);
        if !self.stderr.is_empty() {
            combined.push('\n');
            combined.push_str(&self.stderr);
        }
        combined
    }
}

/// Runner that invokes the pipeline synchronously with a hard timeout.
///
/// There is no mid-flight cancellation: a run either finishes or is killed
/// at the timeout, and a timeout is reported like any other execution
/// failure.
#[derive(Debug, Clone)]
pub struct PipelineRunner {
    timeout: Duration,
}

impl PipelineRunner {
    /// Create a runner with the given hard timeout.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run the pipeline to completion, capturing stdout/stderr.
    pub async fn run(&self, cmd: &PipelineCommand) -> PipelineResult<PipelineOutput> {
        let args = cmd.build_args();
        debug!(
            "Running pipeline: {} {}",
            cmd.program.display(),
            args.join(" ")
        );

        let mut child = Command::new(&cmd.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child.stdout.take().expect("stdout not captured");
        let stderr = child.stderr.take().expect("stderr not captured");
        let stdout_task = tokio::spawn(slurp(stdout));
        let stderr_task = tokio::spawn(slurp(stderr));

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                let secs = self.timeout.as_secs();
                warn!("Pipeline timed out after {} seconds, killing process", secs);
                let _ = child.kill().await;
                return Err(PipelineError::Timeout(secs));
            }
        };

        let stdout = match stdout_task.await {
            Ok(read) => read?,
            Err(_) => String::new(),
        };
        let stderr = match stderr_task.await {
            Ok(read) => read?,
            Err(_) => String::new(),
        };

        Ok(PipelineOutput {
            exit_code: status.code(),
            stdout,
            stderr,
        })
    }
}

async fn slurp<R: AsyncRead + Unpin>(reader: R) -> std::io::Result<String> {
    let mut buf = String::new();
    BufReader::new(reader).read_to_string(&mut buf).await?;
    Ok(buf)
}

/// Resolve the pipeline program on PATH.
pub fn check_pipeline(program: &str) -> PipelineResult<PathBuf> {
    which::which(program).map_err(|_| PipelineError::BinaryNotFound(program.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_args() {
        let cmd = PipelineCommand::new("/opt/pipeline/segment", 5, "trip", Resolution::Hd720);
        assert_eq!(cmd.build_args(), vec!["5", "trip", "1280x720"]);
    }

    #[tokio::test]
    async fn test_run_captures_output() {
        let cmd = PipelineCommand::new("/bin/echo", 5, "trip", Resolution::Original);
        let runner = PipelineRunner::new(Duration::from_secs(5));

        let output = runner.run(&cmd).await.unwrap();
        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.stdout.trim(), "5 trip original");
        assert!(output.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_run_kills_on_timeout() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let script = tmp.path().join("slow.sh");
        std::fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let cmd = PipelineCommand::new(&script, 5, "trip", Resolution::Original);
        let runner = PipelineRunner::new(Duration::from_millis(50));

        let err = runner.run(&cmd).await.unwrap_err();
        assert!(matches!(err, PipelineError::Timeout(_)));
    }
}
