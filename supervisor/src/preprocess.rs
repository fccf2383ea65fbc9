//! Runs the offline preprocessing worker for a freshly uploaded dataset.

use crate::error::{Result, SupervisorError};
use crate::launcher::WorkerCommand;
use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Clone, Debug)]
pub struct Preprocessor {
    command: WorkerCommand,
    working_dir: PathBuf,
    timeout: Duration,
}

impl Preprocessor {
    pub fn new(command: WorkerCommand, working_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            command,
            working_dir: working_dir.into(),
            timeout,
        }
    }

    fn command_for(
        &self,
        reference_dir: &Path,
        output_dir: &Path,
        text_prompt: &str,
    ) -> WorkerCommand {
        self.command.with_args(vec![
            "--mode".into(),
            "both".into(),
            "--ref_images_dir".into(),
            reference_dir.display().to_string(),
            "--output_dir".into(),
            output_dir.display().to_string(),
            "--use_grounding_dino".into(),
            "--text_prompt".into(),
            text_prompt.to_string(),
        ])
    }

    /// Run preprocessing to completion. On success the worker has written the
    /// bundle artifact under `output_dir`; its exit code and stderr are the
    /// only signals looked at.
    pub async fn run(
        &self,
        reference_dir: &Path,
        output_dir: &Path,
        text_prompt: &str,
    ) -> Result<()> {
        let command = self.command_for(reference_dir, output_dir, text_prompt);
        let child = command
            .to_command(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // dropping the wait future on timeout takes the worker down with it
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| command.launch_error(err))?;

        tracing::info!(output_dir = %output_dir.display(), "preprocessing started");
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                tracing::error!(
                    output_dir = %output_dir.display(),
                    timeout_secs = self.timeout.as_secs(),
                    "preprocessing timed out"
                );
                return Err(SupervisorError::PreprocessTimeout {
                    timeout: self.timeout,
                });
            }
        };

        if output.status.success() {
            tracing::info!(output_dir = %output_dir.display(), "preprocessing completed");
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = match stderr.trim() {
            "" => "Unknown error".to_string(),
            trimmed => trimmed.to_string(),
        };
        tracing::error!(code = ?output.status.code(), stderr = %message, "preprocessing failed");
        Err(SupervisorError::PreprocessFailed(message))
    }
}
