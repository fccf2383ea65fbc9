use crate::error::{Result, SupervisorError};
use crate::types::{Pid, ProcessHandle};
use std::{
    fs::File,
    io,
    os::unix::process::ExitStatusExt,
    path::Path,
    process::Stdio,
    str::FromStr,
};
use tokio::process::{self, Child};

/// A program plus the leading arguments every invocation shares. Per-job
/// flags are appended with [`WorkerCommand::with_args`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn with_args(&self, extra: impl IntoIterator<Item = String>) -> Self {
        let mut args = self.args.clone();
        args.extend(extra);
        Self {
            program: self.program.clone(),
            args,
        }
    }

    pub(crate) fn to_command(&self, working_dir: &Path) -> process::Command {
        let mut command = process::Command::new(&self.program);
        command.args(&self.args).current_dir(working_dir);
        command
    }

    pub(crate) fn launch_error(&self, source: io::Error) -> SupervisorError {
        SupervisorError::Launch {
            program: self.program.clone(),
            source,
        }
    }
}

/// Whitespace separated, first word is the program. No shell quoting.
impl FromStr for WorkerCommand {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut words = s.split_whitespace().map(str::to_string);
        let program = words
            .next()
            .ok_or_else(|| "worker command must not be empty".to_string())?;
        Ok(Self::new(program, words.collect()))
    }
}

/// Start `command` detached, as the leader of a new process group, with
/// stdout and stderr both written to `log_path`.
///
/// Returns as soon as the process exists. Only failures to spawn are reported;
/// anything the worker does after that shows up in its log or in liveness
/// checks. Failure to open the log is not fatal, the output is discarded.
pub fn launch(
    command: &WorkerCommand,
    working_dir: &Path,
    log_path: &Path,
) -> Result<ProcessHandle> {
    let (stdout, stderr) = open_log_sink(log_path);
    let child = command
        .to_command(working_dir)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .process_group(0)
        .spawn()
        .map_err(|err| command.launch_error(err))?;

    let pid = child.id().ok_or_else(|| {
        command.launch_error(io::Error::new(
            io::ErrorKind::Other,
            "process exited before its pid was read",
        ))
    })?;
    tracing::info!(pid, program = %command.program, "worker launched");

    tokio::spawn(reap(child, pid));
    Ok(ProcessHandle { pid, pgid: pid })
}

fn open_log_sink(log_path: &Path) -> (Stdio, Stdio) {
    let sink = File::create(log_path).and_then(|out| {
        let err = out.try_clone()?;
        Ok((out, err))
    });
    match sink {
        Ok((out, err)) => (Stdio::from(out), Stdio::from(err)),
        Err(err) => {
            tracing::warn!(
                path = %log_path.display(),
                error = %err,
                "worker output will be discarded"
            );
            (Stdio::null(), Stdio::null())
        }
    }
}

/// Wait on the child so it never lingers as a zombie once it exits.
async fn reap(mut child: Child, pid: Pid) {
    match child.wait().await {
        Ok(status) => {
            if let Some(code) = status.code() {
                tracing::info!(pid, code, "worker exited");
            } else if let Some(signal) = status.signal() {
                tracing::info!(pid, signal, "worker killed by signal");
            }
        }
        Err(err) => tracing::warn!(pid, error = %err, "failed to wait on worker"),
    }
}
