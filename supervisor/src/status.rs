use crate::reporter::ResourceUsage;
use crate::types::JobRecord;

/// Answer to a status query for one dataset.
#[derive(Clone, Debug, PartialEq)]
pub enum InferenceStatus {
    /// No worker is tracked for the dataset.
    NotRunning,
    /// A worker was tracked but had exited; the record was reaped by this query.
    Stopped,
    /// A stop request is escalating shutdown of the worker.
    Stopping(JobRecord),
    Running {
        record: JobRecord,
        usage: ResourceUsage,
    },
}

impl InferenceStatus {
    pub fn label(&self) -> &'static str {
        match self {
            InferenceStatus::NotRunning => "not_running",
            InferenceStatus::Stopped => "stopped",
            InferenceStatus::Stopping(_) => "stopping",
            InferenceStatus::Running { .. } => "running",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    /// The worker was signalled and its record removed. `forced` is set when
    /// the graceful signal was not enough.
    Stopped { forced: bool },
    /// The worker had already exited; only the stale record was removed.
    AlreadyStopped,
}
