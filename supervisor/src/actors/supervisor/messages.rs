use crate::error;
use crate::shutdown::Escalation;
use crate::status::StopOutcome;
use crate::types::{ConnectionParams, DatasetId, JobRecord};
use tokio::sync::oneshot;

#[derive(Debug)]
pub enum SupervisorMessage {
    Start {
        dataset_id: DatasetId,
        params: ConnectionParams,
        response: oneshot::Sender<error::Result<JobRecord>>,
    },
    Stop {
        dataset_id: DatasetId,
        response: oneshot::Sender<error::Result<StopOutcome>>,
    },
    GetStatus {
        dataset_id: DatasetId,
        response: oneshot::Sender<Snapshot>,
    },
    List {
        response: oneshot::Sender<Vec<JobRecord>>,
    },
}

/// Registry view of one dataset after its liveness was re-checked.
#[derive(Debug)]
pub enum Snapshot {
    NotRunning,
    /// The record pointed at a dead process and has just been removed.
    Reaped,
    Stopping(JobRecord),
    Running(JobRecord),
}

/// Sent back to the actor by the task that ran a shutdown escalation.
#[derive(Debug)]
pub struct StopFinished {
    pub dataset_id: DatasetId,
    pub escalation: Escalation,
}
