use super::messages::{Snapshot, StopFinished, SupervisorMessage};
use super::SupervisorConfig;
use crate::error::{self, SupervisorError};
use crate::launcher::{self, WorkerCommand};
use crate::process::ProcessControl;
use crate::registry::Registry;
use crate::shutdown::{self, Escalation};
use crate::status::StopOutcome;
use crate::store::DatasetStore;
use crate::types::{ConnectionParams, DatasetId, JobRecord, JobState};
use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};
use tokio::{
    select,
    sync::{mpsc, oneshot},
};

type StopResponder = oneshot::Sender<error::Result<StopOutcome>>;

/// Sole owner of the [`Registry`]. Messages are handled one at a time, so a
/// liveness check and the mutation that follows it can never interleave with
/// another request.
pub struct Supervisor {
    inbox: mpsc::Receiver<SupervisorMessage>,
    finished_tx: mpsc::UnboundedSender<StopFinished>,
    finished_rx: mpsc::UnboundedReceiver<StopFinished>,
    registry: Registry,
    /// Callers waiting on an in-flight stop, keyed by dataset.
    pending_stops: HashMap<DatasetId, Vec<StopResponder>>,
    store: DatasetStore,
    inference: WorkerCommand,
    working_dir: PathBuf,
    stop_grace: Duration,
    control: Arc<dyn ProcessControl>,
}

impl Supervisor {
    pub fn spawn(
        inbox: mpsc::Receiver<SupervisorMessage>,
        store: DatasetStore,
        config: SupervisorConfig,
        control: Arc<dyn ProcessControl>,
    ) {
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        let actor = Self {
            inbox,
            finished_tx,
            finished_rx,
            registry: Registry::new(),
            pending_stops: HashMap::new(),
            store,
            inference: config.inference_command,
            working_dir: config.working_dir,
            stop_grace: config.stop_grace,
            control,
        };
        tokio::spawn(async move { actor.run().await });
    }

    async fn run(mut self) {
        use self::SupervisorMessage::*;
        loop {
            select! {
                maybe_msg = self.inbox.recv() => {
                    let Some(msg) = maybe_msg else {
                        // every handle dropped
                        tracing::debug!(tracked = self.registry.len(), "supervisor exiting");
                        return;
                    };
                    match msg {
                        Start { dataset_id, params, response } => {
                            let result = self.start(dataset_id, params).await;
                            let _ = response.send(result);
                        }
                        Stop { dataset_id, response } => self.stop(dataset_id, response),
                        GetStatus { dataset_id, response } => {
                            let _ = response.send(self.status(&dataset_id));
                        }
                        List { response } => {
                            let _ = response.send(self.list());
                        }
                    }
                }
                Some(finished) = self.finished_rx.recv() => self.finish_stop(finished),
            }
        }
    }

    async fn start(
        &mut self,
        dataset_id: DatasetId,
        params: ConnectionParams,
    ) -> error::Result<JobRecord> {
        if let Some(record) = self.registry.get(&dataset_id) {
            if record.state == JobState::Stopping || self.control.is_alive(record.pid) {
                return Err(SupervisorError::AlreadyRunning { pid: record.pid });
            }
            tracing::info!(%dataset_id, pid = record.pid, "reaping exited worker");
            self.registry.remove(&dataset_id);
        }

        let bundle_path = self.store.locate_bundle(&dataset_id).await?;
        if !tokio::fs::try_exists(&bundle_path).await.unwrap_or(false) {
            return Err(SupervisorError::ArtifactMissing {
                expected_path: bundle_path,
            });
        }
        let log_path = self.store.log_path(&dataset_id)?;

        let command = self.inference.with_args(params.worker_args(&bundle_path));
        let handle = launcher::launch(&command, &self.working_dir, &log_path).map_err(|err| {
            tracing::error!(%dataset_id, error = %err, "inference launch failed");
            err
        })?;

        let record = JobRecord::new(dataset_id, handle, bundle_path, log_path);
        tracing::info!(
            dataset_id = %record.dataset_id,
            pid = record.pid,
            room = %params.room_name,
            "inference started"
        );
        self.registry.put(record.clone());
        Ok(record)
    }

    fn stop(&mut self, dataset_id: DatasetId, response: StopResponder) {
        let Some(record) = self.registry.get_mut(&dataset_id) else {
            let _ = response.send(Err(SupervisorError::NotRunning));
            return;
        };

        if record.state == JobState::Stopping {
            // piggyback on the escalation already under way
            self.pending_stops.entry(dataset_id).or_default().push(response);
            return;
        }

        if !self.control.is_alive(record.pid) {
            tracing::info!(%dataset_id, pid = record.pid, "worker already exited");
            self.registry.remove(&dataset_id);
            let _ = response.send(Ok(StopOutcome::AlreadyStopped));
            return;
        }

        record.state = JobState::Stopping;
        let handle = record.handle();
        tracing::info!(%dataset_id, pid = handle.pid, "stopping inference");
        self.pending_stops.insert(dataset_id.clone(), vec![response]);

        let control = Arc::clone(&self.control);
        let finished_tx = self.finished_tx.clone();
        let grace = self.stop_grace;
        tokio::spawn(async move {
            let escalation = shutdown::terminate_group(control.as_ref(), handle, grace).await;
            let _ = finished_tx.send(StopFinished {
                dataset_id,
                escalation,
            });
        });
    }

    /// The record goes whichever way the escalation ended; a survivor of the
    /// forced kill is no longer tracked.
    fn finish_stop(&mut self, finished: StopFinished) {
        let StopFinished {
            dataset_id,
            escalation,
        } = finished;
        self.registry.remove(&dataset_id);
        let outcome = StopOutcome::Stopped {
            forced: escalation != Escalation::Graceful,
        };
        tracing::info!(%dataset_id, ?escalation, "inference stopped");
        for responder in self.pending_stops.remove(&dataset_id).unwrap_or_default() {
            let _ = responder.send(Ok(outcome));
        }
    }

    fn status(&mut self, dataset_id: &str) -> Snapshot {
        let Some(record) = self.registry.get(dataset_id) else {
            return Snapshot::NotRunning;
        };
        if record.state == JobState::Stopping {
            return Snapshot::Stopping(record.clone());
        }
        if self.control.is_alive(record.pid) {
            return Snapshot::Running(record.clone());
        }
        tracing::info!(dataset_id, pid = record.pid, "reaping exited worker");
        self.registry.remove(dataset_id);
        Snapshot::Reaped
    }

    /// Live records only; dead ones are reaped on the way. Records being
    /// stopped are left for their stop to remove.
    fn list(&mut self) -> Vec<JobRecord> {
        let (alive, dead): (Vec<JobRecord>, Vec<JobRecord>) = self
            .registry
            .list_all()
            .into_iter()
            .partition(|record| {
                record.state == JobState::Stopping || self.control.is_alive(record.pid)
            });
        for record in dead {
            tracing::info!(
                dataset_id = %record.dataset_id,
                pid = record.pid,
                "reaping exited worker"
            );
            self.registry.remove(&record.dataset_id);
        }
        alive
    }
}
