mod actor;
mod messages;

use self::{
    actor::Supervisor,
    messages::{
        Snapshot,
        SupervisorMessage::{self, GetStatus, List, Start, Stop},
    },
};
use crate::error::{self, SupervisorError};
use crate::launcher::WorkerCommand;
use crate::process::{ProcessControl, SystemProcesses};
use crate::status::{InferenceStatus, StopOutcome};
use crate::store::DatasetStore;
use crate::types::{ConnectionParams, DatasetId, JobRecord};
use futures::future::join_all;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::{mpsc, oneshot};

pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(2);
pub const DEFAULT_MESSAGE_CAPACITY: usize = 64;

#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Inference worker; the bundle and connection flags are appended per job.
    pub inference_command: WorkerCommand,
    /// Working directory the worker is started in.
    pub working_dir: PathBuf,
    /// How long a worker gets to honour the graceful signal.
    pub stop_grace: Duration,
    /// Bound on queued requests to the supervisor.
    pub message_capacity: usize,
}

impl SupervisorConfig {
    pub fn new(inference_command: WorkerCommand, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            inference_command,
            working_dir: working_dir.into(),
            stop_grace: DEFAULT_STOP_GRACE,
            message_capacity: DEFAULT_MESSAGE_CAPACITY,
        }
    }
}

/// Starts, stops and monitors one inference worker per dataset.
///
/// This struct is an actor handle: the registry of launched workers lives in
/// the task spawned by [`SupervisorHandle::spawn`], which handles requests one
/// at a time. Two concurrent starts for the same dataset are therefore
/// decided in order, and only the first can launch. Handles are cheap to
/// clone and share across request handlers.
///
/// Liveness is re-checked against the OS on every request and records of
/// exited workers are dropped as they are found. There is no background
/// sweep.
#[derive(Clone)]
pub struct SupervisorHandle {
    sender: mpsc::Sender<SupervisorMessage>,
    control: Arc<dyn ProcessControl>,
}

impl SupervisorHandle {
    /// Spawn a supervisor backed by the real OS process facilities.
    pub fn spawn(store: DatasetStore, config: SupervisorConfig) -> Self {
        Self::spawn_with(store, config, Arc::new(SystemProcesses))
    }

    pub fn spawn_with(
        store: DatasetStore,
        config: SupervisorConfig,
        control: Arc<dyn ProcessControl>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.message_capacity);
        Supervisor::spawn(receiver, store, config, Arc::clone(&control));
        Self { sender, control }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SupervisorMessage,
    ) -> error::Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| SupervisorError::Shutdown)?;
        rx.await.map_err(|_| SupervisorError::Shutdown)
    }

    /// Launch the inference worker for a preprocessed dataset.
    ///
    /// Fails with `AlreadyRunning` while a live worker is tracked for the
    /// dataset and with `ArtifactMissing` when preprocessing has not produced
    /// a bundle.
    pub async fn start(
        &self,
        dataset_id: impl Into<DatasetId>,
        params: ConnectionParams,
    ) -> error::Result<JobRecord> {
        let dataset_id = dataset_id.into();
        self.request(|response| Start {
            dataset_id,
            params,
            response,
        })
        .await?
    }

    /// Stop the worker: graceful signal to its group, bounded wait, then a
    /// forced kill. The record is gone once this returns.
    pub async fn stop(&self, dataset_id: impl Into<DatasetId>) -> error::Result<StopOutcome> {
        let dataset_id = dataset_id.into();
        self.request(|response| Stop {
            dataset_id,
            response,
        })
        .await?
    }

    pub async fn status(&self, dataset_id: impl Into<DatasetId>) -> error::Result<InferenceStatus> {
        let dataset_id = dataset_id.into();
        let snapshot = self
            .request(|response| GetStatus {
                dataset_id,
                response,
            })
            .await?;
        Ok(match snapshot {
            Snapshot::NotRunning => InferenceStatus::NotRunning,
            Snapshot::Reaped => InferenceStatus::Stopped,
            Snapshot::Stopping(record) => InferenceStatus::Stopping(record),
            Snapshot::Running(record) => {
                // sampling blocks for a while; keep it off the actor
                let control = Arc::clone(&self.control);
                let pid = record.pid;
                let usage = tokio::task::spawn_blocking(move || control.resource_usage(pid))
                    .await
                    .ok()
                    .flatten()
                    .unwrap_or_default();
                InferenceStatus::Running { record, usage }
            }
        })
    }

    /// Every worker still alive right now.
    pub async fn list(&self) -> error::Result<Vec<JobRecord>> {
        self.request(|response| List { response }).await
    }

    /// Stop every tracked worker concurrently.
    pub async fn stop_all(
        &self,
    ) -> error::Result<Vec<(DatasetId, error::Result<StopOutcome>)>> {
        let running = self.list().await?;
        let stops = running.into_iter().map(|record| async move {
            let outcome = self.stop(record.dataset_id.clone()).await;
            (record.dataset_id, outcome)
        });
        Ok(join_all(stops).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::Signal;
    use crate::reporter::ResourceUsage;
    use crate::store::{NewImage, BUNDLE_FILE};
    use crate::types::{ImageBlob, Pid};
    use crate::ErrorKind;
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    const GRACE: Duration = Duration::from_millis(300);

    struct Fixture {
        _dir: tempfile::TempDir,
        store: DatasetStore,
        supervisor: SupervisorHandle,
    }

    fn sh(script: &str) -> WorkerCommand {
        WorkerCommand::new("sh", vec!["-c".into(), script.into(), "inference".into()])
    }

    async fn fixture(worker: WorkerCommand) -> Fixture {
        fixture_with(worker, Arc::new(SystemProcesses)).await
    }

    async fn fixture_with(worker: WorkerCommand, control: Arc<dyn ProcessControl>) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DatasetStore::open(dir.path().join("data")).await.expect("store");
        let mut config = SupervisorConfig::new(worker, dir.path());
        config.stop_grace = GRACE;
        let supervisor = SupervisorHandle::spawn_with(store.clone(), config, control);
        Fixture {
            _dir: dir,
            store,
            supervisor,
        }
    }

    async fn dataset(store: &DatasetStore, with_bundle: bool) -> DatasetId {
        let image = NewImage {
            index: 0,
            data: ImageBlob::from_static(b"jpeg"),
        };
        let metadata = store.create("mug", vec![image]).await.expect("dataset");
        if with_bundle {
            let bundle = store.dataset_dir(&metadata.id).unwrap().join(BUNDLE_FILE);
            tokio::fs::write(bundle, b"bundle").await.expect("bundle");
        }
        metadata.id
    }

    /// Reports whatever liveness it is told to and records signals without
    /// delivering them.
    #[derive(Default)]
    struct RecordingControl {
        dead: AtomicBool,
        signals: Mutex<Vec<(Pid, Signal)>>,
    }

    impl RecordingControl {
        fn sent(&self) -> Vec<Signal> {
            self.signals
                .lock()
                .unwrap()
                .iter()
                .map(|(_, signal)| *signal)
                .collect()
        }
    }

    impl ProcessControl for RecordingControl {
        fn is_alive(&self, _pid: Pid) -> bool {
            !self.dead.load(Ordering::SeqCst)
        }

        fn signal_group(&self, pgid: Pid, signal: Signal) -> io::Result<()> {
            self.signals.lock().unwrap().push((pgid, signal));
            Ok(())
        }

        fn is_group_alive(&self, _pgid: Pid) -> bool {
            !self.dead.load(Ordering::SeqCst)
        }

        fn resource_usage(&self, _pid: Pid) -> Option<ResourceUsage> {
            None
        }
    }

    fn kill_for_real(record: &JobRecord) {
        SystemProcesses
            .signal_group(record.pgid, Signal::Forced)
            .expect("kill worker group");
    }

    async fn wait_until_dead(pid: u32) {
        for _ in 0..100 {
            if !SystemProcesses.is_alive(pid) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("process {pid} did not exit");
    }

    #[tokio::test]
    async fn concurrent_starts_launch_once() {
        let f = fixture(sh("exec sleep 30")).await;
        let id = dataset(&f.store, true).await;

        let (a, b) = tokio::join!(
            f.supervisor.start(id.clone(), ConnectionParams::default()),
            f.supervisor.start(id.clone(), ConnectionParams::default()),
        );
        let (record, conflict) = match (a, b) {
            (Ok(record), Err(err)) | (Err(err), Ok(record)) => (record, err),
            other => panic!("expected exactly one launch, got {other:?}"),
        };
        match conflict {
            SupervisorError::AlreadyRunning { pid } => assert_eq!(pid, record.pid),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(f.supervisor.list().await.unwrap().len(), 1);
        f.supervisor.stop(id).await.expect("stop");
    }

    #[tokio::test]
    async fn stop_then_status_is_not_running_even_when_sigint_is_ignored() {
        // the trap is inherited by sleep, so only SIGKILL ends the group
        let f = fixture(sh("trap '' INT; sleep 30")).await;
        let id = dataset(&f.store, true).await;
        let record = f
            .supervisor
            .start(id.clone(), ConnectionParams::default())
            .await
            .expect("start");

        let outcome = f.supervisor.stop(id.clone()).await.expect("stop");
        assert_eq!(outcome, StopOutcome::Stopped { forced: true });
        assert_eq!(f.supervisor.status(id).await.unwrap(), InferenceStatus::NotRunning);
        wait_until_dead(record.pid).await;
    }

    #[tokio::test]
    async fn graceful_stop_is_not_forced() {
        let f = fixture(sh("exec sleep 30")).await;
        let id = dataset(&f.store, true).await;
        f.supervisor
            .start(id.clone(), ConnectionParams::default())
            .await
            .expect("start");
        let outcome = f.supervisor.stop(id).await.expect("stop");
        assert_eq!(outcome, StopOutcome::Stopped { forced: false });
    }

    #[tokio::test]
    async fn missing_bundle_launches_nothing() {
        let f = fixture(sh("exec sleep 30")).await;
        let id = dataset(&f.store, false).await;

        let err = f
            .supervisor
            .start(id.clone(), ConnectionParams::default())
            .await
            .unwrap_err();
        match err {
            SupervisorError::ArtifactMissing { expected_path } => {
                assert!(expected_path.ends_with(BUNDLE_FILE))
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(f.supervisor.list().await.unwrap().is_empty());
        assert_eq!(f.supervisor.status(id).await.unwrap(), InferenceStatus::NotRunning);
    }

    #[tokio::test]
    async fn unknown_dataset_is_not_found() {
        let f = fixture(sh("exec sleep 30")).await;
        let err = f
            .supervisor
            .start("dataset_0", ConnectionParams::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn launch_failure_is_surfaced_and_not_recorded() {
        let f = fixture(WorkerCommand::new("/nonexistent/inference", vec![])).await;
        let id = dataset(&f.store, true).await;
        let err = f
            .supervisor
            .start(id, ConnectionParams::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LaunchError);
        assert!(f.supervisor.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn worker_dying_out_of_band_is_reaped_and_restartable() {
        let f = fixture(sh("exec sleep 30")).await;
        let id = dataset(&f.store, true).await;
        let record = f
            .supervisor
            .start(id.clone(), ConnectionParams::default())
            .await
            .expect("start");

        SystemProcesses
            .signal_group(record.pgid, Signal::Forced)
            .expect("kill out of band");
        wait_until_dead(record.pid).await;

        assert_eq!(f.supervisor.status(id.clone()).await.unwrap(), InferenceStatus::Stopped);
        assert_eq!(f.supervisor.status(id.clone()).await.unwrap(), InferenceStatus::NotRunning);

        let restarted = f
            .supervisor
            .start(id.clone(), ConnectionParams::default())
            .await
            .expect("restart after reap");
        assert_ne!(restarted.pid, record.pid);
        f.supervisor.stop(id).await.expect("stop");
    }

    #[tokio::test]
    async fn start_reaps_dead_record_without_status() {
        let f = fixture(sh("exec sleep 30")).await;
        let id = dataset(&f.store, true).await;
        let record = f
            .supervisor
            .start(id.clone(), ConnectionParams::default())
            .await
            .expect("start");
        SystemProcesses
            .signal_group(record.pgid, Signal::Forced)
            .expect("kill out of band");
        wait_until_dead(record.pid).await;

        f.supervisor
            .start(id.clone(), ConnectionParams::default())
            .await
            .expect("no stale conflict");
        f.supervisor.stop(id).await.expect("stop");
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let f = fixture(sh("exec sleep 30")).await;
        let id = dataset(&f.store, true).await;

        let err = f.supervisor.stop(id.clone()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotRunning);

        let record = f
            .supervisor
            .start(id.clone(), ConnectionParams::default())
            .await
            .expect("start");
        SystemProcesses
            .signal_group(record.pgid, Signal::Forced)
            .expect("kill out of band");
        wait_until_dead(record.pid).await;

        assert_eq!(f.supervisor.stop(id.clone()).await.unwrap(), StopOutcome::AlreadyStopped);
        assert_eq!(
            f.supervisor.stop(id).await.unwrap_err().kind(),
            ErrorKind::NotRunning
        );
    }

    #[tokio::test]
    async fn list_only_reports_live_workers() {
        let f = fixture(sh("exec sleep 30")).await;
        let live = dataset(&f.store, true).await;
        let doomed = dataset(&f.store, true).await;
        f.supervisor
            .start(live.clone(), ConnectionParams::default())
            .await
            .expect("start live");
        let record = f
            .supervisor
            .start(doomed.clone(), ConnectionParams::default())
            .await
            .expect("start doomed");
        SystemProcesses
            .signal_group(record.pgid, Signal::Forced)
            .expect("kill out of band");
        wait_until_dead(record.pid).await;

        let listed: Vec<_> = f
            .supervisor
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.dataset_id)
            .collect();
        assert_eq!(listed, vec![live.clone()]);
        // reaped by the list, not just filtered
        assert_eq!(f.supervisor.status(doomed).await.unwrap(), InferenceStatus::NotRunning);
        f.supervisor.stop(live).await.expect("stop");
    }

    #[tokio::test]
    async fn running_status_reports_usage() {
        let f = fixture(sh("exec sleep 30")).await;
        let id = dataset(&f.store, true).await;
        let started = f
            .supervisor
            .start(id.clone(), ConnectionParams::default())
            .await
            .expect("start");

        match f.supervisor.status(id.clone()).await.unwrap() {
            InferenceStatus::Running { record, usage } => {
                assert_eq!(record, started);
                assert!(usage.memory_mb >= 0.0);
            }
            other => panic!("expected running, got {other:?}"),
        }
        f.supervisor.stop(id).await.expect("stop");
    }

    #[tokio::test]
    async fn concurrent_stops_share_one_escalation() {
        let f = fixture(sh("trap '' INT; sleep 30")).await;
        let id = dataset(&f.store, true).await;
        f.supervisor
            .start(id.clone(), ConnectionParams::default())
            .await
            .expect("start");

        let (a, b, status) = tokio::join!(
            f.supervisor.stop(id.clone()),
            f.supervisor.stop(id.clone()),
            f.supervisor.status(id.clone()),
        );
        assert_eq!(a.unwrap(), StopOutcome::Stopped { forced: true });
        assert_eq!(b.unwrap(), StopOutcome::Stopped { forced: true });
        assert!(matches!(status.unwrap(), InferenceStatus::Stopping(_)));
        assert!(f.supervisor.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stop_all_clears_every_worker() {
        let f = fixture(sh("exec sleep 30")).await;
        let first = dataset(&f.store, true).await;
        let second = dataset(&f.store, true).await;
        for id in [&first, &second] {
            f.supervisor
                .start(id.clone(), ConnectionParams::default())
                .await
                .expect("start");
        }

        let results = f.supervisor.stop_all().await.expect("stop all");
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, outcome)| outcome.is_ok()));
        assert!(f.supervisor.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stop_without_live_worker_sends_no_signal() {
        let control = Arc::new(RecordingControl::default());
        let f = fixture_with(sh("exec sleep 30"), control.clone()).await;
        let id = dataset(&f.store, true).await;

        let err = f.supervisor.stop(id.clone()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotRunning);

        let record = f
            .supervisor
            .start(id.clone(), ConnectionParams::default())
            .await
            .expect("start");
        control.dead.store(true, Ordering::SeqCst);
        assert_eq!(f.supervisor.stop(id.clone()).await.unwrap(), StopOutcome::AlreadyStopped);
        assert_eq!(f.supervisor.stop(id).await.unwrap_err().kind(), ErrorKind::NotRunning);

        assert!(control.sent().is_empty());
        kill_for_real(&record);
    }

    #[tokio::test]
    async fn stop_during_stopping_sends_no_second_round_of_signals() {
        // signals are recorded but never delivered, so the group outlives the
        // whole escalation
        let control = Arc::new(RecordingControl::default());
        let f = fixture_with(sh("exec sleep 30"), control.clone()).await;
        let id = dataset(&f.store, true).await;
        let record = f
            .supervisor
            .start(id.clone(), ConnectionParams::default())
            .await
            .expect("start");

        let (a, b) = tokio::join!(f.supervisor.stop(id.clone()), f.supervisor.stop(id.clone()));
        assert_eq!(a.unwrap(), StopOutcome::Stopped { forced: true });
        assert_eq!(b.unwrap(), StopOutcome::Stopped { forced: true });
        assert_eq!(control.sent(), vec![Signal::Graceful, Signal::Forced]);
        assert!(control
            .signals
            .lock()
            .unwrap()
            .iter()
            .all(|(pgid, _)| *pgid == record.pgid));

        assert_eq!(f.supervisor.stop(id).await.unwrap_err().kind(), ErrorKind::NotRunning);
        assert_eq!(control.sent().len(), 2);
        kill_for_real(&record);
    }

    #[tokio::test]
    async fn stop_kills_group_members_that_ignore_sigint() {
        // background jobs of a non-interactive shell ignore SIGINT anyway;
        // the trap makes it explicit
        let worker = sh("(trap '' INT; exec sleep 30) & echo $! > helper.pid; exec sleep 30");
        let f = fixture(worker).await;
        let id = dataset(&f.store, true).await;
        let record = f
            .supervisor
            .start(id.clone(), ConnectionParams::default())
            .await
            .expect("start");

        let pid_file = f._dir.path().join("helper.pid");
        let mut helper = None;
        for _ in 0..100 {
            let written = tokio::fs::read_to_string(&pid_file).await.unwrap_or_default();
            if let Ok(pid) = written.trim().parse::<u32>() {
                helper = Some(pid);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let helper = helper.expect("helper pid written");
        assert!(SystemProcesses.is_alive(helper));

        let outcome = f.supervisor.stop(id.clone()).await.expect("stop");
        assert_eq!(outcome, StopOutcome::Stopped { forced: true });
        wait_until_dead(record.pid).await;
        wait_until_dead(helper).await;
        assert_eq!(f.supervisor.status(id).await.unwrap(), InferenceStatus::NotRunning);
    }
}
