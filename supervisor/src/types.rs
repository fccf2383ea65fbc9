use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub type DatasetId = String;
pub type Pid = u32;
pub type Timestamp = DateTime<Utc>;
pub type ImageBlob = bytes::Bytes;

/// A launched worker. The worker leads its own process group, so `pgid` is
/// what gets signalled on shutdown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: Pid,
    pub pgid: Pid,
}

/// Connection parameters handed to the inference worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionParams {
    pub livekit_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub room_name: String,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            livekit_url: "ws://localhost:7880".into(),
            api_key: "devkey".into(),
            api_secret: "secret".into(),
            room_name: "live".into(),
        }
    }
}

impl ConnectionParams {
    /// Worker flags for a run against `bundle_path`.
    pub fn worker_args(&self, bundle_path: &Path) -> Vec<String> {
        vec![
            "--bundle_path".into(),
            bundle_path.display().to_string(),
            "--livekit_url".into(),
            self.livekit_url.clone(),
            "--api_key".into(),
            self.api_key.clone(),
            "--api_secret".into(),
            self.api_secret.clone(),
            "--room_name".into(),
            self.room_name.clone(),
        ]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Running,
    Stopping,
}

/// What the supervisor remembers about a launched inference worker.
///
/// Holding a record only means the worker was launched. Whether it is still
/// alive has to be asked of the OS every time.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct JobRecord {
    pub dataset_id: DatasetId,
    pub pid: Pid,
    pub pgid: Pid,
    pub started: Timestamp,
    pub bundle_path: PathBuf,
    pub log_path: PathBuf,
    pub state: JobState,
}

impl JobRecord {
    pub fn new(
        dataset_id: DatasetId,
        handle: ProcessHandle,
        bundle_path: PathBuf,
        log_path: PathBuf,
    ) -> Self {
        Self {
            dataset_id,
            pid: handle.pid,
            pgid: handle.pgid,
            started: Utc::now(),
            bundle_path,
            log_path,
            state: JobState::Running,
        }
    }

    pub fn handle(&self) -> ProcessHandle {
        ProcessHandle {
            pid: self.pid,
            pgid: self.pgid,
        }
    }
}
