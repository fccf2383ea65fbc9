use clap::Parser;
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use supervisor::launcher::WorkerCommand;

/// Serve dataset preprocessing and inference supervision over HTTP
#[derive(Clone, Debug, Parser)]
pub struct ServerConfig {
    /// Address to listen on
    #[clap(long, env = "BIND_ADDR", default_value = "0.0.0.0:5000")]
    pub bind: SocketAddr,

    /// Directory holding the datasets
    #[clap(long, env = "DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Working directory for the worker programs
    #[clap(long, env = "WORKER_DIR", default_value = ".")]
    pub worker_dir: PathBuf,

    /// Preprocessing program and leading arguments, whitespace separated
    #[clap(long, env = "PREPROCESS_COMMAND", default_value = "python3 src/demo/preproc.py")]
    pub preprocess_command: WorkerCommand,

    /// Inference program and leading arguments, whitespace separated
    #[clap(long, env = "INFERENCE_COMMAND", default_value = "python3 src/demo/inference.py")]
    pub inference_command: WorkerCommand,

    /// Upper bound on one preprocessing run
    #[clap(long, env = "PREPROCESS_TIMEOUT_SECS", default_value = "300")]
    pub preprocess_timeout_secs: u64,

    /// How long a stopped worker gets between SIGINT and SIGKILL
    #[clap(long, env = "STOP_GRACE_MS", default_value = "2000")]
    pub stop_grace_ms: u64,

    /// Upper bound on one HTTP request, preprocessing included
    #[clap(long, env = "REQUEST_TIMEOUT_SECS", default_value = "600")]
    pub request_timeout_secs: u64,

    /// Largest accepted request body, in MiB
    #[clap(long, env = "MAX_BODY_MB", default_value = "256")]
    pub max_body_mb: usize,

    /// Stop every running inference worker when the server shuts down
    #[clap(long, env = "STOP_WORKERS_ON_EXIT")]
    pub stop_workers_on_exit: bool,
}

impl ServerConfig {
    pub fn preprocess_timeout(&self) -> Duration {
        Duration::from_secs(self.preprocess_timeout_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_mb.saturating_mul(1024 * 1024)
    }
}
