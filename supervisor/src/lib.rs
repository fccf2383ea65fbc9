mod actors;
pub mod error;
pub mod launcher;
pub mod preprocess;
pub mod process;
pub mod registry;
pub mod reporter;
pub mod shutdown;
pub mod status;
pub mod store;
pub mod types;

// re-export the supervisor handle as if it is the supervisor itself.
pub use actors::supervisor::{SupervisorConfig, SupervisorHandle as Supervisor, DEFAULT_STOP_GRACE};
pub use error::{ErrorKind, Result, SupervisorError};
pub use status::{InferenceStatus, StopOutcome};
