//! OS process facilities: liveness probes and process-group signals.
//!
//! [`ProcessControl`] is the seam the supervisor talks through, so shutdown
//! logic can be exercised against a fake backend.

use crate::reporter::{self, ResourceUsage};
use crate::types::Pid;
use nix::errno::Errno;
use nix::sys::signal::{self, killpg};
use nix::unistd::Pid as NixPid;
use std::io;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    /// SIGINT, which the inference worker treats as a request to wind down.
    Graceful,
    /// SIGKILL.
    Forced,
}

impl Signal {
    fn as_nix(self) -> signal::Signal {
        match self {
            Signal::Graceful => signal::Signal::SIGINT,
            Signal::Forced => signal::Signal::SIGKILL,
        }
    }
}

pub trait ProcessControl: Send + Sync + 'static {
    /// Whether `pid` still names a running process. Zombies count as gone.
    fn is_alive(&self, pid: Pid) -> bool;

    /// Deliver `signal` to every process in group `pgid`. A group that no
    /// longer exists is not an error.
    fn signal_group(&self, pgid: Pid, signal: Signal) -> io::Result<()>;

    /// Whether any process is left in group `pgid`.
    fn is_group_alive(&self, pgid: Pid) -> bool;

    /// Blocking CPU/memory sample.
    fn resource_usage(&self, pid: Pid) -> Option<ResourceUsage>;
}

/// [`ProcessControl`] backed by the running kernel.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemProcesses;

fn to_nix(pid: Pid) -> Option<NixPid> {
    // 0 and 1 would address our own group and init respectively
    match i32::try_from(pid) {
        Ok(raw) if raw > 1 => Some(NixPid::from_raw(raw)),
        _ => None,
    }
}

impl ProcessControl for SystemProcesses {
    fn is_alive(&self, pid: Pid) -> bool {
        let Some(nix_pid) = to_nix(pid) else {
            return false;
        };
        match signal::kill(nix_pid, None::<signal::Signal>) {
            // EPERM: it exists, it just isn't ours to signal
            Ok(()) | Err(Errno::EPERM) => !reporter::is_zombie(pid),
            Err(_) => false,
        }
    }

    fn signal_group(&self, pgid: Pid, signal: Signal) -> io::Result<()> {
        let group = to_nix(pgid).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("refusing to signal process group {pgid}"),
            )
        })?;
        match killpg(group, signal.as_nix()) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(io::Error::from(errno)),
        }
    }

    fn is_group_alive(&self, pgid: Pid) -> bool {
        let Some(group) = to_nix(pgid) else {
            return false;
        };
        // ESRCH once the last member is gone
        matches!(killpg(group, None::<signal::Signal>), Ok(()) | Err(Errno::EPERM))
    }

    fn resource_usage(&self, pid: Pid) -> Option<ResourceUsage> {
        reporter::sample(pid)
    }
}
