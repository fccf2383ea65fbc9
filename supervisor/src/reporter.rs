//! Best-effort CPU and memory sampling for a live worker.

use crate::types::Pid;
use serde::Serialize;
use sysinfo::{ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct ResourceUsage {
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

/// Sample CPU% and resident memory of `pid`.
///
/// CPU usage is a delta, so the process is refreshed twice with the minimum
/// update interval in between. Blocks for that interval. Returns `None` if
/// the process disappears mid-sample.
pub fn sample(pid: Pid) -> Option<ResourceUsage> {
    let pid = sysinfo::Pid::from_u32(pid);
    let kind = ProcessRefreshKind::nothing().with_cpu().with_memory();
    let mut system = System::new();

    system.refresh_processes_specifics(ProcessesToUpdate::Some(&[pid]), true, kind);
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    system.refresh_processes_specifics(ProcessesToUpdate::Some(&[pid]), true, kind);

    let process = system.process(pid)?;
    Some(ResourceUsage {
        cpu_percent: process.cpu_usage(),
        memory_mb: process.memory() as f64 / BYTES_PER_MB,
    })
}

/// An exited but unreaped process still answers signal probes, so it has to
/// be told apart by its state.
pub(crate) fn is_zombie(pid: Pid) -> bool {
    let pid = sysinfo::Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::nothing(),
    );
    matches!(
        system.process(pid).map(|process| process.status()),
        Some(ProcessStatus::Zombie | ProcessStatus::Dead)
    )
}
