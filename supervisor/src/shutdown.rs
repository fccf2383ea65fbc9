//! Two-phase shutdown of a worker's process group.

use crate::process::{ProcessControl, Signal};
use crate::types::{Pid, ProcessHandle};
use std::time::Duration;
use tokio::time::{sleep, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How long a SIGKILLed group gets to disappear before it is written off.
const FORCED_KILL_SETTLE: Duration = Duration::from_millis(500);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Escalation {
    /// Exited within the grace window after the graceful signal.
    Graceful,
    /// Needed the forced signal.
    Forced,
    /// Still alive after the forced signal. Nothing more is attempted.
    Survived,
}

/// Signal the group gracefully, give it up to `grace` to empty out, then
/// force-kill whatever is left. A leader that exits while other members
/// linger does not count as a graceful stop. Always completes within `grace`
/// plus a short settle period.
pub async fn terminate_group(
    control: &dyn ProcessControl,
    handle: ProcessHandle,
    grace: Duration,
) -> Escalation {
    send(control, handle, Signal::Graceful);
    if wait_for_exit(control, handle, grace).await {
        tracing::info!(pid = handle.pid, "worker stopped gracefully");
        return Escalation::Graceful;
    }

    tracing::warn!(
        pid = handle.pid,
        leader_alive = control.is_alive(handle.pid),
        grace_ms = grace.as_millis() as u64,
        "worker group ignored graceful shutdown, killing group"
    );
    send(control, handle, Signal::Forced);
    if wait_for_exit(control, handle, FORCED_KILL_SETTLE).await {
        Escalation::Forced
    } else {
        tracing::error!(pid = handle.pid, pgid = handle.pgid, "worker group survived forced kill");
        Escalation::Survived
    }
}

fn send(control: &dyn ProcessControl, handle: ProcessHandle, signal: Signal) {
    if let Err(err) = control.signal_group(handle.pgid, signal) {
        tracing::warn!(pgid = handle.pgid, ?signal, error = %err, "failed to signal worker group");
    }
}

fn group_gone(control: &dyn ProcessControl, handle: ProcessHandle) -> bool {
    !control.is_alive(handle.pid) && !control.is_group_alive(handle.pgid)
}

async fn wait_for_exit(
    control: &dyn ProcessControl,
    handle: ProcessHandle,
    window: Duration,
) -> bool {
    let deadline = Instant::now() + window;
    loop {
        if group_gone(control, handle) {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        sleep(POLL_INTERVAL.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::ResourceUsage;
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// A fake process group of a leader and one helper, each with a scripted
    /// reaction to the graceful signal. Both die on the forced signal unless
    /// `survives_forced` is set.
    struct FakeGroup {
        leader: AtomicBool,
        helper: AtomicBool,
        leader_exits_on_graceful: bool,
        helper_exits_on_graceful: bool,
        survives_forced: bool,
        signals: Mutex<Vec<(Pid, Signal)>>,
    }

    impl FakeGroup {
        fn new(leader_exits_on_graceful: bool, helper_exits_on_graceful: bool) -> Self {
            Self {
                leader: AtomicBool::new(true),
                helper: AtomicBool::new(true),
                leader_exits_on_graceful,
                helper_exits_on_graceful,
                survives_forced: false,
                signals: Mutex::new(Vec::new()),
            }
        }

        fn sent(&self) -> Vec<Signal> {
            self.signals
                .lock()
                .unwrap()
                .iter()
                .map(|(_, signal)| *signal)
                .collect()
        }
    }

    impl ProcessControl for FakeGroup {
        fn is_alive(&self, _pid: Pid) -> bool {
            self.leader.load(Ordering::SeqCst)
        }

        fn signal_group(&self, pgid: Pid, signal: Signal) -> io::Result<()> {
            self.signals.lock().unwrap().push((pgid, signal));
            let (leader_exits, helper_exits) = match signal {
                Signal::Graceful => (self.leader_exits_on_graceful, self.helper_exits_on_graceful),
                Signal::Forced => (!self.survives_forced, !self.survives_forced),
            };
            if leader_exits {
                self.leader.store(false, Ordering::SeqCst);
            }
            if helper_exits {
                self.helper.store(false, Ordering::SeqCst);
            }
            Ok(())
        }

        fn is_group_alive(&self, _pgid: Pid) -> bool {
            self.leader.load(Ordering::SeqCst) || self.helper.load(Ordering::SeqCst)
        }

        fn resource_usage(&self, _pid: Pid) -> Option<ResourceUsage> {
            None
        }
    }

    const HANDLE: ProcessHandle = ProcessHandle { pid: 4242, pgid: 4242 };
    const GRACE: Duration = Duration::from_millis(100);

    #[tokio::test]
    async fn graceful_exit_skips_forced_kill() {
        let group = FakeGroup::new(true, true);
        assert_eq!(terminate_group(&group, HANDLE, GRACE).await, Escalation::Graceful);
        assert_eq!(group.sent(), vec![Signal::Graceful]);
        assert_eq!(group.signals.lock().unwrap()[0].0, HANDLE.pgid);
    }

    #[tokio::test]
    async fn stubborn_group_is_force_killed_after_grace() {
        let group = FakeGroup::new(false, true);
        let started = Instant::now();
        assert_eq!(terminate_group(&group, HANDLE, GRACE).await, Escalation::Forced);
        assert!(started.elapsed() >= GRACE);
        assert_eq!(group.sent(), vec![Signal::Graceful, Signal::Forced]);
    }

    #[tokio::test]
    async fn survivor_is_reported_and_escalation_still_completes() {
        let mut group = FakeGroup::new(false, false);
        group.survives_forced = true;
        assert_eq!(terminate_group(&group, HANDLE, GRACE).await, Escalation::Survived);
        assert_eq!(group.sent(), vec![Signal::Graceful, Signal::Forced]);
    }

    #[tokio::test]
    async fn lingering_helper_gets_the_forced_kill() {
        let group = FakeGroup::new(true, false);
        assert_eq!(terminate_group(&group, HANDLE, GRACE).await, Escalation::Forced);
        assert_eq!(group.sent(), vec![Signal::Graceful, Signal::Forced]);
        assert!(!group.is_group_alive(HANDLE.pgid));
    }
}
