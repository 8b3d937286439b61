//! Lifetime of the build tool's process tree.
//!
//! The tool is started in a process group of its own, so stopping the watcher reaches
//! whatever the tool spawned (wrapper scripts, `cmd /c` shims, worker processes), not just
//! the direct child. Groups of watchers that are still open are recorded and killed from
//! an exit hook, which covers `std::process::exit` and watchers that are never dropped.

use std::collections::HashSet;
use std::process::{Child, Command};
use std::sync::{Mutex, OnceLock};
#[cfg(unix)]
use std::time::{Duration, Instant};

/// How long the group gets to exit after SIGTERM before it is killed.
#[cfg(unix)]
const TERM_GRACE: Duration = Duration::from_secs(2);
#[cfg(unix)]
const POLL_STEP: Duration = Duration::from_millis(20);

/// Start the command as the leader of a new process group.
pub(crate) fn isolate(cmd: &mut Command) {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }
}

/// Stop the tool and everything in its group, then reap the direct child.
pub(crate) fn terminate(child: &Mutex<Child>) {
    let mut child = child.lock().unwrap_or_else(|e| e.into_inner());
    let pid = child.id();

    #[cfg(unix)]
    {
        signal_group(pid, libc::SIGTERM);
        let deadline = Instant::now() + TERM_GRACE;
        while Instant::now() < deadline {
            match child.try_wait() {
                Ok(None) => std::thread::sleep(POLL_STEP),
                _ => break,
            }
        }
        // Stragglers that ignored SIGTERM, or outlived the leader.
        signal_group(pid, libc::SIGKILL);
    }
    #[cfg(windows)]
    kill_tree(pid);

    // Already exited is fine; `wait` still reaps it.
    let _ = child.kill();
    if let Err(e) = child.wait() {
        tracing::warn!(pid, error = %e, "failed to reap build process");
    }
}

#[cfg(unix)]
fn signal_group(pgid: u32, signal: libc::c_int) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // SAFETY: kill(2) on a negative pid only delivers a signal to that group. ESRCH (the
    // group is already gone) is expected and ignored.
    unsafe {
        libc::kill(-pgid, signal);
    }
}

#[cfg(windows)]
fn kill_tree(pid: u32) {
    let status = Command::new("taskkill")
        .args(["/T", "/F", "/PID", &pid.to_string()])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status();
    if let Err(e) = status {
        tracing::warn!(pid, error = %e, "taskkill failed");
    }
}

static OPEN_GROUPS: OnceLock<Mutex<HashSet<u32>>> = OnceLock::new();

fn open_groups() -> &'static Mutex<HashSet<u32>> {
    OPEN_GROUPS.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Record an open watcher's group for the exit hook.
pub(crate) fn register(pid: u32) {
    install_exit_hook();
    open_groups()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .insert(pid);
}

pub(crate) fn unregister(pid: u32) {
    open_groups()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .remove(&pid);
}

#[cfg(test)]
pub(crate) fn is_registered(pid: u32) -> bool {
    open_groups()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .contains(&pid)
}

#[cfg(unix)]
fn install_exit_hook() {
    static HOOK: std::sync::Once = std::sync::Once::new();
    HOOK.call_once(|| {
        // SAFETY: registers a plain `extern "C"` function that captures no state.
        if unsafe { libc::atexit(kill_open_groups) } != 0 {
            tracing::warn!("could not register exit hook for build watchers");
        }
    });
}

/// Without atexit, `Drop` on the watcher is the only safety net.
#[cfg(not(unix))]
fn install_exit_hook() {}

#[cfg(unix)]
extern "C" fn kill_open_groups() {
    let Some(groups) = OPEN_GROUPS.get() else {
        return;
    };
    // Another thread may hold the lock while the process exits; skip rather than hang.
    if let Ok(groups) = groups.try_lock() {
        kill_groups(&groups);
    }
}

#[cfg(unix)]
fn kill_groups(groups: &HashSet<u32>) {
    for &pgid in groups {
        signal_group(pgid, libc::SIGKILL);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;

    fn spawn_isolated(script: &str) -> Child {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script).stdin(Stdio::null());
        isolate(&mut cmd);
        cmd.spawn().expect("spawn sh")
    }

    #[test]
    fn test_isolated_child_leads_its_own_group() {
        let mut child = spawn_isolated("sleep 30");
        let pid = libc::pid_t::try_from(child.id()).unwrap();
        // SAFETY: getpgid only reads process state.
        let pgid = unsafe { libc::getpgid(pid) };
        assert_eq!(pgid, pid);
        let _ = child.kill();
        let _ = child.wait();
    }

    #[test]
    fn test_terminate_reaps_a_child_that_ignores_sigterm() {
        let child = spawn_isolated("trap '' TERM; while :; do sleep 1; done");
        let child = Mutex::new(child);
        terminate(&child);
        let status = child.lock().unwrap().try_wait().unwrap();
        assert!(status.is_some());
    }

    #[test]
    fn test_exit_hook_kills_registered_groups() {
        let mut child = spawn_isolated("sleep 30");
        let pid = child.id();
        kill_groups(&HashSet::from([pid]));
        let status = child.wait().unwrap();
        assert!(!status.success());
    }

    #[test]
    fn test_register_and_unregister() {
        register(4_000_001);
        assert!(is_registered(4_000_001));
        unregister(4_000_001);
        assert!(!is_registered(4_000_001));
    }
}
