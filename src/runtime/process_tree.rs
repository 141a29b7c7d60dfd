// src/runtime/process_tree.rs
//! Process-tree capture and termination
//!
//! Simulation launchers fork children, so killing only the direct child
//! would orphan the actual simulator. The tree is snapshotted shortly
//! after spawn by walking parent PIDs under `/proc`, and termination fans
//! a SIGTERM out to every member, waits out a bounded grace period, then
//! SIGKILLs whatever is left. Survivors are logged, never waited on
//! indefinitely.

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Snapshot of one spawned process and its descendants
#[derive(Debug, Clone)]
pub struct ProcessTree {
    root: Pid,
    members: Vec<Pid>,
}

impl ProcessTree {
    /// Capture the tree rooted at `root_pid`, root included.
    ///
    /// The snapshot is taken once; processes forked afterwards are not
    /// tracked.
    pub fn capture(root_pid: u32) -> Self {
        let root = Pid::from_raw(root_pid as i32);
        let mut members = descendants(root);
        members.push(root);
        debug!(root = root_pid, members = members.len(), "process tree captured");
        Self { root, members }
    }

    pub fn root(&self) -> Pid {
        self.root
    }

    pub fn members(&self) -> &[Pid] {
        &self.members
    }

    /// Whether any member is still alive
    pub fn any_alive(&self) -> bool {
        self.members.iter().any(|pid| is_alive(*pid))
    }

    /// Whether any member is still running. Zombies count as finished:
    /// they only await reaping by their parent and cannot react to
    /// signals.
    fn any_running(&self) -> bool {
        self.members.iter().any(|pid| is_running(*pid))
    }

    /// Terminate every member: SIGTERM fan-out, bounded grace wait, then
    /// SIGKILL for stragglers. Any process still alive afterwards is
    /// logged and abandoned.
    pub async fn kill(&self, grace: Duration) {
        for pid in &self.members {
            if !is_alive(*pid) {
                debug!(pid = pid.as_raw(), "process already gone");
                continue;
            }
            warn!(pid = pid.as_raw(), "sending SIGTERM");
            if let Err(e) = kill(*pid, Signal::SIGTERM) {
                debug!(pid = pid.as_raw(), error = %e, "SIGTERM delivery failed");
            }
        }

        let deadline = Instant::now() + grace;
        while self.any_running() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        for pid in &self.members {
            if !is_running(*pid) {
                continue;
            }
            warn!(pid = pid.as_raw(), "still alive after grace period, sending SIGKILL");
            if let Err(e) = kill(*pid, Signal::SIGKILL) {
                debug!(pid = pid.as_raw(), error = %e, "SIGKILL delivery failed");
            }
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        for pid in &self.members {
            if is_running(*pid) {
                error!(pid = pid.as_raw(), "process survived SIGKILL");
            }
        }
    }
}

/// Liveness probe via the null signal. Zombies count as alive here; use
/// this to decide whether a PID still exists at all.
pub fn is_alive(pid: Pid) -> bool {
    kill(pid, None).is_ok()
}

/// Whether the process exists and is not a zombie
fn is_running(pid: Pid) -> bool {
    is_alive(pid) && !is_zombie(pid)
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: Pid) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid.as_raw())) else {
        return false;
    };
    let Some((_, rest)) = stat.rsplit_once(')') else {
        return false;
    };
    rest.split_whitespace().next() == Some("Z")
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: Pid) -> bool {
    false
}

/// All descendant PIDs of `root`, found by walking `/proc` parent links
#[cfg(target_os = "linux")]
fn descendants(root: Pid) -> Vec<Pid> {
    let mut child_map: std::collections::HashMap<i32, Vec<i32>> = std::collections::HashMap::new();

    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name();
        let Some(pid) = name.to_str().and_then(|n| n.parse::<i32>().ok()) else {
            continue;
        };
        let Ok(stat) = std::fs::read_to_string(entry.path().join("stat")) else {
            continue;
        };
        if let Some(ppid) = parse_stat_ppid(&stat) {
            child_map.entry(ppid).or_default().push(pid);
        }
    }

    let mut found = Vec::new();
    let mut frontier = vec![root.as_raw()];
    while let Some(pid) = frontier.pop() {
        if let Some(children) = child_map.get(&pid) {
            for child in children {
                found.push(Pid::from_raw(*child));
                frontier.push(*child);
            }
        }
    }
    found
}

#[cfg(not(target_os = "linux"))]
fn descendants(_root: Pid) -> Vec<Pid> {
    warn!("process tree enumeration not supported on this platform, tracking the root only");
    Vec::new()
}

/// Parent PID from `/proc/<pid>/stat`. The command field may contain
/// spaces and parentheses, so parsing starts after the last `)`.
#[cfg(target_os = "linux")]
fn parse_stat_ppid(stat: &str) -> Option<i32> {
    let (_, rest) = stat.rsplit_once(')')?;
    rest.split_whitespace().nth(1)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[cfg(target_os = "linux")]
    #[test]
    fn test_parse_stat_ppid() {
        let stat = "1234 (some cmd) with spaces) S 987 1234 1234 0 -1";
        assert_eq!(parse_stat_ppid(stat), Some(987));
    }

    #[test]
    fn test_capture_includes_root() {
        let mut child = Command::new("sleep").arg("5").spawn().unwrap();
        let tree = ProcessTree::capture(child.id());
        assert!(tree.members().contains(&tree.root()));
        let _ = child.kill();
        let _ = child.wait();
    }

    #[tokio::test]
    async fn test_kill_terminates_forked_children() {
        // The shell forks a sleeping grandchild the direct kill would miss
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("sleep 30 & sleep 30")
            .spawn()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let tree = ProcessTree::capture(child.id());
        assert!(tree.members().len() >= 2);

        tree.kill(Duration::from_secs(2)).await;
        let _ = child.wait();
        // Orphaned members are reaped by init shortly after the SIGTERM
        for _ in 0..20 {
            if !tree.any_alive() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!tree.any_alive());
    }

    #[test]
    fn test_dead_pid_is_not_alive() {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = Pid::from_raw(child.id() as i32);
        let _ = child.wait();
        assert!(!is_alive(pid));
    }
}
