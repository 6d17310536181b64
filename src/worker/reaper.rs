//! Host-wide cleanup of worker processes by executable name.
//!
//! Used to clear out workers orphaned by a previous run before a new pool is
//! started. Discovery reads `/proc` on Linux; other platforms find nothing.

use super::error::{TerminateFailure, TerminateReport};
#[cfg(target_os = "linux")]
use std::fs;
#[cfg(target_os = "linux")]
use std::path::Path;

/// Kernel limit on the length of `/proc/<pid>/comm`.
#[cfg(target_os = "linux")]
const COMM_MAX_LEN: usize = 15;

/// Strips a trailing `.exe` so names written for other hosts still match.
pub fn normalize_executable_name(name: &str) -> &str {
    let trimmed = name.trim();
    let file_name = trimmed
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(trimmed);
    file_name
        .strip_suffix(".exe")
        .or_else(|| file_name.strip_suffix(".EXE"))
        .unwrap_or(file_name)
}

/// Lists pids of processes whose executable matches `name`, excluding the
/// current process.
pub fn find_processes_named(name: &str) -> Vec<u32> {
    let name = normalize_executable_name(name);
    if name.is_empty() {
        return Vec::new();
    }
    scan_processes(name)
}

/// Force-kills every process matching `name`. Failures are collected and the
/// remaining processes are still attempted.
pub fn terminate_processes_named(name: &str) -> TerminateReport {
    let pids = find_processes_named(name);
    let mut report = TerminateReport::default();

    for pid in pids {
        match kill_pid(pid) {
            Ok(()) => {
                tracing::info!(pid, executable = name, "terminated stray worker process");
                report.terminated += 1;
            }
            Err(failure) => {
                tracing::warn!(
                    pid,
                    executable = name,
                    error = %failure,
                    "failed to terminate stray worker process"
                );
                report.failures.push(failure);
            }
        }
    }

    report
}

#[cfg(target_os = "linux")]
fn scan_processes(name: &str) -> Vec<u32> {
    let own_pid = std::process::id();
    let entries = match fs::read_dir("/proc") {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(error = %err, "failed to list /proc; skipping stray worker scan");
            return Vec::new();
        }
    };

    let mut pids = Vec::new();
    for entry in entries.flatten() {
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|raw| raw.parse::<u32>().ok())
        else {
            continue;
        };
        if pid == own_pid {
            continue;
        }
        if process_matches(&entry.path(), name) {
            pids.push(pid);
        }
    }
    pids.sort_unstable();
    pids
}

#[cfg(target_os = "linux")]
fn process_matches(proc_dir: &Path, name: &str) -> bool {
    if let Ok(exe) = fs::read_link(proc_dir.join("exe")) {
        if exe.file_name().and_then(|f| f.to_str()) == Some(name) {
            return true;
        }
    }

    // Without permission to read `exe`, fall back to the (truncated) comm.
    match fs::read_to_string(proc_dir.join("comm")) {
        Ok(comm) => {
            let comm = comm.trim_end();
            let expected: String = name.chars().take(COMM_MAX_LEN).collect();
            comm == expected
        }
        Err(_) => false,
    }
}

#[cfg(not(target_os = "linux"))]
fn scan_processes(name: &str) -> Vec<u32> {
    tracing::debug!(executable = name, "process discovery unsupported on this platform");
    Vec::new()
}

#[cfg(unix)]
fn kill_pid(pid: u32) -> Result<(), TerminateFailure> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| TerminateFailure {
        pid: Some(pid),
        reason: "pid out of range".to_owned(),
    })?;
    kill(Pid::from_raw(raw), Signal::SIGKILL).map_err(|err| TerminateFailure {
        pid: Some(pid),
        reason: err.to_string(),
    })
}

#[cfg(not(unix))]
fn kill_pid(pid: u32) -> Result<(), TerminateFailure> {
    Err(TerminateFailure {
        pid: Some(pid),
        reason: "process termination unsupported on this platform".to_owned(),
    })
}
