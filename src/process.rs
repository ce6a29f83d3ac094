//! Launching one subprocess and collecting how it ended.

#[cfg(unix)]
pub use crate::process_posix::{run_command, SUPPORTS_BUFFERING_OUTPUT};
#[cfg(windows)]
pub use crate::process_win::{run_command, SUPPORTS_BUFFERING_OUTPUT};

use std::time::Duration;

/// Per-job limits, enforced by the process layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Wall-clock time after which the child is killed.
    pub timeout: Option<Duration>,
    /// Ceiling on the child's address space.
    pub memory_bytes: Option<u64>,
}

/// Resources a child consumed, as reported by the OS at exit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceUsage {
    pub utime_us: u64,
    pub stime_us: u64,
    pub maxrss_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Ran to completion with this exit code.
    Exited(i32),
    /// Killed, either by a signal or by the driver enforcing a limit.
    Signalled { signal: i32, reason: String },
    /// Never started.
    SpawnFailed(String),
}

/// Exit code reported for a process that could not be started, matching
/// what shells report for a missing command.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 127;

/// A command to launch.
pub struct Command<'a> {
    pub exec: &'a str,
    pub args: &'a [String],
    /// Variables set on top of the driver's own environment.
    pub env: &'a [(String, String)],
    /// Capture stderr apart from stdout rather than interleaved with it.
    pub separate_errors: bool,
    pub limits: ResourceLimits,
}

pub struct ProcessResult {
    /// OS process id; 0 when the process never started.
    pub pid: u32,
    pub termination: Termination,
    /// Captured stdout, with stderr interleaved unless errors were separated.
    pub output: Vec<u8>,
    pub errors: Vec<u8>,
    pub usage: Option<ResourceUsage>,
}

impl ProcessResult {
    pub fn spawn_failed(msg: String) -> Self {
        ProcessResult {
            pid: 0,
            termination: Termination::SpawnFailed(msg),
            output: Vec::new(),
            errors: Vec::new(),
            usage: None,
        }
    }
}
