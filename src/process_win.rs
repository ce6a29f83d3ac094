//! Implements run_command on Windows.
//! Children inherit the console handles, so their output goes straight to the
//! user and is not captured.

use crate::process::{Command, ProcessResult, Termination};
use std::time::{Duration, Instant};

pub const SUPPORTS_BUFFERING_OUTPUT: bool = false;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// STATUS_CONTROL_C_EXIT.
const CONTROL_C_EXIT: u32 = 0xC000013A;

pub fn run_command(
    cmd: &Command,
    on_spawn: impl FnOnce(u32),
) -> anyhow::Result<ProcessResult> {
    if cmd.limits.memory_bytes.is_some() {
        tracing::warn!("memory limits are not supported on this platform");
    }
    let mut child = match std::process::Command::new(cmd.exec)
        .args(cmd.args)
        .envs(cmd.env.iter().map(|(k, v)| (k, v)))
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            return Ok(ProcessResult::spawn_failed(format!("{}: {}", cmd.exec, err)));
        }
    };
    let pid = child.id();
    on_spawn(pid);

    let start = Instant::now();
    let status = match cmd.limits.timeout {
        None => child.wait()?,
        Some(timeout) => loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if start.elapsed() >= timeout {
                child.kill()?;
                child.wait()?;
                return Ok(ProcessResult {
                    pid,
                    termination: Termination::Signalled {
                        signal: 9,
                        reason: format!("timed out after {}s", timeout.as_secs()),
                    },
                    output: Vec::new(),
                    errors: Vec::new(),
                    usage: None,
                });
            }
            std::thread::sleep(POLL_INTERVAL);
        },
    };

    let code = status.code().unwrap_or(1);
    let termination = if code as u32 == CONTROL_C_EXIT {
        Termination::Signalled {
            signal: 2,
            reason: "interrupted".to_string(),
        }
    } else {
        Termination::Exited(code)
    };
    Ok(ProcessResult {
        pid,
        termination,
        output: Vec::new(),
        errors: Vec::new(),
        usage: None,
    })
}
