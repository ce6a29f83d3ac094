//! Implements run_command on posix using posix_spawn.
//! Output goes through pipes so the driver can attribute it to its job, and
//! the child is reaped with wait4 to collect its resource usage.
//!
//! A job with a memory limit is launched through fork/exec instead, since
//! the limit has to be in place before the tool's first instruction and
//! posix_spawn has no way to express that.

use crate::process::{Command, ProcessResult, ResourceUsage, Termination};
use std::ffi::CString;
use std::io::Read;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::time::{Duration, Instant};

pub const SUPPORTS_BUFFERING_OUTPUT: bool = true;

/// How often a child with a timeout is checked on.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

fn strerror(code: libc::c_int) -> String {
    std::io::Error::from_raw_os_error(code).to_string()
}

/// For calls like posix_spawn() that return an error code.
fn check_posix(func: &str, ret: libc::c_int) -> anyhow::Result<()> {
    if ret != 0 {
        anyhow::bail!("{}: {}", func, strerror(ret));
    }
    Ok(())
}

/// For calls like pipe() that return -1 and set errno.
fn check_errno(func: &str, ret: libc::c_int) -> anyhow::Result<()> {
    if ret < 0 {
        anyhow::bail!("{}: {}", func, std::io::Error::last_os_error());
    }
    Ok(())
}

/// Wraps libc::posix_spawn_file_actions_t, in particular to implement Drop.
struct PosixSpawnFileActions(libc::posix_spawn_file_actions_t);

impl PosixSpawnFileActions {
    fn new() -> anyhow::Result<Self> {
        unsafe {
            let mut actions: libc::posix_spawn_file_actions_t = std::mem::zeroed();
            check_posix(
                "posix_spawn_file_actions_init",
                libc::posix_spawn_file_actions_init(&mut actions),
            )?;
            Ok(Self(actions))
        }
    }

    fn as_ptr(&mut self) -> *mut libc::posix_spawn_file_actions_t {
        &mut self.0
    }

    fn adddup2(&mut self, fd: i32, newfd: i32) -> anyhow::Result<()> {
        unsafe {
            check_posix(
                "posix_spawn_file_actions_adddup2",
                libc::posix_spawn_file_actions_adddup2(&mut self.0, fd, newfd),
            )
        }
    }

}

impl Drop for PosixSpawnFileActions {
    fn drop(&mut self) {
        unsafe { libc::posix_spawn_file_actions_destroy(&mut self.0) };
    }
}

/// A pipe whose ends are closed on drop unless taken.
///
/// Both ends are close-on-exec: jobs run concurrently, and a sibling that
/// inherited another job's write end would hold that job's output open
/// until the sibling exited.
struct Pipe {
    read: libc::c_int,
    write: libc::c_int,
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
fn cloexec_pipe(fds: &mut [libc::c_int; 2]) -> anyhow::Result<()> {
    check_errno("pipe2", unsafe {
        libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC)
    })
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
fn cloexec_pipe(fds: &mut [libc::c_int; 2]) -> anyhow::Result<()> {
    // No pipe2 here; mark the ends straight after creating them.
    check_errno("pipe", unsafe { libc::pipe(fds.as_mut_ptr()) })?;
    for &fd in fds.iter() {
        let ret = unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            unsafe {
                libc::close(fds[0]);
                libc::close(fds[1]);
            }
            anyhow::bail!("fcntl: {}", err);
        }
    }
    Ok(())
}

impl Pipe {
    fn new() -> anyhow::Result<Self> {
        let mut fds: [libc::c_int; 2] = [0; 2];
        cloexec_pipe(&mut fds)?;
        Ok(Pipe {
            read: fds[0],
            write: fds[1],
        })
    }

    fn close_write(&mut self) {
        if self.write >= 0 {
            unsafe { libc::close(self.write) };
            self.write = -1;
        }
    }

    /// Hands the read end to a thread that drains it.
    fn drain(mut self) -> std::thread::JoinHandle<Vec<u8>> {
        self.close_write();
        let mut file = unsafe { std::fs::File::from_raw_fd(self.read) };
        self.read = -1;
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            // A read error just truncates the captured output.
            let _ = file.read_to_end(&mut buf);
            buf
        })
    }
}

impl Drop for Pipe {
    fn drop(&mut self) {
        self.close_write();
        if self.read >= 0 {
            unsafe { libc::close(self.read) };
        }
    }
}

fn cstring(s: &str) -> anyhow::Result<CString> {
    CString::new(s).map_err(|_| anyhow::anyhow!("{:?}: embedded NUL", s))
}

/// The driver's environment with `overrides` applied, as `KEY=value` strings.
fn build_env(overrides: &[(String, String)]) -> anyhow::Result<Vec<CString>> {
    let mut vars: Vec<(String, String)> = std::env::vars()
        .filter(|(k, _)| !overrides.iter().any(|(ok, _)| ok == k))
        .collect();
    vars.extend(overrides.iter().cloned());
    vars.iter()
        .map(|(k, v)| cstring(&format!("{}={}", k, v)))
        .collect()
}

fn usage_from(rusage: &libc::rusage) -> ResourceUsage {
    let micros = |tv: &libc::timeval| tv.tv_sec as u64 * 1_000_000 + tv.tv_usec as u64;
    // Linux reports ru_maxrss in KiB, Darwin in bytes.
    let maxrss = rusage.ru_maxrss as u64;
    let maxrss_bytes = if cfg!(target_os = "macos") {
        maxrss
    } else {
        maxrss * 1024
    };
    ResourceUsage {
        utime_us: micros(&rusage.ru_utime),
        stime_us: micros(&rusage.ru_stime),
        maxrss_bytes,
    }
}

/// Reaps `pid`, killing it first if it outlives `deadline`.
fn wait(
    pid: libc::pid_t,
    deadline: Option<Instant>,
) -> anyhow::Result<(libc::c_int, libc::rusage, bool)> {
    let mut status: libc::c_int = 0;
    let mut rusage: libc::rusage = unsafe { std::mem::zeroed() };
    let mut timed_out = false;
    if let Some(deadline) = deadline {
        loop {
            let ret = unsafe { libc::wait4(pid, &mut status, libc::WNOHANG, &mut rusage) };
            check_errno("wait4", ret)?;
            if ret == pid {
                return Ok((status, rusage, false));
            }
            if Instant::now() >= deadline {
                unsafe { libc::kill(pid, libc::SIGKILL) };
                timed_out = true;
                break;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
    loop {
        let ret = unsafe { libc::wait4(pid, &mut status, 0, &mut rusage) };
        if ret < 0 && std::io::Error::last_os_error().kind() == std::io::ErrorKind::Interrupted {
            continue;
        }
        check_errno("wait4", ret)?;
        return Ok((status, rusage, timed_out));
    }
}

/// Launches `cmd` with posix_spawn, its stdout and stderr on the given
/// descriptors.  The inner Err is a failure to start the tool.
fn spawn_posix(
    cmd: &Command,
    stdout: RawFd,
    stderr: RawFd,
) -> anyhow::Result<Result<libc::pid_t, String>> {
    let exec = cstring(cmd.exec)?;
    let mut argv: Vec<CString> = vec![exec.clone()];
    for arg in cmd.args {
        argv.push(cstring(arg)?);
    }
    let envp = build_env(cmd.env)?;

    // The pipes are close-on-exec, and dup2 clears that flag on the copies.
    let mut actions = PosixSpawnFileActions::new()?;
    actions.adddup2(stdout, 1)?;
    actions.adddup2(stderr, 2)?;

    let mut argv_ptrs: Vec<*mut libc::c_char> =
        argv.iter().map(|s| s.as_ptr() as *mut _).collect();
    argv_ptrs.push(std::ptr::null_mut());
    let mut envp_ptrs: Vec<*mut libc::c_char> =
        envp.iter().map(|s| s.as_ptr() as *mut _).collect();
    envp_ptrs.push(std::ptr::null_mut());

    let mut pid: libc::pid_t = 0;
    let ret = unsafe {
        libc::posix_spawnp(
            &mut pid,
            exec.as_ptr(),
            actions.as_ptr(),
            std::ptr::null(),
            argv_ptrs.as_ptr(),
            envp_ptrs.as_ptr(),
        )
    };
    if ret != 0 {
        return Ok(Err(format!("{}: {}", cmd.exec, strerror(ret))));
    }
    Ok(Ok(pid))
}

/// A close-on-exec duplicate of `fd`, for handing to std::process.
fn stdio_from(fd: RawFd) -> anyhow::Result<std::process::Stdio> {
    let dup = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 0) };
    check_errno("fcntl", dup)?;
    Ok(std::process::Stdio::from(unsafe { OwnedFd::from_raw_fd(dup) }))
}

/// Launches `cmd` through fork/exec with RLIMIT_AS set to `bytes` in the
/// child before exec.
fn spawn_with_memory_limit(
    cmd: &Command,
    stdout: RawFd,
    stderr: RawFd,
    bytes: u64,
) -> anyhow::Result<Result<libc::pid_t, String>> {
    use std::os::unix::process::CommandExt;

    let mut command = std::process::Command::new(cmd.exec);
    command
        .args(cmd.args)
        .envs(cmd.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdout(stdio_from(stdout)?)
        .stderr(stdio_from(stderr)?);
    let limit = libc::rlimit {
        rlim_cur: bytes as libc::rlim_t,
        rlim_max: bytes as libc::rlim_t,
    };
    // Only async-signal-safe calls between fork and exec.
    unsafe {
        command.pre_exec(move || {
            if libc::setrlimit(libc::RLIMIT_AS, &limit) < 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
    // Dropping `command` on return closes our duplicates of the pipe ends.
    match command.spawn() {
        // Reaped by wait(), not through std.
        Ok(child) => Ok(Ok(child.id() as libc::pid_t)),
        Err(err) => Ok(Err(format!("{}: {}", cmd.exec, err))),
    }
}

/// Runs a command to completion.  Failure to launch the process is reported
/// in the result, not as an Err(); Err() means the driver itself failed.
pub fn run_command(
    cmd: &Command,
    on_spawn: impl FnOnce(u32),
) -> anyhow::Result<ProcessResult> {
    let mut out_pipe = Pipe::new()?;
    let err_pipe = if cmd.separate_errors {
        Some(Pipe::new()?)
    } else {
        None
    };
    let stderr = err_pipe.as_ref().map_or(out_pipe.write, |p| p.write);

    let spawned = match cmd.limits.memory_bytes {
        Some(bytes) => spawn_with_memory_limit(cmd, out_pipe.write, stderr, bytes)?,
        None => spawn_posix(cmd, out_pipe.write, stderr)?,
    };
    let pid = match spawned {
        Ok(pid) => pid,
        Err(msg) => return Ok(ProcessResult::spawn_failed(msg)),
    };
    let start = Instant::now();
    on_spawn(pid as u32);

    out_pipe.close_write();
    let out_reader = out_pipe.drain();
    let err_reader = err_pipe.map(Pipe::drain);

    let (status, rusage, timed_out) = wait(pid, cmd.limits.timeout.map(|t| start + t))?;

    let output = out_reader.join().unwrap_or_default();
    let errors = match err_reader {
        Some(reader) => reader.join().unwrap_or_default(),
        None => Vec::new(),
    };

    let termination = if timed_out {
        Termination::Signalled {
            signal: libc::SIGKILL,
            reason: format!(
                "timed out after {}s",
                cmd.limits.timeout.unwrap_or_default().as_secs()
            ),
        }
    } else if libc::WIFSIGNALED(status) {
        let signal = libc::WTERMSIG(status);
        let reason = match signal {
            libc::SIGINT => "interrupted".to_string(),
            // Exceeding RLIMIT_AS usually shows up as an abort or segfault
            // from a failed allocation.
            libc::SIGSEGV | libc::SIGABRT | libc::SIGKILL if cmd.limits.memory_bytes.is_some() => {
                format!("signal {} (memory limit may have been exceeded)", signal)
            }
            _ => format!("signal {}", signal),
        };
        Termination::Signalled { signal, reason }
    } else {
        Termination::Exited(libc::WEXITSTATUS(status))
    };

    Ok(ProcessResult {
        pid: pid as u32,
        termination,
        output,
        errors,
        usage: Some(usage_from(&rusage)),
    })
}
