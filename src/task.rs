//! Runs subprocesses, potentially in parallel.
//! Unaware of jobs and their dependencies; just command execution, with
//! callbacks as tasks begin and end.
//!
//! Each running task gets a thread that blocks on its child; completions
//! come back to the executing thread over a channel.

use crate::process::{self, Command, ProcessResult, ResourceLimits, ResourceUsage, Termination};
use anyhow::anyhow;
use std::collections::VecDeque;
use std::sync::mpsc;
use std::time::Instant;

/// Whether captured stdout/stderr is available to `finished` callbacks.
/// When it is not, children write straight to the driver's console.
pub fn supports_buffering_output() -> bool {
    process::SUPPORTS_BUFFERING_OUTPUT
}

pub fn supports_parallel_execution() -> bool {
    cfg!(any(unix, windows))
}

/// A queued command, not yet started.
pub struct Task<C> {
    pub exec: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub context: C,
    pub separate_errors: bool,
    pub limits: ResourceLimits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskProcessInfo {
    pub pid: u32,
    /// Filled in at exit where the platform reports it.
    pub usage: Option<ResourceUsage>,
}

pub struct FinishedTask<C> {
    /// A (faked) "thread id", used to put different tasks in different
    /// tracks in a performance trace.
    pub tid: usize,
    pub exit_code: i32,
    pub output: Vec<u8>,
    pub errors: Vec<u8>,
    pub info: TaskProcessInfo,
    pub context: C,
    pub span: (Instant, Instant),
}

/// A task killed by a signal, or by the driver enforcing a limit.
pub struct SignalledTask<C> {
    pub tid: usize,
    pub error_message: String,
    pub signal: i32,
    pub output: Vec<u8>,
    pub errors: Vec<u8>,
    pub info: TaskProcessInfo,
    pub context: C,
    pub span: (Instant, Instant),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskFinishedResponse {
    ContinueExecution,
    /// Start no further tasks; running ones still finish.
    StopExecution,
}

/// Tasks waiting to start.  Handlers get access to this so that finishing
/// one task can queue the tasks it unblocked.
pub struct PendingTasks<C> {
    queue: VecDeque<Task<C>>,
}

impl<C> PendingTasks<C> {
    pub fn add_task(
        &mut self,
        exec: impl Into<String>,
        args: Vec<String>,
        env: Vec<(String, String)>,
        context: C,
        separate_errors: bool,
    ) {
        self.add_task_with_limits(exec, args, env, context, separate_errors, ResourceLimits::default())
    }

    pub fn add_task_with_limits(
        &mut self,
        exec: impl Into<String>,
        args: Vec<String>,
        env: Vec<(String, String)>,
        context: C,
        separate_errors: bool,
        limits: ResourceLimits,
    ) {
        self.queue.push_back(Task {
            exec: exec.into(),
            args,
            env,
            context,
            separate_errors,
            limits,
        });
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Observes task lifetimes.  Called on the thread running execute().
pub trait TaskHandler<C> {
    fn began(&mut self, _pid: u32, _context: &C) {}

    /// The task exited, or could not be started at all; the latter reports
    /// exit code 127 with the reason in `errors`.
    fn finished(
        &mut self,
        task: FinishedTask<C>,
        pending: &mut PendingTasks<C>,
    ) -> TaskFinishedResponse;

    fn signalled(
        &mut self,
        task: SignalledTask<C>,
        pending: &mut PendingTasks<C>,
    ) -> TaskFinishedResponse;
}

/// Tracks faked "thread ids" -- integers assigned to tasks to track
/// parallelism in perf trace output.
struct ThreadIds {
    /// An entry is true when claimed, false or nonexistent otherwise.
    slots: Vec<bool>,
}
impl ThreadIds {
    fn new() -> Self {
        ThreadIds { slots: Vec::new() }
    }

    fn claim(&mut self) -> usize {
        match self.slots.iter().position(|&used| !used) {
            Some(idx) => {
                self.slots[idx] = true;
                idx
            }
            None => {
                let idx = self.slots.len();
                self.slots.push(true);
                idx
            }
        }
    }

    fn release(&mut self, slot: usize) {
        self.slots[slot] = false;
    }
}

enum Message {
    Began {
        tid: usize,
        pid: u32,
    },
    Finished {
        tid: usize,
        span: (Instant, Instant),
        result: anyhow::Result<ProcessResult>,
    },
}

pub struct TaskQueue<C> {
    pending: PendingTasks<C>,
    parallelism: usize,
}

impl<C> TaskQueue<C> {
    pub fn new(parallelism: usize) -> Self {
        TaskQueue {
            pending: PendingTasks {
                queue: VecDeque::new(),
            },
            parallelism: parallelism.max(1),
        }
    }

    pub fn number_of_parallel_tasks(&self) -> usize {
        if supports_parallel_execution() {
            self.parallelism
        } else {
            1
        }
    }

    /// Queues a task; nothing is spawned until execute().
    pub fn add_task(
        &mut self,
        exec: impl Into<String>,
        args: Vec<String>,
        env: Vec<(String, String)>,
        context: C,
        separate_errors: bool,
    ) {
        self.pending.add_task(exec, args, env, context, separate_errors)
    }

    pub fn pending(&mut self) -> &mut PendingTasks<C> {
        &mut self.pending
    }

    /// Tasks left unstarted, e.g. after a handler asked to stop.
    pub fn take_unstarted(&mut self) -> Vec<Task<C>> {
        self.pending.queue.drain(..).collect()
    }

    fn start(&self, tid: usize, task: &Task<C>, tx: mpsc::Sender<Message>) {
        let exec = task.exec.clone();
        let args = task.args.clone();
        let env = task.env.clone();
        let separate_errors = task.separate_errors;
        let limits = task.limits;
        std::thread::spawn(move || {
            let start = Instant::now();
            let cmd = Command {
                exec: &exec,
                args: &args,
                env: &env,
                separate_errors,
                limits,
            };
            let result = process::run_command(&cmd, |pid| {
                let _ = tx.send(Message::Began { tid, pid });
            });
            let finish = Instant::now();
            // The send will only fail if the receiver disappeared, e.g. due to shutting down.
            let _ = tx.send(Message::Finished {
                tid,
                span: (start, finish),
                result,
            });
        });
    }

    /// Runs queued tasks, up to number_of_parallel_tasks() at once, until
    /// none remain or a handler stops execution.  Returns whether any task
    /// failed.
    pub fn execute(&mut self, handler: &mut dyn TaskHandler<C>) -> anyhow::Result<bool> {
        let (tx, rx) = mpsc::channel();
        let mut tids = ThreadIds::new();
        let mut contexts: Vec<Option<C>> = Vec::new();
        let mut running = 0;
        let mut stopped = false;
        let mut any_failure = false;
        let parallelism = self.number_of_parallel_tasks();

        loop {
            while !stopped && running < parallelism {
                let task = match self.pending.queue.pop_front() {
                    Some(task) => task,
                    None => break,
                };
                let tid = tids.claim();
                self.start(tid, &task, tx.clone());
                if contexts.len() <= tid {
                    contexts.resize_with(tid + 1, || None);
                }
                contexts[tid] = Some(task.context);
                running += 1;
            }
            if running == 0 {
                break;
            }

            let (tid, span, result) = match rx.recv() {
                Ok(Message::Began { tid, pid }) => {
                    if let Some(context) = &contexts[tid] {
                        handler.began(pid, context);
                    }
                    continue;
                }
                Ok(Message::Finished { tid, span, result }) => (tid, span, result),
                Err(_) => return Err(anyhow!("task channel closed")),
            };
            running -= 1;
            tids.release(tid);
            let context = contexts[tid]
                .take()
                .ok_or_else(|| anyhow!("no task in slot {}", tid))?;

            let result = result.unwrap_or_else(|err| ProcessResult::spawn_failed(err.to_string()));
            let info = TaskProcessInfo {
                pid: result.pid,
                usage: result.usage,
            };
            let response = match result.termination {
                Termination::Exited(exit_code) => {
                    if exit_code != 0 {
                        any_failure = true;
                    }
                    handler.finished(
                        FinishedTask {
                            tid,
                            exit_code,
                            output: result.output,
                            errors: result.errors,
                            info,
                            context,
                            span,
                        },
                        &mut self.pending,
                    )
                }
                Termination::SpawnFailed(msg) => {
                    any_failure = true;
                    let mut errors = result.errors;
                    errors.extend_from_slice(msg.as_bytes());
                    errors.push(b'\n');
                    handler.finished(
                        FinishedTask {
                            tid,
                            exit_code: process::SPAWN_FAILURE_EXIT_CODE,
                            output: result.output,
                            errors,
                            info,
                            context,
                            span,
                        },
                        &mut self.pending,
                    )
                }
                Termination::Signalled { signal, reason } => {
                    any_failure = true;
                    handler.signalled(
                        SignalledTask {
                            tid,
                            error_message: reason,
                            signal,
                            output: result.output,
                            errors: result.errors,
                            info,
                            context,
                            span,
                        },
                        &mut self.pending,
                    )
                }
            };
            if response == TaskFinishedResponse::StopExecution {
                stopped = true;
            }
        }
        Ok(any_failure)
    }
}
