//! A planned compilation: its jobs, and running them in dependency order.

use crate::action::ActionGraph;
use crate::build_system::BuildSystem;
use crate::densemap::{DenseMap, Index};
use crate::file::Inputs;
use crate::job::{Job, JobCondition, JobId};
use crate::progress::{JobEnd, JobReport, Progress};
use crate::task::{
    supports_buffering_output, FinishedTask, PendingTasks, SignalledTask, TaskFinishedResponse,
    TaskHandler, TaskQueue,
};
use crate::trace;
use anyhow::bail;
use std::io::Write;
use std::path::PathBuf;

/// Scratch files of one compilation, such as input file lists.  Removed when
/// dropped unless kept with -save-temps.
pub struct TempFiles {
    keep: bool,
    dir: Option<tempfile::TempDir>,
    kept: Option<PathBuf>,
    count: usize,
}

impl TempFiles {
    pub fn new(keep: bool) -> Self {
        TempFiles {
            keep,
            dir: None,
            kept: None,
            count: 0,
        }
    }

    fn dir(&mut self) -> anyhow::Result<PathBuf> {
        if let Some(dir) = &self.kept {
            return Ok(dir.clone());
        }
        if let Some(dir) = &self.dir {
            return Ok(dir.path().to_path_buf());
        }
        let dir = tempfile::Builder::new().prefix("stone-").tempdir()?;
        let path = dir.path().to_path_buf();
        if self.keep {
            tracing::info!("keeping temporary files in {}", path.display());
            self.kept = Some(dir.into_path());
        } else {
            self.dir = Some(dir);
        }
        Ok(path)
    }

    /// Writes `lines`, one per line, to a new file and returns its path.
    pub fn write_filelist(&mut self, stem: &str, lines: &[String]) -> anyhow::Result<String> {
        let dir = self.dir()?;
        let path = dir.join(format!("{}-{}.filelist", stem, self.count));
        self.count += 1;
        let mut content = String::new();
        for line in lines {
            content.push_str(line);
            content.push('\n');
        }
        std::fs::write(&path, content)
            .map_err(|err| anyhow::anyhow!("write {}: {}", path.display(), err))?;
        Ok(path.to_string_lossy().into_owned())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum JobState {
    Planned,
    /// Queued to the TaskQueue, not yet started.
    Scheduled,
    Running,
    Succeeded,
    Failed,
    /// Not run because nothing it depends on changed.
    Skipped,
    /// Not run because a dependency failed or execution stopped.
    NotRun,
}

impl JobState {
    fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Skipped | JobState::NotRun
        )
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CompilationResult {
    /// Some job died from a signal or a limit.
    pub had_abnormal_exit: bool,
    /// 0, or the exit code of the first job that failed.
    pub exit_code: i32,
    pub ran: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct Compilation {
    pub inputs: Inputs,
    pub graph: ActionGraph,
    jobs: DenseMap<JobId, Job>,
    top_level: Vec<JobId>,
    external: Vec<JobId>,
    pub temps: TempFiles,
}

impl Compilation {
    pub fn new(inputs: Inputs, graph: ActionGraph, temps: TempFiles) -> Self {
        Compilation {
            inputs,
            graph,
            jobs: DenseMap::default(),
            top_level: Vec::new(),
            external: Vec::new(),
            temps,
        }
    }

    pub fn next_job_id(&self) -> JobId {
        self.jobs.next_id()
    }

    /// Adds a job that other jobs may depend on.  Its dependencies must
    /// already be added.
    pub fn add_job(&mut self, mut job: Job) -> anyhow::Result<JobId> {
        let id = self.jobs.next_id();
        if let Some(dep) = job.deps.iter().find(|dep| dep.index() >= id.index()) {
            bail!("{} depends on unknown job {:?}", job.description(), dep);
        }
        job.id = id;
        Ok(self.jobs.push(job))
    }

    pub fn add_top_level_job(&mut self, job: Job) -> anyhow::Result<JobId> {
        let id = self.add_job(job)?;
        self.top_level.push(id);
        Ok(id)
    }

    pub fn mark_top_level(&mut self, id: JobId) {
        if !self.top_level.contains(&id) {
            self.top_level.push(id);
        }
    }

    /// Adds a top-level job that was not planned from the action graph.
    pub fn add_top_level_external_job(&mut self, job: Job) -> anyhow::Result<JobId> {
        let id = self.add_job(job)?;
        self.external.push(id);
        Ok(id)
    }

    pub fn job(&self, id: JobId) -> &Job {
        &self.jobs[id]
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn top_level(&self) -> &[JobId] {
        &self.top_level
    }

    pub fn external(&self) -> &[JobId] {
        &self.external
    }

    /// All jobs reachable from the top-level and external ones, each after
    /// its dependencies.
    pub fn ordered_jobs(&self) -> Vec<JobId> {
        let mut visited = vec![false; self.jobs.len()];
        let mut order = Vec::new();
        for &id in self.top_level.iter().chain(self.external.iter()) {
            self.visit(id, &mut visited, &mut order);
        }
        order
    }

    fn visit(&self, id: JobId, visited: &mut [bool], order: &mut Vec<JobId>) {
        if visited[id.index()] {
            return;
        }
        visited[id.index()] = true;
        for &dep in &self.jobs[id].deps {
            self.visit(dep, visited, order);
        }
        order.push(id);
    }

    /// Writes one line per job, dependencies first:
    /// `<ordinal>: <kind> [<dep ordinals>] <command line>`.
    pub fn print_jobs(&self, w: &mut dyn Write) -> std::io::Result<()> {
        let order = self.ordered_jobs();
        let mut ordinals = vec![0; self.jobs.len()];
        for (ordinal, id) in order.iter().enumerate() {
            ordinals[id.index()] = ordinal;
        }
        for (ordinal, &id) in order.iter().enumerate() {
            let job = &self.jobs[id];
            let deps: Vec<String> = job
                .deps
                .iter()
                .map(|dep| ordinals[dep.index()].to_string())
                .collect();
            writeln!(
                w,
                "{}: {} [{}] {}",
                ordinal,
                job.kind,
                deps.join(", "),
                job.command_line()
            )?;
        }
        Ok(())
    }

    pub fn print_actions(&self, w: &mut dyn Write) -> std::io::Result<()> {
        self.graph.print(&self.inputs, w)
    }

    /// Runs every reachable job whose condition requires it, in dependency
    /// order, at most queue.number_of_parallel_tasks() at a time.
    pub fn run_jobs(
        &self,
        queue: &mut TaskQueue<JobId>,
        build_system: Option<&mut BuildSystem>,
        progress: &mut dyn Progress,
        continue_after_errors: bool,
    ) -> anyhow::Result<CompilationResult> {
        let order = self.ordered_jobs();
        let mut scheduler = Scheduler::new(self, build_system, progress, continue_after_errors);
        tracing::debug!(jobs = order.len(), "running jobs");
        for &id in &order {
            scheduler.try_schedule(id, queue.pending());
        }
        queue.execute(&mut scheduler)?;
        for task in queue.take_unstarted() {
            scheduler.set_state(task.context, JobState::NotRun);
            scheduler.forget(task.context);
        }
        for &id in &order {
            if !scheduler.states[id].is_terminal() {
                scheduler.set_state(id, JobState::NotRun);
                scheduler.forget(id);
            }
        }
        scheduler.progress.finish();
        let mut result = scheduler.result;
        if result.failed > 0 && result.exit_code == 0 {
            result.exit_code = 1;
        }
        tracing::debug!(
            ran = result.ran,
            skipped = result.skipped,
            failed = result.failed,
            "finished jobs"
        );
        Ok(result)
    }
}

struct Scheduler<'c, 'b, 'fs, 'p> {
    compilation: &'c Compilation,
    states: DenseMap<JobId, JobState>,
    dependents: DenseMap<JobId, Vec<JobId>>,
    build_system: Option<&'b mut BuildSystem<'fs>>,
    progress: &'p mut dyn Progress,
    continue_after_errors: bool,
    stopped: bool,
    result: CompilationResult,
}

impl<'c, 'b, 'fs, 'p> Scheduler<'c, 'b, 'fs, 'p> {
    fn new(
        compilation: &'c Compilation,
        build_system: Option<&'b mut BuildSystem<'fs>>,
        progress: &'p mut dyn Progress,
        continue_after_errors: bool,
    ) -> Self {
        let n = compilation.jobs.len();
        let mut dependents: DenseMap<JobId, Vec<JobId>> = DenseMap::new_sized(n, Vec::new());
        for (id, job) in compilation.jobs.iter() {
            for &dep in &job.deps {
                dependents[dep].push(id);
            }
        }
        Scheduler {
            compilation,
            states: DenseMap::new_sized(n, JobState::Planned),
            dependents,
            build_system,
            progress,
            continue_after_errors,
            stopped: false,
            result: CompilationResult::default(),
        }
    }

    fn set_state(&mut self, id: JobId, state: JobState) {
        tracing::debug!(
            job = %self.compilation.jobs[id].description(),
            from = ?self.states[id],
            to = ?state,
            "job state"
        );
        self.states[id] = state;
    }

    /// Moves a planned job forward once all its dependencies are terminal:
    /// to Scheduled, or straight to Skipped or NotRun.
    fn try_schedule(&mut self, id: JobId, pending: &mut PendingTasks<JobId>) {
        if self.states[id] != JobState::Planned {
            return;
        }
        let compilation = self.compilation;
        let job = &compilation.jobs[id];
        let mut any_ran = false;
        for &dep in &job.deps {
            match self.states[dep] {
                JobState::Succeeded => any_ran = true,
                JobState::Skipped => {}
                JobState::Failed | JobState::NotRun => {
                    self.set_state(id, JobState::NotRun);
                    self.forget(id);
                    self.cascade(id, pending);
                    return;
                }
                JobState::Planned | JobState::Scheduled | JobState::Running => return,
            }
        }
        if job.condition == JobCondition::CheckDependencies && !any_ran {
            self.set_state(id, JobState::Skipped);
            self.result.skipped += 1;
            self.progress.job_skipped(job);
            self.cascade(id, pending);
            return;
        }
        if self.stopped {
            self.set_state(id, JobState::NotRun);
            self.forget(id);
            return;
        }
        self.set_state(id, JobState::Scheduled);
        // Keep stderr apart wherever output is captured at all, so a job's
        // diagnostics come out after its stdout.
        pending.add_task_with_limits(
            job.exec.clone(),
            job.args.clone(),
            job.env.clone(),
            id,
            supports_buffering_output(),
            job.limits,
        );
    }

    /// Re-examines the jobs waiting on `id`, which just became terminal.
    fn cascade(&mut self, id: JobId, pending: &mut PendingTasks<JobId>) {
        for dependent in self.dependents[id].clone() {
            self.try_schedule(dependent, pending);
        }
    }

    /// Makes the next incremental build rerun a job whose outputs this
    /// build left stale.
    fn forget(&mut self, id: JobId) {
        let compilation = self.compilation;
        let job = &compilation.jobs[id];
        if let Some(build_system) = self.build_system.as_deref_mut() {
            build_system.forget(&job.history_inputs, job.command_key());
        }
    }

    fn failed(&mut self, id: JobId) -> TaskFinishedResponse {
        self.set_state(id, JobState::Failed);
        self.forget(id);
        self.result.failed += 1;
        if self.continue_after_errors {
            TaskFinishedResponse::ContinueExecution
        } else {
            self.stopped = true;
            TaskFinishedResponse::StopExecution
        }
    }
}

impl TaskHandler<JobId> for Scheduler<'_, '_, '_, '_> {
    fn began(&mut self, pid: u32, id: &JobId) {
        let id = *id;
        tracing::debug!(pid, job = %self.compilation.jobs[id].description(), "started");
        self.set_state(id, JobState::Running);
        self.progress.job_started(&self.compilation.jobs[id]);
    }

    fn finished(
        &mut self,
        task: FinishedTask<JobId>,
        pending: &mut PendingTasks<JobId>,
    ) -> TaskFinishedResponse {
        let id = task.context;
        let compilation = self.compilation;
        let job = &compilation.jobs[id];
        trace::job_span(&job.description(), task.tid, task.span);
        self.progress.job_finished(
            job,
            &JobReport {
                end: JobEnd::Exited(task.exit_code),
                output: &task.output,
                errors: &task.errors,
                span: task.span,
                usage: task.info.usage,
            },
        );
        self.result.ran += 1;

        if task.exit_code != 0 {
            if self.result.exit_code == 0 {
                self.result.exit_code = task.exit_code;
            }
            let response = self.failed(id);
            self.cascade(id, pending);
            return response;
        }

        if let Some(build_system) = self.build_system.as_deref_mut() {
            build_system.record_success(&job.history_inputs);
            if let Some(key) = job.command_key() {
                build_system.record_command(key, job.signature());
            }
        }
        self.set_state(id, JobState::Succeeded);
        self.cascade(id, pending);
        TaskFinishedResponse::ContinueExecution
    }

    fn signalled(
        &mut self,
        task: SignalledTask<JobId>,
        pending: &mut PendingTasks<JobId>,
    ) -> TaskFinishedResponse {
        let id = task.context;
        let compilation = self.compilation;
        let job = &compilation.jobs[id];
        trace::job_span(&job.description(), task.tid, task.span);
        self.progress.job_finished(
            job,
            &JobReport {
                end: JobEnd::Signalled {
                    signal: task.signal,
                    reason: task.error_message.clone(),
                },
                output: &task.output,
                errors: &task.errors,
                span: task.span,
                usage: task.info.usage,
            },
        );
        self.result.ran += 1;
        self.result.had_abnormal_exit = true;
        if self.result.exit_code == 0 {
            self.result.exit_code = 1;
        }
        let response = self.failed(id);
        self.cascade(id, pending);
        response
    }
}
