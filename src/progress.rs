//! Job progress reporting, for the purpose of display to the user.

use crate::job::Job;
use crate::process::ResourceUsage;
use std::io::Write;
use std::time::{Duration, Instant};

/// How a job that ran ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEnd {
    Exited(i32),
    Signalled { signal: i32, reason: String },
}

/// A finished job's result, as shown to the user.
pub struct JobReport<'a> {
    pub end: JobEnd,
    pub output: &'a [u8],
    pub errors: &'a [u8],
    pub span: (Instant, Instant),
    pub usage: Option<ResourceUsage>,
}

impl JobReport<'_> {
    pub fn succeeded(&self) -> bool {
        self.end == JobEnd::Exited(0)
    }
}

/// Trait for job progress notifications.
pub trait Progress {
    /// Called when a job's process starts.
    fn job_started(&mut self, job: &Job);

    /// Called when a job is skipped because nothing it depends on changed.
    fn job_skipped(&mut self, job: &Job);

    /// Called when a job's process ends.
    fn job_finished(&mut self, job: &Job, report: &JobReport);

    /// Called once after the last job.
    fn finish(&mut self);
}

/// One row of the -driver-time-compilation table.
struct Timing {
    description: String,
    wall: Duration,
    usage: Option<ResourceUsage>,
}

/// Progress implementation for a plain console, without any overprinting.
#[derive(Default)]
pub struct ConsoleProgress {
    /// Whether to print command lines of started programs.
    verbose: bool,
    time_compilation: bool,
    timings: Vec<Timing>,
}

impl ConsoleProgress {
    pub fn new(verbose: bool, time_compilation: bool) -> Self {
        ConsoleProgress {
            verbose,
            time_compilation,
            timings: Vec::new(),
        }
    }

    fn write_captured(output: &[u8], errors: &[u8]) {
        // Nothing useful to do if the console itself is gone.
        if !output.is_empty() {
            let _ = std::io::stdout().write_all(output);
        }
        if !errors.is_empty() {
            let _ = std::io::stderr().write_all(errors);
        }
    }

    fn timing_table(&self) -> String {
        let mut table = String::from("===== job timing =====\n");
        table.push_str(&format!(
            "{:>10} {:>10} {:>10} {:>10}  {}\n",
            "wall", "user", "sys", "maxrss", "job"
        ));
        let secs = |us: u64| format!("{:.3}s", us as f64 / 1e6);
        for t in &self.timings {
            let (user, sys, rss) = match &t.usage {
                Some(u) => (
                    secs(u.utime_us),
                    secs(u.stime_us),
                    format!("{}K", u.maxrss_bytes / 1024),
                ),
                None => ("-".to_string(), "-".to_string(), "-".to_string()),
            };
            table.push_str(&format!(
                "{:>10} {:>10} {:>10} {:>10}  {}\n",
                format!("{:.3}s", t.wall.as_secs_f64()),
                user,
                sys,
                rss,
                t.description
            ));
        }
        table
    }
}

impl Progress for ConsoleProgress {
    fn job_started(&mut self, job: &Job) {
        if self.verbose {
            println!("{}", job.command_line());
        }
    }

    fn job_skipped(&mut self, job: &Job) {
        tracing::debug!(job = %job.description(), "skipped, inputs unchanged");
    }

    fn job_finished(&mut self, job: &Job, report: &JobReport) {
        if self.time_compilation {
            self.timings.push(Timing {
                description: job.description(),
                wall: report.span.1.duration_since(report.span.0),
                usage: report.usage,
            });
        }
        match &report.end {
            JobEnd::Exited(0) => {}
            JobEnd::Exited(code) => {
                eprintln!(
                    "stone: error: {} failed with exit code {}",
                    job.description(),
                    code
                );
                if !self.verbose {
                    eprintln!("  {}", job.command_line());
                }
            }
            JobEnd::Signalled { reason, .. } => {
                eprintln!("stone: error: {} {}", job.description(), reason);
            }
        }
        Self::write_captured(report.output, report.errors);
    }

    fn finish(&mut self) {
        if self.time_compilation && !self.timings.is_empty() {
            eprint!("{}", self.timing_table());
        }
    }
}
