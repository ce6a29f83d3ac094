//! Jobs: actions bound to a tool and a command line.

use crate::action::{ActionId, ActionKind};
use crate::densemap::dense_id;
use crate::file::FileType;
use crate::process::ResourceLimits;
use crate::smallmap::SmallMap;
use crate::toolchain::ToolKind;
use anyhow::bail;
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

dense_id!(
    /// Identifies a job within one Compilation.
    JobId
);

/// Why a job is being considered for running, from incremental state.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum JobCondition {
    /// No usable history; always run.
    Always,
    /// The job's own inputs changed.
    RunWithoutCascading,
    /// The job's inputs are unchanged; run only if a job it depends on ran.
    CheckDependencies,
    /// The job's input is new since the last build.
    NewlyAdded,
}

impl JobCondition {
    fn rank(self) -> u8 {
        match self {
            JobCondition::CheckDependencies => 0,
            JobCondition::RunWithoutCascading => 1,
            JobCondition::NewlyAdded => 2,
            JobCondition::Always => 3,
        }
    }

    /// The more demanding of two conditions, for jobs with several inputs.
    pub fn combine(self, other: JobCondition) -> JobCondition {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }
}

/// A primary input and the primary output produced for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInputPair {
    /// Empty for whole-module and link outputs, which have no single input.
    pub input: String,
    /// Empty when the output type is None.
    pub primary_output: String,
}

/// The outputs a job declares.  Additional outputs of each type come either
/// singly or one per primary input.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutput {
    primary_output_type: FileType,
    pairs: Vec<CommandInputPair>,
    additional: SmallMap<FileType, Vec<String>>,
}

impl CommandOutput {
    pub fn new(primary_output_type: FileType) -> Self {
        CommandOutput {
            primary_output_type,
            pairs: Vec::new(),
            additional: SmallMap::new(),
        }
    }

    pub fn primary_output_type(&self) -> FileType {
        self.primary_output_type
    }

    pub fn add_primary_output(&mut self, input: impl Into<String>, output: impl Into<String>) {
        self.pairs.push(CommandInputPair {
            input: input.into(),
            primary_output: output.into(),
        });
    }

    pub fn pairs(&self) -> &[CommandInputPair] {
        &self.pairs
    }

    /// Non-empty primary outputs, in input order.
    pub fn primary_outputs(&self) -> impl Iterator<Item = &str> {
        self.pairs
            .iter()
            .map(|p| p.primary_output.as_str())
            .filter(|p| !p.is_empty())
    }

    pub fn primary_output(&self) -> Option<&str> {
        self.primary_outputs().next()
    }

    /// Adds an output of `file_type` beyond the primary ones.  There may be
    /// at most one per primary input.
    pub fn add_additional_output(
        &mut self,
        file_type: FileType,
        path: impl Into<String>,
    ) -> anyhow::Result<()> {
        let limit = self.pairs.len().max(1);
        let paths = self.additional.get_or_insert_with(file_type, Vec::new);
        if paths.len() >= limit {
            bail!(
                "too many {} outputs: {} inputs already have {}",
                file_type,
                limit,
                paths.len()
            );
        }
        paths.push(path.into());
        Ok(())
    }

    pub fn additional_outputs(&self, file_type: FileType) -> &[String] {
        self.additional
            .get(&file_type)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn additional_output(&self, file_type: FileType) -> Option<&str> {
        self.additional_outputs(file_type).first().map(|s| s.as_str())
    }

    /// Every output path, primary first.
    pub fn all_outputs(&self) -> impl Iterator<Item = &str> {
        self.primary_outputs()
            .chain(self.additional.values().flatten().map(|s| s.as_str()))
    }

    /// Checks that each additional output type has 0, 1, or one-per-input
    /// paths.
    pub fn check_invariants(&self) -> anyhow::Result<()> {
        let n = self.pairs.len();
        for (file_type, paths) in self.additional.iter() {
            if !(paths.len() <= 1 || paths.len() == n) {
                bail!(
                    "{} {} outputs for {} primary inputs",
                    paths.len(),
                    file_type,
                    n
                );
            }
        }
        Ok(())
    }
}

/// An executable unit of work.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub action: ActionId,
    pub kind: ActionKind,
    pub tool: ToolKind,
    /// Resolved path of the tool, or its bare name when it wasn't found.
    pub exec: String,
    pub args: Vec<String>,
    /// Variables set on top of the inherited environment.
    pub env: Vec<(String, String)>,
    pub output: CommandOutput,
    /// Every input path, in order.
    pub inputs: Vec<String>,
    /// Jobs producing this job's inputs.
    pub deps: Vec<JobId>,
    pub condition: JobCondition,
    pub limits: ResourceLimits,
    /// Inputs whose history this job refreshes when it succeeds.
    pub history_inputs: Vec<String>,
}

fn quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-_./=:+,@%".contains(&b))
    {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}

impl Job {
    /// The command line as a shell would accept it.
    pub fn command_line(&self) -> String {
        let mut line = quote(&self.exec);
        for arg in &self.args {
            line.push(' ');
            line.push_str(&quote(arg));
        }
        line
    }

    /// Short human description, e.g. "compile a.stone".
    pub fn description(&self) -> String {
        let subject = match self.output.pairs().iter().find(|p| !p.input.is_empty()) {
            Some(pair) if self.kind == ActionKind::Compile => pair.input.as_str(),
            _ => self
                .output
                .primary_output()
                .or_else(|| self.inputs.first().map(|s| s.as_str()))
                .unwrap_or(""),
        };
        format!("{} {}", self.kind, subject)
    }

    /// The output under which incremental builds remember this job's
    /// command.  Compiles are tracked through their sources instead.
    pub fn command_key(&self) -> Option<&str> {
        if self.kind == ActionKind::Compile {
            None
        } else {
            self.output.primary_output()
        }
    }

    /// Hash of everything that determines what the job produces.  Scratch
    /// file lists get fresh names each run, so they're left out; the paths
    /// they hold are already among the inputs.
    pub fn signature(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.kind.hash(&mut hasher);
        self.exec.hash(&mut hasher);
        for arg in self.args.iter().filter(|arg| !arg.ends_with(".filelist")) {
            arg.hash(&mut hasher);
        }
        self.env.hash(&mut hasher);
        self.inputs.hash(&mut hasher);
        for output in self.output.all_outputs() {
            output.hash(&mut hasher);
        }
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arity() -> anyhow::Result<()> {
        let mut out = CommandOutput::new(FileType::Object);
        out.add_primary_output("a.stone", "a.o");
        out.add_primary_output("b.stone", "b.o");
        out.add_primary_output("c.stone", "c.o");
        out.add_additional_output(FileType::Module, "main.stonemodule")?;
        out.check_invariants()?;
        // Two of three is not a valid arity.
        out.add_additional_output(FileType::Module, "b.stonemodule")?;
        assert!(out.check_invariants().is_err());
        out.add_additional_output(FileType::Module, "c.stonemodule")?;
        out.check_invariants()?;
        assert!(out.add_additional_output(FileType::Module, "d.stonemodule").is_err());
        assert_eq!(out.additional_outputs(FileType::Module).len(), 3);
        assert_eq!(out.additional_outputs(FileType::Dependencies).len(), 0);
        Ok(())
    }

    #[test]
    fn single_output_job() -> anyhow::Result<()> {
        let mut out = CommandOutput::new(FileType::Image);
        out.add_primary_output("", "main");
        out.add_additional_output(FileType::Dependencies, "main.d")?;
        assert!(out.add_additional_output(FileType::Dependencies, "x.d").is_err());
        assert_eq!(out.all_outputs().collect::<Vec<_>>(), vec!["main", "main.d"]);
        Ok(())
    }

    #[test]
    fn none_outputs_skipped() {
        let mut out = CommandOutput::new(FileType::None);
        out.add_primary_output("a.stone", "");
        assert_eq!(out.primary_output(), None);
        assert_eq!(out.pairs().len(), 1);
    }

    #[test]
    fn combine_conditions() {
        use JobCondition::*;
        assert_eq!(CheckDependencies.combine(RunWithoutCascading), RunWithoutCascading);
        assert_eq!(Always.combine(CheckDependencies), Always);
        assert_eq!(CheckDependencies.combine(CheckDependencies), CheckDependencies);
        assert_eq!(RunWithoutCascading.combine(NewlyAdded), NewlyAdded);
    }

    fn link_job(inputs: &[&str], args: &[&str]) -> Job {
        let mut output = CommandOutput::new(FileType::Image);
        output.add_primary_output("", "main");
        Job {
            id: JobId::from(0),
            action: ActionId::from(0),
            kind: ActionKind::ExecutableLink,
            tool: ToolKind::Linker,
            exec: "clang".to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            env: Vec::new(),
            output,
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            deps: Vec::new(),
            condition: JobCondition::Always,
            limits: ResourceLimits::default(),
            history_inputs: Vec::new(),
        }
    }

    #[test]
    fn signature_tracks_inputs_not_scratch_names() {
        let a = link_job(&["a.o", "b.o"], &["@/tmp/x1/link-0.filelist", "-o", "main"]);
        let b = link_job(&["a.o", "b.o"], &["@/tmp/x2/link-0.filelist", "-o", "main"]);
        assert_eq!(a.signature(), b.signature());
        let dropped = link_job(&["a.o"], &["@/tmp/x2/link-0.filelist", "-o", "main"]);
        assert_ne!(a.signature(), dropped.signature());
        let flagged = link_job(&["a.o", "b.o"], &["-static", "-o", "main"]);
        assert_ne!(b.signature(), flagged.signature());
        assert_eq!(a.command_key(), Some("main"));
    }

    #[test]
    fn quoting() {
        assert_eq!(quote("a.o"), "a.o");
        assert_eq!(quote("my file.o"), "'my file.o'");
        assert_eq!(quote("it's"), "'it'\\''s'");
        assert_eq!(quote(""), "''");
    }
}
