//! Toolchains: the programs a platform builds with, and how each action
//! becomes a command line for one of them.

use crate::action::{ActionId, ActionKind, JobAction};
use crate::compilation::TempFiles;
use crate::error::DriverError;
use crate::file::FileType;
use crate::job::{CommandOutput, Job, JobCondition, JobId};
use crate::options::{LinkMode, OutputOptions};
use crate::triple::{OsFamily, Triple};
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};

/// Combined length of input arguments past which inputs are passed in a
/// file list instead of on the command line.
pub const RESPONSE_FILE_THRESHOLD: usize = 32 * 1024;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ToolKind {
    /// The stone frontend, `stone-compile`.
    Compiler,
    Linker,
    Archiver,
    /// A C compiler, used to assemble.
    CCompiler,
    Vcs,
}

impl ToolKind {
    pub const ALL: [ToolKind; 5] = [
        ToolKind::Compiler,
        ToolKind::Linker,
        ToolKind::Archiver,
        ToolKind::CCompiler,
        ToolKind::Vcs,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn purpose(self) -> &'static str {
        match self {
            ToolKind::Compiler => "compiling",
            ToolKind::Linker => "linking",
            ToolKind::Archiver => "archiving",
            ToolKind::CCompiler => "assembling",
            ToolKind::Vcs => "version control",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tool {
    pub kind: ToolKind,
    /// None when no candidate was found.
    pub path: Option<PathBuf>,
    pub short_name: String,
    /// Resolved to the platform's preferred program rather than a fallback.
    pub is_default: bool,
}

impl Tool {
    /// What to execute: the resolved path, or the bare name.
    pub fn exec(&self) -> String {
        match &self.path {
            Some(path) => path.to_string_lossy().into_owned(),
            None => self.short_name.clone(),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ToolChainKind {
    /// Linux and other ELF unixes, linking through the C compiler driver.
    Linux,
    Darwin,
    Windows,
}

impl ToolChainKind {
    pub fn for_triple(triple: &Triple) -> Result<ToolChainKind, DriverError> {
        match triple.os_family() {
            Some(OsFamily::Linux) => Ok(ToolChainKind::Linux),
            Some(OsFamily::Darwin) => Ok(ToolChainKind::Darwin),
            Some(OsFamily::Windows) => Ok(ToolChainKind::Windows),
            None => Err(DriverError::UnsupportedTarget(triple.to_string())),
        }
    }

    /// Program names to probe for a tool, most preferred first.
    pub fn candidates(self, kind: ToolKind) -> &'static [&'static str] {
        match (self, kind) {
            (_, ToolKind::Compiler) => &["stone-compile"],
            (_, ToolKind::Vcs) => &["git"],
            (ToolChainKind::Linux, ToolKind::Linker) => &["clang", "gcc"],
            (ToolChainKind::Linux, ToolKind::Archiver) => &["ar", "llvm-ar"],
            (ToolChainKind::Linux, ToolKind::CCompiler) => &["clang", "gcc"],
            (ToolChainKind::Darwin, ToolKind::Linker) => &["ld", "ld64.lld"],
            (ToolChainKind::Darwin, ToolKind::Archiver) => &["libtool"],
            (ToolChainKind::Darwin, ToolKind::CCompiler) => &["clang"],
            (ToolChainKind::Windows, ToolKind::Linker) => &["lld-link", "link"],
            (ToolChainKind::Windows, ToolKind::Archiver) => &["llvm-lib", "lib"],
            (ToolChainKind::Windows, ToolKind::CCompiler) => &["clang"],
        }
    }

    pub fn object_extension(self) -> &'static str {
        match self {
            ToolChainKind::Windows => "obj",
            ToolChainKind::Linux | ToolChainKind::Darwin => "o",
        }
    }

    /// Default file name of the linked product.
    pub fn image_name(self, link_mode: LinkMode, module_name: &str) -> String {
        match (self, link_mode) {
            (ToolChainKind::Windows, LinkMode::EmitExecutable) => format!("{}.exe", module_name),
            (ToolChainKind::Windows, LinkMode::EmitDynamicLibrary) => format!("{}.dll", module_name),
            (ToolChainKind::Windows, LinkMode::EmitStaticLibrary) => format!("{}.lib", module_name),
            (ToolChainKind::Darwin, LinkMode::EmitDynamicLibrary) => {
                format!("lib{}.dylib", module_name)
            }
            (ToolChainKind::Linux, LinkMode::EmitDynamicLibrary) => format!("lib{}.so", module_name),
            (_, LinkMode::EmitStaticLibrary) => format!("lib{}.a", module_name),
            (_, LinkMode::EmitExecutable) | (_, LinkMode::None) => module_name.to_string(),
        }
    }
}

/// Everything about a job except its tool and command line, which
/// construct_job() fills in.
pub struct JobRequest {
    pub id: JobId,
    pub action: ActionId,
    /// Resolved path of every action input, in order.
    pub inputs: Vec<String>,
    pub output: CommandOutput,
    pub deps: Vec<JobId>,
    pub condition: JobCondition,
    pub history_inputs: Vec<String>,
}

pub struct ToolChain {
    pub kind: ToolChainKind,
    pub triple: Triple,
    tools_dir: Option<PathBuf>,
    search_path: Vec<PathBuf>,
    tools: Vec<Tool>,
    program_cache: FxHashMap<String, Option<PathBuf>>,
    pub response_file_threshold: usize,
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

impl ToolChain {
    /// A toolchain for `triple` that looks for programs in `tools_dir`
    /// first, then along `search_path`.
    pub fn new(
        triple: Triple,
        tools_dir: Option<PathBuf>,
        search_path: Vec<PathBuf>,
    ) -> Result<ToolChain, DriverError> {
        let kind = ToolChainKind::for_triple(&triple)?;
        let tools = ToolKind::ALL
            .iter()
            .map(|&tool_kind| Tool {
                kind: tool_kind,
                path: None,
                short_name: kind.candidates(tool_kind)[0].to_string(),
                is_default: false,
            })
            .collect();
        Ok(ToolChain {
            kind,
            triple,
            tools_dir,
            search_path,
            tools,
            program_cache: FxHashMap::default(),
            response_file_threshold: RESPONSE_FILE_THRESHOLD,
        })
    }

    /// Like new(), searching `PATH`, and defaulting the tools directory to
    /// the one holding the driver itself.
    pub fn from_env(triple: Triple, tools_dir: Option<PathBuf>) -> Result<ToolChain, DriverError> {
        let tools_dir = tools_dir.or_else(|| {
            std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(Path::to_path_buf))
        });
        let search_path = match std::env::var_os("PATH") {
            Some(path) => std::env::split_paths(&path)
                .filter(|dir| !dir.as_os_str().is_empty())
                .collect(),
            None => Vec::new(),
        };
        ToolChain::new(triple, tools_dir, search_path)
    }

    /// Probes for every well-known tool.  Tools that aren't found are
    /// recorded as absent; only jobs that need them fail.
    pub fn initialize(&mut self) {
        for kind in ToolKind::ALL {
            let candidates = self.kind.candidates(kind);
            let mut tool = Tool {
                kind,
                path: None,
                short_name: candidates[0].to_string(),
                is_default: false,
            };
            for (i, name) in candidates.iter().enumerate() {
                if let Some(path) = self.find_program_relative_to_toolchain(name) {
                    tool = Tool {
                        kind,
                        path: Some(path),
                        short_name: name.to_string(),
                        is_default: i == 0,
                    };
                    break;
                }
            }
            match &tool.path {
                Some(path) => tracing::debug!(
                    tool = %tool.short_name,
                    path = %path.display(),
                    "found tool for {}",
                    kind.purpose()
                ),
                None => tracing::debug!(tool = %tool.short_name, "no tool for {}", kind.purpose()),
            }
            self.tools[kind.index()] = tool;
        }
    }

    /// Looks `name` up in the tools directory, then the search path.
    /// Results, including misses, are cached for the toolchain's lifetime.
    pub fn find_program_relative_to_toolchain(&mut self, name: &str) -> Option<PathBuf> {
        if let Some(found) = self.program_cache.get(name) {
            return found.clone();
        }
        let file_name = format!("{}{}", name, std::env::consts::EXE_SUFFIX);
        let found = self
            .tools_dir
            .iter()
            .chain(self.search_path.iter())
            .map(|dir| dir.join(&file_name))
            .find(|path| is_executable(path));
        self.program_cache.insert(name.to_string(), found.clone());
        found
    }

    pub fn tool(&self, kind: ToolKind) -> &Tool {
        &self.tools[kind.index()]
    }

    /// Where programs were looked for, for error messages.
    fn searched(&self) -> String {
        let dirs: Vec<String> = self
            .tools_dir
            .iter()
            .chain(self.search_path.iter())
            .map(|p| p.display().to_string())
            .collect();
        if dirs.is_empty() {
            "nowhere".to_string()
        } else {
            dirs.join(", ")
        }
    }

    /// Fails on the first of `kinds` that wasn't found.
    pub fn validate_required_tools(
        &self,
        kinds: impl IntoIterator<Item = ToolKind>,
    ) -> Result<(), DriverError> {
        for kind in kinds {
            let tool = self.tool(kind);
            if tool.path.is_none() {
                return Err(DriverError::MissingTool {
                    tool: self.kind.candidates(kind).join(" or "),
                    purpose: kind.purpose(),
                    searched: self.searched(),
                });
            }
        }
        Ok(())
    }

    pub fn tool_kind_for(&self, action: ActionKind) -> ToolKind {
        match action {
            ActionKind::Compile
            | ActionKind::Backend
            | ActionKind::MergeModule
            | ActionKind::ModuleWrap => ToolKind::Compiler,
            ActionKind::Assemble => ToolKind::CCompiler,
            ActionKind::DynamicLink | ActionKind::ExecutableLink => ToolKind::Linker,
            ActionKind::StaticLink => ToolKind::Archiver,
        }
    }

    fn too_long(&self, paths: &[String]) -> bool {
        paths.iter().map(|p| p.len() + 1).sum::<usize>() > self.response_file_threshold
    }

    /// Turns an action into a job: picks the tool and builds its command
    /// line from the request's resolved inputs and outputs.
    pub fn construct_job(
        &self,
        action: &JobAction,
        temps: &mut TempFiles,
        req: JobRequest,
        opts: &OutputOptions,
    ) -> anyhow::Result<Job> {
        let tool_kind = self.tool_kind_for(action.kind);
        let tool = self.tool(tool_kind);
        let mut env = Vec::new();
        let args = match action.kind {
            ActionKind::Compile => self.compile_args(&req, temps, opts)?,
            ActionKind::Backend => self.backend_args(&req, opts),
            ActionKind::MergeModule => self.merge_module_args(&req, opts),
            ActionKind::ModuleWrap => self.module_wrap_args(&req),
            ActionKind::Assemble => self.assemble_args(tool, &req, opts),
            ActionKind::ExecutableLink => self.link_args(tool, &req, temps, opts, false)?,
            ActionKind::DynamicLink => self.link_args(tool, &req, temps, opts, true)?,
            ActionKind::StaticLink => {
                if self.kind == ToolChainKind::Darwin {
                    // Keep archives reproducible.
                    env.push(("ZERO_AR_DATE".to_string(), "1".to_string()));
                }
                self.archive_args(&req, temps)?
            }
        };
        req.output.check_invariants()?;
        Ok(Job {
            id: req.id,
            action: req.action,
            kind: action.kind,
            tool: tool_kind,
            exec: tool.exec(),
            args,
            env,
            output: req.output,
            inputs: req.inputs,
            deps: req.deps,
            condition: req.condition,
            limits: opts.limits,
            history_inputs: req.history_inputs,
        })
    }

    fn common_frontend_args(&self, args: &mut Vec<String>, opts: &OutputOptions) {
        args.push("-target".to_string());
        args.push(self.triple.to_string());
        args.push("-module-name".to_string());
        args.push(opts.module_name.clone());
        if opts.debug_info {
            args.push("-g".to_string());
        }
    }

    fn push_outputs(args: &mut Vec<String>, output: &CommandOutput) {
        for out in output.primary_outputs() {
            args.push("-o".to_string());
            args.push(out.to_string());
        }
        for (file_type, flag) in [
            (FileType::Module, "-emit-module-path"),
            (FileType::Dependencies, "-emit-dependencies-path"),
        ] {
            for path in output.additional_outputs(file_type) {
                args.push(flag.to_string());
                args.push(path.clone());
            }
        }
    }

    fn compile_args(
        &self,
        req: &JobRequest,
        temps: &mut TempFiles,
        opts: &OutputOptions,
    ) -> anyhow::Result<Vec<String>> {
        let mut args = vec![
            "-frontend".to_string(),
            "-c".to_string(),
            opts.compile_mode.flag().to_string(),
        ];
        let primaries: Vec<String> = req
            .output
            .pairs()
            .iter()
            .filter(|p| !p.input.is_empty())
            .map(|p| p.input.clone())
            .collect();
        if self.too_long(&req.inputs) {
            args.push("-filelist".to_string());
            args.push(temps.write_filelist("inputs", &req.inputs)?);
            if primaries.len() > 1 {
                args.push("-primary-filelist".to_string());
                args.push(temps.write_filelist("primaries", &primaries)?);
            } else {
                for p in &primaries {
                    args.push("-primary-file".to_string());
                    args.push(p.clone());
                }
            }
        } else {
            for input in &req.inputs {
                if primaries.contains(input) {
                    args.push("-primary-file".to_string());
                }
                args.push(input.clone());
            }
        }
        Self::push_outputs(&mut args, &req.output);
        self.common_frontend_args(&mut args, opts);
        Ok(args)
    }

    fn backend_args(&self, req: &JobRequest, opts: &OutputOptions) -> Vec<String> {
        let mode = match req.output.primary_output_type() {
            FileType::Assembly => "-emit-assembly",
            _ => "-emit-object",
        };
        let mut args = vec![
            "-frontend".to_string(),
            "-c".to_string(),
            "-backend".to_string(),
            mode.to_string(),
        ];
        args.extend(req.inputs.iter().cloned());
        Self::push_outputs(&mut args, &req.output);
        self.common_frontend_args(&mut args, opts);
        args
    }

    fn merge_module_args(&self, req: &JobRequest, opts: &OutputOptions) -> Vec<String> {
        let mut args = vec![
            "-frontend".to_string(),
            "-merge-modules".to_string(),
            "-emit-module".to_string(),
        ];
        args.extend(req.inputs.iter().cloned());
        Self::push_outputs(&mut args, &req.output);
        self.common_frontend_args(&mut args, opts);
        args
    }

    fn module_wrap_args(&self, req: &JobRequest) -> Vec<String> {
        let mut args = vec!["-modulewrap".to_string()];
        args.extend(req.inputs.iter().cloned());
        args.push("-target".to_string());
        args.push(self.triple.to_string());
        Self::push_outputs(&mut args, &req.output);
        args
    }

    fn assemble_args(&self, tool: &Tool, req: &JobRequest, opts: &OutputOptions) -> Vec<String> {
        let mut args = vec!["-c".to_string()];
        args.extend(req.inputs.iter().cloned());
        if tool.short_name == "clang" {
            args.push("-target".to_string());
            args.push(self.triple.to_string());
        }
        if opts.debug_info {
            args.push("-g".to_string());
        }
        for out in req.output.primary_outputs() {
            args.push("-o".to_string());
            args.push(out.to_string());
        }
        args
    }

    /// Inputs as arguments, or as a file list when there are too many.
    fn link_inputs(
        &self,
        args: &mut Vec<String>,
        inputs: &[String],
        temps: &mut TempFiles,
    ) -> anyhow::Result<()> {
        if !self.too_long(inputs) {
            args.extend(inputs.iter().cloned());
            return Ok(());
        }
        let list = temps.write_filelist("link", inputs)?;
        match self.kind {
            ToolChainKind::Darwin => {
                args.push("-filelist".to_string());
                args.push(list);
            }
            ToolChainKind::Linux | ToolChainKind::Windows => args.push(format!("@{}", list)),
        }
        Ok(())
    }

    fn link_args(
        &self,
        tool: &Tool,
        req: &JobRequest,
        temps: &mut TempFiles,
        opts: &OutputOptions,
        dynamic: bool,
    ) -> anyhow::Result<Vec<String>> {
        let mut args = Vec::new();
        let output = req.output.primary_output().unwrap_or_default().to_string();
        match self.kind {
            ToolChainKind::Linux => {
                if dynamic {
                    args.push("-shared".to_string());
                }
                self.link_inputs(&mut args, &req.inputs, temps)?;
                if tool.short_name == "clang" {
                    args.push("-target".to_string());
                    args.push(self.triple.to_string());
                }
                if opts.debug_info {
                    args.push("-g".to_string());
                }
                for dir in &opts.library_paths {
                    args.push(format!("-L{}", dir));
                }
                for lib in &opts.libraries {
                    args.push(format!("-l{}", lib));
                }
                args.push("-o".to_string());
                args.push(output);
            }
            ToolChainKind::Darwin => {
                if dynamic {
                    args.push("-dylib".to_string());
                }
                self.link_inputs(&mut args, &req.inputs, temps)?;
                args.push("-arch".to_string());
                args.push(self.triple.darwin_arch().to_string());
                for dir in &opts.library_paths {
                    args.push(format!("-L{}", dir));
                }
                for lib in &opts.libraries {
                    args.push(format!("-l{}", lib));
                }
                args.push("-lSystem".to_string());
                args.push("-o".to_string());
                args.push(output);
            }
            ToolChainKind::Windows => {
                args.push("/NOLOGO".to_string());
                if dynamic {
                    args.push("/DLL".to_string());
                }
                if opts.debug_info {
                    args.push("/DEBUG".to_string());
                }
                self.link_inputs(&mut args, &req.inputs, temps)?;
                for dir in &opts.library_paths {
                    args.push(format!("/LIBPATH:{}", dir));
                }
                for lib in &opts.libraries {
                    args.push(format!("{}.lib", lib));
                }
                args.push(format!("/OUT:{}", output));
            }
        }
        Ok(args)
    }

    fn archive_args(&self, req: &JobRequest, temps: &mut TempFiles) -> anyhow::Result<Vec<String>> {
        let output = req.output.primary_output().unwrap_or_default().to_string();
        let mut args = Vec::new();
        match self.kind {
            ToolChainKind::Linux => {
                args.push("crs".to_string());
                args.push(output);
                self.link_inputs(&mut args, &req.inputs, temps)?;
            }
            ToolChainKind::Darwin => {
                args.push("-static".to_string());
                args.push("-o".to_string());
                args.push(output);
                self.link_inputs(&mut args, &req.inputs, temps)?;
            }
            ToolChainKind::Windows => {
                args.push("/NOLOGO".to_string());
                args.push(format!("/OUT:{}", output));
                self.link_inputs(&mut args, &req.inputs, temps)?;
            }
        }
        Ok(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionGraph, ActionInput};
    use crate::file::{FileId, Inputs};
    use crate::options::CompileMode;

    /// Creates executable stand-ins for `names` in a fresh directory.
    pub fn fake_tools(names: &[&str]) -> anyhow::Result<tempfile::TempDir> {
        let dir = tempfile::tempdir()?;
        for name in names {
            let path = dir
                .path()
                .join(format!("{}{}", name, std::env::consts::EXE_SUFFIX));
            std::fs::write(&path, "#!/bin/sh\n")?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
            }
        }
        Ok(dir)
    }

    fn toolchain(triple: &str, dir: &Path) -> ToolChain {
        let mut tc =
            ToolChain::new(Triple::parse(triple).unwrap(), Some(dir.to_path_buf()), vec![]).unwrap();
        tc.initialize();
        tc
    }

    fn link_job(tc: &ToolChain, kind: ActionKind, opts: &OutputOptions) -> anyhow::Result<Job> {
        let mut graph = ActionGraph::new();
        let mut inputs = Inputs::new();
        let a = inputs.add("a.o", FileType::Object);
        let b = inputs.add("b.o", FileType::Object);
        let id = graph.add(
            kind,
            FileType::Image,
            vec![ActionInput::File(a), ActionInput::File(b)],
            vec![],
        )?;
        let mut output = CommandOutput::new(FileType::Image);
        output.add_primary_output("", "out");
        let req = JobRequest {
            id: JobId::from(0),
            action: id,
            inputs: vec!["a.o".to_string(), "b.o".to_string()],
            output,
            deps: vec![],
            condition: JobCondition::Always,
            history_inputs: vec![],
        };
        let mut temps = TempFiles::new(false);
        tc.construct_job(graph.get(id), &mut temps, req, opts)
    }

    fn compile_job(
        tc: &ToolChain,
        temps: &mut TempFiles,
        opts: &OutputOptions,
    ) -> anyhow::Result<Job> {
        let mut graph = ActionGraph::new();
        let a = FileId::from(0);
        let b = FileId::from(1);
        let id = graph.add(
            ActionKind::Compile,
            FileType::Object,
            vec![ActionInput::File(a), ActionInput::File(b)],
            vec![a],
        )?;
        let mut output = CommandOutput::new(FileType::Object);
        output.add_primary_output("a.stone", "a.o");
        output.add_additional_output(FileType::Dependencies, "a.d")?;
        let req = JobRequest {
            id: JobId::from(0),
            action: id,
            inputs: vec!["a.stone".to_string(), "b.stone".to_string()],
            output,
            deps: vec![],
            condition: JobCondition::Always,
            history_inputs: vec!["a.stone".to_string()],
        };
        tc.construct_job(graph.get(id), temps, req, opts)
    }

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn unsupported_target() {
        let err = ToolChain::new(Triple::parse("riscv64-unknown-haiku").unwrap(), None, vec![])
            .err()
            .unwrap();
        assert!(matches!(err, DriverError::UnsupportedTarget(_)));
    }

    #[test]
    fn probing_prefers_first_candidate() -> anyhow::Result<()> {
        let dir = fake_tools(&["stone-compile", "gcc", "ar"])?;
        let tc = toolchain("x86_64-unknown-linux-gnu", dir.path());
        let compiler = tc.tool(ToolKind::Compiler);
        assert!(compiler.path.is_some());
        assert!(compiler.is_default);
        // clang is preferred, so gcc is a fallback.
        let linker = tc.tool(ToolKind::Linker);
        assert_eq!(linker.short_name, "gcc");
        assert!(!linker.is_default);
        let vcs = tc.tool(ToolKind::Vcs);
        assert_eq!(vcs.path, None);
        assert_eq!(vcs.exec(), "git");
        Ok(())
    }

    #[test]
    fn lookups_are_cached() -> anyhow::Result<()> {
        let dir = fake_tools(&[])?;
        let mut tc = ToolChain::new(
            Triple::parse("x86_64-unknown-linux-gnu").unwrap(),
            Some(dir.path().to_path_buf()),
            vec![],
        )?;
        assert_eq!(tc.find_program_relative_to_toolchain("stone-compile"), None);
        std::fs::write(dir.path().join("stone-compile"), "")?;
        // Still the cached miss.
        assert_eq!(tc.find_program_relative_to_toolchain("stone-compile"), None);
        Ok(())
    }

    #[test]
    fn missing_tool_is_reported() -> anyhow::Result<()> {
        let dir = fake_tools(&["stone-compile"])?;
        let tc = toolchain("x86_64-unknown-linux-gnu", dir.path());
        assert!(tc.validate_required_tools([ToolKind::Compiler]).is_ok());
        let err = tc
            .validate_required_tools([ToolKind::Compiler, ToolKind::Linker])
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("clang or gcc"), "{}", msg);
        assert!(msg.contains("linking"), "{}", msg);
        Ok(())
    }

    #[test]
    fn compile_command_line() -> anyhow::Result<()> {
        let dir = fake_tools(&["stone-compile"])?;
        let tc = toolchain("x86_64-unknown-linux-gnu", dir.path());
        let opts = OutputOptions::new(CompileMode::EmitObject, LinkMode::None);
        let mut temps = TempFiles::new(false);
        let job = compile_job(&tc, &mut temps, &opts)?;
        assert_eq!(job.tool, ToolKind::Compiler);
        assert!(job.exec.ends_with("stone-compile"));
        assert_eq!(
            job.args,
            strings(&[
                "-frontend",
                "-c",
                "-emit-object",
                "-primary-file",
                "a.stone",
                "b.stone",
                "-o",
                "a.o",
                "-emit-dependencies-path",
                "a.d",
                "-target",
                "x86_64-unknown-linux-gnu",
                "-module-name",
                "main",
            ])
        );
        Ok(())
    }

    #[test]
    fn long_compile_uses_filelist() -> anyhow::Result<()> {
        let dir = fake_tools(&["stone-compile"])?;
        let mut tc = toolchain("x86_64-unknown-linux-gnu", dir.path());
        tc.response_file_threshold = 4;
        let opts = OutputOptions::new(CompileMode::EmitObject, LinkMode::None);
        let mut temps = TempFiles::new(false);
        let job = compile_job(&tc, &mut temps, &opts)?;
        assert_eq!(job.args[3], "-filelist");
        let list = std::fs::read_to_string(&job.args[4])?;
        assert_eq!(list, "a.stone\nb.stone\n");
        assert_eq!(job.args[5..7], strings(&["-primary-file", "a.stone"])[..]);
        Ok(())
    }

    #[test]
    fn linux_links() -> anyhow::Result<()> {
        let dir = fake_tools(&["clang", "ar"])?;
        let tc = toolchain("x86_64-unknown-linux-gnu", dir.path());
        let mut opts = OutputOptions::new(CompileMode::EmitObject, LinkMode::EmitExecutable);
        opts.library_paths = strings(&["lib"]);
        opts.libraries = strings(&["m"]);

        let exe = link_job(&tc, ActionKind::ExecutableLink, &opts)?;
        assert_eq!(exe.tool, ToolKind::Linker);
        assert_eq!(
            exe.args,
            strings(&["a.o", "b.o", "-target", "x86_64-unknown-linux-gnu", "-Llib", "-lm", "-o", "out"])
        );
        let dylib = link_job(&tc, ActionKind::DynamicLink, &opts)?;
        assert_eq!(dylib.args[0], "-shared");
        let lib = link_job(&tc, ActionKind::StaticLink, &opts)?;
        assert_eq!(lib.tool, ToolKind::Archiver);
        assert_eq!(lib.args, strings(&["crs", "out", "a.o", "b.o"]));
        assert!(lib.env.is_empty());
        Ok(())
    }

    #[test]
    fn darwin_links() -> anyhow::Result<()> {
        let dir = fake_tools(&["ld", "libtool"])?;
        let tc = toolchain("aarch64-apple-macosx13.0", dir.path());
        let opts = OutputOptions::new(CompileMode::EmitObject, LinkMode::EmitDynamicLibrary);
        let dylib = link_job(&tc, ActionKind::DynamicLink, &opts)?;
        assert_eq!(
            dylib.args,
            strings(&["-dylib", "a.o", "b.o", "-arch", "arm64", "-lSystem", "-o", "out"])
        );
        let lib = link_job(&tc, ActionKind::StaticLink, &opts)?;
        assert_eq!(lib.args, strings(&["-static", "-o", "out", "a.o", "b.o"]));
        assert_eq!(lib.env, vec![("ZERO_AR_DATE".to_string(), "1".to_string())]);
        Ok(())
    }

    #[test]
    fn windows_links() -> anyhow::Result<()> {
        let dir = fake_tools(&["lld-link", "llvm-lib"])?;
        let tc = toolchain("x86_64-pc-windows-msvc", dir.path());
        let mut opts = OutputOptions::new(CompileMode::EmitObject, LinkMode::EmitDynamicLibrary);
        opts.libraries = strings(&["kernel32"]);
        let dll = link_job(&tc, ActionKind::DynamicLink, &opts)?;
        assert_eq!(
            dll.args,
            strings(&["/NOLOGO", "/DLL", "a.o", "b.o", "kernel32.lib", "/OUT:out"])
        );
        let lib = link_job(&tc, ActionKind::StaticLink, &opts)?;
        assert_eq!(lib.args, strings(&["/NOLOGO", "/OUT:out", "a.o", "b.o"]));
        assert_eq!(tc.kind.image_name(LinkMode::EmitExecutable, "main"), "main.exe");
        Ok(())
    }

    #[test]
    fn long_link_uses_response_file() -> anyhow::Result<()> {
        let dir = fake_tools(&["clang"])?;
        let mut tc = toolchain("x86_64-unknown-linux-gnu", dir.path());
        tc.response_file_threshold = 4;
        let opts = OutputOptions::new(CompileMode::EmitObject, LinkMode::EmitExecutable);
        let exe = link_job(&tc, ActionKind::ExecutableLink, &opts)?;
        assert!(exe.args[0].starts_with('@'), "{:?}", exe.args);
        Ok(())
    }

    fn single_input_job(tc: &ToolChain, kind: ActionKind, input: &str, out: &str) -> Job {
        let mut graph = ActionGraph::new();
        let file = FileId::from(0);
        let id = graph
            .add(kind, FileType::Object, vec![ActionInput::File(file)], vec![])
            .unwrap();
        let mut output = CommandOutput::new(FileType::Object);
        output.add_primary_output(input, out);
        let req = JobRequest {
            id: JobId::from(0),
            action: id,
            inputs: vec![input.to_string()],
            output,
            deps: vec![],
            condition: JobCondition::Always,
            history_inputs: vec![input.to_string()],
        };
        let opts = OutputOptions::new(CompileMode::EmitObject, LinkMode::None);
        tc.construct_job(graph.get(id), &mut TempFiles::new(false), req, &opts)
            .unwrap()
    }

    #[test]
    fn backend_and_assemble() -> anyhow::Result<()> {
        let dir = fake_tools(&["stone-compile", "clang"])?;
        let tc = toolchain("x86_64-unknown-linux-gnu", dir.path());
        let backend = single_input_job(&tc, ActionKind::Backend, "z.ll", "z.o");
        assert_eq!(backend.tool, ToolKind::Compiler);
        assert_eq!(
            backend.args[..6],
            strings(&["-frontend", "-c", "-backend", "-emit-object", "z.ll", "-o"])[..]
        );
        let asm = single_input_job(&tc, ActionKind::Assemble, "y.s", "y.o");
        assert_eq!(asm.tool, ToolKind::CCompiler);
        assert_eq!(
            asm.args,
            strings(&["-c", "y.s", "-target", "x86_64-unknown-linux-gnu", "-o", "y.o"])
        );
        Ok(())
    }

    #[test]
    fn image_names() {
        assert_eq!(ToolChainKind::Linux.image_name(LinkMode::EmitDynamicLibrary, "foo"), "libfoo.so");
        assert_eq!(ToolChainKind::Darwin.image_name(LinkMode::EmitDynamicLibrary, "foo"), "libfoo.dylib");
        assert_eq!(ToolChainKind::Darwin.image_name(LinkMode::EmitStaticLibrary, "foo"), "libfoo.a");
        assert_eq!(ToolChainKind::Linux.image_name(LinkMode::EmitExecutable, "foo"), "foo");
    }
}
