//! Command-line options, and the output options derived from them that drive
//! planning.

use crate::error::DriverError;
use crate::file::FileType;
use crate::output_file_map::OutputFileMap;
use crate::process::ResourceLimits;
use argh::FromArgs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// What each compile job is asked to produce.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompileMode {
    Parse,
    Typecheck,
    EmitIR,
    EmitBC,
    EmitAssembly,
    EmitObject,
}

impl CompileMode {
    /// The compiler flag selecting this mode.
    pub fn flag(self) -> &'static str {
        match self {
            CompileMode::Parse => "-parse",
            CompileMode::Typecheck => "-typecheck",
            CompileMode::EmitIR => "-emit-ir",
            CompileMode::EmitBC => "-emit-bc",
            CompileMode::EmitAssembly => "-emit-assembly",
            CompileMode::EmitObject => "-emit-object",
        }
    }

    pub fn output_type(self) -> FileType {
        match self {
            CompileMode::Parse | CompileMode::Typecheck => FileType::None,
            CompileMode::EmitIR => FileType::IR,
            CompileMode::EmitBC => FileType::BitCode,
            CompileMode::EmitAssembly => FileType::Assembly,
            CompileMode::EmitObject => FileType::Object,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LinkMode {
    None,
    EmitExecutable,
    EmitDynamicLibrary,
    EmitStaticLibrary,
}

/// How source files are grouped into compile jobs.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompilationModelKind {
    /// One job per source, each seeing every other source.
    Quadratic,
    /// One job per source, seeing only that source.
    Flat,
    /// One job for the whole module.
    Single,
    /// Sources split into a fixed number of batches.
    CPUCount,
}

impl FromStr for CompilationModelKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "quadratic" => CompilationModelKind::Quadratic,
            "flat" => CompilationModelKind::Flat,
            "single" => CompilationModelKind::Single,
            "cpu-count" => CompilationModelKind::CPUCount,
            _ => {
                return Err(format!(
                    "unknown compilation model {:?} (expected quadratic, flat, single or cpu-count)",
                    s
                ))
            }
        })
    }
}

#[derive(FromArgs, Debug)]
/// stone: compiles and links stone programs.
pub struct DriverOptions {
    /// parse the inputs only
    #[argh(switch)]
    pub parse: bool,
    /// parse and type-check the inputs
    #[argh(switch)]
    pub typecheck: bool,
    /// emit LLVM IR (.ll) files
    #[argh(switch)]
    pub emit_ir: bool,
    /// emit LLVM bitcode (.bc) files
    #[argh(switch)]
    pub emit_bc: bool,
    /// emit assembly (.s) files
    #[argh(switch)]
    pub emit_assembly: bool,
    /// emit object (.o) files
    #[argh(switch)]
    pub emit_object: bool,
    /// emit a library (dynamic unless -static is given)
    #[argh(switch)]
    pub emit_library: bool,
    /// with -emit-library, emit a static library
    #[argh(switch, long = "static")]
    pub static_library: bool,
    /// emit an executable (the default)
    #[argh(switch)]
    pub emit_executable: bool,
    /// link the given object files without compiling
    #[argh(switch)]
    pub link_only: bool,
    /// print the planned jobs and exit
    #[argh(switch)]
    pub print_jobs: bool,
    /// print the driver version and exit
    #[argh(switch)]
    pub version: bool,

    /// number of jobs to run at once [default from system]
    #[argh(option, short = 'j', long = "jobs")]
    pub jobs: Option<usize>,
    /// skip jobs whose inputs are unchanged since the last build
    #[argh(switch)]
    pub incremental: bool,
    /// compile the whole module in one job
    #[argh(switch)]
    pub whole_module: bool,
    /// compilation model: quadratic, flat, single or cpu-count
    #[argh(option)]
    pub compilation_model: Option<CompilationModelKind>,

    /// print the planned jobs before running them
    #[argh(switch)]
    pub driver_print_jobs: bool,
    /// print the planned actions before running
    #[argh(switch)]
    pub driver_print_actions: bool,
    /// log driver lifecycle events to stderr
    #[argh(switch)]
    pub driver_print_lifecycle: bool,
    /// print per-job timing and resource usage
    #[argh(switch)]
    pub driver_time_compilation: bool,
    /// write a chrome trace of the driver to this file
    #[argh(option)]
    pub driver_trace: Option<String>,

    /// directory searched first for tools
    #[argh(option)]
    pub tools_directory: Option<String>,
    /// target triple [default host]
    #[argh(option)]
    pub target: Option<String>,

    /// output path of the final product
    #[argh(option, short = 'o', long = "output")]
    pub output: Option<String>,
    /// name of the module being built [default main]
    #[argh(option)]
    pub module_name: Option<String>,
    /// file mapping inputs to their outputs
    #[argh(option)]
    pub output_file_map: Option<String>,
    /// write the output file map used for this build to this file
    #[argh(option)]
    pub emit_output_file_map: Option<String>,
    /// directory for intermediate outputs [default .]
    #[argh(option)]
    pub build_dir: Option<String>,
    /// emit a module interface (.stonemodule)
    #[argh(switch)]
    pub emit_module: bool,
    /// emit make-style dependency files (.d)
    #[argh(switch)]
    pub emit_dependencies: bool,
    /// emit debug info
    #[argh(switch, short = 'g', long = "debug-info")]
    pub debug_info: bool,
    /// add a library search path
    #[argh(option, short = 'L', long = "library-path")]
    pub library_paths: Vec<String>,
    /// link against a library
    #[argh(option, short = 'l', long = "library")]
    pub libraries: Vec<String>,

    /// keep going after a job fails
    #[argh(switch)]
    pub continue_building_after_errors: bool,
    /// kill any job running longer than this many seconds
    #[argh(option)]
    pub job_timeout: Option<u64>,
    /// limit each job's address space to this many MiB
    #[argh(option)]
    pub job_memory_limit: Option<u64>,
    /// keep temporary files
    #[argh(switch)]
    pub save_temps: bool,
    /// discard incremental build history before building
    #[argh(switch)]
    pub clean: bool,
    /// print executed command lines
    #[argh(switch, short = 'v')]
    pub verbose: bool,

    /// input files
    #[argh(positional)]
    pub inputs: Vec<String>,
}

/// Long flags that would otherwise read as `-l` joined to a library name.
const LONG_L_FLAGS: &[&str] = &["-library", "-library-path", "-link-only"];

/// Rewrites stone's single-dash long flags (`-emit-object`) into the double
/// dash form the argument parser expects, and splits joined short options
/// (`-j4`, `-Ldir`, `-lm`).
pub fn normalize_args(args: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    let mut rest = false;
    for arg in args {
        if rest || !arg.starts_with('-') || arg.starts_with("--") || arg.len() <= 2 {
            if arg == "--" {
                rest = true;
            }
            out.push(arg.clone());
            continue;
        }
        let (flag, value) = arg.split_at(2);
        let joined_short = match flag {
            "-j" => value.bytes().all(|b| b.is_ascii_digit()),
            "-L" => true,
            "-l" => !LONG_L_FLAGS.contains(&arg.as_str()),
            _ => false,
        };
        if joined_short {
            out.push(flag.to_string());
            out.push(value.to_string());
        } else {
            out.push(format!("-{}", arg));
        }
    }
    out
}

impl DriverOptions {
    /// Parses a command line (without the program name).  Returns the text
    /// to print and exit status for `-help` and for bad usage.
    pub fn parse_args(args: &[String]) -> Result<DriverOptions, argh::EarlyExit> {
        let args = normalize_args(args);
        let args: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        DriverOptions::from_args(&["stone"], &args)
    }

    pub fn parallelism(&self) -> anyhow::Result<usize> {
        Ok(match self.jobs {
            Some(0) => anyhow::bail!("invalid -j 0"),
            Some(n) => n,
            None => usize::from(std::thread::available_parallelism()?),
        })
    }

    fn limits(&self) -> ResourceLimits {
        ResourceLimits {
            timeout: self.job_timeout.map(Duration::from_secs),
            memory_bytes: self.job_memory_limit.map(|mib| mib * 1024 * 1024),
        }
    }

    /// Derives the planning options.  `output_file_map` is the already
    /// loaded `-output-file-map`, or an empty map.
    pub fn output_options(
        &self,
        output_file_map: OutputFileMap,
        parallelism: usize,
    ) -> Result<OutputOptions, DriverError> {
        let modes = [
            (self.parse, "-parse"),
            (self.typecheck, "-typecheck"),
            (self.emit_ir, "-emit-ir"),
            (self.emit_bc, "-emit-bc"),
            (self.emit_assembly, "-emit-assembly"),
            (self.emit_object, "-emit-object"),
            (self.emit_library, "-emit-library"),
            (self.emit_executable, "-emit-executable"),
        ];
        let given: Vec<&str> = modes.iter().filter(|(on, _)| *on).map(|(_, f)| *f).collect();
        if given.len() > 1 {
            return Err(DriverError::InvalidOption(format!(
                "conflicting options {}",
                given.join(" and ")
            )));
        }
        // -link-only picks the inputs, not the product; it combines with
        // either link mode but not with stopping before the link.
        if self.link_only {
            if let Some(mode) = given
                .iter()
                .find(|f| !matches!(**f, "-emit-library" | "-emit-executable"))
            {
                return Err(DriverError::InvalidOption(format!(
                    "conflicting options {} and -link-only",
                    mode
                )));
            }
        }
        if self.static_library && !self.emit_library {
            return Err(DriverError::InvalidOption(
                "-static requires -emit-library".to_string(),
            ));
        }

        let (compile_mode, link_mode) = if self.parse {
            (CompileMode::Parse, LinkMode::None)
        } else if self.typecheck {
            (CompileMode::Typecheck, LinkMode::None)
        } else if self.emit_ir {
            (CompileMode::EmitIR, LinkMode::None)
        } else if self.emit_bc {
            (CompileMode::EmitBC, LinkMode::None)
        } else if self.emit_assembly {
            (CompileMode::EmitAssembly, LinkMode::None)
        } else if self.emit_object {
            (CompileMode::EmitObject, LinkMode::None)
        } else if self.emit_library && self.static_library {
            (CompileMode::EmitObject, LinkMode::EmitStaticLibrary)
        } else if self.emit_library {
            (CompileMode::EmitObject, LinkMode::EmitDynamicLibrary)
        } else {
            (CompileMode::EmitObject, LinkMode::EmitExecutable)
        };

        let model = match (self.compilation_model, self.whole_module) {
            (Some(model), _) => model,
            (None, true) => CompilationModelKind::Single,
            (None, false) => CompilationModelKind::Quadratic,
        };

        let module_name = match &self.module_name {
            Some(name) => name.clone(),
            None => match (&self.output, link_mode) {
                (Some(out), LinkMode::EmitDynamicLibrary | LinkMode::EmitStaticLibrary) => {
                    module_name_from_library(out)
                }
                _ => "main".to_string(),
            },
        };
        if !is_valid_module_name(&module_name) {
            return Err(DriverError::InvalidOption(format!(
                "module name {:?} is not a valid identifier; use -module-name",
                module_name
            )));
        }

        Ok(OutputOptions {
            compile_mode,
            link_mode,
            link_only: self.link_only,
            model,
            module_name,
            output_path: self.output.clone(),
            build_dir: self.build_dir.clone().unwrap_or_default(),
            output_file_map,
            emit_module: self.emit_module,
            emit_dependencies: self.emit_dependencies,
            debug_info: self.debug_info,
            library_paths: self.library_paths.clone(),
            libraries: self.libraries.clone(),
            num_batches: parallelism,
            limits: self.limits(),
        })
    }
}

/// `libfoo.so` => `foo`.
fn module_name_from_library(path: &str) -> String {
    let stem = Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(path);
    stem.strip_prefix("lib").unwrap_or(stem).to_string()
}

fn is_valid_module_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Everything planning needs to know about what to produce.
#[derive(Debug, Clone)]
pub struct OutputOptions {
    pub compile_mode: CompileMode,
    pub link_mode: LinkMode,
    /// Inputs are all objects; nothing is compiled.
    pub link_only: bool,
    pub model: CompilationModelKind,
    pub module_name: String,
    /// `-o`: the final product's path.
    pub output_path: Option<String>,
    /// Directory for derived intermediate outputs; empty means the current
    /// directory.
    pub build_dir: String,
    pub output_file_map: OutputFileMap,
    pub emit_module: bool,
    pub emit_dependencies: bool,
    pub debug_info: bool,
    pub library_paths: Vec<String>,
    pub libraries: Vec<String>,
    /// Batch count for the cpu-count model.
    pub num_batches: usize,
    pub limits: ResourceLimits,
}

impl OutputOptions {
    /// Options for a plain `stone a.stone b.stone` build, for tests and
    /// benchmarks.
    pub fn new(compile_mode: CompileMode, link_mode: LinkMode) -> Self {
        OutputOptions {
            compile_mode,
            link_mode,
            link_only: false,
            model: CompilationModelKind::Quadratic,
            module_name: "main".to_string(),
            output_path: None,
            build_dir: String::new(),
            output_file_map: OutputFileMap::new(),
            emit_module: false,
            emit_dependencies: false,
            debug_info: false,
            library_paths: Vec::new(),
            libraries: Vec::new(),
            num_batches: 1,
            limits: ResourceLimits::default(),
        }
    }

    pub fn should_link(&self) -> bool {
        self.link_mode != LinkMode::None
    }
}
