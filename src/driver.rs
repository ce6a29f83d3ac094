//! The driver proper: from parsed options to a finished compilation.

use crate::build_system::BuildSystem;
use crate::compilation::{Compilation, TempFiles};
use crate::error::DriverError;
use crate::file::{FileType, Inputs};
use crate::fs::{FileSystem, RealFileSystem};
use crate::model::model_for;
use crate::options::{DriverOptions, OutputOptions};
use crate::output_file_map::OutputFileMap;
use crate::progress::ConsoleProgress;
use crate::task::TaskQueue;
use crate::toolchain::{ToolChain, ToolKind};
use crate::trace;
use crate::triple::Triple;
use anyhow::anyhow;
use rustc_hash::FxHashSet;
use std::path::{Component, Path, PathBuf};

pub struct Driver {
    opts: DriverOptions,
}

/// Classifies command-line inputs by extension.  Every input must exist, and
/// appear once: two compiles of one file would write the same outputs.
pub fn classify_inputs(names: &[String], fs: &dyn FileSystem) -> Result<Inputs, DriverError> {
    if names.is_empty() {
        return Err(DriverError::NoInputs);
    }
    let mut inputs = Inputs::new();
    let mut seen = FxHashSet::default();
    for name in names {
        let file_type =
            FileType::from_path(name).ok_or_else(|| DriverError::UnknownInputType(name.clone()))?;
        if !fs.exists(name) {
            return Err(DriverError::MissingInput(name.clone()));
        }
        let spelled: PathBuf = Path::new(name)
            .components()
            .filter(|c| *c != Component::CurDir)
            .collect();
        if !seen.insert(spelled) {
            return Err(DriverError::DuplicateInput(name.clone()));
        }
        inputs.add(name.clone(), file_type);
    }
    Ok(inputs)
}

/// The output file map listing what this compilation writes for each input.
pub fn output_file_map_for(compilation: &Compilation) -> OutputFileMap {
    let mut map = OutputFileMap::new();
    for job in compilation.jobs() {
        let pairs = job.output.pairs();
        for (i, pair) in pairs.iter().enumerate() {
            let outputs = map.get_or_create_output_map_for_input(&pair.input);
            if !pair.primary_output.is_empty() {
                outputs.insert(job.output.primary_output_type(), pair.primary_output.clone());
            }
            for file_type in FileType::ALL {
                let paths = job.output.additional_outputs(file_type);
                // Single additional outputs belong to the first pair.
                if let Some(path) = paths.get(i) {
                    outputs.insert(file_type, path.clone());
                }
            }
        }
    }
    map
}

impl Driver {
    pub fn new(opts: DriverOptions) -> Self {
        Driver { opts }
    }

    fn triple(&self) -> Result<Triple, DriverError> {
        match &self.opts.target {
            Some(target) => Triple::parse(target),
            None => Ok(Triple::host()),
        }
    }

    fn toolchain(&self) -> anyhow::Result<ToolChain> {
        let tools_dir = self.opts.tools_directory.as_ref().map(PathBuf::from);
        let mut toolchain = ToolChain::from_env(self.triple()?, tools_dir)?;
        trace::scope("toolchain.initialize", || toolchain.initialize());
        tracing::debug!(target = %toolchain.triple, kind = ?toolchain.kind, "toolchain");
        Ok(toolchain)
    }

    fn output_file_map(&self) -> Result<OutputFileMap, DriverError> {
        match &self.opts.output_file_map {
            None => Ok(OutputFileMap::new()),
            Some(path) => OutputFileMap::load_from_path(Path::new(path), "").map_err(|err| {
                DriverError::OutputFileMap {
                    path: path.clone(),
                    msg: err.to_string(),
                }
            }),
        }
    }

    fn history_path(&self, out: &OutputOptions) -> String {
        let name = format!("{}.stonehistory", out.module_name);
        if out.build_dir.is_empty() {
            name
        } else {
            Path::new(&out.build_dir)
                .join(name)
                .to_string_lossy()
                .into_owned()
        }
    }

    /// Plans and runs the compilation, returning the process exit code.
    pub fn run(&self) -> anyhow::Result<i32> {
        let fs = RealFileSystem::new();
        let opts = &self.opts;
        let inputs = classify_inputs(&opts.inputs, &fs)?;
        let toolchain = self.toolchain()?;
        let parallelism = opts.parallelism()?;
        let out = opts.output_options(self.output_file_map()?, parallelism)?;

        let mut build_system = if opts.incremental {
            let mut bs = BuildSystem::new(&fs, self.history_path(&out));
            if opts.clean {
                bs.clean()?;
            }
            bs.start_build();
            Some(bs)
        } else {
            None
        };

        let model = model_for(out.model);
        let compilation = trace::scope("plan", || {
            model.build_compilation(
                inputs,
                &toolchain,
                &out,
                build_system.as_mut(),
                TempFiles::new(opts.save_temps),
            )
        })?;
        tracing::debug!(
            model = ?out.model,
            actions = compilation.graph.len(),
            jobs = compilation.job_count(),
            "planned compilation"
        );

        let mut stdout = std::io::stdout();
        if opts.driver_print_actions {
            compilation.print_actions(&mut stdout)?;
        }
        if opts.print_jobs || opts.driver_print_jobs {
            compilation.print_jobs(&mut stdout)?;
            if opts.print_jobs {
                return Ok(0);
            }
        }

        if let Some(path) = &opts.emit_output_file_map {
            self.emit_output_file_map(&compilation, path)?;
        }

        let mut required: Vec<ToolKind> = Vec::new();
        for job in compilation.jobs() {
            if !required.contains(&job.tool) {
                required.push(job.tool);
            }
        }
        toolchain.validate_required_tools(required)?;
        create_output_dirs(&compilation)?;

        let mut queue = TaskQueue::new(parallelism);
        let mut progress = ConsoleProgress::new(opts.verbose, opts.driver_time_compilation);
        let result = trace::scope("run", || {
            compilation.run_jobs(
                &mut queue,
                build_system.as_mut(),
                &mut progress,
                opts.continue_building_after_errors,
            )
        })?;
        if let Some(bs) = build_system.as_mut() {
            bs.stop_build()?;
        }
        Ok(result.exit_code)
    }

    fn emit_output_file_map(&self, compilation: &Compilation, path: &str) -> anyhow::Result<()> {
        let map = output_file_map_for(compilation);
        let mut names: Vec<&str> = compilation.inputs.iter().map(|f| f.name.as_str()).collect();
        if map.output_map_for_single_output().is_some() {
            names.push("");
        }
        let mut buf = Vec::new();
        map.write(&mut buf, &names)?;
        std::fs::write(path, buf).map_err(|err| anyhow!("write {}: {}", path, err))
    }
}

/// Makes sure every directory a job writes into exists.
fn create_output_dirs(compilation: &Compilation) -> anyhow::Result<()> {
    for job in compilation.jobs() {
        for output in job.output.all_outputs() {
            if let Some(parent) = Path::new(output).parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent)
                        .map_err(|err| anyhow!("mkdir {}: {}", parent.display(), err))?;
                }
            }
        }
    }
    Ok(())
}
