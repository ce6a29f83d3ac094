//! Compilation models: how inputs become actions, and actions become jobs.
//!
//! A model only decides how source files are grouped into compile actions.
//! Routing the other input types, merging modules and linking are shared by
//! every model and live in the trait's provided methods.

use crate::action::{ActionGraph, ActionId, ActionInput, ActionKind};
use crate::build_system::BuildSystem;
use crate::compilation::{Compilation, TempFiles};
use crate::error::DriverError;
use crate::file::{File, FileId, FileType, Inputs};
use crate::job::{CommandOutput, JobCondition, JobId};
use crate::options::{CompilationModelKind, CompileMode, LinkMode, OutputOptions};
use crate::toolchain::{JobRequest, ToolChain, ToolChainKind};
use rustc_hash::FxHashMap;
use std::path::Path;

pub trait CompilationModel {
    fn kind(&self) -> CompilationModelKind;

    /// Adds compile actions for `sources`, returning them in order.
    fn build_compile_actions(
        &self,
        graph: &mut ActionGraph,
        sources: &[FileId],
        opts: &OutputOptions,
    ) -> anyhow::Result<Vec<ActionId>>;

    /// Plans the actions for `inputs`.  The returned graph's top-level
    /// actions are the requested products.
    fn build_job_actions(
        &self,
        inputs: &Inputs,
        opts: &OutputOptions,
        toolchain: ToolChainKind,
    ) -> anyhow::Result<ActionGraph> {
        let mut graph = ActionGraph::new();
        let mut sources = Vec::new();
        // Actions and files feeding the link, in input order.
        let mut link_inputs: Vec<ActionInput> = Vec::new();
        let mut per_file: Vec<ActionId> = Vec::new();
        let mut modules: Vec<ActionInput> = Vec::new();
        let product_type = match opts.compile_mode {
            CompileMode::EmitAssembly => FileType::Assembly,
            _ => FileType::Object,
        };

        for file in inputs.iter() {
            if opts.link_only && file.file_type != FileType::Object {
                return Err(unexpected(file).into());
            }
            match file.file_type {
                FileType::Source => sources.push(file.id),
                FileType::IR | FileType::BitCode => {
                    if !matches!(
                        opts.compile_mode,
                        CompileMode::EmitObject | CompileMode::EmitAssembly
                    ) {
                        return Err(unexpected(file).into());
                    }
                    let id = graph.add(
                        ActionKind::Backend,
                        product_type,
                        vec![ActionInput::File(file.id)],
                        vec![],
                    )?;
                    per_file.push(id);
                    link_inputs.push(ActionInput::Action(id));
                }
                FileType::Assembly => {
                    if opts.compile_mode != CompileMode::EmitObject {
                        return Err(unexpected(file).into());
                    }
                    let id = graph.add(
                        ActionKind::Assemble,
                        FileType::Object,
                        vec![ActionInput::File(file.id)],
                        vec![],
                    )?;
                    per_file.push(id);
                    link_inputs.push(ActionInput::Action(id));
                }
                FileType::Object => {
                    if opts.should_link() {
                        link_inputs.push(ActionInput::File(file.id));
                    } else {
                        tracing::warn!("{}: input unused, nothing is linked", file.name);
                    }
                }
                FileType::Module => {
                    if opts.emit_module {
                        modules.push(ActionInput::File(file.id));
                    } else if opts.should_link() {
                        link_inputs.push(ActionInput::File(file.id));
                    } else {
                        tracing::warn!("{}: input unused", file.name);
                    }
                }
                FileType::Image | FileType::Dependencies | FileType::None => {
                    return Err(unexpected(file).into());
                }
            }
        }

        let compiles = if sources.is_empty() {
            Vec::new()
        } else {
            self.build_compile_actions(&mut graph, &sources, opts)?
        };
        tracing::debug!(
            model = ?self.kind(),
            sources = sources.len(),
            compiles = compiles.len(),
            "planned compile actions"
        );
        // Compiles come first on the link line, as they do on the command
        // line for sources.
        let mut all_link_inputs: Vec<ActionInput> =
            compiles.iter().map(|&id| ActionInput::Action(id)).collect();
        all_link_inputs.extend(link_inputs);

        let merge = if opts.emit_module {
            let mut merge_inputs: Vec<ActionInput> =
                compiles.iter().map(|&id| ActionInput::Action(id)).collect();
            merge_inputs.extend(modules);
            Some(graph.add(ActionKind::MergeModule, FileType::Module, merge_inputs, vec![])?)
        } else {
            None
        };

        if opts.should_link() {
            if let Some(merge) = merge {
                if toolchain == ToolChainKind::Linux && opts.debug_info {
                    let wrap = graph.add(
                        ActionKind::ModuleWrap,
                        FileType::Object,
                        vec![ActionInput::Action(merge)],
                        vec![],
                    )?;
                    all_link_inputs.push(ActionInput::Action(wrap));
                }
                graph.add_top_level(merge);
            }
            if all_link_inputs.is_empty() {
                return Err(DriverError::NoInputs.into());
            }
            let kind = match opts.link_mode {
                LinkMode::EmitDynamicLibrary => ActionKind::DynamicLink,
                LinkMode::EmitStaticLibrary => ActionKind::StaticLink,
                LinkMode::EmitExecutable | LinkMode::None => ActionKind::ExecutableLink,
            };
            let link = graph.add(kind, FileType::Image, all_link_inputs, vec![])?;
            graph.add_top_level(link);
        } else {
            for id in compiles.into_iter().chain(per_file) {
                graph.add_top_level(id);
            }
            if let Some(merge) = merge {
                graph.add_top_level(merge);
            }
        }
        Ok(graph)
    }

    /// Realizes every action reachable in the compilation's graph into
    /// exactly one job.  With a build system, each job's condition reflects
    /// what changed since the last build.
    fn build_jobs(
        &self,
        compilation: &mut Compilation,
        toolchain: &ToolChain,
        opts: &OutputOptions,
        mut build_system: Option<&mut BuildSystem>,
    ) -> anyhow::Result<()> {
        let order = compilation.graph.postorder();
        if let Some(bs) = build_system.as_deref_mut() {
            let paths: Vec<String> = compilation.inputs.iter().map(|f| f.name.clone()).collect();
            bs.scan(&paths);
        }
        let mut jobs: FxHashMap<ActionId, JobId> = FxHashMap::default();
        for id in order {
            let action = compilation.graph.get(id);
            let planner = Planner {
                inputs: &compilation.inputs,
                opts,
                toolchain: toolchain.kind,
            };
            let output = planner.outputs(
                action.kind,
                action.output_type,
                &action.primary_inputs,
                &action.inputs,
            )?;

            let mut input_paths = Vec::new();
            let mut deps = Vec::new();
            for input in &action.inputs {
                match input {
                    ActionInput::File(f) => {
                        input_paths.push(compilation.inputs.get(*f).name.clone())
                    }
                    ActionInput::Action(a) => {
                        let dep = *jobs
                            .get(a)
                            .ok_or_else(|| anyhow::anyhow!("action {:?} planned out of order", a))?;
                        let dep_job = compilation.job(dep);
                        if action.kind == ActionKind::MergeModule
                            && dep_job.kind == ActionKind::Compile
                        {
                            let modules = dep_job.output.additional_outputs(FileType::Module);
                            input_paths.extend(modules.iter().cloned());
                        } else {
                            input_paths.extend(dep_job.output.primary_outputs().map(String::from));
                        }
                        deps.push(dep);
                    }
                }
            }

            let has_primaries =
                action.kind == ActionKind::Compile && !action.primary_inputs.is_empty();
            let history_inputs: Vec<String> = if has_primaries {
                action
                    .primary_inputs
                    .iter()
                    .map(|f| compilation.inputs.get(*f).name.clone())
                    .collect()
            } else {
                action
                    .file_inputs()
                    .map(|f| compilation.inputs.get(f).name.clone())
                    .collect()
            };

            let condition = match build_system.as_deref_mut() {
                None => JobCondition::Always,
                Some(bs) => condition_for(bs, &history_inputs, &output),
            };

            let req = JobRequest {
                id: compilation.next_job_id(),
                action: id,
                inputs: input_paths,
                output,
                deps,
                condition,
                history_inputs,
            };
            let mut job = toolchain.construct_job(
                compilation.graph.get(id),
                &mut compilation.temps,
                req,
                opts,
            )?;
            if let Some(bs) = build_system.as_deref_mut() {
                if let Some(key) = job.command_key() {
                    let by_command = bs.command_condition(key, job.signature());
                    job.condition = job.condition.combine(by_command);
                }
            }
            tracing::debug!(job = %job.description(), condition = ?job.condition, "planned job");
            let job_id = compilation.add_job(job)?;
            jobs.insert(id, job_id);
        }
        for id in compilation.graph.top_level().to_vec() {
            if let Some(&job) = jobs.get(&id) {
                compilation.mark_top_level(job);
            }
        }
        Ok(())
    }

    /// Plans actions, then jobs, for `inputs`.
    fn build_compilation(
        &self,
        inputs: Inputs,
        toolchain: &ToolChain,
        opts: &OutputOptions,
        build_system: Option<&mut BuildSystem>,
        temps: TempFiles,
    ) -> anyhow::Result<Compilation> {
        let graph = self.build_job_actions(&inputs, opts, toolchain.kind)?;
        let mut compilation = Compilation::new(inputs, graph, temps);
        self.build_jobs(&mut compilation, toolchain, opts, build_system)?;
        Ok(compilation)
    }
}

fn unexpected(file: &File) -> DriverError {
    DriverError::UnexpectedInput {
        path: file.name.clone(),
        file_type: file.file_type,
    }
}

/// The most demanding condition over a job's history inputs.  Jobs with no
/// file inputs of their own only run when a dependency did, unless their
/// outputs are gone.
fn condition_for(
    bs: &mut BuildSystem,
    history_inputs: &[String],
    output: &CommandOutput,
) -> JobCondition {
    let output_exists = output.all_outputs().all(|path| bs.output_exists(path));
    if history_inputs.is_empty() {
        return if !bs.has_history() {
            JobCondition::Always
        } else if output_exists {
            JobCondition::CheckDependencies
        } else {
            JobCondition::RunWithoutCascading
        };
    }
    history_inputs
        .iter()
        .map(|path| bs.condition_for(path, output_exists))
        .reduce(JobCondition::combine)
        .unwrap_or(JobCondition::Always)
}

/// Names the outputs of jobs.
struct Planner<'a> {
    inputs: &'a Inputs,
    opts: &'a OutputOptions,
    toolchain: ToolChainKind,
}

impl Planner<'_> {
    fn extension(&self, file_type: FileType) -> &'static str {
        match file_type {
            FileType::Object => self.toolchain.object_extension(),
            _ => file_type.extension(),
        }
    }

    /// `<build-dir>/<stem>.<ext>`.
    fn derived(&self, stem: &str, file_type: FileType) -> String {
        let name = format!("{}.{}", stem, self.extension(file_type));
        if self.opts.build_dir.is_empty() {
            name
        } else {
            Path::new(&self.opts.build_dir)
                .join(name)
                .to_string_lossy()
                .into_owned()
        }
    }

    /// The output of `file_type` for `input`: from the output file map, else
    /// derived from `stem`.
    fn output_for(&self, input: &str, stem: &str, file_type: FileType) -> String {
        match self.opts.output_file_map.output_for(input, file_type) {
            Some(path) => path.to_string(),
            None => self.derived(stem, file_type),
        }
    }

    fn outputs(
        &self,
        kind: ActionKind,
        output_type: FileType,
        primaries: &[FileId],
        action_inputs: &[ActionInput],
    ) -> anyhow::Result<CommandOutput> {
        let opts = self.opts;
        let module = opts.module_name.as_str();
        let mut output = CommandOutput::new(output_type);
        match kind {
            ActionKind::Compile if primaries.is_empty() => {
                let primary = if output_type == FileType::None {
                    String::new()
                } else {
                    match (opts.output_file_map.output_for("", output_type), &opts.output_path) {
                        (Some(path), _) => path.to_string(),
                        (None, Some(path)) if !opts.should_link() => path.clone(),
                        (None, _) => self.derived(module, output_type),
                    }
                };
                output.add_primary_output("", primary);
                if opts.emit_module {
                    let partial = format!("{}.partial", module);
                    output.add_additional_output(
                        FileType::Module,
                        self.output_for("", &partial, FileType::Module),
                    )?;
                }
                if opts.emit_dependencies {
                    output.add_additional_output(
                        FileType::Dependencies,
                        self.output_for("", module, FileType::Dependencies),
                    )?;
                }
            }
            ActionKind::Compile => {
                let files: Vec<&File> = primaries.iter().map(|&f| self.inputs.get(f)).collect();
                for file in &files {
                    let primary = if output_type == FileType::None {
                        String::new()
                    } else {
                        self.output_for(&file.name, file.stem(), output_type)
                    };
                    output.add_primary_output(file.name.clone(), primary);
                }
                for file in &files {
                    if opts.emit_module {
                        let partial = format!("{}.partial", file.stem());
                        output.add_additional_output(
                            FileType::Module,
                            self.output_for(&file.name, &partial, FileType::Module),
                        )?;
                    }
                    if opts.emit_dependencies {
                        output.add_additional_output(
                            FileType::Dependencies,
                            self.output_for(&file.name, file.stem(), FileType::Dependencies),
                        )?;
                    }
                }
            }
            ActionKind::Backend | ActionKind::Assemble => {
                let file = action_inputs
                    .iter()
                    .find_map(|input| match input {
                        ActionInput::File(f) => Some(self.inputs.get(*f)),
                        ActionInput::Action(_) => None,
                    })
                    .ok_or_else(|| anyhow::anyhow!("{} action without an input file", kind))?;
                output.add_primary_output(
                    file.name.clone(),
                    self.output_for(&file.name, file.stem(), output_type),
                );
            }
            ActionKind::MergeModule => {
                output.add_primary_output("", self.output_for("", module, FileType::Module));
            }
            ActionKind::ModuleWrap => {
                let stem = format!("{}.modulewrap", module);
                output.add_primary_output("", self.derived(&stem, FileType::Object));
            }
            ActionKind::DynamicLink | ActionKind::StaticLink | ActionKind::ExecutableLink => {
                let mapped = opts.output_file_map.output_for("", FileType::Image);
                let image = match (&opts.output_path, mapped) {
                    (Some(path), _) => path.clone(),
                    (None, Some(path)) => path.to_string(),
                    (None, None) => self.toolchain.image_name(opts.link_mode, module),
                };
                output.add_primary_output("", image);
            }
        }
        Ok(output)
    }
}

pub struct QuadraticModel;

impl CompilationModel for QuadraticModel {
    fn kind(&self) -> CompilationModelKind {
        CompilationModelKind::Quadratic
    }

    fn build_compile_actions(
        &self,
        graph: &mut ActionGraph,
        sources: &[FileId],
        opts: &OutputOptions,
    ) -> anyhow::Result<Vec<ActionId>> {
        let all: Vec<ActionInput> = sources.iter().map(|&f| ActionInput::File(f)).collect();
        sources
            .iter()
            .map(|&f| {
                graph.add(
                    ActionKind::Compile,
                    opts.compile_mode.output_type(),
                    all.clone(),
                    vec![f],
                )
            })
            .collect()
    }
}

pub struct FlatModel;

impl CompilationModel for FlatModel {
    fn kind(&self) -> CompilationModelKind {
        CompilationModelKind::Flat
    }

    fn build_compile_actions(
        &self,
        graph: &mut ActionGraph,
        sources: &[FileId],
        opts: &OutputOptions,
    ) -> anyhow::Result<Vec<ActionId>> {
        sources
            .iter()
            .map(|&f| {
                graph.add(
                    ActionKind::Compile,
                    opts.compile_mode.output_type(),
                    vec![ActionInput::File(f)],
                    vec![f],
                )
            })
            .collect()
    }
}

/// Whole-module compilation.
pub struct SingleModel;

impl CompilationModel for SingleModel {
    fn kind(&self) -> CompilationModelKind {
        CompilationModelKind::Single
    }

    fn build_compile_actions(
        &self,
        graph: &mut ActionGraph,
        sources: &[FileId],
        opts: &OutputOptions,
    ) -> anyhow::Result<Vec<ActionId>> {
        let all: Vec<ActionInput> = sources.iter().map(|&f| ActionInput::File(f)).collect();
        let id = graph.add(ActionKind::Compile, opts.compile_mode.output_type(), all, vec![])?;
        Ok(vec![id])
    }
}

pub struct CPUCountModel;

/// Splits `n` items into `batches` contiguous ranges whose sizes differ by
/// at most one, larger ones first.
fn partition(n: usize, batches: usize) -> Vec<std::ops::Range<usize>> {
    let batches = batches.clamp(1, n.max(1));
    let (size, extra) = (n / batches, n % batches);
    let mut ranges = Vec::with_capacity(batches);
    let mut start = 0;
    for i in 0..batches {
        let len = size + usize::from(i < extra);
        ranges.push(start..start + len);
        start += len;
    }
    ranges
}

impl CompilationModel for CPUCountModel {
    fn kind(&self) -> CompilationModelKind {
        CompilationModelKind::CPUCount
    }

    fn build_compile_actions(
        &self,
        graph: &mut ActionGraph,
        sources: &[FileId],
        opts: &OutputOptions,
    ) -> anyhow::Result<Vec<ActionId>> {
        let all: Vec<ActionInput> = sources.iter().map(|&f| ActionInput::File(f)).collect();
        partition(sources.len(), opts.num_batches)
            .into_iter()
            .map(|range| {
                graph.add(
                    ActionKind::Compile,
                    opts.compile_mode.output_type(),
                    all.clone(),
                    sources[range].to_vec(),
                )
            })
            .collect()
    }
}

pub fn model_for(kind: CompilationModelKind) -> Box<dyn CompilationModel> {
    match kind {
        CompilationModelKind::Quadratic => Box::new(QuadraticModel),
        CompilationModelKind::Flat => Box::new(FlatModel),
        CompilationModelKind::Single => Box::new(SingleModel),
        CompilationModelKind::CPUCount => Box::new(CPUCountModel),
    }
}
