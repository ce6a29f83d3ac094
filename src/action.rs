//! The action graph: what the driver plans to do, before any tool or command
//! line is chosen.
//!
//! Actions live in an arena and refer to their inputs by id.  An action can
//! only name actions created before it, so the graph is acyclic by
//! construction.

use crate::densemap::{dense_id, DenseMap, Index};
use crate::file::{FileId, FileType, Inputs};
use anyhow::bail;
use std::io::Write;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Compile,
    /// Code generation from IR or bitcode.
    Backend,
    MergeModule,
    /// Wraps a module into an object so debuggers can find it.
    ModuleWrap,
    Assemble,
    DynamicLink,
    StaticLink,
    ExecutableLink,
}

impl ActionKind {
    pub fn name(self) -> &'static str {
        match self {
            ActionKind::Compile => "compile",
            ActionKind::Backend => "backend",
            ActionKind::MergeModule => "merge-module",
            ActionKind::ModuleWrap => "modulewrap",
            ActionKind::Assemble => "assemble",
            ActionKind::DynamicLink => "dynamic-link",
            ActionKind::StaticLink => "static-link",
            ActionKind::ExecutableLink => "link",
        }
    }

    pub fn is_link(self) -> bool {
        matches!(
            self,
            ActionKind::DynamicLink | ActionKind::StaticLink | ActionKind::ExecutableLink
        )
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

dense_id!(
    /// Identifies an action within one ActionGraph.
    ActionId
);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ActionInput {
    File(FileId),
    Action(ActionId),
}

#[derive(Debug, Clone)]
pub struct JobAction {
    pub kind: ActionKind,
    pub output_type: FileType,
    /// In command-line order.
    pub inputs: Vec<ActionInput>,
    /// The inputs a compile is responsible for producing outputs for; the
    /// remaining inputs are only context.  Empty for a whole-module compile
    /// and for non-compile actions.
    pub primary_inputs: Vec<FileId>,
}

impl JobAction {
    pub fn file_inputs(&self) -> impl Iterator<Item = FileId> + '_ {
        self.inputs.iter().filter_map(|input| match input {
            ActionInput::File(id) => Some(*id),
            ActionInput::Action(_) => None,
        })
    }

    pub fn action_inputs(&self) -> impl Iterator<Item = ActionId> + '_ {
        self.inputs.iter().filter_map(|input| match input {
            ActionInput::File(_) => None,
            ActionInput::Action(id) => Some(*id),
        })
    }

    pub fn is_primary(&self, id: FileId) -> bool {
        self.primary_inputs.contains(&id)
    }
}

#[derive(Default)]
pub struct ActionGraph {
    actions: DenseMap<ActionId, JobAction>,
    top_level: Vec<ActionId>,
}

impl ActionGraph {
    pub fn new() -> Self {
        ActionGraph::default()
    }

    pub fn add(
        &mut self,
        kind: ActionKind,
        output_type: FileType,
        inputs: Vec<ActionInput>,
        primary_inputs: Vec<FileId>,
    ) -> anyhow::Result<ActionId> {
        let next = self.actions.next_id();
        for input in &inputs {
            if let ActionInput::Action(id) = input {
                if id.index() >= next.index() {
                    bail!("{} action refers to unknown action {:?}", kind, id);
                }
            }
        }
        Ok(self.actions.push(JobAction {
            kind,
            output_type,
            inputs,
            primary_inputs,
        }))
    }

    pub fn add_top_level(&mut self, id: ActionId) {
        if !self.top_level.contains(&id) {
            self.top_level.push(id);
        }
    }

    pub fn top_level(&self) -> &[ActionId] {
        &self.top_level
    }

    pub fn get(&self, id: ActionId) -> &JobAction {
        &self.actions[id]
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ActionId, &JobAction)> {
        self.actions.iter()
    }

    /// All actions reachable from the top level, each after the actions it
    /// consumes.
    pub fn postorder(&self) -> Vec<ActionId> {
        let mut visited = vec![false; self.actions.len()];
        let mut order = Vec::new();
        for &id in &self.top_level {
            self.visit(id, &mut visited, &mut order);
        }
        order
    }

    fn visit(&self, id: ActionId, visited: &mut [bool], order: &mut Vec<ActionId>) {
        if visited[id.index()] {
            return;
        }
        visited[id.index()] = true;
        for dep in self.actions[id].action_inputs() {
            self.visit(dep, visited, order);
        }
        order.push(id);
    }

    /// Writes one line per reachable action:
    /// `<id>: <kind>, {<inputs>}, <output type>`.
    pub fn print(&self, inputs: &Inputs, w: &mut dyn Write) -> std::io::Result<()> {
        for id in self.postorder() {
            let action = &self.actions[id];
            let names: Vec<String> = action
                .inputs
                .iter()
                .map(|input| match input {
                    ActionInput::File(f) => format!("\"{}\"", inputs.get(*f).name),
                    ActionInput::Action(a) => a.index().to_string(),
                })
                .collect();
            writeln!(
                w,
                "{}: {}, {{{}}}, {}",
                id.index(),
                action.kind,
                names.join(", "),
                action.output_type
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_references_rejected() {
        let mut graph = ActionGraph::new();
        let bogus = ActionId::from(0);
        assert!(graph
            .add(
                ActionKind::ExecutableLink,
                FileType::Image,
                vec![ActionInput::Action(bogus)],
                vec![]
            )
            .is_err());
        assert!(graph.is_empty());
    }

    #[test]
    fn postorder_and_print() -> anyhow::Result<()> {
        let mut inputs = Inputs::new();
        let a = inputs.add("a.stone", FileType::Source);
        let b = inputs.add("b.o", FileType::Object);
        let mut graph = ActionGraph::new();
        let compile = graph.add(
            ActionKind::Compile,
            FileType::Object,
            vec![ActionInput::File(a)],
            vec![a],
        )?;
        let link = graph.add(
            ActionKind::ExecutableLink,
            FileType::Image,
            vec![ActionInput::Action(compile), ActionInput::File(b)],
            vec![],
        )?;
        graph.add_top_level(link);
        graph.add_top_level(link);
        assert_eq!(graph.top_level(), &[link]);
        assert_eq!(graph.postorder(), vec![compile, link]);
        assert_eq!(graph.get(link).file_inputs().collect::<Vec<_>>(), vec![b]);
        assert!(graph.get(compile).is_primary(a));

        let mut out = Vec::new();
        graph.print(&inputs, &mut out)?;
        assert_eq!(
            String::from_utf8(out)?,
            "0: compile, {\"a.stone\"}, object\n1: link, {0, \"b.o\"}, image\n"
        );
        Ok(())
    }
}
