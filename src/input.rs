//! The ordered forest of link inputs. Leaves are files; group brackets mark
//! regions that resolution re-scans until no further symbols resolve.

use crate::attributes::AttrId;
use crate::context::LDContext;
use crate::error::Result;
use anyhow::bail;
use std::path::PathBuf;

/// Identifies an input. IDs are dense and assigned in registration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InputId(u32);

impl InputId {
    pub(crate) fn as_usize(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputKind {
    Object,
    Archive,
    DynObj,
    Script,
    Unknown,
}

pub struct Input {
    pub name: String,
    pub path: PathBuf,
    kind: InputKind,
    pub attr: AttrId,
    /// Populated by the upstream reader before the core runs.
    pub context: Option<LDContext>,
    /// For archives: the already-extracted members, in archive order.
    pub members: Vec<InputId>,
    /// Set during resolution when a symbol from this dynamic object was
    /// actually used. Drives the --as-needed DT_NEEDED decision.
    pub(crate) needed: bool,
    /// For archive members: whether resolution pulled this member in.
    pub(crate) loaded: bool,
}

impl Input {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, attr: AttrId) -> Input {
        Input {
            name: name.into(),
            path: path.into(),
            kind: InputKind::Unknown,
            attr,
            context: None,
            members: Vec::new(),
            needed: false,
            loaded: false,
        }
    }

    pub fn kind(&self) -> InputKind {
        self.kind
    }

    pub fn is_recognized(&self) -> bool {
        self.kind != InputKind::Unknown
    }

    /// Types the input on first probe. An input never changes type once
    /// recognized.
    pub fn set_kind(&mut self, kind: InputKind) -> Result {
        if self.kind != InputKind::Unknown && self.kind != kind {
            bail!(
                "Input `{}` was already recognized as {:?}, cannot re-type as {:?}",
                self.name,
                self.kind,
                kind
            );
        }
        self.kind = kind;
        Ok(())
    }

    pub fn is_needed(&self) -> bool {
        self.needed
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum InputNode {
    Leaf(InputId),
    GroupBegin,
    GroupEnd,
}

/// Inputs in command-line order with group brackets preserved.
#[derive(Default)]
pub struct InputTree {
    inputs: Vec<Input>,
    nodes: Vec<InputNode>,
    group_depth: u32,
}

impl InputTree {
    pub fn new() -> InputTree {
        Default::default()
    }

    /// Registers an input without placing it in the traversal order. Used for
    /// archive members, which are reached through their archive.
    pub fn register(&mut self, input: Input) -> InputId {
        let id = InputId(self.inputs.len() as u32);
        self.inputs.push(input);
        id
    }

    pub fn push(&mut self, input: Input) -> InputId {
        let id = self.register(input);
        self.nodes.push(InputNode::Leaf(id));
        id
    }

    pub fn begin_group(&mut self) {
        self.group_depth += 1;
        self.nodes.push(InputNode::GroupBegin);
    }

    pub fn end_group(&mut self) -> Result {
        if self.group_depth == 0 {
            bail!("--end-group without matching --start-group");
        }
        self.group_depth -= 1;
        self.nodes.push(InputNode::GroupEnd);
        Ok(())
    }

    pub fn finish(&self) -> Result {
        if self.group_depth != 0 {
            bail!("--start-group without matching --end-group");
        }
        Ok(())
    }

    pub fn get(&self, id: InputId) -> &Input {
        &self.inputs[id.as_usize()]
    }

    pub fn get_mut(&mut self, id: InputId) -> &mut Input {
        &mut self.inputs[id.as_usize()]
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    /// All leaf inputs with their attribute snapshots, in traversal order,
    /// flattening group brackets.
    pub fn leaves(&self) -> impl Iterator<Item = (InputId, AttrId)> + '_ {
        self.nodes.iter().filter_map(|node| match node {
            InputNode::Leaf(id) => Some((*id, self.get(*id).attr)),
            _ => None,
        })
    }

    /// Splits the traversal order into runs: either a single ungrouped leaf
    /// or the body of one group (which resolution re-scans to fixed point).
    pub(crate) fn scan_units(&self) -> Vec<ScanUnit> {
        let mut units = Vec::new();
        let mut group: Option<Vec<InputId>> = None;
        let mut depth = 0u32;
        for node in &self.nodes {
            match node {
                InputNode::GroupBegin => {
                    depth += 1;
                    if depth == 1 {
                        group = Some(Vec::new());
                    }
                }
                InputNode::GroupEnd => {
                    depth -= 1;
                    if depth == 0 {
                        units.push(ScanUnit::Group(group.take().unwrap_or_default()));
                    }
                }
                InputNode::Leaf(id) => match &mut group {
                    Some(members) => members.push(*id),
                    None => units.push(ScanUnit::Single(*id)),
                },
            }
        }
        units
    }
}

/// One unit of the resolution scan. Groups repeat until fixed point; singles
/// are visited once.
pub(crate) enum ScanUnit {
    Single(InputId),
    Group(Vec<InputId>),
}
