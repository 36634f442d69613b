//! The lexer's call-chain: which file, macro expansion or `REPT`/`FOR`
//! iteration produced the token currently being looked at.
//!
//! Grounded in spec §3's `FileStackNode`: a discriminated union of `FILE`,
//! `MACRO` and `REPT` frames, each pointing at its parent up the call chain.
//! A single macro definition may be invoked from many call sites, so the
//! chain is a DAG, not a tree — which is exactly why nodes are stored in an
//! arena and cross-referenced by integer ID rather than by pointer (see
//! `DESIGN.md`'s note on cyclic references). Backtraces only ever walk
//! parent pointers, never forward, so the DAG shape is never a problem in
//! practice.

use rgbds_diagnostics::{Backtrace, BacktraceFrame};

use crate::read_write::{read_string, write_string};
use crate::{Input, Read, Result, Write};

/// The sentinel written in place of a parent ID for the root node of a
/// chain (the top-level input file has no parent).
const NO_PARENT: u32 = u32::MAX;

/// An index into a [`FileStackTable`]. Cheap to copy, cheap to stash inside
/// a `Symbol` or `Patch` instead of a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileStackNodeId(pub u32);

/// What kind of frame a [`FileStackNode`] represents, and the payload that
/// comes with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStackNodeKind {
    /// A real source file, named by path (as it was given to `INCLUDE` or
    /// on the command line).
    File {
        /// The file's path, as written in source.
        name: String,
    },
    /// A macro expansion, named by the macro's (possibly scoped) name.
    Macro {
        /// The macro's name.
        name: String,
    },
    /// One iteration of a `REPT`/`FOR` loop. `iters` is the iteration
    /// counter for this frame and every enclosing `REPT`/`FOR`, outermost
    /// first — spec §3 calls this an "iteration-vector" because nested
    /// loops need more than a single counter to describe "which iteration
    /// of which loop" in a backtrace.
    Rept {
        /// Iteration counters, outermost loop first.
        iters: Vec<u32>,
    },
}

impl FileStackNodeKind {
    fn discriminant(&self) -> u8 {
        match self {
            Self::File { .. } => 0,
            Self::Macro { .. } => 1,
            Self::Rept { .. } => 2,
        }
    }
}

/// One frame of the file/macro/repeat stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStackNode {
    /// The frame that invoked this one (an `INCLUDE`, a macro call, or a
    /// `REPT` body), or `None` for the top-level input file.
    pub parent: Option<FileStackNodeId>,
    /// The line number in `parent` at which this frame was entered.
    pub parent_line: u32,
    /// The frame's kind and payload.
    pub kind: FileStackNodeKind,
}

impl Read for FileStackNode {
    fn read(input: Input<'_>) -> Result<'_, Self> {
        let (input, parent_id) = u32::read(input)?;
        let (input, parent_line) = u32::read(input)?;
        let (input, discriminant) = u8::read(input)?;

        let (input, kind) = match discriminant {
            0 => {
                let (input, name) = read_string(input)?;
                (input, FileStackNodeKind::File { name })
            }
            1 => {
                let (input, name) = read_string(input)?;
                (input, FileStackNodeKind::Macro { name })
            }
            2 => {
                let (input, count) = u32::read(input)?;
                let mut iters = Vec::with_capacity(count as usize);
                let mut rest = input;
                for _ in 0..count {
                    let (next, iter) = u32::read(rest)?;
                    iters.push(iter);
                    rest = next;
                }
                (rest, FileStackNodeKind::Rept { iters })
            }
            _ => {
                return Err(nom::Err::Error(nom::error::Error::new(
                    input,
                    nom::error::ErrorKind::Alt,
                )))
            }
        };

        let parent = if parent_id == NO_PARENT { None } else { Some(FileStackNodeId(parent_id)) };

        Ok((input, Self { parent, parent_line, kind }))
    }
}

impl Write for FileStackNode {
    fn write(&self, output: &mut Vec<u8>) {
        self.parent.map(|id| id.0).unwrap_or(NO_PARENT).write(output);
        self.parent_line.write(output);
        self.kind.discriminant().write(output);

        match &self.kind {
            FileStackNodeKind::File { name } | FileStackNodeKind::Macro { name } => {
                write_string(name, output)
            }
            FileStackNodeKind::Rept { iters } => {
                (iters.len() as u32).write(output);
                for iter in iters {
                    iter.write(output);
                }
            }
        }
    }
}

/// The arena owning every [`FileStackNode`] produced during one assembly
/// run. Frames are never removed (even once a file/macro/loop is popped off
/// the live lexer stack, its node stays here so later diagnostics can still
/// render a backtrace through it), which is what lets the same macro
/// definition be the parent of many call sites without aliasing problems.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileStackTable {
    nodes: Vec<FileStackNode>,
}

impl FileStackTable {
    /// An empty table, with no nodes at all.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new node and return its ID.
    pub fn push(&mut self, node: FileStackNode) -> FileStackNodeId {
        let id = FileStackNodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Look up a node by ID.
    pub fn get(&self, id: FileStackNodeId) -> &FileStackNode {
        &self.nodes[id.0 as usize]
    }

    /// How many nodes the table holds.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the table holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes, in the order they were pushed (used by the object
    /// writer, which serializes this table verbatim so IDs round-trip).
    pub fn nodes(&self) -> &[FileStackNode] {
        &self.nodes
    }

    /// A [`Backtrace`] for a diagnostic that occurred at `line` inside
    /// `node`, walking parent pointers out to the top-level file.
    pub fn backtrace_at(&self, node: FileStackNodeId, line: u32) -> NodeBacktrace<'_> {
        NodeBacktrace { table: self, node, line }
    }
}

impl Read for FileStackTable {
    fn read(input: Input<'_>) -> Result<'_, Self> {
        let (input, count) = u32::read(input)?;
        let mut nodes = Vec::with_capacity(count as usize);
        let mut rest = input;

        for _ in 0..count {
            let (next, node) = FileStackNode::read(rest)?;
            nodes.push(node);
            rest = next;
        }

        Ok((rest, Self { nodes }))
    }
}

impl Write for FileStackTable {
    fn write(&self, output: &mut Vec<u8>) {
        (self.nodes.len() as u32).write(output);
        for node in &self.nodes {
            node.write(output);
        }
    }
}

/// Describes the call chain leading to one position in a [`FileStackTable`],
/// innermost frame first. This is the bridge between `rgbds-object`'s
/// concrete file-stack model and `rgbds-diagnostics`'s generic
/// [`Backtrace`] trait, which deliberately knows nothing about this crate.
pub struct NodeBacktrace<'a> {
    table: &'a FileStackTable,
    node: FileStackNodeId,
    line: u32,
}

impl Backtrace for NodeBacktrace<'_> {
    fn frames(&self) -> Vec<BacktraceFrame> {
        let mut frames = Vec::new();
        let mut current = Some(self.node);
        let mut line = self.line;

        while let Some(id) = current {
            let node = self.table.get(id);
            let description = match &node.kind {
                FileStackNodeKind::File { name } => format!("{name}:{line}"),
                FileStackNodeKind::Macro { name } => format!("macro {name}:{line}"),
                FileStackNodeKind::Rept { iters } => {
                    let iters = iters.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(".");
                    format!("REPT~{iters}:{line}")
                }
            };

            frames.push(BacktraceFrame { description });
            line = node.parent_line;
            current = node.parent;
        }

        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_node_round_trips() {
        let mut table = FileStackTable::new();
        table.push(FileStackNode {
            parent: None,
            parent_line: 0,
            kind: FileStackNodeKind::File { name: "main.asm".to_owned() },
        });

        let mut bytes = Vec::new();
        table.write(&mut bytes);

        let (rest, read_back) = FileStackTable::read(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(read_back, table);
    }

    #[test]
    fn backtrace_walks_to_the_root() {
        let mut table = FileStackTable::new();
        let file = table.push(FileStackNode {
            parent: None,
            parent_line: 0,
            kind: FileStackNodeKind::File { name: "main.asm".to_owned() },
        });
        let macro_frame = table.push(FileStackNode {
            parent: Some(file),
            parent_line: 5,
            kind: FileStackNodeKind::Macro { name: "DoThing".to_owned() },
        });

        let frames = table.backtrace_at(macro_frame, 2).frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].description, "macro DoThing:2");
        assert_eq!(frames[1].description, "main.asm:5");
    }

    #[test]
    fn rept_node_round_trips_its_iteration_vector() {
        let mut table = FileStackTable::new();
        table.push(FileStackNode {
            parent: None,
            parent_line: 0,
            kind: FileStackNodeKind::Rept { iters: vec![1, 3] },
        });

        let mut bytes = Vec::new();
        table.write(&mut bytes);
        let (rest, read_back) = FileStackTable::read(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(read_back, table);
    }
}
