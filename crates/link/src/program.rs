//! Loads object files and flattens them into one linking namespace.
//!
//! Every input object carries its own local index space: a `Patch`'s
//! `pc_section` and a `Symbol`'s `section` are indices into *that
//! object's own* `sections` vector, and file-stack node IDs are likewise
//! local to that object's own arena. [`Program::load`] renumbers all of
//! it into one shared index space as each object is absorbed, so
//! everything downstream (placement, patching, output) can treat the
//! whole link as a single object.

use std::collections::HashMap;
use std::path::Path;

use miette::Diagnostic;
use rgbds_object::filestack::{FileStackNodeId, FileStackTable};
use rgbds_object::object_file::{ObjectFile, ObjectFileError};
use rgbds_object::patch::Assertion;
use rgbds_object::section::Section;
use rgbds_object::symbol::{Symbol, SymbolType};
use thiserror::Error;

/// Errors raised while loading object files into a [`Program`].
#[derive(Debug, Error, Diagnostic)]
pub enum ProgramError {
    /// Couldn't read an input object file.
    #[error("couldn't read `{path}`: {source}")]
    #[diagnostic(code(rgbds_link::object_io))]
    Io {
        /// The path that failed to open.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// An input file wasn't a valid object file.
    #[error("`{path}` is not a valid object file: {source}")]
    #[diagnostic(code(rgbds_link::bad_object))]
    Object {
        /// The path that failed to parse.
        path: String,
        /// Why it failed.
        #[source]
        source: ObjectFileError,
    },
    /// Two objects both export a symbol with the same name.
    #[error("`{0}` is defined in more than one object file")]
    #[diagnostic(code(rgbds_link::duplicate_export))]
    DuplicateExport(String),
}

/// One flattened linking namespace: every input object's sections,
/// symbols, assertions and file-stack nodes, renumbered into a shared
/// index space, in the order the objects were given on the command line.
#[derive(Debug, Default)]
pub struct Program {
    /// Every section defined by any input object, fragment/union-merging
    /// not yet applied.
    pub sections: Vec<Section>,
    /// Every symbol defined or referenced by any input object.
    pub symbols: Vec<Symbol>,
    /// Every `ASSERT`/`STATIC_ASSERT` recorded by any input object.
    pub assertions: Vec<Assertion>,
    /// The combined file-stack arena, for backtraces spanning any input
    /// object.
    pub file_stack: FileStackTable,
}

impl Program {
    /// Read and flatten every object file at `paths`, in order.
    pub fn load(paths: &[impl AsRef<Path>]) -> Result<Self, ProgramError> {
        let mut program = Self::default();

        for path in paths {
            let path = path.as_ref();
            let bytes = std::fs::read(path)
                .map_err(|source| ProgramError::Io { path: path.display().to_string(), source })?;
            let object = ObjectFile::read_from_bytes(&bytes)
                .map_err(|source| ProgramError::Object { path: path.display().to_string(), source })?;

            program.absorb(object);
        }

        Ok(program)
    }

    fn absorb(&mut self, object: ObjectFile) {
        let node_base = self.file_stack.len() as u32;
        let section_base = self.sections.len() as u32;

        for node in object.file_stack.nodes() {
            let mut node = node.clone();
            node.parent = node.parent.map(|id| FileStackNodeId(id.0 + node_base));
            self.file_stack.push(node);
        }

        for mut section in object.sections {
            section.node = section.node.map(|id| FileStackNodeId(id.0 + node_base));
            for patch in &mut section.patches {
                patch.node = patch.node.map(|id| FileStackNodeId(id.0 + node_base));
                patch.pc_section += section_base;
            }
            self.sections.push(section);
        }

        for mut symbol in object.symbols {
            symbol.node = symbol.node.map(|id| FileStackNodeId(id.0 + node_base));
            symbol.section = symbol.section.map(|index| index + section_base);
            self.symbols.push(symbol);
        }

        for mut assertion in object.assertions {
            assertion.patch.node = assertion.patch.node.map(|id| FileStackNodeId(id.0 + node_base));
            assertion.patch.pc_section += section_base;
            self.assertions.push(assertion);
        }
    }

    /// Build a name → index map over every symbol that actually carries a
    /// value (`REF`s don't define anything, they're resolved against
    /// this). Errors if two objects define the same name, the same
    /// constraint the reference linker enforces by merging every object's
    /// symbol table into one flat namespace.
    pub fn index_symbols(&self) -> Result<HashMap<String, usize>, ProgramError> {
        let mut by_name = HashMap::new();

        for (index, symbol) in self.symbols.iter().enumerate() {
            if symbol.ty == SymbolType::Ref {
                continue;
            }
            if by_name.insert(symbol.name.clone(), index).is_some() {
                return Err(ProgramError::DuplicateExport(symbol.name.clone()));
            }
        }

        Ok(by_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rgbds_object::filestack::{FileStackNode, FileStackNodeKind};
    use rgbds_object::section::{SectionModifier, SectionType};
    use rgbds_object::symbol::{SymbolFlag, SymbolValue};

    fn object_with_one_label(file_name: &str, label: &str) -> ObjectFile {
        let mut file_stack = FileStackTable::new();
        let node = file_stack.push(FileStackNode {
            parent: None,
            parent_line: 0,
            kind: FileStackNodeKind::File { name: file_name.to_owned() },
        });

        let mut section = Section::new("main", SectionType::Rom0, SectionModifier::Normal);
        section.size = 1;
        section.data = Some(vec![0x00]);
        section.node = Some(node);

        let symbol = Symbol {
            name: label.to_owned(),
            ty: SymbolType::Label,
            scope: None,
            node: Some(node),
            line: 1,
            section: Some(0),
            value: SymbolValue::Integer(0),
            flags: SymbolFlag::Defined | SymbolFlag::Exported,
        };

        ObjectFile { file_stack, symbols: vec![symbol], sections: vec![section], assertions: Vec::new() }
    }

    #[test]
    fn absorbing_two_objects_renumbers_the_second_ones_indices() {
        let mut program = Program::default();
        program.absorb(object_with_one_label("a.asm", "A"));
        program.absorb(object_with_one_label("b.asm", "B"));

        assert_eq!(program.sections.len(), 2);
        assert_eq!(program.symbols.len(), 2);
        assert_eq!(program.symbols[1].section, Some(1));
        assert_eq!(program.file_stack.len(), 2);
    }

    #[test]
    fn duplicate_exported_name_across_objects_is_an_error() {
        let mut program = Program::default();
        program.absorb(object_with_one_label("a.asm", "Shared"));
        program.absorb(object_with_one_label("b.asm", "Shared"));

        assert!(matches!(
            program.index_symbols(),
            Err(ProgramError::DuplicateExport(name)) if name == "Shared"
        ));
    }
}
