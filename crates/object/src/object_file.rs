//! The on-disk object file format (spec §4.9): the single channel the
//! assembler and the linker communicate through.
//!
//! ```text
//! "RGB9"
//! u32 revision
//! u32 n_symbols
//! u32 n_sections
//! u32 n_file_nodes
//! repeat n_file_nodes: FileStackNode
//! repeat n_symbols: Symbol
//! repeat n_sections: Section
//! u32 n_assertions
//! repeat n_assertions: Assertion
//! ```
//!
//! All integers are little-endian; `u32::MAX` means "unset" throughout.
//! The revision is a hard compatibility boundary (spec §9's open question
//! is resolved that way explicitly): an object written by a different
//! revision is refused outright rather than guessed at.

use thiserror::Error;

use crate::filestack::FileStackTable;
use crate::patch::Assertion;
use crate::section::Section;
use crate::symbol::Symbol;
use crate::{Input, Read, Result, Write};

const MAGIC: &[u8; 4] = b"RGB9";

/// The only object-file revision this crate understands. Bumped whenever
/// the wire format changes incompatibly.
pub const REVISION: u32 = 1;

/// A fully in-memory object file: everything the assembler produced for
/// one translation unit, ready either to be written out or to be consumed
/// by the linker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectFile {
    /// Every file/macro/`REPT` frame referenced by a symbol, section or
    /// patch in this object.
    pub file_stack: FileStackTable,
    /// Every symbol this object defines or references.
    pub symbols: Vec<Symbol>,
    /// Every section this object defines.
    pub sections: Vec<Section>,
    /// Every `ASSERT`/`STATIC_ASSERT` recorded during assembly.
    pub assertions: Vec<Assertion>,
}

/// Errors that can occur reading an object file.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ObjectFileError {
    /// The first four bytes weren't `"RGB9"`.
    #[error("not an object file (bad magic)")]
    BadMagic,
    /// The revision didn't match [`REVISION`]. Carries both so the
    /// diagnostic can say which is which.
    #[error("object file is revision {found}, this toolchain only understands revision {expected}")]
    UnsupportedRevision {
        /// The revision found in the file.
        found: u32,
        /// The revision this build understands.
        expected: u32,
    },
    /// Trailing bytes after a structurally complete object.
    #[error("trailing garbage after a complete object file")]
    TrailingData,
    /// A nom parser failed partway through (truncated/corrupt file).
    #[error("malformed object file")]
    Malformed,
}

impl ObjectFile {
    /// Serialize to the wire format described in spec §4.9.
    pub fn write_to_bytes(&self) -> Vec<u8> {
        let mut output = Vec::new();
        output.extend_from_slice(MAGIC);
        REVISION.write(&mut output);

        (self.symbols.len() as u32).write(&mut output);
        (self.sections.len() as u32).write(&mut output);
        (self.file_stack.len() as u32).write(&mut output);

        self.file_stack.write(&mut output);

        for symbol in &self.symbols {
            symbol.write(&mut output);
        }

        for section in &self.sections {
            section.write(&mut output);
        }

        (self.assertions.len() as u32).write(&mut output);
        for assertion in &self.assertions {
            assertion.write(&mut output);
        }

        output
    }

    /// Parse from the wire format, refusing anything that isn't exactly
    /// [`REVISION`].
    pub fn read_from_bytes(input: Input<'_>) -> std::result::Result<Self, ObjectFileError> {
        let (input, magic) = nom::bytes::complete::tag::<_, _, nom::error::Error<Input<'_>>>(
            &MAGIC[..],
        )(input)
        .map_err(|_| ObjectFileError::BadMagic)?;

        let (input, revision) = u32::read(input).map_err(|_| ObjectFileError::Malformed)?;
        if revision != REVISION {
            return Err(ObjectFileError::UnsupportedRevision { found: revision, expected: REVISION });
        }

        let (input, n_symbols) = u32::read(input).map_err(|_| ObjectFileError::Malformed)?;
        let (input, n_sections) = u32::read(input).map_err(|_| ObjectFileError::Malformed)?;
        let (input, _n_file_nodes) = u32::read(input).map_err(|_| ObjectFileError::Malformed)?;

        let (input, file_stack) =
            FileStackTable::read(input).map_err(|_| ObjectFileError::Malformed)?;

        let (mut input, mut symbols) = (input, Vec::with_capacity(n_symbols as usize));
        for _ in 0..n_symbols {
            let (next, symbol) = Symbol::read(input).map_err(|_| ObjectFileError::Malformed)?;
            symbols.push(symbol);
            input = next;
        }

        let mut sections = Vec::with_capacity(n_sections as usize);
        for _ in 0..n_sections {
            let (next, section) = Section::read(input).map_err(|_| ObjectFileError::Malformed)?;
            sections.push(section);
            input = next;
        }

        let (input, n_assertions) = u32::read(input).map_err(|_| ObjectFileError::Malformed)?;
        let mut assertions = Vec::with_capacity(n_assertions as usize);
        let mut rest = input;
        for _ in 0..n_assertions {
            let (next, assertion) =
                Assertion::read(rest).map_err(|_| ObjectFileError::Malformed)?;
            assertions.push(assertion);
            rest = next;
        }

        if !rest.is_empty() {
            return Err(ObjectFileError::TrailingData);
        }

        let _ = magic;
        Ok(Self { file_stack, symbols, sections, assertions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filestack::{FileStackNode, FileStackNodeKind};
    use crate::section::{SectionModifier, SectionType};
    use crate::symbol::{SymbolFlag, SymbolType, SymbolValue};

    #[test]
    fn empty_object_round_trips() {
        let object = ObjectFile::default();
        let bytes = object.write_to_bytes();
        let read_back = ObjectFile::read_from_bytes(&bytes).unwrap();
        assert_eq!(read_back, object);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let err = ObjectFile::read_from_bytes(b"nope").unwrap_err();
        assert_eq!(err, ObjectFileError::BadMagic);
    }

    #[test]
    fn wrong_revision_is_rejected_explicitly() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        999u32.write(&mut bytes);
        let err = ObjectFile::read_from_bytes(&bytes).unwrap_err();
        assert_eq!(err, ObjectFileError::UnsupportedRevision { found: 999, expected: REVISION });
    }

    #[test]
    fn a_trivial_rom0_object_round_trips() {
        let mut file_stack = FileStackTable::new();
        let node = file_stack.push(FileStackNode {
            parent: None,
            parent_line: 0,
            kind: FileStackNodeKind::File { name: "main.asm".to_owned() },
        });

        let mut section = Section::new("t", SectionType::Rom0, SectionModifier::Normal);
        section.org = Some(0x100);
        section.size = 2;
        section.data = Some(vec![0x00, 0xC9]);
        section.node = Some(node);

        let symbol = Symbol {
            name: "label".to_owned(),
            ty: SymbolType::Label,
            scope: None,
            node: Some(node),
            line: 3,
            section: Some(0),
            value: SymbolValue::Integer(1),
            flags: SymbolFlag::Defined | SymbolFlag::Exported,
        };

        let object = ObjectFile {
            file_stack,
            symbols: vec![symbol],
            sections: vec![section],
            assertions: Vec::new(),
        };

        let bytes = object.write_to_bytes();
        let read_back = ObjectFile::read_from_bytes(&bytes).unwrap();
        assert_eq!(read_back.sections.len(), 1);
        assert_eq!(read_back.sections[0].data, Some(vec![0x00, 0xC9]));
        assert_eq!(read_back.symbols[0].name, "label");
    }
}
