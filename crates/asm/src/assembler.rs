//! The top-level entry point: reads a root source file, drives the lexer,
//! parser, section emitter and symbol table to completion, and packages
//! the result into a serializable [`ObjectFile`] (spec §4 end to end,
//! feeding `rgbds-link`/`-o`).

use std::path::{Path, PathBuf};

use rgbds_diagnostics::DiagnosticEngine;
use rgbds_object::object_file::ObjectFile;

use crate::charmap::CharmapDriver;
use crate::filestack::{AssemblerFileStack, FileStackError};
use crate::parser::{ParseError, Parser};

/// Errors that end a whole assembler run, as opposed to the
/// recoverable-and-counted problems [`DiagnosticEngine`] handles on its
/// own.
#[derive(Debug, thiserror::Error)]
pub enum AssemblerError {
    /// Couldn't read the root input file.
    #[error("couldn't read `{path}`: {source}")]
    Io {
        /// The path that failed to open.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Pushing the root file onto the file stack failed (only possible if
    /// `max_depth` is zero).
    #[error(transparent)]
    FileStack(#[from] FileStackError),
    /// Parsing hit a fatal error or the diagnostic engine's error cap.
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Every CLI knob that shapes a run besides the diagnostics configuration
/// (which the caller builds separately from `-W`/`-w`/`-Werror`/`-X`):
/// `-r`'s recursion cap, `-D`'s predefines, `-I`'s include search path,
/// `-P`'s file to implicitly `INCLUDE` ahead of the root file, and
/// `-b`/`-g`/`-Q`'s lexical knobs.
#[derive(Debug)]
pub struct AssembleOptions {
    /// `-r`: combined `INCLUDE`/`MACRO`/`REPT` recursion cap.
    pub max_depth: usize,
    /// `-D NAME[=value]`, in command-line order.
    pub predefines: Vec<(String, Option<String>)>,
    /// `-I dir`, searched in command-line order when an `INCLUDE`/`INCBIN`
    /// path isn't found relative to the including file.
    pub include_paths: Vec<PathBuf>,
    /// `-P file`: read as though `INCLUDE`d before the root file's own
    /// first line.
    pub preinclude: Option<PathBuf>,
    /// `-b <chars>`: alternate characters for `0`/`1` in `%` literals.
    pub binary_digits: Option<[char; 2]>,
    /// `-g <chars>`: alternate characters for `0`/`1`/`2`/`3` in `` ` ``
    /// literals.
    pub gfx_digits: Option<[char; 4]>,
    /// `-Q <1..31>`: default fixed-point fraction width.
    pub default_fraction_bits: u8,
    /// `-p <byte>`: default `DS` fill inside a `UNION` when no explicit
    /// fill value is given.
    pub pad_byte: u8,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            max_depth: 0,
            predefines: Vec::new(),
            include_paths: Vec::new(),
            preinclude: None,
            binary_digits: None,
            gfx_digits: None,
            default_fraction_bits: 16,
            pad_byte: 0,
        }
    }
}

/// Assemble the file at `path` into an [`ObjectFile`], recursing into
/// `INCLUDE`/`MACRO`/`REPT` up to `options.max_depth` frames deep and
/// reporting warnings/errors through `diagnostics`, which the caller has
/// already configured from `-W`/`-w`/`-Werror`/`-X` arguments.
pub fn assemble(
    path: &Path,
    options: &AssembleOptions,
    diagnostics: &mut DiagnosticEngine,
) -> Result<AssembleOutput, AssemblerError> {
    let content = std::fs::read(path)
        .map_err(|source| AssemblerError::Io { path: path.display().to_string(), source })?;

    let mut stack = AssemblerFileStack::new(options.max_depth);
    stack.push_file(&path.display().to_string(), content)?;

    if let Some(preinclude) = &options.preinclude {
        let content = std::fs::read(preinclude)
            .map_err(|source| AssemblerError::Io { path: preinclude.display().to_string(), source })?;
        stack.push_file(&preinclude.display().to_string(), content)?;
    }

    let mut parser = Parser::new(&mut stack, diagnostics)
        .with_include_paths(options.include_paths.clone())
        .with_lexer_config(options.binary_digits, options.gfx_digits, options.default_fraction_bits)
        .with_default_pad_byte(options.pad_byte);
    for (name, value) in &options.predefines {
        parser.predefine(name, value.as_deref())?;
    }

    let (sections, symbols, charmaps, assertions) = parser.run()?;

    let object = ObjectFile {
        file_stack: stack.into_table(),
        symbols: symbols.table().symbols().to_vec(),
        sections: sections.into_sections(),
        assertions,
    };
    Ok(AssembleOutput { object, charmaps })
}

/// Everything one [`assemble`] run produces: the serializable
/// [`ObjectFile`] handed to `-o`, plus the live charmap table, which isn't
/// part of the object format (spec §4.9 carries no charmap records) but
/// is still needed by `-s char:path` state dumps.
#[derive(Debug)]
pub struct AssembleOutput {
    /// The object file to write at `-o`.
    pub object: ObjectFile,
    /// Every charmap defined during this run, for `-s char:path`.
    pub charmaps: CharmapDriver,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> AssembleOptions {
        AssembleOptions { max_depth: 64, ..Default::default() }
    }

    #[test]
    fn assembling_a_missing_file_reports_io_error() {
        let mut diagnostics = DiagnosticEngine::new(0);
        let err = assemble(Path::new("/nonexistent/path.asm"), &opts(), &mut diagnostics).unwrap_err();
        assert!(matches!(err, AssemblerError::Io { .. }));
    }

    #[test]
    fn assembling_a_trivial_file_produces_a_section() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("rgbds-asm-test-{}.asm", std::process::id()));
        std::fs::write(&path, b"SECTION \"main\", ROM0\n\tnop\n\tret\n").unwrap();

        let mut diagnostics = DiagnosticEngine::new(0);
        let output = assemble(&path, &opts(), &mut diagnostics).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(output.object.sections.len(), 1);
        assert_eq!(output.object.sections[0].data, Some(vec![0x00, 0xC9]));
    }

    #[test]
    fn predefines_are_visible_as_equ_or_equs() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("rgbds-asm-test-predef-{}.asm", std::process::id()));
        std::fs::write(&path, b"SECTION \"main\", ROM0\n\tdb VALUE\n").unwrap();

        let mut diagnostics = DiagnosticEngine::new(0);
        let options = AssembleOptions {
            max_depth: 64,
            predefines: vec![("VALUE".to_owned(), None)],
            ..Default::default()
        };
        let output = assemble(&path, &options, &mut diagnostics).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(output.object.sections[0].data, Some(vec![1]));
    }
}
