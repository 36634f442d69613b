//! The top-level linker entry point: reads every input object, merges and
//! places sections, runs a linker script if one was given, patches, and
//! writes the requested outputs (spec §2 "Linker: read N objects → sanity
//! check → assign → patch → write").

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use miette::Diagnostic;
use rgbds_diagnostics::{Backtrace, DiagnosticEngine, NoBacktrace};
use rgbds_object::patch::AssertionLevel;
use thiserror::Error;

use crate::assign::{self, AssignError, Placement};
use crate::output::{write_map_file, write_rom, write_sym_file};
use crate::patch::{self, PatchError};
use crate::program::{Program, ProgramError};
use crate::script::{Script, ScriptError};
use crate::Configuration;

/// Errors that end a whole link run, as opposed to the recoverable
/// diagnostics reported through [`DiagnosticEngine`] (assertion failures
/// promoted per their level, for instance).
#[derive(Debug, Error, Diagnostic)]
pub enum LinkerError {
    /// No object files were given on the command line.
    #[error("no input object files were given")]
    #[diagnostic(code(rgbds_link::no_input_files))]
    NoInputFiles,
    /// Reading/flattening the input objects failed.
    #[error(transparent)]
    Program(#[from] ProgramError),
    /// Merging or placing sections failed.
    #[error(transparent)]
    Assign(#[from] AssignError),
    /// Loading or running the linker script failed.
    #[error(transparent)]
    Script(#[from] ScriptError),
    /// Resolving or applying a patch failed.
    #[error(transparent)]
    Patch(#[from] PatchError),
    /// A `STATIC_ASSERT`-level assertion failed.
    #[error("assertion failed: {0}")]
    #[diagnostic(code(rgbds_link::assertion_failed))]
    Assertion(String),
    /// Writing an output file failed.
    #[error("couldn't write `{path}`: {source}")]
    #[diagnostic(code(rgbds_link::output_io))]
    OutputIo {
        /// The path that failed to write.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Reading the overlay file failed.
    #[error("couldn't read overlay `{path}`: {source}")]
    #[diagnostic(code(rgbds_link::overlay_io))]
    OverlayIo {
        /// The path that failed to read.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// The linker, bound to one run's worth of configuration.
#[derive(Debug)]
pub struct Linker {
    configuration: Configuration,
}

impl Linker {
    pub(crate) fn with_configuration(configuration: Configuration) -> Self {
        Self { configuration }
    }

    /// Read every input object, place every section, patch, and write the
    /// outputs the configuration requested. Assertions are reported
    /// through `diagnostics`; anything at [`AssertionLevel::Error`] or
    /// above makes the whole run return [`LinkerError::Assertion`] after
    /// every assertion has had a chance to be reported (spec §4.12, §7:
    /// "the assigner aggregates all placement failures before exiting").
    pub fn link(self, diagnostics: &mut DiagnosticEngine) -> Result<(), LinkerError> {
        let config = &self.configuration;

        if config.input_files.is_empty() {
            return Err(LinkerError::NoInputFiles);
        }

        let program = Program::load(&config.input_files)?;
        program.index_symbols()?;
        let Program { sections: raw_sections, symbols: raw_symbols, assertions: raw_assertions, file_stack } =
            program;

        let (mut sections, remap) = assign::merge_with_remap(raw_sections)?;
        let mut symbols = raw_symbols;
        for symbol in &mut symbols {
            if let Some(section) = symbol.section {
                symbol.section = Some(remap[section as usize]);
            }
        }
        let mut assertions = raw_assertions;
        for assertion in &mut assertions {
            assertion.patch.pc_section = remap[assertion.patch.pc_section as usize];
        }

        let mut placement = Placement::with_bank_order(config.bank_order());

        let already_placed = match &config.linker_script {
            Some(path) => Script::load(path)?.execute(&mut sections, &mut placement)?,
            None => HashSet::new(),
        };

        assign::place_remaining(&mut sections, &mut placement, &already_placed)?;

        let by_name = index_symbols_by_name(&symbols);

        patch::apply_all(&mut sections, &symbols, &by_name)?;

        let failures = patch::evaluate_assertions(&assertions, &sections, &symbols, &by_name)?;
        let mut hard_failure = false;
        for failure in &failures {
            let owned_backtrace;
            let backtrace: &dyn Backtrace = match failure.node {
                Some(node) => {
                    owned_backtrace = file_stack.backtrace_at(node, failure.line);
                    &owned_backtrace
                }
                None => &NoBacktrace,
            };
            let message = format!("assertion failed: {}", failure.message);
            match failure.level {
                AssertionLevel::Warn => {
                    diagnostics.warn(rgbds_diagnostics::WarningFlag::User, message, backtrace)
                }
                AssertionLevel::Error => {
                    let _ = diagnostics.error(message, backtrace);
                    hard_failure = true;
                }
                AssertionLevel::Fatal => {
                    let _ = diagnostics.fatal(message, backtrace);
                    hard_failure = true;
                }
            }
        }
        if hard_failure {
            return Err(LinkerError::Assertion(failures[0].message.clone()));
        }

        if let Some(path) = &config.output_file {
            let overlay = match &config.overlay_file {
                Some(overlay_path) => Some(
                    fs::read(overlay_path)
                        .map_err(|source| LinkerError::OverlayIo { path: path_string(overlay_path), source })?,
                ),
                None => None,
            };
            let mut bytes = Vec::new();
            write_rom(&mut bytes, &sections, config.pad_byte, overlay.as_deref())
                .expect("writing to a Vec<u8> cannot fail");
            write_file(path, &bytes)?;
        }

        if let Some(path) = &config.sym_file {
            let mut bytes = Vec::new();
            write_sym_file(&mut bytes, &sections, &symbols).expect("writing to a Vec<u8> cannot fail");
            write_file(path, &bytes)?;
        }

        if let Some(path) = &config.map_file {
            let mut bytes = Vec::new();
            write_map_file(&mut bytes, &sections, &symbols).expect("writing to a Vec<u8> cannot fail");
            write_file(path, &bytes)?;
        }

        Ok(())
    }
}

fn index_symbols_by_name(symbols: &[rgbds_object::symbol::Symbol]) -> std::collections::HashMap<String, usize> {
    symbols
        .iter()
        .enumerate()
        .filter(|(_, symbol)| symbol.ty != rgbds_object::symbol::SymbolType::Ref)
        .map(|(index, symbol)| (symbol.name.clone(), index))
        .collect()
}

fn write_file(path: &PathBuf, bytes: &[u8]) -> Result<(), LinkerError> {
    fs::write(path, bytes).map_err(|source| LinkerError::OutputIo { path: path_string(path), source })
}

fn path_string(path: &PathBuf) -> String {
    path.display().to_string()
}
