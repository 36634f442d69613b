#[cfg(feature = "fancy-errors")]
use miette::{set_hook, MietteHandlerOpts};
use miette::{Diagnostic, InstallError, Result};
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub(crate) enum Error {
    #[error("The argument `{0}` contains invalid Unicode data.")]
    InvalidArgumentEncoding(String),

    #[error("The program name is missing from the command-line.")]
    ProgramNameIsMissing,

    #[error("I was not able to read the command-line properly:\n{0}")]
    #[diagnostic(code(rgbasm::command_line))]
    CommandLine(String),

    #[error("couldn't read `{path}`: {source}")]
    #[diagnostic(code(rgbasm::io))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    #[diagnostic(code(rgbasm::warning_flag))]
    Diagnostics(#[from] rgbds_diagnostics::Error),

    #[error(transparent)]
    #[diagnostic(code(rgbasm::assemble))]
    Assemble(#[from] rgbds_asm::assembler::AssemblerError),

    #[error("{0} error(s) reported")]
    #[diagnostic(code(rgbasm::had_errors))]
    HadErrors(usize),
}

impl Error {
    pub(crate) fn install_and_configure() -> Result<(), InstallError> {
        #[cfg(feature = "fancy-errors")]
        set_hook(Box::new(|_| {
            Box::new(
                MietteHandlerOpts::new()
                    .with_cause_chain()
                    .width(85)
                    .terminal_links(false)
                    .build(),
            )
        }))?;

        Ok(())
    }
}
