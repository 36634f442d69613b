use miette::Diagnostic;
use thiserror::Error as ThisError;

/// Hard failures raised by the diagnostics machinery itself, as distinct
/// from the textual warnings/errors/fatals it prints on behalf of the
/// assembler and linker.
#[derive(Debug, ThisError, Diagnostic)]
pub enum Error {
    /// A `-W`/`-Werror` argument didn't match any known flag name.
    #[error("unknown warning flag `{0}`")]
    #[diagnostic(code(rgbds_diagnostics::unknown_warning_flag))]
    UnknownWarningFlag(String),

    /// A parametric flag's `=<level>` suffix wasn't a valid integer.
    #[error("invalid warning level in `-W{0}`")]
    #[diagnostic(code(rgbds_diagnostics::invalid_warning_level))]
    InvalidWarningLevel(String),

    /// The configured error cap was reached; the run is aborting early.
    #[error("too many errors (exceeded limit of {limit})")]
    #[diagnostic(code(rgbds_diagnostics::too_many_errors))]
    TooManyErrors {
        /// The configured cap that was exceeded.
        limit: usize,
    },

    /// A fatal diagnostic was raised; the message was already printed by
    /// the engine, this just carries the abort up the call stack.
    #[error("{0}")]
    #[diagnostic(code(rgbds_diagnostics::fatal))]
    Fatal(String),
}
