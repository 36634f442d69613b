use std::fmt;

/// The three severities a diagnostic can be emitted at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Classifiable by flag, printable, does not block output.
    Warning,
    /// Counted, printed with a backtrace; the current phase keeps running so
    /// more errors can be found, but the process exits non-zero afterwards.
    Error,
    /// Printed with a backtrace and aborts the process immediately.
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Fatal => "fatal error",
        })
    }
}
