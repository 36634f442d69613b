/// A single frame of a diagnostic backtrace: one line describing where in
/// the file/macro/repeat-block call chain a diagnostic originated.
///
/// Kept as a plain string rather than structured fields because the
/// producer (a file-stack node, in `rgbds-object`) already knows how to
/// describe itself; this crate only needs to print the chain, not
/// understand it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BacktraceFrame {
    /// Human-readable description of this frame, e.g. `"macro FOO (from
    /// main.asm:12)"` or `"main.asm:3"`.
    pub description: String,
}

/// Anything that can describe the call chain leading to the current
/// position, innermost frame first.
///
/// `rgbds-object`'s `FileStackNode` implements this; this crate has no
/// dependency on that type so that it remains usable from both the
/// assembler and the linker without pulling in the object model.
pub trait Backtrace {
    /// The chain of frames, innermost (closest to the error site) first.
    fn frames(&self) -> Vec<BacktraceFrame>;
}

/// A backtrace with no frames, used for diagnostics that aren't tied to any
/// particular source position (e.g. a bad command-line argument).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBacktrace;

impl Backtrace for NoBacktrace {
    fn frames(&self) -> Vec<BacktraceFrame> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_backtrace_has_no_frames() {
        assert!(NoBacktrace.frames().is_empty());
    }
}
