//! Deferred writes into a section's data, resolved by the linker once
//! every section has a final address.
//!
//! Grounded in spec §3/§4.9/§4.12: a patch carries the RPN expression that
//! computes its value and enough context (`pc_section`/`pc_offset`) to
//! evaluate `@`-relative and `jr`-relative expressions against the
//! *patch's own* program counter, which may differ from the section it
//! physically lives in once `LOAD` blocks are involved.

use rgbds_object_macros::ByteCode;

use crate::filestack::FileStackNodeId;
use crate::rpn::Rpn;
use crate::{Input, Read, Result, Write};

/// What kind of value a patch writes, and at what width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ByteCode)]
#[repr(u8)]
pub enum PatchType {
    /// A single byte, range-checked to `[-128, 255]`.
    Byte = 0,
    /// A little-endian 16-bit word, range-checked to `[-32768, 65535]`.
    Word = 1,
    /// A little-endian 32-bit value; any 32-bit pattern is accepted.
    Long = 2,
    /// A PC-relative signed byte (`jr`), range-checked to `[-128, 127]`
    /// once the target minus `(pc_section.org + pc_offset + 1)` is
    /// computed.
    Jr = 3,
    /// Not a write at all: evaluates its expression and, if it folds to
    /// zero, raises a diagnostic carrying the assertion's message.
    Assert = 4,
}

/// One deferred write (or assertion).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    /// Where in source this patch was generated.
    pub node: Option<FileStackNodeId>,
    /// The line number within `node`.
    pub line: u32,
    /// The byte offset within the owning section's data this patch writes
    /// to. Unused (but present, as `0`) for [`PatchType::Assert`].
    pub offset: u32,
    /// The index of the section whose program counter `@` resolves to
    /// while evaluating this patch's expression — the *virtual* section if
    /// this patch was emitted inside a `LOAD` block, not necessarily the
    /// section the bytes land in.
    pub pc_section: u32,
    /// The program-counter offset within `pc_section`, used for `@` and
    /// for computing `jr`'s relative displacement.
    pub pc_offset: u32,
    /// The width/kind of this patch.
    pub ty: PatchType,
    /// The expression to evaluate.
    pub expr: Rpn,
}

impl Read for Patch {
    fn read(input: Input<'_>) -> Result<'_, Self> {
        let (input, node_id) = u32::read(input)?;
        let (input, line) = u32::read(input)?;
        let (input, offset) = u32::read(input)?;
        let (input, pc_section) = u32::read(input)?;
        let (input, pc_offset) = u32::read(input)?;
        let (input, ty) = PatchType::read(input)?;
        let (input, expr) = Rpn::read_patch_expr(input)?;

        Ok((
            input,
            Self {
                node: (node_id != u32::MAX).then_some(FileStackNodeId(node_id)),
                line,
                offset,
                pc_section,
                pc_offset,
                ty,
                expr,
            },
        ))
    }
}

impl Write for Patch {
    fn write(&self, output: &mut Vec<u8>) {
        self.node.map(|id| id.0).unwrap_or(u32::MAX).write(output);
        self.line.write(output);
        self.offset.write(output);
        self.pc_section.write(output);
        self.pc_offset.write(output);
        self.ty.write(output);
        self.expr.write_patch_expr(output);
    }
}

/// An assertion: a patch whose expression is checked, never written
/// anywhere, plus the message to show if it folds to zero (spec §4.9/§4.12).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assertion {
    /// The underlying check (always [`PatchType::Assert`]).
    pub patch: Patch,
    /// The severity to report at if the check fails: `Warning`, `Error` or
    /// `Fatal`, mirrored here as a plain string tag rather than pulling in
    /// `rgbds-diagnostics::Severity` to keep this crate's dependency graph
    /// a straight line (asm/link depend on both, not the other way round).
    pub level: AssertionLevel,
    /// The message to show alongside the backtrace.
    pub message: String,
}

/// The three severities an `ASSERT`/`STATIC_ASSERT` can be declared at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ByteCode)]
#[repr(u8)]
pub enum AssertionLevel {
    /// Non-blocking.
    Warn = 0,
    /// Counted, blocks a successful exit.
    Error = 1,
    /// Aborts the link immediately.
    Fatal = 2,
}

impl Read for Assertion {
    fn read(input: Input<'_>) -> Result<'_, Self> {
        let (input, patch) = Patch::read(input)?;
        let (input, level) = AssertionLevel::read(input)?;
        let (input, message) = crate::read_write::read_string(input)?;

        Ok((input, Self { patch, level, message }))
    }
}

impl Write for Assertion {
    fn write(&self, output: &mut Vec<u8>) {
        self.patch.write(output);
        self.level.write(output);
        crate::read_write::write_string(&self.message, output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpn::Rpn;

    fn sample_patch(ty: PatchType) -> Patch {
        Patch {
            node: None,
            line: 1,
            offset: 0,
            pc_section: 0,
            pc_offset: 0,
            ty,
            expr: Rpn::unresolved_symbol("label"),
        }
    }

    #[test]
    fn patch_round_trips() {
        let patch = sample_patch(PatchType::Word);
        let mut bytes = Vec::new();
        patch.write(&mut bytes);
        let (rest, read_back) = Patch::read(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(read_back, patch);
    }

    #[test]
    fn assertion_round_trips_with_its_message() {
        let assertion = Assertion {
            patch: sample_patch(PatchType::Assert),
            level: AssertionLevel::Error,
            message: "buffer too small".to_owned(),
        };

        let mut bytes = Vec::new();
        assertion.write(&mut bytes);
        let (rest, read_back) = Assertion::read(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(read_back, assertion);
    }
}
