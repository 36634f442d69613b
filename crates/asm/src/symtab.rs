//! The assembler's view of the symbol table: wraps
//! [`rgbds_object::symbol::SymbolTable`] and layers on the built-in
//! symbols that need live lexer/assembler state to resolve — `@`,
//! `_NARG`, `__LINE__`, `__FILE__`, the `_RS` struct-layout counter and
//! friends (spec §4.7, supplemented per SPEC_FULL §8).

use rgbds_object::filestack::FileStackNodeId;
use rgbds_object::symbol::{Symbol, SymbolError, SymbolFlag, SymbolTable, SymbolType, SymbolValue};

/// A built-in value that's computed on the fly rather than stored, because
/// it depends on state that changes underneath it (the current section's
/// write cursor, the active macro's argument count, the current file
/// position).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    /// `@`: the current address within the current section.
    Pc,
    /// `_NARG`: the number of arguments the current macro was invoked
    /// with.
    Narg,
    /// `__LINE__`: the current line number in the current file.
    Line,
    /// `_RS`: the running struct-layout cursor, advanced by `_RB`/`_RW`/`_RL`.
    Rs,
}

/// Errors specific to the assembler's symbol layer (on top of
/// [`SymbolError`]).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssemblerSymbolError {
    /// The underlying table rejected the operation.
    #[error(transparent)]
    Table(#[from] SymbolError),
    /// `_RB n`/`_RW n`/`_RL n` was used outside any `_RS` context (spec
    /// §4.7 supplement: these are only meaningful as `EQU`-time helper
    /// calls, always valid, but kept as a distinct error variant for
    /// parity with how the parser reports other `_RS` misuse).
    #[error("`_RS` counter not initialized")]
    RsUninitialized,
}

/// The assembler's symbol table: an [`rgbds_object::symbol::SymbolTable`]
/// plus the handful of pieces of live state `@`, `_NARG`, `_RS` and co.
/// need.
#[derive(Debug, Default)]
pub struct AssemblerSymbols {
    table: SymbolTable,
    rs_counter: i32,
}

impl AssemblerSymbols {
    /// An empty table, with `_RS` starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// The underlying table, for read access (`EQUS` text lookups,
    /// interpolation, etc.).
    pub fn table(&self) -> &SymbolTable {
        &self.table
    }

    /// The underlying table, for direct mutation by the parser.
    pub fn table_mut(&mut self) -> &mut SymbolTable {
        &mut self.table
    }

    /// `_RB`: reserve `count` bytes in the struct layout, returning the
    /// offset before the reservation, and advance `_RS` by `count`.
    pub fn reserve_bytes(&mut self, count: i32) -> i32 {
        let offset = self.rs_counter;
        self.rs_counter = self.rs_counter.wrapping_add(count);
        offset
    }

    /// `_RW`: like [`reserve_bytes`](Self::reserve_bytes) but in units of
    /// 2 bytes.
    pub fn reserve_words(&mut self, count: i32) -> i32 {
        self.reserve_bytes(count.wrapping_mul(2)) / 2
    }

    /// `_RL`: like [`reserve_bytes`](Self::reserve_bytes) but in units of
    /// 4 bytes.
    pub fn reserve_longs(&mut self, count: i32) -> i32 {
        self.reserve_bytes(count.wrapping_mul(4)) / 4
    }

    /// The current `_RS` value.
    pub fn rs(&self) -> i32 {
        self.rs_counter
    }

    /// Reset `_RS` back to zero (`_RSRESET`) or an explicit value
    /// (`_RSSET n`).
    pub fn set_rs(&mut self, value: i32) {
        self.rs_counter = value;
    }

    /// Define a plain integer constant (`EQU`/label/`VAR`), resolving
    /// local-label scoping first.
    pub fn define_integer(
        &mut self,
        name: &str,
        ty: SymbolType,
        value: i32,
        section: Option<u32>,
        node: Option<FileStackNodeId>,
        line: u32,
        exported: bool,
    ) -> Result<(), AssemblerSymbolError> {
        let name = self.table.resolve_scope(name)?;
        let mut flags = SymbolFlag::Defined.into();
        if exported {
            flags |= SymbolFlag::Exported;
        }

        let symbol =
            Symbol { name, ty, scope: None, node, line, section, value: SymbolValue::Integer(value), flags };

        if ty.is_redefinable() {
            self.table.redef(symbol)?;
        } else {
            self.table.define(symbol)?;
        }
        Ok(())
    }

    /// Define an `EQUS` string alias. `redefine` is `true` for the
    /// `REDEF` keyword (overwrite-in-place allowed) and `false` for bare
    /// `EQUS` (errors if the name is already defined, per spec §3: "only
    /// via `REDEF`").
    pub fn define_string(
        &mut self,
        name: &str,
        value: String,
        node: Option<FileStackNodeId>,
        line: u32,
        redefine: bool,
    ) -> Result<(), AssemblerSymbolError> {
        let name = self.table.resolve_scope(name)?;
        let symbol = Symbol {
            name,
            ty: SymbolType::Equs,
            scope: None,
            node,
            line,
            section: None,
            value: SymbolValue::String(value),
            flags: SymbolFlag::Defined.into(),
        };
        if redefine {
            self.table.redef(symbol)?;
        } else {
            self.table.define(symbol)?;
        }
        Ok(())
    }

    /// Define a `MACRO` body capture. `redefine` has the same meaning as
    /// in [`define_string`](Self::define_string).
    pub fn define_macro(
        &mut self,
        name: &str,
        body: String,
        node: Option<FileStackNodeId>,
        line: u32,
        redefine: bool,
    ) -> Result<(), AssemblerSymbolError> {
        let symbol = Symbol {
            name: name.to_owned(),
            ty: SymbolType::Macro,
            scope: None,
            node,
            line,
            section: None,
            value: SymbolValue::Capture(body),
            flags: SymbolFlag::Defined.into(),
        };
        if redefine {
            self.table.redef(symbol)?;
        } else {
            self.table.define(symbol)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rb_rw_rl_advance_the_shared_rs_counter() {
        let mut symbols = AssemblerSymbols::new();
        assert_eq!(symbols.reserve_bytes(1), 0);
        assert_eq!(symbols.reserve_words(2), 1);
        assert_eq!(symbols.rs(), 5);
    }

    #[test]
    fn rsreset_rewinds_to_zero() {
        let mut symbols = AssemblerSymbols::new();
        symbols.reserve_bytes(10);
        symbols.set_rs(0);
        assert_eq!(symbols.rs(), 0);
    }

    #[test]
    fn define_integer_marks_label_exported() {
        let mut symbols = AssemblerSymbols::new();
        symbols
            .define_integer("Start", SymbolType::Label, 0, Some(0), None, 1, true)
            .unwrap();
        let symbol = symbols.table().get("Start").unwrap();
        assert!(symbol.flags.contains(SymbolFlag::Exported));
    }

    #[test]
    fn bare_equs_redefinition_is_an_error() {
        let mut symbols = AssemblerSymbols::new();
        symbols.define_string("GREETING", "\"hi\"".to_owned(), None, 1, false).unwrap();
        let err = symbols.define_string("GREETING", "\"bye\"".to_owned(), None, 2, false).unwrap_err();
        assert!(matches!(err, AssemblerSymbolError::Table(SymbolError::AlreadyDefined(ref name)) if name == "GREETING"));
    }

    #[test]
    fn equs_is_redefinable_via_redef() {
        let mut symbols = AssemblerSymbols::new();
        symbols.define_string("GREETING", "\"hi\"".to_owned(), None, 1, false).unwrap();
        symbols.define_string("GREETING", "\"bye\"".to_owned(), None, 2, true).unwrap();
        assert!(matches!(
            symbols.table().get("GREETING").unwrap().value,
            SymbolValue::String(ref s) if s == "\"bye\""
        ));
    }
}
