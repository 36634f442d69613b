//! A hashed, scoped symbol table: `EQU`/`VAR` constants, `LABEL` addresses,
//! `EQUS` string aliases, `MACRO` source captures, and `REF` for names
//! referenced but not (yet, or ever) defined locally.
//!
//! Grounded in spec §4.7 / §3. Local labels (`.loop`) are scoped to the
//! last non-local ("global") label defined before them, the same rule the
//! reference implementation's `sym_FindScopedSymbol` applies; `FindScoped`
//! below is the direct analogue.

use std::collections::HashMap;
use std::hash::{BuildHasherDefault, Hasher};

use rgbds_object_macros::ByteCode;

use crate::filestack::FileStackNodeId;
use crate::read_write::{read_string, write_string};
use crate::{Input, Read, Write};

type StdResult<T, E> = std::result::Result<T, E>;
type Result<'a, O> = crate::Result<'a, O>;

/// The kind of value a [`Symbol`] carries, and how it was defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ByteCode)]
#[repr(u8)]
pub enum SymbolType {
    /// A constant defined with `EQU`. Never redefinable.
    Equ = 0,
    /// A reassignable constant defined with `=`/`SET`. Redefinable freely.
    Var = 1,
    /// An address inside a section, defined by a label.
    Label = 2,
    /// A string alias defined with `EQUS`. Redefinable via `REDEF`.
    Equs = 3,
    /// A captured macro body, defined with `MACRO`. Redefinable via
    /// `REDEF`.
    Macro = 4,
    /// Referenced but not defined in this translation unit; resolved by
    /// the linker against another object's exported symbol.
    Ref = 5,
}

impl SymbolType {
    /// Whether `REDEF` is allowed for a symbol of this type (spec §4.7:
    /// "allowed for VAR, EQUS, MACRO only").
    pub fn is_redefinable(self) -> bool {
        matches!(self, Self::Var | Self::Equs | Self::Macro)
    }
}

/// What a symbol's value actually is, per spec §3: "integer, captured
/// source span, or string".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolValue {
    /// `EQU`/`VAR`/`LABEL` values: an integer (for a `LABEL`, the offset
    /// within its owning section).
    Integer(i32),
    /// `EQUS` values: the (already macro-arg-expanded) replacement text.
    String(String),
    /// `MACRO` values: the exact, unexpanded source text of the body,
    /// re-lexed fresh on every invocation.
    Capture(String),
}

/// A single bit of out-of-band state about a symbol (spec §3: "flags
/// {exported, built-in, defined}").
#[enumflags2::bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolFlag {
    /// `EXPORT`ed: visible to other objects at link time.
    Exported = 1 << 0,
    /// Registered by the assembler itself (`@`, `_NARG`, …), not by source.
    BuiltIn = 1 << 1,
    /// Has a value yet (false between a forward `REF` and its definition).
    Defined = 1 << 2,
}

/// The set of [`SymbolFlag`]s currently set on a symbol.
pub type SymbolFlags = enumflags2::BitFlags<SymbolFlag>;

/// A single entry of the symbol table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    /// The symbol's full name (scoped locals are stored as
    /// `Scope.local`).
    pub name: String,
    /// What kind of symbol this is.
    pub ty: SymbolType,
    /// For a local symbol, the global label that owns its scope.
    pub scope: Option<String>,
    /// The file-stack frame this symbol was defined (or first referenced)
    /// in.
    pub node: Option<FileStackNodeId>,
    /// The line number within `node`.
    pub line: u32,
    /// For a `LABEL`, the section it belongs to (an index the caller
    /// interprets against its own section list).
    pub section: Option<u32>,
    /// The symbol's value.
    pub value: SymbolValue,
    /// Out-of-band flags.
    pub flags: SymbolFlags,
}

impl Symbol {
    /// The integer this symbol carries right now, or `None` if it isn't
    /// integer-valued (a string/capture symbol, or an undefined `REF`).
    pub fn integer_value(&self) -> Option<i32> {
        match &self.value {
            SymbolValue::Integer(value) => Some(*value),
            _ => None,
        }
    }
}

/// Reads/writes the subset of a [`Symbol`] that the object file format
/// (spec §4.9) actually stores: `{ zstring name, u8 type, if not REF: {
/// u32 file_node_id, u32 line_no, u32 section_id, i32 value } }`. Sentinels
/// for "no section"/"no node" are `u32::MAX`, matching the format's
/// sentinel convention.
impl Read for Symbol {
    fn read(input: Input<'_>) -> Result<'_, Self> {
        let (input, name) = read_string(input)?;
        let (input, ty) = SymbolType::read(input)?;

        if ty == SymbolType::Ref {
            return Ok((
                input,
                Self {
                    name,
                    ty,
                    scope: None,
                    node: None,
                    line: 0,
                    section: None,
                    value: SymbolValue::Integer(0),
                    flags: SymbolFlags::empty(),
                },
            ));
        }

        let (input, node_id) = u32::read(input)?;
        let (input, line) = u32::read(input)?;
        let (input, section_id) = u32::read(input)?;
        let (input, value) = i32::read(input)?;

        Ok((
            input,
            Self {
                name,
                ty,
                scope: None,
                node: (node_id != u32::MAX).then_some(FileStackNodeId(node_id)),
                line,
                section: (section_id != u32::MAX).then_some(section_id),
                value: SymbolValue::Integer(value),
                flags: SymbolFlag::Defined.into(),
            },
        ))
    }
}

impl Write for Symbol {
    fn write(&self, output: &mut Vec<u8>) {
        write_string(&self.name, output);
        self.ty.write(output);

        if self.ty == SymbolType::Ref {
            return;
        }

        self.node.map(|id| id.0).unwrap_or(u32::MAX).write(output);
        self.line.write(output);
        self.section.unwrap_or(u32::MAX).write(output);
        self.value.integer_or_zero().write(output);
    }
}

impl SymbolValue {
    fn integer_or_zero(&self) -> i32 {
        match self {
            Self::Integer(value) => *value,
            _ => 0,
        }
    }
}

/// FNV-1a, used purely so the symbol table's internal lookup hasher is
/// deterministic across runs/platforms (spec §9: "the implementation must
/// not depend on unordered iteration" — iteration here always goes through
/// `symbols()`, which is insertion-ordered, but the hasher is kept
/// deterministic too so debug output doesn't vary by process).
#[derive(Default)]
pub struct Fnv1a(u64);

impl Hasher for Fnv1a {
    fn write(&mut self, bytes: &[u8]) {
        let mut hash = if self.0 == 0 { 0xcbf2_9ce4_8422_2325 } else { self.0 };
        for &byte in bytes {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x0000_0100_0000_01B3);
        }
        self.0 = hash;
    }

    fn finish(&self) -> u64 {
        self.0
    }
}

/// Errors raised by [`SymbolTable`] operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    /// `Define` on a name that's already defined and isn't redefinable.
    #[error("`{0}` already defined")]
    AlreadyDefined(String),
    /// `Redef` on a type that doesn't support it.
    #[error("`{0}` cannot be redefined (only VAR, EQUS and MACRO can)")]
    NotRedefinable(String),
    /// `Purge` on a name that doesn't exist.
    #[error("`{0}` is not defined")]
    Undefined(String),
    /// `GetReloc` on a symbol that isn't a `LABEL`.
    #[error("`{0}` is not a label")]
    NotALabel(String),
    /// A local name (leading `.`) was looked up with no active scope.
    #[error("local symbol `{0}` referenced outside any scope")]
    NoActiveScope(String),
    /// `Purge` on the name currently acting as the local-label scope
    /// (spec §9's open question, resolved as an error: see `DESIGN.md`).
    #[error("cannot `PURGE` `{0}`, it is the active local-label scope")]
    PurgeActiveScope(String),
}

/// The scoped, hashed symbol table threaded through one assembly run.
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    by_name: HashMap<String, usize, BuildHasherDefault<Fnv1a>>,
    current_scope: Option<String>,
}

impl SymbolTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a possibly-local name against the current scope, per spec
    /// §4.7's `FindScoped`: a name starting with `.` is rewritten to
    /// `{scope}{name}`.
    pub fn resolve_scope(&self, name: &str) -> StdResult<String, SymbolError> {
        if let Some(local) = name.strip_prefix('.') {
            let scope = self
                .current_scope
                .as_ref()
                .ok_or_else(|| SymbolError::NoActiveScope(name.to_owned()))?;
            let _ = local;
            Ok(format!("{scope}{name}"))
        } else {
            Ok(name.to_owned())
        }
    }

    /// Define a new symbol (`EQU`, `LABEL`, bare `EQUS`/`MACRO`). Fails if a
    /// symbol with this (already-scope-resolved) name already exists,
    /// regardless of its type: per spec §3, a symbol's value is constant
    /// once defined "unless ... it is EQUS/MACRO (rebindable only via
    /// `REDEF`)" — bare re-definition is never silent, only [`redef`](
    /// Self::redef) (the `REDEF` keyword) may overwrite.
    pub fn define(&mut self, symbol: Symbol) -> StdResult<(), SymbolError> {
        if !symbol.name.starts_with('.') {
            self.current_scope = Some(symbol.name.clone());
        }

        if self.by_name.contains_key(&symbol.name) {
            return Err(SymbolError::AlreadyDefined(symbol.name));
        }

        self.insert_new(symbol);
        Ok(())
    }

    /// `REDEF`: overwrite an existing symbol in place if its type allows
    /// it (`VAR`, `EQUS`, `MACRO`), or define it fresh if the name is new
    /// (a `REDEF` on a never-before-seen name is just a definition).
    pub fn redef(&mut self, symbol: Symbol) -> StdResult<(), SymbolError> {
        if !symbol.name.starts_with('.') {
            self.current_scope = Some(symbol.name.clone());
        }

        match self.by_name.get(&symbol.name) {
            Some(&index) => {
                if !self.symbols[index].ty.is_redefinable() {
                    return Err(SymbolError::NotRedefinable(symbol.name));
                }
                self.symbols[index] = symbol;
                Ok(())
            }
            None => {
                self.insert_new(symbol);
                Ok(())
            }
        }
    }

    fn insert_new(&mut self, symbol: Symbol) {
        let index = self.symbols.len();
        self.by_name.insert(symbol.name.clone(), index);
        self.symbols.push(symbol);
    }

    /// `PURGE`. Succeeds only if the name exists and isn't the active
    /// local-label scope (spec §9: purging a symbol currently on the scope
    /// stack is treated as an error, since later `.local` labels would
    /// otherwise silently resolve against a dangling scope prefix).
    pub fn purge(&mut self, name: &str) -> StdResult<Symbol, SymbolError> {
        if self.current_scope.as_deref() == Some(name) {
            return Err(SymbolError::PurgeActiveScope(name.to_owned()));
        }

        let index =
            self.by_name.remove(name).ok_or_else(|| SymbolError::Undefined(name.to_owned()))?;
        let removed = self.symbols.remove(index);

        // Every index after the removed one shifted down by one.
        for shifted in self.by_name.values_mut() {
            if *shifted > index {
                *shifted -= 1;
            }
        }

        Ok(removed)
    }

    /// Look up a symbol by its already-scope-resolved name.
    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.by_name.get(name).map(|&index| &self.symbols[index])
    }

    /// Look up a symbol by its already-scope-resolved name, mutably.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Symbol> {
        let index = *self.by_name.get(name)?;
        Some(&mut self.symbols[index])
    }

    /// `GetReloc`: the `(section, offset)` pair for a `LABEL` symbol.
    pub fn get_reloc(&self, name: &str) -> StdResult<(u32, i32), SymbolError> {
        let symbol = self.get(name).ok_or_else(|| SymbolError::Undefined(name.to_owned()))?;

        if symbol.ty != SymbolType::Label {
            return Err(SymbolError::NotALabel(name.to_owned()));
        }

        let section = symbol.section.ok_or_else(|| SymbolError::NotALabel(name.to_owned()))?;
        let offset = symbol.integer_value().unwrap_or(0);

        Ok((section, offset))
    }

    /// All symbols, in definition order (the order iteration must stay in
    /// for deterministic map/symbol-file output, per spec §9).
    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// The currently active scope (the last non-local label defined).
    pub fn current_scope(&self) -> Option<&str> {
        self.current_scope.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(name: &str) -> Symbol {
        Symbol {
            name: name.to_owned(),
            ty: SymbolType::Label,
            scope: None,
            node: None,
            line: 1,
            section: Some(0),
            value: SymbolValue::Integer(0),
            flags: SymbolFlag::Defined.into(),
        }
    }

    #[test]
    fn define_then_redefine_equ_fails() {
        let mut table = SymbolTable::new();
        let equ = Symbol {
            ty: SymbolType::Equ,
            value: SymbolValue::Integer(1),
            ..label("FOO")
        };
        table.define(equ.clone()).unwrap();
        assert_eq!(table.define(equ).unwrap_err(), SymbolError::AlreadyDefined("FOO".to_owned()));
    }

    #[test]
    fn var_is_freely_redefinable() {
        let mut table = SymbolTable::new();
        let mut var = Symbol { ty: SymbolType::Var, value: SymbolValue::Integer(1), ..label("V") };
        table.define(var.clone()).unwrap();
        var.value = SymbolValue::Integer(2);
        table.redef(var).unwrap();
        assert_eq!(table.get("V").unwrap().integer_value(), Some(2));
    }

    #[test]
    fn local_symbols_scope_to_the_last_global_label() {
        let mut table = SymbolTable::new();
        table.define(label("Foo")).unwrap();
        let scoped = table.resolve_scope(".loop").unwrap();
        assert_eq!(scoped, "Foo.loop");
        table.define(label(&scoped)).unwrap();
        assert!(table.get("Foo.loop").is_some());
    }

    #[test]
    fn local_symbol_without_scope_is_an_error() {
        let table = SymbolTable::new();
        assert_eq!(
            table.resolve_scope(".loop").unwrap_err(),
            SymbolError::NoActiveScope(".loop".to_owned())
        );
    }

    #[test]
    fn purge_removes_and_reindexes() {
        let mut table = SymbolTable::new();
        table.define(label("A")).unwrap();
        table.define(label("B")).unwrap();
        table.purge("A").unwrap();
        assert!(table.get("A").is_none());
        assert!(table.get("B").is_some());
    }

    #[test]
    fn purging_the_active_scope_is_an_error() {
        let mut table = SymbolTable::new();
        table.define(label("Foo")).unwrap();
        assert_eq!(
            table.purge("Foo").unwrap_err(),
            SymbolError::PurgeActiveScope("Foo".to_owned())
        );
        assert!(table.get("Foo").is_some());
    }

    #[test]
    fn bare_define_rejects_a_duplicate_equs() {
        let mut table = SymbolTable::new();
        let equs = Symbol { ty: SymbolType::Equs, value: SymbolValue::String("a".into()), ..label("G") };
        table.define(equs.clone()).unwrap();
        assert_eq!(table.define(equs).unwrap_err(), SymbolError::AlreadyDefined("G".to_owned()));
    }

    #[test]
    fn redef_overwrites_an_existing_equs_and_defines_a_fresh_one() {
        let mut table = SymbolTable::new();
        let mut equs = Symbol { ty: SymbolType::Equs, value: SymbolValue::String("a".into()), ..label("G") };
        table.redef(equs.clone()).unwrap();
        equs.value = SymbolValue::String("b".into());
        table.redef(equs).unwrap();
        assert!(matches!(
            table.get("G").unwrap().value,
            SymbolValue::String(ref s) if s == "b"
        ));
    }

    #[test]
    fn get_reloc_requires_a_label() {
        let mut table = SymbolTable::new();
        let equ = Symbol { ty: SymbolType::Equ, value: SymbolValue::Integer(1), ..label("X") };
        table.define(equ).unwrap();
        assert_eq!(table.get_reloc("X").unwrap_err(), SymbolError::NotALabel("X".to_owned()));
    }

    #[test]
    fn symbol_without_node_round_trips_through_object_wire_format() {
        let mut bytes = Vec::new();
        let symbol = Symbol {
            ty: SymbolType::Equ,
            value: SymbolValue::Integer(42),
            ..label("FOO")
        };
        symbol.write(&mut bytes);
        let (rest, read_back) = Symbol::read(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(read_back.name, "FOO");
        assert_eq!(read_back.integer_value(), Some(42));
    }
}
