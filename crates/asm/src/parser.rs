//! Hand-rolled recursive-descent parser driving the section emitter,
//! symbol table, charmap table and diagnostics engine (spec §4.5's
//! grammar, §4.8's vocabulary).
//!
//! Unlike the object crate's wire-format (de)serializers, this isn't
//! `nom`-based: the lexer already hands out one token at a time with a
//! single slot of lookahead, which is all a recursive-descent grammar
//! this shape needs, and `nom`'s combinators are built for byte-slice
//! input, not a token stream interleaved with file-stack pushes/pops.

use std::path::PathBuf;
use std::rc::Rc;

use rgbds_diagnostics::{Backtrace, DiagnosticEngine, NoBacktrace, ParametricFlag, WarningFlag};
use rgbds_object::patch::{Assertion, AssertionLevel, Patch, PatchType};
use rgbds_object::rpn::{Rpn, RpnOp};
use rgbds_object::section::{SectionModifier, SectionType};
use rgbds_object::symbol::{SymbolFlag, SymbolType, SymbolValue};

use crate::charmap::CharmapDriver;
use crate::filestack::{AssemblerFileStack, MacroArgs};
use crate::instructions::{self, AluOp, Condition, Reg16, Reg8, ShiftOp};
use crate::lexer::{Interpolate, LexError, Lexer, Mode, Token};
use crate::section::SectionEmitter;
use crate::symtab::AssemblerSymbols;

/// One open `IF`/`ELIF`/`ELSE` chain: whether some branch in it has already
/// run, so a later `ELIF`/`ELSE` knows to skip rather than evaluate.
struct IfFrame {
    taken: bool,
}

/// Errors a parse step can raise, beyond what's already reported through
/// the diagnostics engine (recoverable syntax/semantic problems go
/// through `DiagnosticEngine::error`; this enum is for the few things
/// that abort the whole run, matching `rgbds_diagnostics::engine`'s
/// fatal/error-cap split).
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The lexer couldn't scan the next token.
    #[error(transparent)]
    Lex(#[from] LexError),
    /// A token appeared where the grammar didn't expect it.
    #[error("unexpected {0}, expected {1}")]
    Unexpected(Token, &'static str),
    /// A directive referenced a section/charmap/symbol operation that
    /// failed.
    #[error("{0}")]
    Semantic(String),
    /// The diagnostics engine hit its error cap or an explicit `FAIL`.
    #[error("too many errors, aborting")]
    Aborted,
}

/// Ties the lexer, file stack, section emitter, symbol table and charmap
/// driver together into one source-to-sections pass.
pub struct Parser<'a> {
    stack: &'a mut AssemblerFileStack,
    lexer: Lexer,
    lookahead: Option<Token>,
    sections: SectionEmitter,
    symbols: AssemblerSymbols,
    charmaps: CharmapDriver,
    diagnostics: &'a mut DiagnosticEngine,
    if_stack: Vec<IfFrame>,
    include_paths: Vec<PathBuf>,
    default_pad_byte: u8,
    assertions: Vec<Assertion>,
}

struct SymbolInterpolator<'a>(&'a AssemblerSymbols);

impl Interpolate for SymbolInterpolator<'_> {
    fn interpolate(&self, name: &str) -> Option<String> {
        let symbol = self.0.table().get(name)?;
        match &symbol.value {
            rgbds_object::symbol::SymbolValue::String(text) => Some(text.clone()),
            rgbds_object::symbol::SymbolValue::Integer(value) => Some(value.to_string()),
            rgbds_object::symbol::SymbolValue::Capture(_) => None,
        }
    }
}

impl<'a> Parser<'a> {
    /// A parser ready to read from the top of `stack`.
    pub fn new(stack: &'a mut AssemblerFileStack, diagnostics: &'a mut DiagnosticEngine) -> Self {
        Self {
            stack,
            lexer: Lexer::new(),
            lookahead: None,
            sections: SectionEmitter::new(),
            symbols: AssemblerSymbols::new(),
            charmaps: CharmapDriver::new(),
            diagnostics,
            if_stack: Vec::new(),
            include_paths: Vec::new(),
            default_pad_byte: 0,
            assertions: Vec::new(),
        }
    }

    /// `-p`: the byte `DS` fills with inside a `UNION` when no explicit
    /// fill value is given.
    pub fn with_default_pad_byte(mut self, pad_byte: u8) -> Self {
        self.default_pad_byte = pad_byte;
        self
    }

    /// Directories `INCLUDE` searches (in order) when a path isn't found
    /// relative to the including file (CLI `-I`).
    pub fn with_include_paths(mut self, include_paths: Vec<PathBuf>) -> Self {
        self.include_paths = include_paths;
        self
    }

    /// `-b`/`-g`/`-Q`: alternate digit characters and default fixed-point
    /// fraction width, applied to the underlying lexer.
    pub fn with_lexer_config(
        mut self,
        binary_digits: Option<[char; 2]>,
        gfx_digits: Option<[char; 4]>,
        default_fraction_bits: u8,
    ) -> Self {
        let mut lexer = Lexer::new().with_default_fraction_bits(default_fraction_bits);
        if let Some(chars) = binary_digits {
            lexer = lexer.with_binary_digits(chars);
        }
        if let Some(chars) = gfx_digits {
            lexer = lexer.with_gfx_digits(chars);
        }
        self.lexer = lexer;
        self
    }

    /// Predefine an `EQUS` (if `value` is given) or a `1`-valued `EQU` (if
    /// not), as `-D NAME[=value]` does before assembly starts.
    pub fn predefine(&mut self, name: &str, value: Option<&str>) -> Result<(), ParseError> {
        match value {
            Some(text) => self
                .symbols
                .define_string(name, text.to_owned(), None, 0, true)
                .map_err(|err| ParseError::Semantic(err.to_string())),
            None => self
                .symbols
                .define_integer(name, SymbolType::Equ, 1, None, None, 0, false)
                .map_err(|err| ParseError::Semantic(err.to_string())),
        }
    }

    /// Run until the file stack is exhausted, producing the final section
    /// list and symbol table.
    pub fn run(
        mut self,
    ) -> Result<(SectionEmitter, AssemblerSymbols, CharmapDriver, Vec<Assertion>), ParseError> {
        loop {
            self.skip_newlines()?;
            if self.peek()? == &Token::Eof {
                if !self.stack.pop() {
                    break;
                }
                continue;
            }
            self.statement()?;
        }
        Ok((self.sections, self.symbols, self.charmaps, self.assertions))
    }

    fn peek(&mut self) -> Result<&Token, ParseError> {
        if self.lookahead.is_none() {
            let interp = SymbolInterpolator(&self.symbols);
            self.lookahead = Some(self.lexer.next_token(self.stack, &interp)?);
        }
        Ok(self.lookahead.as_ref().expect("just filled"))
    }

    fn advance(&mut self) -> Result<Token, ParseError> {
        self.peek()?;
        Ok(self.lookahead.take().expect("just peeked"))
    }

    /// Report a parametric warning at the current source position, falling
    /// back to an empty backtrace if the file stack is (unexpectedly)
    /// empty.
    fn warn_parametric(&mut self, flag: ParametricFlag, site_level: u8, message: impl std::fmt::Display) {
        match self.stack.backtrace() {
            Some(backtrace) => self.diagnostics.warn_parametric(flag, site_level, message, &backtrace),
            None => self.diagnostics.warn_parametric(flag, site_level, message, &NoBacktrace),
        }
    }

    fn skip_newlines(&mut self) -> Result<(), ParseError> {
        while self.peek()? == &Token::Newline {
            self.advance()?;
        }
        Ok(())
    }

    fn expect_identifier(&mut self) -> Result<String, ParseError> {
        match self.advance()? {
            Token::Identifier(name) => Ok(name),
            other => Err(ParseError::Unexpected(other, "an identifier")),
        }
    }

    fn eat(&mut self, token: &Token) -> Result<bool, ParseError> {
        if self.peek()? == token {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, token: Token, what: &'static str) -> Result<(), ParseError> {
        if self.advance()? == token {
            Ok(())
        } else {
            Err(ParseError::Unexpected(token, what))
        }
    }

    fn line_node(&self) -> (Option<rgbds_object::filestack::FileStackNodeId>, u32) {
        (self.stack.current_node(), self.stack.current_line())
    }

    /// Refresh the callback symbols whose value depends on live state
    /// (`__LINE__`, `_NARG`, `_RS`, `__FILE__`) so they're also reachable
    /// through ordinary symbol-table lookups — in particular `{sym}`
    /// interpolation, which can't see `builtin_value` since it runs while
    /// the lexer already holds the file stack mutably borrowed.
    fn sync_builtin_symbols(&mut self) {
        let line = self.stack.current_line() as i32;
        let narg = self.stack.macro_args().map(|args| args.count()).unwrap_or(0) as i32;
        let rs = self.symbols.rs();
        let _ = self.symbols.define_integer("__LINE__", SymbolType::Var, line, None, None, 0, false);
        let _ = self.symbols.define_integer("_NARG", SymbolType::Var, narg, None, None, 0, false);
        let _ = self.symbols.define_integer("_RS", SymbolType::Var, rs, None, None, 0, false);
        if let Some(file) = self.stack.current_file_name().map(str::to_owned) {
            let _ = self.symbols.define_string("__FILE__", file, None, 0, true);
        }
    }

    /// One top-level statement: a label, a directive, or an instruction.
    fn statement(&mut self) -> Result<(), ParseError> {
        self.sync_builtin_symbols();
        match self.peek()?.clone() {
            Token::LocalIdentifier(name) => {
                self.advance()?;
                self.label(&name)?;
            }
            Token::Identifier(name) => {
                let upper = name.to_ascii_uppercase();
                if self.is_directive(&upper) {
                    self.advance()?;
                    self.directive(&upper)?;
                    if Self::consumes_own_terminator(&upper) {
                        return Ok(());
                    }
                } else if self.is_mnemonic(&upper) {
                    self.advance()?;
                    self.instruction(&upper)?;
                } else {
                    self.advance()?;
                    self.label_or_define(&name)?;
                    return Ok(());
                }
            }
            other => return Err(ParseError::Unexpected(other, "a statement")),
        }

        match self.advance()? {
            Token::Newline | Token::Eof => Ok(()),
            other => Err(ParseError::Unexpected(other, "end of line")),
        }
    }

    fn label(&mut self, name: &str) -> Result<(), ParseError> {
        let double_colon = if self.eat(&Token::DoubleColon)? {
            true
        } else {
            self.eat(&Token::Colon)?;
            false
        };

        let (node, line) = self.line_node();
        let offset = self
            .sections
            .current_offset()
            .map_err(|err| ParseError::Semantic(err.to_string()))?;
        let section = self
            .sections
            .current_section_index()
            .map_err(|err| ParseError::Semantic(err.to_string()))?;

        self.symbols
            .define_integer(name, SymbolType::Label, offset as i32, Some(section), node, line, double_colon)
            .map_err(|err| ParseError::Semantic(err.to_string()))?;

        Ok(())
    }

    /// A bare identifier that isn't a directive/mnemonic keyword: either a
    /// macro invocation, a label/constant definition (`NAME:`, `NAME EQU
    /// value`, `NAME EQUS "text"`, `NAME SET value`/`NAME = value`), or
    /// (following `NAME: MACRO`/`NAME:: MACRO`) a macro definition.
    fn label_or_define(&mut self, name: &str) -> Result<(), ParseError> {
        let resolved = self.symbols.table().resolve_scope(name).map_err(|err| ParseError::Semantic(err.to_string()))?;
        if let Some(symbol) = self.symbols.table().get(&resolved) {
            if symbol.ty == SymbolType::Macro {
                // A macro invocation's arguments must be scanned raw,
                // before the ordinary tokenizer's one-token lookahead gets
                // anywhere near them (it would mis-tokenize argument text
                // as identifiers/numbers instead of leaving it verbatim).
                return self.invoke_macro(&resolved);
            }
        }

        if matches!(self.peek()?, Token::Colon | Token::DoubleColon) {
            let double_colon = self.eat(&Token::DoubleColon)?;
            if !double_colon {
                self.eat(&Token::Colon)?;
            }

            if let Token::Identifier(word) = self.peek()?.clone() {
                if word.eq_ignore_ascii_case("MACRO") {
                    self.advance()?;
                    return self.directive_macro_def(name);
                }
            }

            return self.define_label(name, double_colon);
        }

        if let Token::Identifier(word) = self.peek()?.clone() {
            match word.to_ascii_uppercase().as_str() {
                "EQU" => {
                    self.advance()?;
                    return self.define_equ(name);
                }
                "EQUS" => {
                    self.advance()?;
                    return self.define_equs(name);
                }
                "SET" => {
                    self.advance()?;
                    return self.define_var(name);
                }
                "RB" => {
                    self.advance()?;
                    return self.define_rs(name, 1);
                }
                "RW" => {
                    self.advance()?;
                    return self.define_rs(name, 2);
                }
                "RL" => {
                    self.advance()?;
                    return self.define_rs(name, 4);
                }
                _ => {}
            }
        }
        if self.peek()? == &Token::Assign {
            self.advance()?;
            return self.define_var(name);
        }

        self.define_label(name, false)
    }

    fn define_label(&mut self, name: &str, exported: bool) -> Result<(), ParseError> {
        let (node, line) = self.line_node();
        let offset =
            self.sections.current_offset().map_err(|err| ParseError::Semantic(err.to_string()))?;
        let section = self
            .sections
            .current_section_index()
            .map_err(|err| ParseError::Semantic(err.to_string()))?;
        self.symbols
            .define_integer(name, SymbolType::Label, offset as i32, Some(section), node, line, exported)
            .map_err(|err| ParseError::Semantic(err.to_string()))
    }

    fn define_equ(&mut self, name: &str) -> Result<(), ParseError> {
        let value = self
            .expr()?
            .value()
            .ok_or_else(|| ParseError::Semantic("`EQU` value must be a constant".to_owned()))?;
        let (node, line) = self.line_node();
        self.symbols
            .define_integer(name, SymbolType::Equ, value, None, node, line, false)
            .map_err(|err| ParseError::Semantic(err.to_string()))
    }

    fn define_var(&mut self, name: &str) -> Result<(), ParseError> {
        let value = self
            .expr()?
            .value()
            .ok_or_else(|| ParseError::Semantic("`SET`/`=` value must be a constant".to_owned()))?;
        let (node, line) = self.line_node();
        self.symbols
            .define_integer(name, SymbolType::Var, value, None, node, line, false)
            .map_err(|err| ParseError::Semantic(err.to_string()))
    }

    fn define_equs(&mut self, name: &str) -> Result<(), ParseError> {
        self.define_equs_impl(name, false)
    }

    fn define_equs_impl(&mut self, name: &str, redefine: bool) -> Result<(), ParseError> {
        let text = match self.advance()? {
            Token::Str(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            other => return Err(ParseError::Unexpected(other, "a string")),
        };
        let (node, line) = self.line_node();
        self.symbols
            .define_string(name, text, node, line, redefine)
            .map_err(|err| ParseError::Semantic(err.to_string()))
    }

    /// `NAME: MACRO` / `NAME:: MACRO`: capture the body verbatim up to the
    /// matching `ENDM`.
    fn directive_macro_def(&mut self, name: &str) -> Result<(), ParseError> {
        self.directive_macro_def_impl(name, false)
    }

    fn directive_macro_def_impl(&mut self, name: &str, redefine: bool) -> Result<(), ParseError> {
        self.expect(Token::Newline, "end of line")?;
        let body = self.stack.capture_block("MACRO", "ENDM");
        let (node, line) = self.line_node();
        self.symbols
            .define_macro(name, String::from_utf8_lossy(&body).into_owned(), node, line, redefine)
            .map_err(|err| ParseError::Semantic(err.to_string()))
    }

    /// Invoke a previously-defined macro: read its comma-separated RAW-mode
    /// argument list, then push the captured body (re-lexed fresh, spec
    /// §4.4) as a new frame.
    fn invoke_macro(&mut self, name: &str) -> Result<(), ParseError> {
        let body = match self.symbols.table().get(name) {
            Some(symbol) if symbol.ty == SymbolType::Macro => match &symbol.value {
                SymbolValue::Capture(text) => text.clone(),
                _ => return Err(ParseError::Semantic(format!("`{name}` is not a macro"))),
            },
            _ => return Err(ParseError::Semantic(format!("`{name}` is not a macro"))),
        };

        let mut args = Vec::new();
        let at_end = {
            let interp = SymbolInterpolator(&self.symbols);
            self.lexer.at_statement_end(self.stack, &interp)?
        };
        if !at_end {
            loop {
                args.push(self.raw_macro_arg()?);
                if !self.eat(&Token::Comma)? {
                    break;
                }
            }
        }

        let unique_tag = self.stack.next_unique_tag();
        let macro_args = MacroArgs { positional: args, unique_tag };
        self.stack
            .push_macro(name, Rc::from(body.into_bytes().into_boxed_slice()), macro_args)
            .map_err(|err| ParseError::Semantic(err.to_string()))
    }

    /// Read one RAW-mode macro-call argument (text up to an un-nested `,`
    /// or end of line), bypassing the token layer since macro-call
    /// arguments are substituted textually, not evaluated.
    fn raw_macro_arg(&mut self) -> Result<String, ParseError> {
        self.lookahead = None;
        let interp = SymbolInterpolator(&self.symbols);
        let text = self.lexer.scan_macro_argument(self.stack, &interp)?;
        Ok(text)
    }

    /// `REPT <count>`: capture the body once and concatenate it `count`
    /// times into a single frame (spec §3's `REPT` counter is tracked for
    /// backtraces via `push_rept`'s `iters`, not by pushing one frame per
    /// iteration).
    fn directive_rept(&mut self) -> Result<(), ParseError> {
        let count = self
            .expr()?
            .value()
            .ok_or_else(|| ParseError::Semantic("`REPT` count must be a constant".to_owned()))?;
        self.expect(Token::Newline, "end of line")?;
        let body = self.stack.capture_block("REPT", "ENDR");

        if count > 0 {
            let repeated = body.repeat(count as usize);
            self.stack
                .push_rept(vec![count as u32], Rc::from(repeated.into_boxed_slice()))
                .map_err(|err| ParseError::Semantic(err.to_string()))?;
        }
        Ok(())
    }

    /// `FOR <var>[, <start>], <stop>[, <step>]`: like `REPT`, but prefixes
    /// each concatenated copy of the body with a synthetic `<var> = <n>`
    /// assignment, so the loop variable is redefined (via the `SET`/`=`
    /// path already wired through `label_or_define`) before each iteration
    /// runs.
    fn directive_for(&mut self) -> Result<(), ParseError> {
        let var = self.expect_identifier()?;
        self.expect(Token::Comma, "`,`")?;
        let first = self
            .expr()?
            .value()
            .ok_or_else(|| ParseError::Semantic("`FOR` bound must be a constant".to_owned()))?;

        let (mut begin, mut end, mut step) = (0, first, 1);
        if self.eat(&Token::Comma)? {
            begin = first;
            end = self
                .expr()?
                .value()
                .ok_or_else(|| ParseError::Semantic("`FOR` bound must be a constant".to_owned()))?;
            if self.eat(&Token::Comma)? {
                step = self
                    .expr()?
                    .value()
                    .ok_or_else(|| ParseError::Semantic("`FOR` step must be a constant".to_owned()))?;
            }
        }
        self.expect(Token::Newline, "end of line")?;
        let body = self.stack.capture_block("FOR", "ENDR");

        if step == 0 {
            return Err(ParseError::Semantic("`FOR` step must not be zero".to_owned()));
        }

        let mut values = Vec::new();
        let mut current = begin;
        if step > 0 {
            while current < end {
                values.push(current);
                current += step;
            }
        } else {
            while current > end {
                values.push(current);
                current += step;
            }
        }
        if values.is_empty() {
            self.warn(WarningFlag::BackwardsFor, format!("`FOR {var}` runs zero iterations"));
            return Ok(());
        }

        let mut expanded = Vec::new();
        for value in &values {
            expanded.extend_from_slice(format!("{var} = {value}\n").as_bytes());
            expanded.extend_from_slice(&body);
        }

        self.stack
            .push_rept(vec![values.len() as u32], Rc::from(expanded.into_boxed_slice()))
            .map_err(|err| ParseError::Semantic(err.to_string()))
    }

    fn directive_if(&mut self) -> Result<(), ParseError> {
        let cond = self
            .expr()?
            .value()
            .ok_or_else(|| ParseError::Semantic("`IF` condition must be a constant".to_owned()))?;

        if cond != 0 {
            self.if_stack.push(IfFrame { taken: true });
        } else {
            self.if_stack.push(IfFrame { taken: false });
            self.stack.set_mode(Mode::SkipToElif);
            self.lexer.reset_skip_depth();
        }
        Ok(())
    }

    fn directive_elif(&mut self) -> Result<(), ParseError> {
        self.stack.set_mode(Mode::Normal);
        let already_taken = self
            .if_stack
            .last()
            .ok_or_else(|| ParseError::Semantic("`ELIF` without `IF`".to_owned()))?
            .taken;

        if already_taken {
            let _ = self.expr()?;
            self.stack.set_mode(Mode::SkipToEndc);
            self.lexer.reset_skip_depth();
            return Ok(());
        }

        let cond = self
            .expr()?
            .value()
            .ok_or_else(|| ParseError::Semantic("`ELIF` condition must be a constant".to_owned()))?;
        if cond != 0 {
            self.if_stack.last_mut().expect("checked above").taken = true;
        } else {
            self.stack.set_mode(Mode::SkipToElif);
            self.lexer.reset_skip_depth();
        }
        Ok(())
    }

    fn directive_else(&mut self) -> Result<(), ParseError> {
        self.stack.set_mode(Mode::Normal);
        let frame = self
            .if_stack
            .last_mut()
            .ok_or_else(|| ParseError::Semantic("`ELSE` without `IF`".to_owned()))?;

        if frame.taken {
            self.stack.set_mode(Mode::SkipToEndc);
            self.lexer.reset_skip_depth();
        } else {
            frame.taken = true;
        }
        Ok(())
    }

    fn directive_endc(&mut self) -> Result<(), ParseError> {
        self.stack.set_mode(Mode::Normal);
        self.if_stack
            .pop()
            .ok_or_else(|| ParseError::Semantic("`ENDC` without `IF`".to_owned()))?;
        Ok(())
    }

    /// `PURGE <name>[, <name>...]`: remove symbols outright, warning if one
    /// was exported or a label (spec §4.7 supplement).
    fn directive_purge(&mut self) -> Result<(), ParseError> {
        loop {
            let name = self.expect_identifier()?;
            let resolved =
                self.symbols.table().resolve_scope(&name).map_err(|err| ParseError::Semantic(err.to_string()))?;
            match self.symbols.table_mut().purge(&resolved) {
                Ok(symbol) => {
                    if symbol.flags.contains(SymbolFlag::Exported) || symbol.ty == SymbolType::Label {
                        self.warn_parametric(
                            ParametricFlag::Purge,
                            1,
                            format!("purging `{resolved}`, which is exported or a label"),
                        );
                    }
                }
                Err(err) => return Err(ParseError::Semantic(err.to_string())),
            }
            if !self.eat(&Token::Comma)? {
                break;
            }
        }
        Ok(())
    }

    /// `REDEF <name> EQUS "text"` / `REDEF <name>: MACRO` / `REDEF <name>
    /// SET value` / `REDEF <name> = value`: the only way to overwrite an
    /// existing `EQUS`/`MACRO` symbol in place (spec §3: rebindable only
    /// via `REDEF`). `VAR` is already freely redefinable through bare
    /// `SET`/`=`, accepted here too for parity.
    fn directive_redef(&mut self) -> Result<(), ParseError> {
        let name = self.expect_identifier()?;

        if matches!(self.peek()?, Token::Colon | Token::DoubleColon) {
            let double_colon = self.eat(&Token::DoubleColon)?;
            if !double_colon {
                self.eat(&Token::Colon)?;
            }
            let word = self.expect_identifier()?;
            if word.eq_ignore_ascii_case("MACRO") {
                return self.directive_macro_def_impl(&name, true);
            }
            return Err(ParseError::Semantic(format!("`REDEF {name}:` must be followed by `MACRO`")));
        }

        if let Token::Identifier(word) = self.peek()?.clone() {
            match word.to_ascii_uppercase().as_str() {
                "EQUS" => {
                    self.advance()?;
                    return self.define_equs_impl(&name, true);
                }
                "SET" => {
                    self.advance()?;
                    return self.define_var(&name);
                }
                _ => {}
            }
        }
        if self.eat(&Token::Assign)? {
            return self.define_var(&name);
        }

        Err(ParseError::Semantic(format!(
            "`REDEF {name}` must be followed by `EQUS`, `SET`, `=` or `: MACRO`"
        )))
    }

    /// `ASSERT [WARN|FATAL,] <expr>[, "message"]` / `STATIC_ASSERT ...`:
    /// check `expr` immediately if it folds to a constant, otherwise defer
    /// it as an [`Assertion`] the linker evaluates once every section has a
    /// final address. `STATIC_ASSERT` requires a constant up front.
    fn directive_assert(&mut self, static_only: bool) -> Result<(), ParseError> {
        let level = match self.peek()?.clone() {
            Token::Identifier(word) if word.eq_ignore_ascii_case("WARN") => {
                self.advance()?;
                self.expect(Token::Comma, "`,`")?;
                AssertionLevel::Warn
            }
            Token::Identifier(word) if word.eq_ignore_ascii_case("FATAL") => {
                self.advance()?;
                self.expect(Token::Comma, "`,`")?;
                AssertionLevel::Fatal
            }
            _ => AssertionLevel::Error,
        };

        let expr = self.expr()?;
        let message = if self.eat(&Token::Comma)? {
            match self.advance()? {
                Token::Str(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                other => return Err(ParseError::Unexpected(other, "an assertion message string")),
            }
        } else {
            "assertion failed".to_owned()
        };

        match expr.value() {
            Some(0) => self.fail_assertion(level, &message),
            Some(_) => Ok(()),
            None if static_only => {
                Err(ParseError::Semantic("`STATIC_ASSERT` requires a constant expression".to_owned()))
            }
            None => {
                let (node, line) = self.line_node();
                let pc_section = self
                    .sections
                    .current_section_index()
                    .map_err(|err| ParseError::Semantic(err.to_string()))?;
                let pc_offset = self
                    .sections
                    .current_offset()
                    .map_err(|err| ParseError::Semantic(err.to_string()))?;
                self.assertions.push(Assertion {
                    patch: Patch { node, line, offset: 0, pc_section, pc_offset, ty: PatchType::Assert, expr },
                    level,
                    message,
                });
                Ok(())
            }
        }
    }

    /// Report an assertion that failed immediately, at its declared level.
    fn fail_assertion(&mut self, level: AssertionLevel, message: &str) -> Result<(), ParseError> {
        match level {
            AssertionLevel::Warn => {
                self.warn(WarningFlag::Assert, message);
                Ok(())
            }
            AssertionLevel::Error => {
                let result = match self.stack.backtrace() {
                    Some(backtrace) => self.diagnostics.error(message, &backtrace),
                    None => self.diagnostics.error(message, &NoBacktrace),
                };
                result.map_err(|_| ParseError::Aborted)
            }
            AssertionLevel::Fatal => {
                match self.stack.backtrace() {
                    Some(backtrace) => self.diagnostics.fatal(message, &backtrace),
                    None => self.diagnostics.fatal(message, &NoBacktrace),
                };
                Err(ParseError::Aborted)
            }
        }
    }

    /// `INCLUDE "path"`: push the named file, searching relative to the
    /// including file's own directory first, then each `-I` path in order.
    fn directive_include(&mut self) -> Result<(), ParseError> {
        let path = match self.advance()? {
            Token::Str(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            other => return Err(ParseError::Unexpected(other, "a file path string")),
        };
        let resolved = self.resolve_include(&path)?;
        let content = std::fs::read(&resolved).map_err(|source| {
            ParseError::Semantic(format!("couldn't read `{}`: {source}", resolved.display()))
        })?;
        self.stack
            .push_file(&resolved.display().to_string(), content)
            .map_err(|err| ParseError::Semantic(err.to_string()))
    }

    fn resolve_include(&self, path: &str) -> Result<PathBuf, ParseError> {
        let direct = PathBuf::from(path);
        if direct.is_file() {
            return Ok(direct);
        }
        for base in &self.include_paths {
            let candidate = base.join(path);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        Err(ParseError::Semantic(format!("`{path}` not found on any include path")))
    }

    /// `INCBIN "path"`: read the named file's raw bytes straight into the
    /// current section.
    fn directive_incbin(&mut self) -> Result<(), ParseError> {
        let path = match self.advance()? {
            Token::Str(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            other => return Err(ParseError::Unexpected(other, "a file path string")),
        };
        let resolved = self.resolve_include(&path)?;
        let bytes = std::fs::read(&resolved).map_err(|source| {
            ParseError::Semantic(format!("couldn't read `{}`: {source}", resolved.display()))
        })?;
        self.sections.emit_binary_file(&bytes).map_err(|err| ParseError::Semantic(err.to_string()))
    }

    fn directive_charmap(&mut self) -> Result<(), ParseError> {
        let input = match self.advance()? {
            Token::Str(bytes) => bytes,
            other => return Err(ParseError::Unexpected(other, "a charmap key string")),
        };
        self.expect(Token::Comma, "`,`")?;

        let mut values = Vec::new();
        loop {
            let value = self
                .expr()?
                .value()
                .ok_or_else(|| ParseError::Semantic("`CHARMAP` value must be a constant".to_owned()))?;
            values.push(value as u8);
            if !self.eat(&Token::Comma)? {
                break;
            }
        }

        if self.charmaps.add(&input, values) {
            self.warn(WarningFlag::CharmapRedef, format!("charmap entry redefined"));
        }
        Ok(())
    }

    fn directive_newcharmap(&mut self) -> Result<(), ParseError> {
        let name = self.expect_identifier()?;
        let base = if self.eat(&Token::Comma)? { Some(self.expect_identifier()?) } else { None };
        self.charmaps
            .new_charmap(&name, base.as_deref())
            .map_err(|err| ParseError::Semantic(err.to_string()))
    }

    fn directive_setcharmap(&mut self) -> Result<(), ParseError> {
        let name = self.expect_identifier()?;
        self.charmaps.set_charmap(&name).map_err(|err| ParseError::Semantic(err.to_string()))
    }

    /// Report a plain (non-parametric) warning at the current source
    /// position.
    fn warn(&mut self, flag: WarningFlag, message: impl std::fmt::Display) {
        match self.stack.backtrace() {
            Some(backtrace) => self.diagnostics.warn(flag, message, &backtrace),
            None => self.diagnostics.warn(flag, message, &NoBacktrace),
        }
    }

    fn is_directive(&self, upper: &str) -> bool {
        matches!(
            upper,
            "SECTION"
                | "PUSHS"
                | "POPS"
                | "UNION"
                | "NEXTU"
                | "ENDU"
                | "LOAD"
                | "ENDL"
                | "DB"
                | "DW"
                | "DL"
                | "DS"
                | "EQU"
                | "EQUS"
                | "CHARMAP"
                | "NEWCHARMAP"
                | "SETCHARMAP"
                | "PUSHC"
                | "POPC"
                | "EXPORT"
                | "GLOBAL"
                | "INCBIN"
                | "IF"
                | "ELIF"
                | "ELSE"
                | "ENDC"
                | "REPT"
                | "FOR"
                | "ENDR"
                | "MACRO"
                | "ENDM"
                | "INCLUDE"
                | "PURGE"
                | "REDEF"
                | "ASSERT"
                | "STATIC_ASSERT"
        )
    }

    /// Whether `upper` names a directive that manages the end of its own
    /// statement (by pushing/popping file-stack frames, or skipping ahead),
    /// so `statement` shouldn't also insist on a trailing newline here.
    fn consumes_own_terminator(upper: &str) -> bool {
        matches!(upper, "IF" | "ELIF" | "ELSE" | "ENDC" | "MACRO" | "REPT" | "FOR" | "INCLUDE")
    }

    fn is_mnemonic(&self, upper: &str) -> bool {
        matches!(
            upper,
            "NOP" | "HALT" | "STOP" | "DI" | "EI" | "RET" | "RETI" | "LD" | "LDH" | "PUSH" | "POP"
                | "INC" | "DEC" | "ADD" | "ADC" | "SUB" | "SBC" | "AND" | "XOR" | "OR" | "CP"
                | "JP" | "JR" | "CALL" | "RST" | "RLC" | "RRC" | "RL" | "RR" | "SLA" | "SRA"
                | "SWAP" | "SRL" | "BIT" | "RES" | "SET"
        )
    }

    fn directive(&mut self, upper: &str) -> Result<(), ParseError> {
        match upper {
            "SECTION" => self.directive_section(),
            "LOAD" => self.directive_load(),
            "PUSHS" => {
                self.sections.push_section();
                Ok(())
            }
            "POPS" => self.sections.pop_section().map_err(|e| ParseError::Semantic(e.to_string())),
            "UNION" => self.sections.begin_union().map_err(|e| ParseError::Semantic(e.to_string())),
            "NEXTU" => self.sections.next_union_arm().map_err(|e| ParseError::Semantic(e.to_string())),
            "ENDU" => self.sections.end_union().map_err(|e| ParseError::Semantic(e.to_string())),
            "ENDL" => self.sections.end_load().map_err(|e| ParseError::Semantic(e.to_string())),
            "DB" => self.directive_data(1, PatchType::Byte),
            "DW" => self.directive_data(2, PatchType::Word),
            "DL" => self.directive_data(4, PatchType::Long),
            "DS" => self.directive_ds(),
            "EQU" => self.directive_equ(),
            "EQUS" => self.directive_equs(),
            "PUSHC" => {
                self.charmaps.push();
                Ok(())
            }
            "POPC" => self.charmaps.pop().map_err(|e| ParseError::Semantic(e.to_string())),
            "EXPORT" | "GLOBAL" => self.directive_export(),
            "CHARMAP" => self.directive_charmap(),
            "NEWCHARMAP" => self.directive_newcharmap(),
            "SETCHARMAP" => self.directive_setcharmap(),
            "INCBIN" => self.directive_incbin(),
            "IF" => self.directive_if(),
            "ELIF" => self.directive_elif(),
            "ELSE" => self.directive_else(),
            "ENDC" => self.directive_endc(),
            "REPT" => self.directive_rept(),
            "FOR" => self.directive_for(),
            "ENDR" => Err(ParseError::Semantic("`ENDR` without `REPT`/`FOR`".to_owned())),
            "MACRO" => Err(ParseError::Semantic(
                "`MACRO` must follow a label name, e.g. `NAME: MACRO`".to_owned(),
            )),
            "ENDM" => Err(ParseError::Semantic("`ENDM` without `MACRO`".to_owned())),
            "INCLUDE" => self.directive_include(),
            "PURGE" => self.directive_purge(),
            "REDEF" => self.directive_redef(),
            "ASSERT" => self.directive_assert(false),
            "STATIC_ASSERT" => self.directive_assert(true),
            _ => Err(ParseError::Semantic(format!("directive `{upper}` not implemented"))),
        }
    }

    fn directive_section(&mut self) -> Result<(), ParseError> {
        let modifier = match self.peek()?.clone() {
            Token::Identifier(word) if word.eq_ignore_ascii_case("UNION") => {
                self.advance()?;
                SectionModifier::Union
            }
            Token::Identifier(word) if word.eq_ignore_ascii_case("FRAGMENT") => {
                self.advance()?;
                SectionModifier::Fragment
            }
            _ => SectionModifier::Normal,
        };

        let name = match self.advance()? {
            Token::Str(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            other => return Err(ParseError::Unexpected(other, "a section name string")),
        };
        self.expect(Token::Comma, "`,`")?;

        let type_name = self.expect_identifier()?.to_ascii_uppercase();
        let ty = match type_name.as_str() {
            "ROM0" => SectionType::Rom0,
            "ROMX" => SectionType::Romx,
            "VRAM" => SectionType::Vram,
            "SRAM" => SectionType::Sram,
            "WRAM0" => SectionType::Wram0,
            "WRAMX" => SectionType::Wramx,
            "OAM" => SectionType::Oam,
            "HRAM" => SectionType::Hram,
            other => return Err(ParseError::Semantic(format!("unknown section type `{other}`"))),
        };

        let mut org = None;
        let mut bank = None;
        if self.eat(&Token::LBracket)? {
            org = Some(self.expr()?.value().ok_or_else(|| {
                ParseError::Semantic("fixed section address must be a constant".to_owned())
            })? as u32);
            self.expect(Token::RBracket, "`]`")?;
        }
        if self.eat(&Token::Comma)? {
            let word = self.expect_identifier()?;
            if word.eq_ignore_ascii_case("BANK") {
                self.expect(Token::LBracket, "`[`")?;
                bank = Some(self.expr()?.value().ok_or_else(|| {
                    ParseError::Semantic("fixed bank must be a constant".to_owned())
                })? as u32);
                self.expect(Token::RBracket, "`]`")?;
            }
        }

        let (node, line) = self.line_node();
        self.sections
            .declare(&name, ty, modifier, org, bank, node, line)
            .map_err(|err| ParseError::Semantic(err.to_string()))
    }

    /// `LOAD "name", TYPE[, addr]`: open a virtual section whose labels
    /// bind to it, while its bytes flow into the section that was current
    /// beforehand (spec §3/§4.8).
    fn directive_load(&mut self) -> Result<(), ParseError> {
        let name = match self.advance()? {
            Token::Str(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            other => return Err(ParseError::Unexpected(other, "a section name string")),
        };
        self.expect(Token::Comma, "`,`")?;

        let type_name = self.expect_identifier()?.to_ascii_uppercase();
        let ty = match type_name.as_str() {
            "ROM0" => SectionType::Rom0,
            "ROMX" => SectionType::Romx,
            "VRAM" => SectionType::Vram,
            "SRAM" => SectionType::Sram,
            "WRAM0" => SectionType::Wram0,
            "WRAMX" => SectionType::Wramx,
            "OAM" => SectionType::Oam,
            "HRAM" => SectionType::Hram,
            other => return Err(ParseError::Semantic(format!("unknown section type `{other}`"))),
        };

        let mut org = None;
        if self.eat(&Token::LBracket)? {
            org = Some(self.expr()?.value().ok_or_else(|| {
                ParseError::Semantic("fixed `LOAD` address must be a constant".to_owned())
            })? as u32);
            self.expect(Token::RBracket, "`]`")?;
        }

        let (node, line) = self.line_node();
        self.sections
            .start_load(&name, ty, SectionModifier::Normal, org, node, line)
            .map_err(|err| ParseError::Semantic(err.to_string()))
    }

    fn directive_data(&mut self, width: u8, ty: PatchType) -> Result<(), ParseError> {
        loop {
            if let Token::Str(_) = self.peek()?.clone() {
                let Token::Str(bytes) = self.advance()? else { unreachable!() };
                let outcome = self.charmaps.convert(&bytes);
                for offset in &outcome.unmapped_at {
                    self.warn_parametric(
                        ParametricFlag::UnmappedChar,
                        1,
                        format!("character at offset {offset} has no charmap mapping"),
                    );
                }
                self.sections
                    .emit_bytes(&outcome.values)
                    .map_err(|err| ParseError::Semantic(err.to_string()))?;
            } else {
                let expr = self.expr()?;
                let (node, line) = self.line_node();
                self.sections
                    .emit_expr(expr, width, ty, node, line)
                    .map_err(|err| ParseError::Semantic(err.to_string()))?;
            }

            if !self.eat(&Token::Comma)? {
                break;
            }
        }
        Ok(())
    }

    fn directive_ds(&mut self) -> Result<(), ParseError> {
        let count = self
            .expr()?
            .value()
            .ok_or_else(|| ParseError::Semantic("`ds` length must be a constant".to_owned()))?;
        let fill = if self.eat(&Token::Comma)? {
            self.expr()?.value().ok_or_else(|| {
                ParseError::Semantic("`ds` fill value must be a constant".to_owned())
            })? as u8
        } else {
            self.default_pad_byte
        };
        self.sections.skip(count as u32, fill).map_err(|err| ParseError::Semantic(err.to_string()))
    }

    fn directive_equ(&mut self) -> Result<(), ParseError> {
        Err(ParseError::Semantic(
            "`EQU` must follow a label name, e.g. `NAME EQU value`".to_owned(),
        ))
    }

    fn directive_equs(&mut self) -> Result<(), ParseError> {
        Err(ParseError::Semantic(
            "`EQUS` must follow a label name, e.g. `NAME EQUS \"text\"`".to_owned(),
        ))
    }

    fn directive_export(&mut self) -> Result<(), ParseError> {
        loop {
            let name = self.expect_identifier()?;
            if let Some(symbol) = self.symbols.table_mut().get_mut(&name) {
                symbol.flags |= rgbds_object::symbol::SymbolFlag::Exported;
            }
            if !self.eat(&Token::Comma)? {
                break;
            }
        }
        Ok(())
    }

    fn reg8(&mut self) -> Result<Reg8, ParseError> {
        match self.advance()? {
            Token::Identifier(name) => match name.to_ascii_uppercase().as_str() {
                "A" => Ok(Reg8::A),
                "B" => Ok(Reg8::B),
                "C" => Ok(Reg8::C),
                "D" => Ok(Reg8::D),
                "E" => Ok(Reg8::E),
                "H" => Ok(Reg8::H),
                "L" => Ok(Reg8::L),
                other => Err(ParseError::Semantic(format!("`{other}` is not an 8-bit register"))),
            },
            Token::LBracket => {
                self.expect_identifier_exact("HL")?;
                self.expect(Token::RBracket, "`]`")?;
                Ok(Reg8::HlInd)
            }
            other => Err(ParseError::Unexpected(other, "an 8-bit register")),
        }
    }

    fn expect_identifier_exact(&mut self, expected: &str) -> Result<(), ParseError> {
        let name = self.expect_identifier()?;
        if name.eq_ignore_ascii_case(expected) {
            Ok(())
        } else {
            Err(ParseError::Semantic(format!("expected `{expected}`, found `{name}`")))
        }
    }

    fn reg16(&mut self) -> Result<Reg16, ParseError> {
        let name = self.expect_identifier()?;
        match name.to_ascii_uppercase().as_str() {
            "BC" => Ok(Reg16::Bc),
            "DE" => Ok(Reg16::De),
            "HL" => Ok(Reg16::Hl),
            "SP" | "AF" => Ok(Reg16::SpOrAf),
            other => Err(ParseError::Semantic(format!("`{other}` is not a 16-bit register"))),
        }
    }

    fn condition(&mut self) -> Option<Condition> {
        let Token::Identifier(name) = self.peek().ok()?.clone() else { return None };
        match name.to_ascii_uppercase().as_str() {
            "NZ" => Some(Condition::Nz),
            "Z" => Some(Condition::Z),
            "NC" => Some(Condition::Nc),
            "C" => Some(Condition::C),
            _ => None,
        }
    }

    fn instruction(&mut self, mnemonic: &str) -> Result<(), ParseError> {
        let (node, line) = self.line_node();
        let encoded = match mnemonic {
            "NOP" => instructions::nop(),
            "HALT" => instructions::halt(),
            "STOP" => instructions::stop(),
            "DI" => instructions::di(),
            "EI" => instructions::ei(),
            "RETI" => instructions::reti(),
            "RET" => {
                if let Some(cond) = self.condition() {
                    self.advance()?;
                    instructions::ret_cond(cond)
                } else {
                    instructions::ret()
                }
            }
            "PUSH" => instructions::push(self.reg16()?),
            "POP" => instructions::pop(self.reg16()?),
            "LD" => return self.instruction_ld(node, line),
            "LDH" => return self.instruction_ldh(node, line),
            "INC" | "DEC" => return self.instruction_inc_dec(mnemonic == "INC", node, line),
            "ADD" => return self.instruction_add(node, line),
            "ADC" => self.alu_operand(AluOp::Adc)?,
            "SUB" => self.alu_operand(AluOp::Sub)?,
            "SBC" => self.alu_operand(AluOp::Sbc)?,
            "AND" => self.alu_operand(AluOp::And)?,
            "XOR" => self.alu_operand(AluOp::Xor)?,
            "OR" => self.alu_operand(AluOp::Or)?,
            "CP" => self.alu_operand(AluOp::Cp)?,
            "JP" => return self.instruction_jp(node, line),
            "JR" => return self.instruction_jr(node, line),
            "CALL" => return self.instruction_call(node, line),
            "RST" => {
                let expr = Rpn::unary_op(RpnOp::RstCheck, self.expr()?)
                    .map_err(|err| ParseError::Semantic(err.to_string()))?;
                instructions::rst(expr).map_err(|err| ParseError::Semantic(err.to_string()))?
            }
            "RLC" => self.shift_operand(ShiftOp::Rlc)?,
            "RRC" => self.shift_operand(ShiftOp::Rrc)?,
            "RL" => self.shift_operand(ShiftOp::Rl)?,
            "RR" => self.shift_operand(ShiftOp::Rr)?,
            "SLA" => self.shift_operand(ShiftOp::Sla)?,
            "SRA" => self.shift_operand(ShiftOp::Sra)?,
            "SWAP" => self.shift_operand(ShiftOp::Swap)?,
            "SRL" => self.shift_operand(ShiftOp::Srl)?,
            "BIT" | "RES" | "SET" => return self.instruction_cb_index(mnemonic, node, line),
            other => return Err(ParseError::Semantic(format!("unsupported mnemonic `{other}`"))),
        };

        self.emit(encoded, node, line)
    }

    fn alu_operand(&mut self, op: AluOp) -> Result<instructions::Encoded, ParseError> {
        // `<alu> a,` is optional sugar the parser normalizes away; both
        // `add a, b` and `add b` reach this point having already consumed
        // `add`/`adc`/etc, so we just parse one operand.
        if let Token::Identifier(name) = self.peek()?.clone() {
            if name.eq_ignore_ascii_case("A") {
                // Could be `cp a` (operand IS a) or `cp a, b` (explicit
                // accumulator then a real operand); look past a comma.
                self.advance()?;
                if self.eat(&Token::Comma)? {
                    return Ok(self.alu_operand_tail(op)?);
                }
                return Ok(instructions::alu_r8(op, Reg8::A));
            }
        }
        self.alu_operand_tail(op)
    }

    fn alu_operand_tail(&mut self, op: AluOp) -> Result<instructions::Encoded, ParseError> {
        match self.peek()?.clone() {
            Token::Identifier(name)
                if matches!(name.to_ascii_uppercase().as_str(), "A" | "B" | "C" | "D" | "E" | "H" | "L") =>
            {
                Ok(instructions::alu_r8(op, self.reg8()?))
            }
            Token::LBracket => Ok(instructions::alu_r8(op, self.reg8()?)),
            _ => Ok(instructions::alu_imm8(op, self.expr()?)),
        }
    }

    fn shift_operand(&mut self, op: ShiftOp) -> Result<instructions::Encoded, ParseError> {
        Ok(instructions::cb_shift(op, self.reg8()?))
    }

    fn instruction_cb_index(
        &mut self,
        mnemonic: &str,
        node: Option<rgbds_object::filestack::FileStackNodeId>,
        line: u32,
    ) -> Result<(), ParseError> {
        let bit = self
            .expr()?
            .value()
            .ok_or_else(|| ParseError::Semantic("bit index must be a constant".to_owned()))?;
        self.expect(Token::Comma, "`,`")?;
        let reg = self.reg8()?;
        let encoded = match mnemonic {
            "BIT" => instructions::cb_bit(bit as u8, reg),
            "RES" => instructions::cb_res(bit as u8, reg),
            "SET" => instructions::cb_set(bit as u8, reg),
            _ => unreachable!(),
        };
        self.emit(encoded, node, line)
    }

    fn instruction_inc_dec(
        &mut self,
        increment: bool,
        node: Option<rgbds_object::filestack::FileStackNodeId>,
        line: u32,
    ) -> Result<(), ParseError> {
        let checkpoint = self.lookahead.clone();
        if let Ok(reg16) = self.try_reg16() {
            return self.emit(instructions::inc_dec_r16(reg16, increment), node, line);
        }
        self.lookahead = checkpoint;
        let reg8 = self.reg8()?;
        self.emit(instructions::inc_dec_r8(reg8, increment), node, line)
    }

    fn try_reg16(&mut self) -> Result<Reg16, ParseError> {
        match self.peek()?.clone() {
            Token::Identifier(name)
                if matches!(name.to_ascii_uppercase().as_str(), "BC" | "DE" | "HL" | "SP") =>
            {
                self.reg16()
            }
            other => Err(ParseError::Unexpected(other, "a 16-bit register")),
        }
    }

    fn instruction_add(
        &mut self,
        node: Option<rgbds_object::filestack::FileStackNodeId>,
        line: u32,
    ) -> Result<(), ParseError> {
        if let Token::Identifier(name) = self.peek()?.clone() {
            if name.eq_ignore_ascii_case("HL") {
                self.advance()?;
                self.expect(Token::Comma, "`,`")?;
                let reg = self.reg16()?;
                return self.emit(instructions::add_hl_r16(reg), node, line);
            }
        }
        let encoded = self.alu_operand(AluOp::Add)?;
        self.emit(encoded, node, line)
    }

    fn instruction_ld(
        &mut self,
        node: Option<rgbds_object::filestack::FileStackNodeId>,
        line: u32,
    ) -> Result<(), ParseError> {
        if self.eat(&Token::LBracket)? {
            // `ld [n16], sp` / `ld [r16], a` handled via r16-or-expr probe.
            if let Token::Identifier(name) = self.peek()?.clone() {
                if matches!(name.to_ascii_uppercase().as_str(), "HL" | "BC" | "DE") {
                    self.advance()?;
                    self.expect(Token::RBracket, "`]`")?;
                    self.expect(Token::Comma, "`,`")?;
                    self.expect_identifier_exact("A")?;
                    let reg = Reg8::HlInd;
                    return self.emit(instructions::ld_r8_r8(reg, Reg8::A), node, line);
                }
            }
            let address = self.expr()?;
            self.expect(Token::RBracket, "`]`")?;
            self.expect(Token::Comma, "`,`")?;
            self.expect_identifier_exact("SP")?;
            return self.emit(instructions::ld_ind16_sp(address), node, line);
        }

        let name = self.expect_identifier()?;
        let upper = name.to_ascii_uppercase();
        self.expect(Token::Comma, "`,`")?;

        match upper.as_str() {
            "BC" | "DE" | "HL" | "SP" => {
                let reg16 = match upper.as_str() {
                    "BC" => Reg16::Bc,
                    "DE" => Reg16::De,
                    "HL" => Reg16::Hl,
                    _ => Reg16::SpOrAf,
                };
                let value = self.expr()?;
                self.emit(instructions::ld_r16_imm16(reg16, value), node, line)
            }
            "A" | "B" | "C" | "D" | "E" | "H" | "L" => {
                let dest = match upper.as_str() {
                    "A" => Reg8::A,
                    "B" => Reg8::B,
                    "C" => Reg8::C,
                    "D" => Reg8::D,
                    "E" => Reg8::E,
                    "H" => Reg8::H,
                    _ => Reg8::L,
                };
                if let Token::Identifier(src_name) = self.peek()?.clone() {
                    if matches!(
                        src_name.to_ascii_uppercase().as_str(),
                        "A" | "B" | "C" | "D" | "E" | "H" | "L"
                    ) {
                        let src = self.reg8()?;
                        return self.emit(instructions::ld_r8_r8(dest, src), node, line);
                    }
                }
                if self.peek()? == &Token::LBracket {
                    let src = self.reg8()?;
                    return self.emit(instructions::ld_r8_r8(dest, src), node, line);
                }
                let value = self.expr()?;
                self.emit(instructions::ld_r8_imm8(dest, value), node, line)
            }
            other => Err(ParseError::Semantic(format!("unsupported `ld` destination `{other}`"))),
        }
    }

    fn instruction_ldh(
        &mut self,
        node: Option<rgbds_object::filestack::FileStackNodeId>,
        line: u32,
    ) -> Result<(), ParseError> {
        if self.eat(&Token::LBracket)? {
            let offset = self.expr()?;
            self.expect(Token::RBracket, "`]`")?;
            self.expect(Token::Comma, "`,`")?;
            self.expect_identifier_exact("A")?;
            return self.emit(instructions::ldh_ind8_a(offset), node, line);
        }
        self.expect_identifier_exact("A")?;
        self.expect(Token::Comma, "`,`")?;
        self.expect(Token::LBracket, "`[`")?;
        let offset = self.expr()?;
        self.expect(Token::RBracket, "`]`")?;
        self.emit(instructions::ldh_a_ind8(offset), node, line)
    }

    fn instruction_jp(
        &mut self,
        node: Option<rgbds_object::filestack::FileStackNodeId>,
        line: u32,
    ) -> Result<(), ParseError> {
        if let Token::Identifier(name) = self.peek()?.clone() {
            if name.eq_ignore_ascii_case("HL") {
                self.advance()?;
                return self.emit(instructions::jp_hl(), node, line);
            }
        }
        if let Some(cond) = self.condition() {
            self.advance()?;
            self.expect(Token::Comma, "`,`")?;
            let target = self.expr()?;
            return self.emit(instructions::jp_cond(cond, target), node, line);
        }
        let target = self.expr()?;
        self.emit(instructions::jp(target), node, line)
    }

    fn instruction_jr(
        &mut self,
        node: Option<rgbds_object::filestack::FileStackNodeId>,
        line: u32,
    ) -> Result<(), ParseError> {
        if let Some(cond) = self.condition() {
            self.advance()?;
            self.expect(Token::Comma, "`,`")?;
            let target = self.expr()?;
            return self.emit(instructions::jr_cond(cond, target), node, line);
        }
        let target = self.expr()?;
        self.emit(instructions::jr(target), node, line)
    }

    fn instruction_call(
        &mut self,
        node: Option<rgbds_object::filestack::FileStackNodeId>,
        line: u32,
    ) -> Result<(), ParseError> {
        if let Some(cond) = self.condition() {
            self.advance()?;
            self.expect(Token::Comma, "`,`")?;
            let target = self.expr()?;
            return self.emit(instructions::call_cond(cond, target), node, line);
        }
        let target = self.expr()?;
        self.emit(instructions::call(target), node, line)
    }

    fn emit(
        &mut self,
        encoded: instructions::Encoded,
        node: Option<rgbds_object::filestack::FileStackNodeId>,
        line: u32,
    ) -> Result<(), ParseError> {
        self.sections
            .emit_bytes(&encoded.opcode)
            .map_err(|err| ParseError::Semantic(err.to_string()))?;

        if let Some(immediate) = encoded.immediate {
            self.sections
                .emit_expr(immediate.expr, immediate.byte_width(), immediate.patch_type(), node, line)
                .map_err(|err| ParseError::Semantic(err.to_string()))?;
        }

        Ok(())
    }

    // --- Expression grammar -------------------------------------------
    //
    // Precedence climbs from `||`/`&&` down to unary, matching spec
    // §4.5's operator table (itself matching the reference parser's
    // `rpn.cpp` precedence, lowest to highest):
    // `|| && == != < > <= >= | ^ & << >> + - * / % unary`.

    fn expr(&mut self) -> Result<Rpn, ParseError> {
        self.expr_or()
    }

    fn expr_or(&mut self) -> Result<Rpn, ParseError> {
        let mut lhs = self.expr_and()?;
        while self.eat(&Token::LogOr)? {
            let rhs = self.expr_and()?;
            lhs = self.fold(RpnOp::LogOr, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn expr_and(&mut self) -> Result<Rpn, ParseError> {
        let mut lhs = self.expr_equality()?;
        while self.eat(&Token::LogAnd)? {
            let rhs = self.expr_equality()?;
            lhs = self.fold(RpnOp::LogAnd, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn expr_equality(&mut self) -> Result<Rpn, ParseError> {
        let mut lhs = self.expr_relational()?;
        loop {
            let op = match self.peek()? {
                Token::Eq => RpnOp::LogEq,
                Token::Ne => RpnOp::LogNe,
                _ => break,
            };
            self.advance()?;
            let rhs = self.expr_relational()?;
            lhs = self.fold(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn expr_relational(&mut self) -> Result<Rpn, ParseError> {
        let mut lhs = self.expr_bitor()?;
        loop {
            let op = match self.peek()? {
                Token::Lt => RpnOp::LogLt,
                Token::Gt => RpnOp::LogGt,
                Token::Le => RpnOp::LogLe,
                Token::Ge => RpnOp::LogGe,
                _ => break,
            };
            self.advance()?;
            let rhs = self.expr_bitor()?;
            lhs = self.fold(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn expr_bitor(&mut self) -> Result<Rpn, ParseError> {
        let mut lhs = self.expr_bitxor()?;
        while self.eat(&Token::Pipe)? {
            let rhs = self.expr_bitxor()?;
            lhs = self.fold(RpnOp::Or, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn expr_bitxor(&mut self) -> Result<Rpn, ParseError> {
        let mut lhs = self.expr_bitand()?;
        while self.eat(&Token::Caret)? {
            let rhs = self.expr_bitand()?;
            lhs = self.fold(RpnOp::Xor, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn expr_bitand(&mut self) -> Result<Rpn, ParseError> {
        let mut lhs = self.expr_shift()?;
        while self.eat(&Token::Ampersand)? {
            let rhs = self.expr_shift()?;
            lhs = self.fold(RpnOp::And, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn expr_shift(&mut self) -> Result<Rpn, ParseError> {
        let mut lhs = self.expr_additive()?;
        loop {
            let op = match self.peek()? {
                Token::Shl => RpnOp::Shl,
                Token::Shr => RpnOp::Shr,
                _ => break,
            };
            self.advance()?;
            let rhs = self.expr_additive()?;
            lhs = self.fold(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn expr_additive(&mut self) -> Result<Rpn, ParseError> {
        let mut lhs = self.expr_multiplicative()?;
        loop {
            let op = match self.peek()? {
                Token::Plus => RpnOp::Add,
                Token::Minus => RpnOp::Sub,
                _ => break,
            };
            self.advance()?;
            let rhs = self.expr_multiplicative()?;
            lhs = self.fold(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn expr_multiplicative(&mut self) -> Result<Rpn, ParseError> {
        let mut lhs = self.expr_unary()?;
        loop {
            let op = match self.peek()? {
                Token::Star => RpnOp::Mul,
                Token::Slash => RpnOp::Div,
                Token::Percent => RpnOp::Mod,
                _ => break,
            };
            self.advance()?;
            let rhs = self.expr_unary()?;
            lhs = self.fold(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn expr_unary(&mut self) -> Result<Rpn, ParseError> {
        let op = match self.peek()? {
            Token::Minus => Some(RpnOp::Neg),
            Token::Tilde => Some(RpnOp::Not),
            Token::Bang => Some(RpnOp::LogNot),
            _ => None,
        };

        if let Some(op) = op {
            self.advance()?;
            let operand = self.expr_unary()?;
            return Rpn::unary_op(op, operand).map_err(|err| ParseError::Semantic(err.to_string()));
        }

        self.expr_primary()
    }

    fn expr_primary(&mut self) -> Result<Rpn, ParseError> {
        match self.advance()? {
            Token::Number(value) => Ok(Rpn::number(value)),
            Token::At => self
                .sections
                .program_counter()
                .map(|pc| Rpn::number(pc as i32))
                .map_err(|err| ParseError::Semantic(err.to_string())),
            Token::LParen => {
                let inner = self.expr()?;
                self.expect(Token::RParen, "`)`")?;
                Ok(inner)
            }
            Token::Identifier(name) if name.eq_ignore_ascii_case("BANK") => {
                self.expect(Token::LParen, "`(`")?;
                let expr = if self.peek()? == &Token::At {
                    self.advance()?;
                    Rpn::bank_of_self()
                } else {
                    let symbol = self.expect_identifier()?;
                    Rpn::bank_of_symbol(&symbol)
                };
                self.expect(Token::RParen, "`)`")?;
                Ok(expr)
            }
            Token::Identifier(name) => self.symbol_reference(&name),
            Token::LocalIdentifier(name) => self.symbol_reference(&name),
            other => Err(ParseError::Unexpected(other, "an expression")),
        }
    }

    /// `_PI`, rounded to the default Q16.16 fixed-point format (16
    /// fractional bits, matching the default fixed-point literal width).
    const PI_Q16: i32 = 205_887;

    fn symbol_reference(&mut self, name: &str) -> Result<Rpn, ParseError> {
        if let Some(value) = self.builtin_value(name) {
            return Ok(Rpn::number(value));
        }

        let resolved =
            self.symbols.table().resolve_scope(name).map_err(|err| ParseError::Semantic(err.to_string()))?;

        match self.symbols.table().get(&resolved) {
            Some(symbol) => match symbol.integer_value() {
                Some(value) => Ok(Rpn::known_symbol(value)),
                None => Ok(Rpn::unresolved_symbol(&resolved)),
            },
            None => Ok(Rpn::unresolved_symbol(&resolved)),
        }
    }

    /// The numeric callback symbols that track live assembler state rather
    /// than anything stored in the symbol table.
    fn builtin_value(&self, name: &str) -> Option<i32> {
        match name {
            "_NARG" => Some(self.stack.macro_args().map(|args| args.count()).unwrap_or(0) as i32),
            "__LINE__" => Some(self.stack.current_line() as i32),
            "_RS" => Some(self.symbols.rs()),
            "_PI" => Some(Self::PI_Q16),
            _ => None,
        }
    }

    fn fold(&self, op: RpnOp, lhs: Rpn, rhs: Rpn) -> Result<Rpn, ParseError> {
        Rpn::binary_op(op, lhs, rhs).map_err(|err| ParseError::Semantic(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> (SectionEmitter, AssemblerSymbols) {
        let mut stack = AssemblerFileStack::new(64);
        stack.push_file("test.asm", source.as_bytes().to_vec()).unwrap();
        let mut diagnostics = DiagnosticEngine::new(0);
        let parser = Parser::new(&mut stack, &mut diagnostics);
        let (sections, symbols, _charmaps, _assertions) = parser.run().unwrap();
        (sections, symbols)
    }

    fn run_with_assertions(source: &str) -> Result<(SectionEmitter, Vec<Assertion>), ParseError> {
        let mut stack = AssemblerFileStack::new(64);
        stack.push_file("test.asm", source.as_bytes().to_vec()).unwrap();
        let mut diagnostics = DiagnosticEngine::new(0);
        let parser = Parser::new(&mut stack, &mut diagnostics);
        let (sections, _symbols, _charmaps, assertions) = parser.run()?;
        Ok((sections, assertions))
    }

    #[test]
    fn a_trivial_section_assembles_to_two_bytes() {
        let (sections, _) = run("SECTION \"main\", ROM0\n\tnop\n\tret\n");
        assert_eq!(sections.sections()[0].data, Some(vec![0x00, 0xC9]));
    }

    #[test]
    fn a_label_records_its_offset() {
        let (sections, symbols) = run("SECTION \"main\", ROM0\nStart:\n\tnop\n");
        assert_eq!(sections.sections()[0].size, 1);
        assert_eq!(symbols.table().get("Start").unwrap().integer_value(), Some(0));
    }

    #[test]
    fn forward_reference_defers_to_a_patch() {
        let (sections, _) = run("SECTION \"main\", ROM0\n\tjp Later\nLater:\n\tret\n");
        assert_eq!(sections.sections()[0].patches.len(), 1);
    }

    #[test]
    fn ld_immediate_forms_encode_correctly() {
        let (sections, _) = run("SECTION \"main\", ROM0\n\tld a, 5\n\tld hl, 256\n");
        assert_eq!(sections.sections()[0].data, Some(vec![0x3E, 0x05, 0x21, 0x00, 0x01]));
    }

    #[test]
    fn db_emits_charmap_converted_string_bytes() {
        let (sections, _) = run("SECTION \"main\", ROM0\n\tdb \"AB\"\n");
        assert_eq!(sections.sections()[0].data, Some(b"AB".to_vec()));
    }

    #[test]
    fn equ_defines_a_constant_usable_in_later_expressions() {
        let (sections, symbols) = run("COUNT EQU 3\nSECTION \"main\", ROM0\n\tdb COUNT\n");
        assert_eq!(symbols.table().get("COUNT").unwrap().integer_value(), Some(3));
        assert_eq!(sections.sections()[0].data, Some(vec![3]));
    }

    #[test]
    fn set_allows_redefinition() {
        let (_, symbols) = run("N SET 1\nN SET 2\n");
        assert_eq!(symbols.table().get("N").unwrap().integer_value(), Some(2));
    }

    #[test]
    fn equs_substitutes_its_text_on_interpolation() {
        let (sections, _) = run("GREETING EQUS \"5\"\nSECTION \"main\", ROM0\n\tdb {GREETING}\n");
        assert_eq!(sections.sections()[0].data, Some(vec![5]));
    }

    #[test]
    fn rept_repeats_its_body_the_given_number_of_times() {
        let (sections, _) =
            run("SECTION \"main\", ROM0\n\tREPT 3\n\tdb 1\n\tENDR\n");
        assert_eq!(sections.sections()[0].data, Some(vec![1, 1, 1]));
    }

    #[test]
    fn rept_zero_emits_nothing() {
        let (sections, _) = run("SECTION \"main\", ROM0\n\tREPT 0\n\tdb 1\n\tENDR\n\tdb 2\n");
        assert_eq!(sections.sections()[0].data, Some(vec![2]));
    }

    #[test]
    fn for_binds_its_variable_each_iteration() {
        let (sections, _) =
            run("SECTION \"main\", ROM0\n\tFOR N, 3\n\tdb N\n\tENDR\n");
        assert_eq!(sections.sections()[0].data, Some(vec![0, 1, 2]));
    }

    #[test]
    fn macro_body_expands_positional_arguments_on_invocation() {
        let (sections, _) = run(concat!(
            "PutByte: MACRO\n",
            "\tdb \\1\n",
            "ENDM\n",
            "SECTION \"main\", ROM0\n",
            "\tPutByte 7\n",
        ));
        assert_eq!(sections.sections()[0].data, Some(vec![7]));
    }

    #[test]
    fn if_true_branch_assembles_and_elif_else_are_skipped() {
        let (sections, _) = run(concat!(
            "SECTION \"main\", ROM0\n",
            "\tIF 1\n",
            "\tdb 1\n",
            "\tELIF 1\n",
            "\tdb 2\n",
            "\tELSE\n",
            "\tdb 3\n",
            "\tENDC\n",
        ));
        assert_eq!(sections.sections()[0].data, Some(vec![1]));
    }

    #[test]
    fn if_false_falls_through_to_else_branch() {
        let (sections, _) = run(concat!(
            "SECTION \"main\", ROM0\n",
            "\tIF 0\n",
            "\tdb 1\n",
            "\tELSE\n",
            "\tdb 3\n",
            "\tENDC\n",
        ));
        assert_eq!(sections.sections()[0].data, Some(vec![3]));
    }

    #[test]
    fn purge_removes_a_redefinable_symbol() {
        let (_, symbols) = run("N SET 1\nPURGE N\n");
        assert!(symbols.table().get("N").is_none());
    }

    #[test]
    fn purging_the_active_local_scope_is_an_error() {
        let mut stack = AssemblerFileStack::new(64);
        stack
            .push_file("test.asm", b"Foo:\nPURGE Foo\n".to_vec())
            .unwrap();
        let mut diagnostics = DiagnosticEngine::new(0);
        let parser = Parser::new(&mut stack, &mut diagnostics);
        let err = parser.run().unwrap_err();
        assert!(matches!(err, ParseError::Semantic(_)));
    }

    #[test]
    fn bare_equs_redefinition_is_rejected() {
        let mut stack = AssemblerFileStack::new(64);
        stack
            .push_file("test.asm", b"GREETING EQUS \"hi\"\nGREETING EQUS \"bye\"\n".to_vec())
            .unwrap();
        let mut diagnostics = DiagnosticEngine::new(0);
        let parser = Parser::new(&mut stack, &mut diagnostics);
        let err = parser.run().unwrap_err();
        assert!(matches!(err, ParseError::Semantic(_)));
    }

    #[test]
    fn redef_overwrites_an_existing_equs() {
        let (sections, _) = run(concat!(
            "GREETING EQUS \"5\"\n",
            "REDEF GREETING EQUS \"7\"\n",
            "SECTION \"main\", ROM0\n",
            "\tdb {GREETING}\n",
        ));
        assert_eq!(sections.sections()[0].data, Some(vec![7]));
    }

    #[test]
    fn redef_defines_a_fresh_var() {
        let (_, symbols) = run("REDEF N = 4\n");
        assert_eq!(symbols.table().get("N").unwrap().integer_value(), Some(4));
    }

    #[test]
    fn assert_on_a_known_true_expression_is_silent() {
        let (sections, assertions) =
            run_with_assertions("SECTION \"main\", ROM0\n\tASSERT 1\n\tdb 1\n").unwrap();
        assert!(assertions.is_empty());
        assert_eq!(sections.sections()[0].data, Some(vec![1]));
    }

    #[test]
    fn assert_on_a_known_false_expression_reports_an_error_but_keeps_parsing() {
        let mut stack = AssemblerFileStack::new(64);
        stack.push_file("test.asm", b"ASSERT 0, \"never\"\nSECTION \"main\", ROM0\n\tdb 1\n".to_vec()).unwrap();
        let mut diagnostics = DiagnosticEngine::new(0);
        let parser = Parser::new(&mut stack, &mut diagnostics);
        let (sections, _, _, assertions) = parser.run().unwrap();
        assert!(diagnostics.had_errors());
        assert!(assertions.is_empty());
        assert_eq!(sections.sections()[0].data, Some(vec![1]));
    }

    #[test]
    fn assert_aborts_once_the_error_cap_is_hit() {
        let mut stack = AssemblerFileStack::new(64);
        stack.push_file("test.asm", b"ASSERT 0, \"a\"\n".to_vec()).unwrap();
        let mut diagnostics = DiagnosticEngine::new(1);
        let parser = Parser::new(&mut stack, &mut diagnostics);
        let err = parser.run().unwrap_err();
        assert!(matches!(err, ParseError::Aborted));
    }

    #[test]
    fn assert_fatal_on_a_known_false_expression_aborts_immediately() {
        let mut stack = AssemblerFileStack::new(64);
        stack.push_file("test.asm", b"ASSERT FATAL, 0, \"boom\"\n".to_vec()).unwrap();
        let mut diagnostics = DiagnosticEngine::new(0);
        let parser = Parser::new(&mut stack, &mut diagnostics);
        let err = parser.run().unwrap_err();
        assert!(matches!(err, ParseError::Aborted));
    }

    #[test]
    fn assert_warn_on_a_known_false_expression_does_not_abort() {
        let (_, assertions) = run_with_assertions("ASSERT WARN, 0, \"heads up\"\n").unwrap();
        assert!(assertions.is_empty());
    }

    #[test]
    fn assert_on_an_unresolved_symbol_is_deferred() {
        let (_, assertions) = run_with_assertions(concat!(
            "SECTION \"main\", ROM0\n",
            "\tASSERT other == 1\n",
            "EXPORT other\n",
            "other EQU 1\n",
        ))
        .unwrap();
        assert_eq!(assertions.len(), 1);
        assert_eq!(assertions[0].level, AssertionLevel::Error);
    }

    #[test]
    fn static_assert_rejects_a_non_constant_expression() {
        let err =
            run_with_assertions("SECTION \"main\", ROM0\n\tSTATIC_ASSERT other == 1\n").unwrap_err();
        assert!(matches!(err, ParseError::Semantic(_)));
    }

    #[test]
    fn charmap_remaps_string_bytes() {
        let (sections, _) =
            run("CHARMAP \"<A>\", $FF\nSECTION \"main\", ROM0\n\tdb \"<A>B\"\n");
        assert_eq!(sections.sections()[0].data, Some(vec![0xFF, b'B']));
    }

    #[test]
    fn newcharmap_and_setcharmap_switch_the_active_table() {
        let (sections, _) = run(concat!(
            "NEWCHARMAP alt\n",
            "SETCHARMAP alt\n",
            "CHARMAP \"A\", $01\n",
            "SECTION \"main\", ROM0\n",
            "\tdb \"A\"\n",
        ));
        assert_eq!(sections.sections()[0].data, Some(vec![1]));
    }

    #[test]
    fn include_splices_in_another_file() {
        let dir = std::env::temp_dir();
        let included = dir.join(format!("rgbds-parser-test-include-{}.asm", std::process::id()));
        std::fs::write(&included, b"\tdb 9\n").unwrap();

        let source = format!("SECTION \"main\", ROM0\nINCLUDE \"{}\"\n", included.display());
        let (sections, _) = run(&source);
        std::fs::remove_file(&included).ok();

        assert_eq!(sections.sections()[0].data, Some(vec![9]));
    }

    #[test]
    fn incbin_splices_in_raw_bytes() {
        let dir = std::env::temp_dir();
        let binary = dir.join(format!("rgbds-parser-test-incbin-{}.bin", std::process::id()));
        std::fs::write(&binary, [0xDE, 0xAD, 0xBE, 0xEF]).unwrap();

        let source = format!("SECTION \"main\", ROM0\nINCBIN \"{}\"\n", binary.display());
        let (sections, _) = run(&source);
        std::fs::remove_file(&binary).ok();

        assert_eq!(sections.sections()[0].data, Some(vec![0xDE, 0xAD, 0xBE, 0xEF]));
    }
}
