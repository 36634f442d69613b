//! The tokenizer: pulls expanded characters off an
//! [`AssemblerFileStack`](crate::filestack::AssemblerFileStack) and turns
//! them into a stream of [`Token`]s, one lookahead token at a time (spec
//! §4.5, §9's redesign guidance away from the reference implementation's
//! generator/coroutine shape).
//!
//! Three things happen in this module, layered from the bottom up:
//!
//! 1. **Expansion** (`next_expanded_byte`): `\1`..`\9`, `\<N>`, `\@`, `\#`
//!    macro-argument substitution and `{sym}` interpolation are spliced
//!    into the byte stream transparently, so everything above this layer
//!    only ever sees already-expanded text.
//! 2. **Mode tracking**: `NORMAL`, `RAW` (inside a macro/`REPT` capture,
//!    where only the matching `ENDM`/`ENDR` is recognized), and the three
//!    `SKIP_TO_*` modes used while skipping a false `IF`/`ELIF` branch.
//! 3. **Tokenization**: turns a run of expanded bytes into numbers,
//!    strings, identifiers and punctuation.

use std::fmt;

use crate::filestack::AssemblerFileStack;
use crate::numbers;

/// Which of the lexer's distinct scanning modes is active (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Ordinary tokenization.
    Normal,
    /// Inside a `MACRO`/`REPT` body being captured verbatim: only a
    /// matching `ENDM`/`ENDR` at line start ends the mode, everything else
    /// is opaque text.
    Raw,
    /// Skipping a false `IF`/`ELIF` branch, looking for the next
    /// `ELIF`/`ELSE`/`ENDC` at line start.
    SkipToElif,
    /// Skipping an `ELSE` branch (or every remaining branch once one
    /// already matched), looking only for `ENDC`.
    SkipToEndc,
    /// Skipping a `REPT`/`FOR` body that turned out to run zero
    /// iterations, looking only for the matching `ENDR`.
    SkipToEndr,
}

/// A single lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// A run of letters/digits/`_`/`#` starting with a letter or `_`: a
    /// directive keyword, mnemonic, register name or bare identifier. The
    /// parser decides which, by case-insensitive text comparison.
    Identifier(String),
    /// A scoped local label reference/definition, e.g. `.loop`.
    LocalIdentifier(String),
    /// Any numeric literal, already evaluated to its final value.
    Number(i32),
    /// A double-quoted string's content, with escapes already resolved.
    /// Kept as raw bytes since charmap-mapped strings need not be valid
    /// UTF-8 source text.
    Str(Vec<u8>),
    /// `\n` or `;`-terminated end of a logical line.
    Newline,
    Colon,
    DoubleColon,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Ampersand,
    Pipe,
    Caret,
    Tilde,
    Bang,
    Shl,
    Shr,
    LogAnd,
    LogOr,
    Assign,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    /// `@`, the current-PC pseudo-symbol.
    At,
    /// End of input.
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Identifier(name) => write!(f, "`{name}`"),
            Token::LocalIdentifier(name) => write!(f, "`{name}`"),
            Token::Number(value) => write!(f, "{value}"),
            Token::Str(_) => write!(f, "a string"),
            Token::Newline => write!(f, "end of line"),
            Token::Eof => write!(f, "end of file"),
            other => write!(f, "`{other:?}`"),
        }
    }
}

/// Looks up a name to splice into a `{sym}` interpolation: `EQUS` strings
/// expand to their replacement text, integer-valued symbols expand to
/// their decimal text. Implemented by whoever owns the symbol table
/// (`crate::symtab`), kept as a trait here so the lexer doesn't depend on
/// it directly.
pub trait Interpolate {
    /// Resolve `name` (the text between `{` and `}`) to the text that
    /// should be spliced into the input stream in its place.
    fn interpolate(&self, name: &str) -> Option<String>;
}

/// Errors raised while scanning a token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LexError {
    /// An unterminated `"..."` or `"""..."""` string.
    #[error("unterminated string literal")]
    UnterminatedString,
    /// A `\X` escape inside a string wasn't one of the recognized forms.
    #[error("unknown string escape `\\{0}`")]
    UnknownEscape(char),
    /// A numeric literal's digits didn't parse for its radix.
    #[error(transparent)]
    Number(#[from] numbers::NumberError),
    /// A byte didn't start any recognized token.
    #[error("unexpected character `{0}`")]
    UnexpectedChar(char),
    /// `{name}` interpolation referenced an undefined symbol.
    #[error("interpolation of undefined symbol `{0}`")]
    UndefinedInterpolation(String),
}

/// The tokenizer. Holds only mode-independent scratch state; the
/// authoritative mode/position/macro-args live on the
/// [`AssemblerFileStack`] frame so push/pop restores them automatically.
#[derive(Debug)]
pub struct Lexer {
    /// Bytes already expanded (from `{sym}` or `\X`) but not yet
    /// tokenized.
    pending: Vec<u8>,
    /// Nesting depth while skipping (an inner `IF`/`REPT`/`FOR` opened
    /// inside the branch being skipped, not yet closed). Lets
    /// `skip_until_directive` ignore an inner `ELIF`/`ELSE`/`ENDC`/`ENDR`
    /// that belongs to a nested construct rather than the one being
    /// skipped.
    skip_depth: u32,
    /// `-b`: alternate characters standing in for `0`/`1` in `%` literals.
    binary_digits: Option<[char; 2]>,
    /// `-g`: alternate characters standing in for `0`/`1`/`2`/`3` in `` ` ``
    /// literals.
    gfx_digits: Option<[char; 4]>,
    /// `-Q`: the fraction width a fixed-point literal gets when it has no
    /// explicit `qN` suffix.
    default_fraction_bits: u8,
}

impl Default for Lexer {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
            skip_depth: 0,
            binary_digits: None,
            gfx_digits: None,
            default_fraction_bits: 16,
        }
    }
}

impl Lexer {
    /// A fresh lexer with no pending expansion text.
    pub fn new() -> Self {
        Self::default()
    }

    /// `-b`: use `chars[0]`/`chars[1]` in place of `0`/`1` inside `%`
    /// literals, in addition to the canonical digits.
    pub fn with_binary_digits(mut self, chars: [char; 2]) -> Self {
        self.binary_digits = Some(chars);
        self
    }

    /// `-g`: use `chars[0..4]` in place of `0`/`1`/`2`/`3` inside `` ` ``
    /// literals, in addition to the canonical digits.
    pub fn with_gfx_digits(mut self, chars: [char; 4]) -> Self {
        self.gfx_digits = Some(chars);
        self
    }

    /// `-Q`: the fraction width a `N.M` literal gets when it has no
    /// explicit `qN` suffix (default 16, as the hardware's own fixed-point
    /// registers use).
    pub fn with_default_fraction_bits(mut self, bits: u8) -> Self {
        self.default_fraction_bits = bits;
        self
    }

    /// The canonical digit (`'0'..='3'`) `ch` stands for at this radix,
    /// whether it's one of the literal digit characters or one of the
    /// `-b`/`-g` substitutes.
    fn translate_digit(&self, radix: u32, ch: u8) -> Option<char> {
        if (ch as char).is_digit(radix) {
            return Some(ch as char);
        }
        match radix {
            2 => {
                let alt = self.binary_digits?;
                if ch as char == alt[0] {
                    Some('0')
                } else if ch as char == alt[1] {
                    Some('1')
                } else {
                    None
                }
            }
            4 => {
                let alt = self.gfx_digits?;
                let index = alt.iter().position(|&candidate| candidate == ch as char)?;
                char::from_digit(index as u32, 10)
            }
            _ => None,
        }
    }

    /// Reset the nesting counter used by `skip_until_directive`. Callers
    /// switch to a `Skip*` mode and call this first, since the counter is
    /// shared across the whole lexer rather than per file-stack frame.
    pub fn reset_skip_depth(&mut self) {
        self.skip_depth = 0;
    }

    fn raw_peek(&self, stack: &AssemblerFileStack) -> Option<u8> {
        self.pending.last().copied().or_else(|| stack.peek_byte())
    }

    fn raw_advance(
        &mut self,
        stack: &mut AssemblerFileStack,
        interp: &dyn Interpolate,
    ) -> Result<Option<u8>, LexError> {
        if let Some(byte) = self.pending.pop() {
            return Ok(Some(byte));
        }

        let Some(byte) = stack.peek_byte() else { return Ok(None) };

        // `{symbol}` interpolation, only meaningful outside RAW mode (a
        // captured macro/REPT body interpolates when it's *re-lexed* on
        // invocation, not while being captured).
        if byte == b'{' && stack.mode() != Mode::Raw {
            stack.advance_byte();
            let mut name = String::new();
            loop {
                match stack.advance_byte() {
                    Some(b'}') => break,
                    Some(ch) => name.push(ch as char),
                    None => return Err(LexError::UnterminatedString),
                }
            }
            let replacement = interp
                .interpolate(name.trim())
                .ok_or_else(|| LexError::UndefinedInterpolation(name.trim().to_owned()))?;
            self.pending.extend(replacement.bytes().rev());
            return self.raw_advance(stack, interp);
        }

        // `\1`..`\9`, `\<N>`, `\@`, `\#` macro-argument substitution.
        if byte == b'\\' && stack.mode() != Mode::Raw {
            if let Some(args) = stack.macro_args().cloned() {
                // Peek one byte ahead without consuming `\` unless it's a
                // recognized escape.
                let mut recognized = true;
                let next = {
                    // We need to look two bytes ahead; do it via a cheap
                    // clone-free trick: advance `\`, inspect the following
                    // byte, and push back a substitution if recognized,
                    // otherwise leave the backslash for string/escape
                    // handling above this layer by returning it as-is.
                    stack.advance_byte();
                    stack.peek_byte()
                };
                match next {
                    Some(digit @ b'1'..=b'9') => {
                        stack.advance_byte();
                        let replacement = args.positional((digit - b'0') as usize).unwrap_or("");
                        self.pending.extend(replacement.bytes().rev());
                        return self.raw_advance(stack, interp);
                    }
                    Some(b'@') => {
                        stack.advance_byte();
                        self.pending.extend(args.unique_tag.bytes().rev());
                        return self.raw_advance(stack, interp);
                    }
                    Some(b'#') => {
                        stack.advance_byte();
                        self.pending.extend(args.all_joined().bytes().rev());
                        return self.raw_advance(stack, interp);
                    }
                    _ => {
                        recognized = false;
                    }
                }
                if !recognized {
                    // Not a recognized escape: the `\` we consumed above is
                    // a real character, hand it back.
                    return Ok(Some(b'\\'));
                }
            }
        }

        Ok(stack.advance_byte())
    }

    /// Pull the next token, consuming as many bytes as needed from
    /// `stack`.
    pub fn next_token(
        &mut self,
        stack: &mut AssemblerFileStack,
        interp: &dyn Interpolate,
    ) -> Result<Token, LexError> {
        loop {
            match stack.mode() {
                Mode::SkipToElif | Mode::SkipToEndc | Mode::SkipToEndr => {
                    if let Some(token) = self.skip_until_directive(stack, interp)? {
                        return Ok(token);
                    }
                    continue;
                }
                Mode::Raw | Mode::Normal => {}
            }

            let Some(byte) = self.raw_peek(stack) else { return Ok(Token::Eof) };

            match byte {
                b' ' | b'\t' => {
                    self.raw_advance(stack, interp)?;
                    stack.set_line_start(false);
                }
                b'\\' if stack.mode() != Mode::Raw && self.peeks_line_continuation(stack, interp)? => {
                    self.raw_advance(stack, interp)?; // `\`
                    self.raw_advance(stack, interp)?; // `\n`
                }
                b';' => {
                    while !matches!(self.raw_peek(stack), None | Some(b'\n')) {
                        self.raw_advance(stack, interp)?;
                    }
                }
                b'\n' => {
                    self.raw_advance(stack, interp)?;
                    stack.set_line_start(true);
                    return Ok(Token::Newline);
                }
                _ => return self.scan_token(stack, interp, byte),
            }
        }
    }

    /// Whether the backslash the caller just peeked is immediately
    /// followed by a newline (a line continuation), as opposed to a
    /// `\1`-style macro-argument escape (already handled one layer down,
    /// in [`raw_advance`](Self::raw_advance)) or a bare stray backslash.
    fn peeks_line_continuation(
        &mut self,
        stack: &mut AssemblerFileStack,
        interp: &dyn Interpolate,
    ) -> Result<bool, LexError> {
        let backslash = self.raw_advance(stack, interp)?.expect("guard only runs on a peeked `\\`");
        let is_continuation = self.raw_peek(stack) == Some(b'\n');
        self.pending.push(backslash);
        Ok(is_continuation)
    }

    /// While skipping (false `IF` branch / zero-iteration `REPT`), scan raw
    /// text a line at a time looking only for the directive that ends the
    /// skip. Returns `Some(token)` once that directive is found (so the
    /// parser can act on it), or `None` to keep skipping.
    fn skip_until_directive(
        &mut self,
        stack: &mut AssemblerFileStack,
        interp: &dyn Interpolate,
    ) -> Result<Option<Token>, LexError> {
        if self.raw_peek(stack).is_none() {
            return Ok(Some(Token::Eof));
        }

        if !stack.at_line_start() {
            while !matches!(self.raw_peek(stack), None | Some(b'\n')) {
                self.raw_advance(stack, interp)?;
            }
            if self.raw_peek(stack) == Some(b'\n') {
                self.raw_advance(stack, interp)?;
            }
            stack.set_line_start(true);
            return Ok(None);
        }

        while self.raw_peek(stack) == Some(b' ') || self.raw_peek(stack) == Some(b'\t') {
            self.raw_advance(stack, interp)?;
        }

        let mut word = String::new();
        while let Some(ch) = self.raw_peek(stack) {
            if ch.is_ascii_alphabetic() {
                word.push(ch.to_ascii_uppercase() as char);
                self.raw_advance(stack, interp)?;
            } else {
                break;
            }
        }

        let opens_nested = match stack.mode() {
            Mode::SkipToElif | Mode::SkipToEndc => word == "IF",
            Mode::SkipToEndr => word == "REPT" || word == "FOR",
            Mode::Raw | Mode::Normal => false,
        };
        if opens_nested {
            self.skip_depth += 1;
            while !matches!(self.raw_peek(stack), None | Some(b'\n')) {
                self.raw_advance(stack, interp)?;
            }
            if self.raw_peek(stack) == Some(b'\n') {
                self.raw_advance(stack, interp)?;
            }
            stack.set_line_start(true);
            return Ok(None);
        }

        let closes = matches!(
            (stack.mode(), word.as_str()),
            (Mode::SkipToElif, "ELIF" | "ELSE" | "ENDC")
                | (Mode::SkipToEndc, "ENDC")
                | (Mode::SkipToEndr, "ENDR")
        );
        let found = closes && self.skip_depth == 0;

        if closes && !found {
            // Closes a nested construct, not the one we're skipping.
            if matches!(word.as_str(), "ENDC" | "ENDR") {
                self.skip_depth -= 1;
            }
            while !matches!(self.raw_peek(stack), None | Some(b'\n')) {
                self.raw_advance(stack, interp)?;
            }
            if self.raw_peek(stack) == Some(b'\n') {
                self.raw_advance(stack, interp)?;
            }
            stack.set_line_start(true);
            return Ok(None);
        }

        if found {
            stack.set_line_start(false);
            return Ok(Some(Token::Identifier(word)));
        }

        // Not the directive we're after: consume the rest of the line.
        while !matches!(self.raw_peek(stack), None | Some(b'\n')) {
            self.raw_advance(stack, interp)?;
        }
        if self.raw_peek(stack) == Some(b'\n') {
            self.raw_advance(stack, interp)?;
        }
        stack.set_line_start(true);
        Ok(None)
    }

    /// Whether the upcoming raw text (after skipping spaces/tabs) ends the
    /// current statement (`;`, a newline, or end of input) rather than
    /// starting a macro-call argument. Must be checked with this, not the
    /// ordinary token lookahead, since tokenizing a macro argument's first
    /// word the normal way (as an identifier/number/etc.) would defeat the
    /// point of scanning it raw.
    pub fn at_statement_end(
        &mut self,
        stack: &mut AssemblerFileStack,
        interp: &dyn Interpolate,
    ) -> Result<bool, LexError> {
        while matches!(self.raw_peek(stack), Some(b' ') | Some(b'\t')) {
            self.raw_advance(stack, interp)?;
        }
        Ok(matches!(self.raw_peek(stack), None | Some(b'\n') | Some(b';')))
    }

    /// Scan one raw macro-call argument: text up to an un-nested `,`, `;`,
    /// end of line, or end of input. A quoted string's contents never end
    /// the argument early, and `(`/`[` nesting is balanced, since an
    /// argument may itself contain a call-like expression (e.g.
    /// `DrawTile foo(1, 2), bar`).
    pub fn scan_macro_argument(
        &mut self,
        stack: &mut AssemblerFileStack,
        interp: &dyn Interpolate,
    ) -> Result<String, LexError> {
        while matches!(self.raw_peek(stack), Some(b' ') | Some(b'\t')) {
            self.raw_advance(stack, interp)?;
        }

        let mut text = Vec::new();
        let mut depth: i32 = 0;
        loop {
            match self.raw_peek(stack) {
                None | Some(b'\n') => break,
                Some(b';') if depth == 0 => break,
                Some(b',') if depth == 0 => break,
                Some(b'"') => {
                    text.push(self.raw_advance(stack, interp)?.expect("just peeked"));
                    loop {
                        match self.raw_advance(stack, interp)? {
                            None => return Err(LexError::UnterminatedString),
                            Some(b'\\') => {
                                text.push(b'\\');
                                if let Some(escaped) = self.raw_advance(stack, interp)? {
                                    text.push(escaped);
                                }
                            }
                            Some(b'"') => {
                                text.push(b'"');
                                break;
                            }
                            Some(byte) => text.push(byte),
                        }
                    }
                }
                Some(byte @ (b'(' | b'[')) => {
                    depth += 1;
                    text.push(byte);
                    self.raw_advance(stack, interp)?;
                }
                Some(byte @ (b')' | b']')) => {
                    depth -= 1;
                    text.push(byte);
                    self.raw_advance(stack, interp)?;
                }
                Some(byte) => {
                    text.push(byte);
                    self.raw_advance(stack, interp)?;
                }
            }
        }

        while matches!(text.last(), Some(b' ') | Some(b'\t')) {
            text.pop();
        }

        Ok(String::from_utf8_lossy(&text).into_owned())
    }

    fn scan_token(
        &mut self,
        stack: &mut AssemblerFileStack,
        interp: &dyn Interpolate,
        first: u8,
    ) -> Result<Token, LexError> {
        stack.set_line_start(false);

        match first {
            b'"' => self.scan_string(stack, interp),
            b'#' if self.peek_after(stack, interp)? == Some(b'"') => {
                self.raw_advance(stack, interp)?;
                self.scan_string(stack, interp)
            }
            b'0'..=b'9' => self.scan_decimal_or_fixed(stack, interp),
            b'$' => {
                self.raw_advance(stack, interp)?;
                self.scan_radix(stack, interp, 16, numbers::parse_hex)
            }
            b'%' if self.starts_radix_digit(stack, interp, 2)? => {
                self.raw_advance(stack, interp)?;
                self.scan_radix(stack, interp, 2, numbers::parse_binary)
            }
            b'&' if self.starts_radix_digit(stack, interp, 8)? => {
                self.raw_advance(stack, interp)?;
                self.scan_radix(stack, interp, 8, numbers::parse_octal)
            }
            b'`' => {
                self.raw_advance(stack, interp)?;
                self.scan_radix(stack, interp, 4, numbers::parse_gfx)
            }
            b'.' => {
                self.raw_advance(stack, interp)?;
                let name = self.scan_identifier_tail(stack, interp)?;
                Ok(Token::LocalIdentifier(format!(".{name}")))
            }
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                let name = self.scan_identifier_tail(stack, interp)?;
                Ok(Token::Identifier(name))
            }
            b'@' => {
                self.raw_advance(stack, interp)?;
                Ok(Token::At)
            }
            b':' => {
                self.raw_advance(stack, interp)?;
                if self.raw_peek(stack) == Some(b':') {
                    self.raw_advance(stack, interp)?;
                    Ok(Token::DoubleColon)
                } else {
                    Ok(Token::Colon)
                }
            }
            b',' => self.single(stack, interp, Token::Comma),
            b'(' => self.single(stack, interp, Token::LParen),
            b')' => self.single(stack, interp, Token::RParen),
            b'[' => self.single(stack, interp, Token::LBracket),
            b']' => self.single(stack, interp, Token::RBracket),
            b'+' => self.single(stack, interp, Token::Plus),
            b'-' => self.single(stack, interp, Token::Minus),
            b'*' => self.single(stack, interp, Token::Star),
            b'/' => self.single(stack, interp, Token::Slash),
            b'%' => self.single(stack, interp, Token::Percent),
            b'~' => self.single(stack, interp, Token::Tilde),
            b'^' => self.single(stack, interp, Token::Caret),
            b'&' => self.single(stack, interp, Token::Ampersand),
            b'|' => self.two_char(stack, interp, b'|', Token::Pipe, Token::LogOr),
            b'!' => self.two_char(stack, interp, b'=', Token::Bang, Token::Ne),
            b'=' => self.two_char(stack, interp, b'=', Token::Assign, Token::Eq),
            b'<' => self.scan_angle(stack, interp, b'<', Token::Shl, Token::Le, Token::Lt),
            b'>' => self.scan_angle(stack, interp, b'>', Token::Shr, Token::Ge, Token::Gt),
            other => Err(LexError::UnexpectedChar(other as char)),
        }
    }

    fn single(
        &mut self,
        stack: &mut AssemblerFileStack,
        interp: &dyn Interpolate,
        token: Token,
    ) -> Result<Token, LexError> {
        self.raw_advance(stack, interp)?;
        Ok(token)
    }

    fn two_char(
        &mut self,
        stack: &mut AssemblerFileStack,
        interp: &dyn Interpolate,
        second: u8,
        one: Token,
        two: Token,
    ) -> Result<Token, LexError> {
        self.raw_advance(stack, interp)?;
        if self.raw_peek(stack) == Some(second) {
            self.raw_advance(stack, interp)?;
            Ok(two)
        } else if second == b'|' && self.raw_peek(stack) == Some(b'|') {
            self.raw_advance(stack, interp)?;
            Ok(two)
        } else {
            Ok(one)
        }
    }

    fn scan_angle(
        &mut self,
        stack: &mut AssemblerFileStack,
        interp: &dyn Interpolate,
        doubled: u8,
        shift: Token,
        eq_variant: Token,
        plain: Token,
    ) -> Result<Token, LexError> {
        self.raw_advance(stack, interp)?;
        if self.raw_peek(stack) == Some(doubled) {
            self.raw_advance(stack, interp)?;
            Ok(shift)
        } else if self.raw_peek(stack) == Some(b'=') {
            self.raw_advance(stack, interp)?;
            Ok(eq_variant)
        } else {
            Ok(plain)
        }
    }

    /// Whether `%`/`&` should be read as a radix prefix (followed by a
    /// valid digit for that radix) rather than the modulo/bitwise-and
    /// operator. Grounded in `original_source/src/asm/lexer.cpp`'s
    /// tie-break between `%`/`&` as number prefixes versus operators.
    fn starts_radix_digit(
        &mut self,
        stack: &mut AssemblerFileStack,
        interp: &dyn Interpolate,
        radix: u32,
    ) -> Result<bool, LexError> {
        let prefix = self.raw_advance(stack, interp)?.expect("guard only runs on a peeked byte");
        let next = self.raw_peek(stack);
        let is_digit = matches!(next, Some(ch) if self.translate_digit(radix, ch).is_some());
        self.pending.push(prefix);
        Ok(is_digit)
    }

    fn peek_after(
        &mut self,
        stack: &mut AssemblerFileStack,
        interp: &dyn Interpolate,
    ) -> Result<Option<u8>, LexError> {
        // `#"` raw-string sniffing: consume `#`, check the next byte, and
        // if it isn't `"` push `#` back for re-scanning as an identifier
        // character (`#` is legal in trailing identifier positions, e.g.
        // `\#`-adjacent macro text, though not as a leading character).
        let consumed = self.raw_advance(stack, interp)?;
        debug_assert_eq!(consumed, Some(b'#'));
        let next = self.raw_peek(stack);
        self.pending.push(b'#');
        Ok(next)
    }

    fn scan_identifier_tail(
        &mut self,
        stack: &mut AssemblerFileStack,
        interp: &dyn Interpolate,
    ) -> Result<String, LexError> {
        let mut name = String::new();
        while let Some(ch) = self.raw_peek(stack) {
            if ch.is_ascii_alphanumeric() || ch == b'_' || ch == b'#' || ch == b'@' {
                name.push(ch as char);
                self.raw_advance(stack, interp)?;
            } else {
                break;
            }
        }
        Ok(name)
    }

    fn scan_decimal_or_fixed(
        &mut self,
        stack: &mut AssemblerFileStack,
        interp: &dyn Interpolate,
    ) -> Result<Token, LexError> {
        let mut integer = String::new();
        while let Some(ch @ b'0'..=b'9') = self.raw_peek(stack) {
            integer.push(ch as char);
            self.raw_advance(stack, interp)?;
        }

        if self.raw_peek(stack) == Some(b'.') {
            self.raw_advance(stack, interp)?;
            let mut fraction = String::new();
            while let Some(ch @ b'0'..=b'9') = self.raw_peek(stack) {
                fraction.push(ch as char);
                self.raw_advance(stack, interp)?;
            }

            let mut bits = self.default_fraction_bits;
            if matches!(self.raw_peek(stack), Some(b'q' | b'Q')) {
                self.raw_advance(stack, interp)?;
                let mut digits = String::new();
                while let Some(ch @ b'0'..=b'9') = self.raw_peek(stack) {
                    digits.push(ch as char);
                    self.raw_advance(stack, interp)?;
                }
                bits = digits.parse().map_err(|_| numbers::NumberError::InvalidDigit)?;
            }

            let value = numbers::parse_fixed_point(&integer, &fraction, bits)?;
            return Ok(Token::Number(value));
        }

        Ok(Token::Number(numbers::parse_decimal(&integer)?))
    }

    fn scan_radix(
        &mut self,
        stack: &mut AssemblerFileStack,
        interp: &dyn Interpolate,
        radix: u32,
        convert: fn(&str) -> Result<i32, numbers::NumberError>,
    ) -> Result<Token, LexError> {
        let mut digits = String::new();
        while let Some(ch) = self.raw_peek(stack) {
            if ch == b'_' {
                self.raw_advance(stack, interp)?;
                continue;
            }
            match self.translate_digit(radix, ch) {
                Some(digit) => {
                    digits.push(digit);
                    self.raw_advance(stack, interp)?;
                }
                None => break,
            }
        }
        Ok(Token::Number(convert(&digits)?))
    }

    fn scan_string(
        &mut self,
        stack: &mut AssemblerFileStack,
        interp: &dyn Interpolate,
    ) -> Result<Token, LexError> {
        self.raw_advance(stack, interp)?; // opening quote

        let triple = self.raw_peek(stack) == Some(b'"')
            && {
                // Lookahead for the second `"` of `"""`. We've only
                // consumed one quote so far.
                let second = self.raw_advance(stack, interp)?;
                let third = self.raw_peek(stack) == Some(b'"');
                if !third {
                    self.pending.push(second.unwrap());
                }
                third
            };
        if triple {
            self.raw_advance(stack, interp)?; // second `"`
            self.raw_advance(stack, interp)?; // third `"`
        }

        let mut bytes = Vec::new();
        loop {
            match self.raw_advance(stack, interp)? {
                None => return Err(LexError::UnterminatedString),
                Some(b'"') if !triple => break,
                Some(b'"') if triple => {
                    if self.raw_peek(stack) == Some(b'"') {
                        let second = self.raw_advance(stack, interp)?.unwrap();
                        if self.raw_peek(stack) == Some(b'"') {
                            self.raw_advance(stack, interp)?;
                            break;
                        }
                        bytes.push(b'"');
                        bytes.push(second);
                    } else {
                        bytes.push(b'"');
                    }
                }
                Some(b'\\') => {
                    let escaped = self.raw_advance(stack, interp)?.ok_or(LexError::UnterminatedString)?;
                    bytes.push(match escaped {
                        b'n' => b'\n',
                        b'r' => b'\r',
                        b't' => b'\t',
                        b'0' => 0,
                        b'"' => b'"',
                        b'\'' => b'\'',
                        b'{' => b'{',
                        b'\\' => b'\\',
                        b'\n' => continue,
                        other => return Err(LexError::UnknownEscape(other as char)),
                    });
                }
                Some(byte) => bytes.push(byte),
            }
        }

        Ok(Token::Str(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoInterpolation;
    impl Interpolate for NoInterpolation {
        fn interpolate(&self, _name: &str) -> Option<String> {
            None
        }
    }

    fn tokens(source: &str) -> Vec<Token> {
        let mut stack = AssemblerFileStack::new(64);
        stack.push_file("test.asm", source.as_bytes().to_vec()).unwrap();
        let mut lexer = Lexer::new();
        let mut out = Vec::new();
        loop {
            let token = lexer.next_token(&mut stack, &NoInterpolation).unwrap();
            if token == Token::Eof {
                break;
            }
            out.push(token);
        }
        out
    }

    #[test]
    fn identifiers_and_punctuation() {
        assert_eq!(
            tokens("ld a, b"),
            vec![
                Token::Identifier("ld".to_owned()),
                Token::Identifier("a".to_owned()),
                Token::Comma,
                Token::Identifier("b".to_owned()),
            ]
        );
    }

    #[test]
    fn hex_and_decimal_numbers() {
        assert_eq!(tokens("$FF 10"), vec![Token::Number(0xFF), Token::Number(10)]);
    }

    #[test]
    fn local_labels_keep_their_leading_dot() {
        assert_eq!(tokens(".loop"), vec![Token::LocalIdentifier(".loop".to_owned())]);
    }

    #[test]
    fn simple_string_literal() {
        assert_eq!(tokens("\"hi\""), vec![Token::Str(b"hi".to_vec())]);
    }

    #[test]
    fn string_escapes_are_resolved() {
        assert_eq!(tokens("\"a\\nb\""), vec![Token::Str(b"a\nb".to_vec())]);
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(tokens("nop ; a comment\n"), vec![Token::Identifier("nop".to_owned()), Token::Newline]);
    }

    #[test]
    fn two_char_operators_are_preferred_over_one_char() {
        assert_eq!(tokens("<<"), vec![Token::Shl]);
        assert_eq!(tokens("::"), vec![Token::DoubleColon]);
        assert_eq!(tokens("!="), vec![Token::Ne]);
    }

    #[test]
    fn scan_macro_argument_stops_at_an_unnested_comma() {
        let mut stack = AssemblerFileStack::new(64);
        stack.push_file("test.asm", b"foo(1, 2), bar\n".to_vec()).unwrap();
        let mut lexer = Lexer::new();
        let first = lexer.scan_macro_argument(&mut stack, &NoInterpolation).unwrap();
        assert_eq!(first, "foo(1, 2)");
        let comma = lexer.next_token(&mut stack, &NoInterpolation).unwrap();
        assert_eq!(comma, Token::Comma);
        let second = lexer.scan_macro_argument(&mut stack, &NoInterpolation).unwrap();
        assert_eq!(second, "bar");
    }

    #[test]
    fn macro_argument_substitution() {
        let mut stack = AssemblerFileStack::new(64);
        stack.push_file("test.asm", b"".to_vec()).unwrap();
        let args = crate::filestack::MacroArgs {
            positional: vec!["A".to_owned(), "B".to_owned()],
            unique_tag: "_1".to_owned(),
        };
        stack
            .push_macro("Foo", std::rc::Rc::from(*br"\1_\2"), args)
            .unwrap();

        let mut lexer = Lexer::new();
        let token = lexer.next_token(&mut stack, &NoInterpolation).unwrap();
        assert_eq!(token, Token::Identifier("A_B".to_owned()));
    }
}
