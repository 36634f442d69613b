use std::collections::HashMap;

use crate::error::Error;

/// The activation state of a single warning flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningState {
    /// Neither explicitly enabled nor disabled by the user; falls back to
    /// whatever the flag's own default is.
    Default,
    /// Explicitly silenced, e.g. via `-Wno-<flag>`.
    Disabled,
    /// Explicitly requested, e.g. via `-W<flag>`.
    Enabled,
    /// Explicitly promoted to an error, e.g. via `-Werror=<flag>`.
    Error,
}

/// Identifies a parametric warning, i.e. one that only fires when a call
/// site's declared level is at or below the flag's configured level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParametricFlag {
    /// Treating a string as a number may silently lose bits.
    NumericString,
    /// Purging an exported symbol or a label.
    Purge,
    /// Implicit truncation loses some bits.
    Truncation,
    /// A character has no charmap entry.
    UnmappedChar,
}

impl ParametricFlag {
    const ALL: [Self; 4] =
        [Self::NumericString, Self::Purge, Self::Truncation, Self::UnmappedChar];

    fn name(self) -> &'static str {
        match self {
            Self::NumericString => "numeric-string",
            Self::Purge => "purge",
            Self::Truncation => "truncation",
            Self::UnmappedChar => "unmapped-char",
        }
    }
}

/// The plain (non-parametric, non-meta) warning catalog.
///
/// Grounded in `original_source/include/asm/warning.hpp`'s `WarningID`
/// table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningFlag {
    /// A user-declared `ASSERT` failed at a `WARN` level.
    Assert,
    /// A `FOR` loop was declared with a backwards range.
    BackwardsFor,
    /// Invalid arguments were given to a builtin function.
    BuiltinArg,
    /// A charmap entry was redefined, silently overriding the previous one.
    CharmapRedef,
    /// Division truncated towards zero in a way that may surprise.
    Div,
    /// A `db`/`dw`/`dl` directive produced no data in a data-bearing region.
    EmptyDataDirective,
    /// A macro was invoked with an empty argument.
    EmptyMacroArg,
    /// `STRRPL`'s second argument was empty.
    EmptyStrrpl,
    /// A numeric constant didn't fit its expected width.
    LargeConstant,
    /// A macro argument shift (`SHIFT`) went past the available arguments.
    MacroShift,
    /// A `/*` appeared inside a block comment.
    NestedComment,
    /// An obsolete syntax or directive was used.
    Obsolete,
    /// A shift amount or operand triggered implementation-defined behavior.
    Shift,
    /// A shift amount looked unintentional (e.g. negative or huge).
    ShiftAmount,
    /// A user-declared `WARN` fired.
    User,
    /// Parametric: see [`ParametricFlag::NumericString`].
    NumericString,
    /// Parametric: see [`ParametricFlag::Purge`].
    Purge,
    /// Parametric: see [`ParametricFlag::Truncation`].
    Truncation,
    /// Parametric: see [`ParametricFlag::UnmappedChar`].
    UnmappedChar,
}

impl WarningFlag {
    const ALL_PLAIN: [Self; 15] = [
        Self::Assert,
        Self::BackwardsFor,
        Self::BuiltinArg,
        Self::CharmapRedef,
        Self::Div,
        Self::EmptyDataDirective,
        Self::EmptyMacroArg,
        Self::EmptyStrrpl,
        Self::LargeConstant,
        Self::MacroShift,
        Self::NestedComment,
        Self::Obsolete,
        Self::Shift,
        Self::ShiftAmount,
        Self::User,
    ];

    fn from_parametric(flag: ParametricFlag) -> Self {
        match flag {
            ParametricFlag::NumericString => Self::NumericString,
            ParametricFlag::Purge => Self::Purge,
            ParametricFlag::Truncation => Self::Truncation,
            ParametricFlag::UnmappedChar => Self::UnmappedChar,
        }
    }

    /// The flag's level if it is parametric.
    fn as_parametric(self) -> Option<ParametricFlag> {
        match self {
            Self::NumericString => Some(ParametricFlag::NumericString),
            Self::Purge => Some(ParametricFlag::Purge),
            Self::Truncation => Some(ParametricFlag::Truncation),
            Self::UnmappedChar => Some(ParametricFlag::UnmappedChar),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Assert => "assert",
            Self::BackwardsFor => "backwards-for",
            Self::BuiltinArg => "builtin-arg",
            Self::CharmapRedef => "charmap-redef",
            Self::Div => "div",
            Self::EmptyDataDirective => "empty-data-directive",
            Self::EmptyMacroArg => "empty-macro-arg",
            Self::EmptyStrrpl => "empty-strrpl",
            Self::LargeConstant => "large-constant",
            Self::MacroShift => "macro-shift",
            Self::NestedComment => "nested-comment",
            Self::Obsolete => "obsolete",
            Self::Shift => "shift",
            Self::ShiftAmount => "shift-amount",
            Self::User => "user",
            other => other.as_parametric().expect("exhaustive").name(),
        }
    }
}

/// A meta-flag that fans out to a fixed set of underlying flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetaFlag {
    All,
    Extra,
    Everything,
}

impl MetaFlag {
    /// Flags enabled by `-Wall`.
    fn fan_out(self) -> Vec<WarningFlag> {
        use WarningFlag::*;

        match self {
            Self::All => vec![
                BackwardsFor,
                BuiltinArg,
                CharmapRedef,
                EmptyDataDirective,
                LargeConstant,
                MacroShift,
                NestedComment,
                Obsolete,
                Shift,
                ShiftAmount,
            ],
            Self::Extra => {
                let mut flags = Self::All.fan_out();
                flags.extend([EmptyMacroArg, EmptyStrrpl, Div]);
                flags
            }
            Self::Everything => WarningFlag::ALL_PLAIN.to_vec(),
        }
    }
}

/// The full set of warning-flag states, i.e. the persistent configuration a
/// `-W`/`-w`/`-Werror` command line builds up before assembly or linking
/// starts.
#[derive(Debug, Default)]
pub struct WarningConfig {
    states: HashMap<WarningFlag, WarningState>,
    levels: HashMap<ParametricFlag, u8>,
}

impl WarningConfig {
    /// Create an empty configuration: every flag at its own default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the effective state of a flag, honoring a prior `-Wno-X` or
    /// `-Werror=X` override.
    pub fn state(&self, flag: WarningFlag) -> WarningState {
        self.states.get(&flag).copied().unwrap_or(WarningState::Default)
    }

    /// Whether a parametric flag's call-site level should fire, given the
    /// configured active level (default 1, per the original's behavior of
    /// enabling the first level when the bare flag name is passed).
    pub fn parametric_should_fire(&self, flag: ParametricFlag, site_level: u8) -> bool {
        let active = self.levels.get(&flag).copied().unwrap_or(0);

        site_level <= active
    }

    /// Process one `-W`-style flag string, e.g. `"shift"`, `"no-div"`,
    /// `"error=purge"`, `"purge=2"`, `"all"`.
    ///
    /// Grounded in `original_source/include/asm/warning.hpp`'s
    /// `processWarningFlag`.
    pub fn process_flag(&mut self, raw: &str) -> Result<(), Error> {
        let (as_error, rest) = match raw.strip_prefix("error=") {
            Some(rest) => (true, rest),
            None => (false, raw),
        };

        if rest == "error" {
            self.promote_all_to_error();
            return Ok(());
        }

        let (disabled, rest) = match rest.strip_prefix("no-") {
            Some(rest) => (true, rest),
            None => (false, rest),
        };

        let (name, level) = match rest.split_once('=') {
            Some((name, level)) => (
                name,
                Some(level.parse::<u8>().map_err(|_| Error::InvalidWarningLevel(raw.to_owned()))?),
            ),
            None => (rest, None),
        };

        if let Some(meta) = Self::meta_flag(name) {
            let state = if disabled {
                WarningState::Disabled
            } else if as_error {
                WarningState::Error
            } else {
                WarningState::Enabled
            };

            for flag in meta.fan_out() {
                self.states.insert(flag, state);
            }

            return Ok(());
        }

        let flag = Self::plain_or_parametric_flag(name)
            .ok_or_else(|| Error::UnknownWarningFlag(name.to_owned()))?;

        let state = if disabled {
            WarningState::Disabled
        } else if as_error {
            WarningState::Error
        } else {
            WarningState::Enabled
        };

        self.states.insert(flag, state);

        if let Some(parametric) = flag.as_parametric() {
            self.levels.insert(parametric, level.unwrap_or(1));
        }

        Ok(())
    }

    /// Equivalent to `-w`: every warning is silenced, regardless of any
    /// prior `-W`.
    pub fn disable_all(&mut self) {
        for flag in WarningFlag::ALL_PLAIN {
            self.states.insert(flag, WarningState::Disabled);
        }
        for flag in ParametricFlag::ALL.map(WarningFlag::from_parametric) {
            self.states.insert(flag, WarningState::Disabled);
        }
    }

    /// Equivalent to `-Werror` with no argument: every warning becomes an
    /// error.
    pub fn promote_all_to_error(&mut self) {
        for flag in WarningFlag::ALL_PLAIN {
            self.states.entry(flag).or_insert(WarningState::Error);
        }

        for flag in ParametricFlag::ALL.map(WarningFlag::from_parametric) {
            self.states.entry(flag).or_insert(WarningState::Error);
        }
    }

    fn meta_flag(name: &str) -> Option<MetaFlag> {
        match name {
            "all" => Some(MetaFlag::All),
            "extra" => Some(MetaFlag::Extra),
            "everything" => Some(MetaFlag::Everything),
            _ => None,
        }
    }

    fn plain_or_parametric_flag(name: &str) -> Option<WarningFlag> {
        WarningFlag::ALL_PLAIN
            .into_iter()
            .chain(ParametricFlag::ALL.map(WarningFlag::from_parametric))
            .find(|flag| flag.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_flag_round_trips() {
        let mut config = WarningConfig::new();

        assert_eq!(config.state(WarningFlag::Div), WarningState::Default);

        config.process_flag("div").unwrap();
        assert_eq!(config.state(WarningFlag::Div), WarningState::Enabled);

        config.process_flag("no-div").unwrap();
        assert_eq!(config.state(WarningFlag::Div), WarningState::Disabled);
    }

    #[test]
    fn error_prefix_promotes_a_single_flag() {
        let mut config = WarningConfig::new();

        config.process_flag("error=shift").unwrap();
        assert_eq!(config.state(WarningFlag::Shift), WarningState::Error);
        assert_eq!(config.state(WarningFlag::Div), WarningState::Default);
    }

    #[test]
    fn meta_flag_fans_out() {
        let mut config = WarningConfig::new();

        config.process_flag("all").unwrap();
        assert_eq!(config.state(WarningFlag::Shift), WarningState::Enabled);
        assert_eq!(config.state(WarningFlag::BackwardsFor), WarningState::Enabled);
        // `extra`-only flags are not part of `all`.
        assert_eq!(config.state(WarningFlag::Div), WarningState::Default);
    }

    #[test]
    fn parametric_flag_tracks_its_level() {
        let mut config = WarningConfig::new();

        config.process_flag("purge=2").unwrap();
        assert!(config.parametric_should_fire(ParametricFlag::Purge, 1));
        assert!(config.parametric_should_fire(ParametricFlag::Purge, 2));
        assert!(!config.parametric_should_fire(ParametricFlag::Purge, 3));
    }

    #[test]
    fn bare_parametric_flag_enables_level_one() {
        let mut config = WarningConfig::new();

        config.process_flag("purge").unwrap();
        assert!(config.parametric_should_fire(ParametricFlag::Purge, 1));
        assert!(!config.parametric_should_fire(ParametricFlag::Purge, 2));
    }

    #[test]
    fn disable_all_silences_a_previously_enabled_flag() {
        let mut config = WarningConfig::new();

        config.process_flag("all").unwrap();
        config.disable_all();
        assert_eq!(config.state(WarningFlag::Shift), WarningState::Disabled);
    }

    #[test]
    fn unknown_flag_is_rejected() {
        let mut config = WarningConfig::new();

        assert!(config.process_flag("not-a-real-flag").is_err());
    }
}
