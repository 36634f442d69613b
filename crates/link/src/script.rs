//! Linker scripts: an optional text file (`-l`) that fixes some sections
//! to explicit addresses before the automatic placement pass runs (spec
//! §4.11). Grounded in `original_source/src/link/script.cpp`.
//!
//! Grammar, one directive per line, `;` starts a line comment:
//!
//! ```text
//! ROM0 | ROMX | VRAM | SRAM | WRAM0 | WRAMX | OAM | HRAM [bank]
//! ORG <addr>
//! FLOATING
//! ALIGN <exponent>[, <offset>]
//! DS <len>
//! "section name" [OPTIONAL]
//! INCLUDE "path"
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use miette::Diagnostic;
use rgbds_object::section::{Alignment, Section, SectionType};
use thiserror::Error;

use crate::assign::{align_up, Placement};

/// How deep `INCLUDE` may nest before it's treated as a mistake rather
/// than a legitimately large script.
pub const MAX_INCLUDE_DEPTH: usize = 4;

/// Errors raised while loading or executing a linker script.
#[derive(Debug, Error, Diagnostic)]
pub enum ScriptError {
    /// Couldn't read the script file, or an `INCLUDE`d one.
    #[error("couldn't read `{path}`: {source}")]
    #[diagnostic(code(rgbds_link::script_io))]
    Io {
        /// The path that failed to open.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// `INCLUDE` nested more than [`MAX_INCLUDE_DEPTH`] deep.
    #[error("`INCLUDE` nests more than {MAX_INCLUDE_DEPTH} deep at `{0}`")]
    #[diagnostic(code(rgbds_link::include_too_deep))]
    IncludeTooDeep(String),
    /// A line wasn't a recognized directive.
    #[error("line {line}: unrecognized linker script directive: `{text}`")]
    #[diagnostic(code(rgbds_link::bad_directive))]
    BadDirective {
        /// The line number (1-indexed).
        line: usize,
        /// The offending line, comment stripped.
        text: String,
    },
    /// `ORG`/`DS`/`ALIGN`/a named section appeared before any region
    /// line selected a region.
    #[error("line {0}: no region selected yet")]
    #[diagnostic(code(rgbds_link::no_region_selected))]
    NoRegionSelected(usize),
    /// `ORG` moved the cursor backwards.
    #[error("line {0}: `ORG` can't move the cursor backwards")]
    #[diagnostic(code(rgbds_link::org_decreased))]
    OrgDecreased(usize),
    /// The cursor walked past the end of the current region.
    #[error("line {0}: placement runs past the end of the region")]
    #[diagnostic(code(rgbds_link::out_of_region))]
    OutOfRegion(usize),
    /// A named section doesn't exist among the inputs (and wasn't
    /// `OPTIONAL`).
    #[error("line {line}: no section named `{name}`")]
    #[diagnostic(code(rgbds_link::unknown_section))]
    UnknownSection {
        /// The line number (1-indexed).
        line: usize,
        /// The section name that wasn't found.
        name: String,
    },
    /// A named section's placement overlapped one already fixed.
    #[error("line {0}: overlaps a previously placed section")]
    #[diagnostic(code(rgbds_link::overlap))]
    Overlap(usize),
}

/// One line of a parsed linker script.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Directive {
    Region { ty: SectionType, bank: Option<u32> },
    Org(u32),
    Floating,
    Align { exponent: u8, offset: u16 },
    Ds(u32),
    Section { name: String, optional: bool },
}

/// A loaded, `INCLUDE`-flattened linker script, ready to [`execute`][Script::execute].
#[derive(Debug, Default)]
pub struct Script {
    directives: Vec<(usize, Directive)>,
}

impl Script {
    /// Load `path`, recursively inlining any `INCLUDE`s.
    pub fn load(path: &Path) -> Result<Self, ScriptError> {
        let mut directives = Vec::new();
        load_into(path, 0, &mut directives)?;
        Ok(Self { directives })
    }

    /// Run every directive in order, fixing named/region-relative
    /// sections into `placement` and reserving `DS` gaps. Returns the
    /// set of section names the script placed, so the caller's automatic
    /// pass skips them.
    pub fn execute(
        &self,
        sections: &mut [Section],
        placement: &mut Placement,
    ) -> Result<HashSet<String>, ScriptError> {
        let mut placed = HashSet::new();
        let mut region: Option<SectionType> = None;
        let mut bank: u32 = 0;
        let mut cursor: u32 = 0;
        let mut floating = true;
        let mut align: Option<Alignment> = None;

        for &(line, ref directive) in &self.directives {
            match directive {
                Directive::Region { ty, bank: requested_bank } => {
                    region = Some(*ty);
                    bank = requested_bank.unwrap_or(ty.region().first_bank);
                    cursor = ty.region().start;
                    floating = false;
                    align = None;
                }
                Directive::Org(address) => {
                    let ty = region.ok_or(ScriptError::NoRegionSelected(line))?;
                    if *address < cursor && !floating {
                        return Err(ScriptError::OrgDecreased(line));
                    }
                    if *address < ty.region().start || *address >= ty.region().start + ty.region().size {
                        return Err(ScriptError::OutOfRegion(line));
                    }
                    cursor = *address;
                    floating = false;
                }
                Directive::Floating => {
                    region.ok_or(ScriptError::NoRegionSelected(line))?;
                    floating = true;
                }
                Directive::Align { exponent, offset } => {
                    region.ok_or(ScriptError::NoRegionSelected(line))?;
                    align = Some(Alignment::from_exponent(*exponent, *offset));
                    if !floating {
                        cursor = align_up(cursor, align.unwrap());
                    }
                }
                Directive::Ds(len) => {
                    let ty = region.ok_or(ScriptError::NoRegionSelected(line))?;
                    let start = if floating {
                        placement
                            .allocate(ty, bank, *len, align)
                            .ok_or(ScriptError::OutOfRegion(line))?
                    } else {
                        if !placement.reserve(ty, bank, cursor, *len) {
                            return Err(ScriptError::Overlap(line));
                        }
                        cursor
                    };
                    if !floating {
                        cursor = start + len;
                    }
                    align = None;
                }
                Directive::Section { name, optional } => {
                    let ty = region.ok_or(ScriptError::NoRegionSelected(line))?;

                    let Some(section) = sections.iter_mut().find(|s| &s.name == name) else {
                        if *optional {
                            continue;
                        }
                        return Err(ScriptError::UnknownSection { line, name: name.clone() });
                    };

                    let len = section.size;
                    let start = if floating {
                        placement
                            .allocate(ty, bank, len, align.or(section.align))
                            .ok_or(ScriptError::OutOfRegion(line))?
                    } else {
                        let candidate =
                            align.or(section.align).map(|a| align_up(cursor, a)).unwrap_or(cursor);
                        if !placement.reserve(ty, bank, candidate, len) {
                            return Err(ScriptError::Overlap(line));
                        }
                        candidate
                    };

                    section.ty = ty;
                    section.org = Some(start);
                    section.bank = Some(bank);
                    placed.insert(name.clone());

                    if !floating {
                        cursor = start + len;
                    }
                    align = None;
                }
            }
        }

        Ok(placed)
    }
}

fn load_into(
    path: &Path,
    depth: usize,
    directives: &mut Vec<(usize, Directive)>,
) -> Result<(), ScriptError> {
    if depth > MAX_INCLUDE_DEPTH {
        return Err(ScriptError::IncludeTooDeep(path.display().to_string()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|source| ScriptError::Io { path: path.display().to_string(), source })?;

    for (index, raw_line) in content.lines().enumerate() {
        let line = index + 1;
        let text = strip_comment(raw_line).trim();
        if text.is_empty() {
            continue;
        }

        if let Some(rest) = text.strip_prefix("INCLUDE") {
            let included = parse_quoted(rest.trim())
                .ok_or_else(|| ScriptError::BadDirective { line, text: text.to_owned() })?;
            let include_path = resolve_relative(path, &included);
            load_into(&include_path, depth + 1, directives)?;
            continue;
        }

        let directive = parse_directive(text)
            .ok_or_else(|| ScriptError::BadDirective { line, text: text.to_owned() })?;
        directives.push((line, directive));
    }

    Ok(())
}

fn resolve_relative(script_path: &Path, included: &str) -> PathBuf {
    match script_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(included),
        _ => PathBuf::from(included),
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find(';') {
        Some(index) => &line[..index],
        None => line,
    }
}

fn parse_directive(text: &str) -> Option<Directive> {
    if let Some(name) = parse_quoted(text) {
        return Some(Directive::Section { name, optional: false });
    }
    if let Some(rest) = text.strip_prefix('"') {
        let end = rest.find('"')?;
        let name = rest[..end].to_owned();
        let trailer = rest[end + 1..].trim();
        return match trailer {
            "" => Some(Directive::Section { name, optional: false }),
            "OPTIONAL" => Some(Directive::Section { name, optional: true }),
            _ => None,
        };
    }

    let mut words = text.split_whitespace();
    let keyword = words.next()?;

    match keyword {
        "ORG" => Some(Directive::Org(parse_number(words.next()?)?)),
        "FLOATING" => Some(Directive::Floating),
        "DS" => Some(Directive::Ds(parse_number(words.next()?)?)),
        "ALIGN" => {
            let rest = text["ALIGN".len()..].trim();
            let mut parts = rest.split(',').map(str::trim);
            let exponent = parse_number(parts.next()?)? as u8;
            let offset = match parts.next() {
                Some(value) => parse_number(value)? as u16,
                None => 0,
            };
            Some(Directive::Align { exponent, offset })
        }
        _ => {
            let ty = section_type_named(keyword)?;
            let bank = words.next().map(parse_number).transpose()?;
            Some(Directive::Region { ty, bank })
        }
    }
}

fn section_type_named(name: &str) -> Option<SectionType> {
    Some(match name {
        "ROM0" => SectionType::Rom0,
        "ROMX" => SectionType::Romx,
        "VRAM" => SectionType::Vram,
        "SRAM" => SectionType::Sram,
        "WRAM0" => SectionType::Wram0,
        "WRAMX" => SectionType::Wramx,
        "OAM" => SectionType::Oam,
        "HRAM" => SectionType::Hram,
        _ => return None,
    })
}

fn parse_quoted(text: &str) -> Option<String> {
    let text = text.trim();
    let inner = text.strip_prefix('"')?.strip_suffix('"')?;
    Some(inner.to_owned())
}

fn parse_number(text: &str) -> Option<u32> {
    if let Some(hex) = text.strip_prefix('$') {
        u32::from_str_radix(hex, 16).ok()
    } else if let Some(bin) = text.strip_prefix('%') {
        u32::from_str_radix(bin, 2).ok()
    } else {
        text.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rgbds_object::section::SectionModifier;

    #[test]
    fn parses_region_org_and_named_section() {
        let directive = parse_directive("ROMX 2").unwrap();
        assert_eq!(directive, Directive::Region { ty: SectionType::Romx, bank: Some(2) });

        let directive = parse_directive("ORG $150").unwrap();
        assert_eq!(directive, Directive::Org(0x150));

        let directive = parse_directive("\"Entry Point\"").unwrap();
        assert_eq!(directive, Directive::Section { name: "Entry Point".to_owned(), optional: false });

        let directive = parse_directive("\"Maybe\" OPTIONAL").unwrap();
        assert_eq!(directive, Directive::Section { name: "Maybe".to_owned(), optional: true });
    }

    #[test]
    fn parses_align_with_and_without_offset() {
        assert_eq!(parse_directive("ALIGN 8"), Some(Directive::Align { exponent: 8, offset: 0 }));
        assert_eq!(parse_directive("ALIGN 4, 3"), Some(Directive::Align { exponent: 4, offset: 3 }));
    }

    #[test]
    fn executing_places_a_named_section_at_the_cursor() {
        let mut section = Section::new("Entry Point", SectionType::Rom0, SectionModifier::Normal);
        section.size = 4;
        section.data = Some(vec![0; 4]);

        let script = Script {
            directives: vec![
                (1, Directive::Region { ty: SectionType::Rom0, bank: None }),
                (2, Directive::Org(0x100)),
                (3, Directive::Section { name: "Entry Point".to_owned(), optional: false }),
            ],
        };

        let mut placement = Placement::new();
        let mut sections = vec![section];
        let placed = script.execute(&mut sections, &mut placement).unwrap();

        assert!(placed.contains("Entry Point"));
        assert_eq!(sections[0].org, Some(0x100));
        assert_eq!(sections[0].bank, Some(0));
    }

    #[test]
    fn missing_non_optional_section_is_an_error() {
        let script = Script {
            directives: vec![
                (1, Directive::Region { ty: SectionType::Rom0, bank: None }),
                (2, Directive::Section { name: "Nope".to_owned(), optional: false }),
            ],
        };

        let mut placement = Placement::new();
        let mut sections = Vec::new();
        assert!(matches!(
            script.execute(&mut sections, &mut placement),
            Err(ScriptError::UnknownSection { .. })
        ));
    }

    #[test]
    fn optional_missing_section_is_skipped() {
        let script = Script {
            directives: vec![
                (1, Directive::Region { ty: SectionType::Rom0, bank: None }),
                (2, Directive::Section { name: "Nope".to_owned(), optional: true }),
            ],
        };

        let mut placement = Placement::new();
        let mut sections = Vec::new();
        assert!(script.execute(&mut sections, &mut placement).unwrap().is_empty());
    }

    #[test]
    fn ds_reserves_space_and_advances_the_cursor() {
        let script = Script {
            directives: vec![
                (1, Directive::Region { ty: SectionType::Wram0, bank: None }),
                (2, Directive::Ds(0x10)),
            ],
        };

        let mut placement = Placement::new();
        let mut sections = Vec::new();
        script.execute(&mut sections, &mut placement).unwrap();

        assert!(!placement.reserve(SectionType::Wram0, 0, 0xC000, 0x10));
        assert!(placement.reserve(SectionType::Wram0, 0, 0xC010, 0x10));
    }
}
