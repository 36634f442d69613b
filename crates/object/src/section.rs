//! Sections: named, typed runs of bytes (or just reserved space) destined
//! for one of the eight memory regions, with the union/fragment/normal
//! modifier spec §3 and §4.8 describe.

use crate::filestack::FileStackNodeId;
use crate::patch::Patch;
use crate::read_write::{read_string, read_vec, write_string, write_vec};
use crate::{Input, Read, Result, Write};

/// One of the eight memory regions a section can target. Grounded in
/// `original_source/src/link/assign.c::SECT_ATTRIBUTES` (spec §4.2's
/// "static table of eight entries").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SectionType {
    /// The fixed, always-banked-in ROM bank.
    Rom0 = 0,
    /// A switchable ROM bank.
    Romx = 1,
    /// Video RAM.
    Vram = 2,
    /// Switchable external (cartridge) RAM.
    Sram = 3,
    /// The fixed work-RAM bank.
    Wram0 = 4,
    /// A switchable work-RAM bank (color-only hardware).
    Wramx = 5,
    /// Object Attribute Memory (sprite table).
    Oam = 6,
    /// High RAM (zero-page-equivalent).
    Hram = 7,
}

/// One entry of the section-type catalog (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionInfo {
    /// The region's name, as printed in diagnostics and map files.
    pub name: &'static str,
    /// The address of bank 0 (or the section's only bank) within this
    /// region.
    pub start: u32,
    /// The number of addressable bytes per bank.
    pub size: u32,
    /// The lowest valid bank number.
    pub first_bank: u32,
    /// The highest valid bank number (inclusive), in the default
    /// (non-contracted) memory model.
    pub last_bank: u32,
    /// Whether the linker copies this region's section data into the ROM
    /// image. `false` for RAM-ish regions: they may be written to by
    /// runtime code, but there is nothing to place in the output file.
    pub has_data: bool,
}

/// The section-type catalog, indexed by [`SectionType`] discriminant.
/// "All region queries go through this table" (spec §4.2): nothing else in
/// this codebase hardcodes a region's address or size.
pub const REGIONS: [RegionInfo; 8] = [
    RegionInfo { name: "ROM0", start: 0x0000, size: 0x4000, first_bank: 0, last_bank: 0, has_data: true },
    RegionInfo { name: "ROMX", start: 0x4000, size: 0x4000, first_bank: 1, last_bank: 511, has_data: true },
    RegionInfo { name: "VRAM", start: 0x8000, size: 0x2000, first_bank: 0, last_bank: 1, has_data: false },
    RegionInfo { name: "SRAM", start: 0xA000, size: 0x2000, first_bank: 0, last_bank: 15, has_data: false },
    RegionInfo { name: "WRAM0", start: 0xC000, size: 0x1000, first_bank: 0, last_bank: 0, has_data: false },
    RegionInfo { name: "WRAMX", start: 0xD000, size: 0x1000, first_bank: 1, last_bank: 7, has_data: false },
    RegionInfo { name: "OAM", start: 0xFE00, size: 0x00A0, first_bank: 0, last_bank: 0, has_data: false },
    RegionInfo { name: "HRAM", start: 0xFF80, size: 0x007F, first_bank: 0, last_bank: 0, has_data: false },
];

impl SectionType {
    /// This type's entry in [`REGIONS`].
    pub fn region(self) -> &'static RegionInfo {
        &REGIONS[self as usize]
    }

    fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => Self::Rom0,
            1 => Self::Romx,
            2 => Self::Vram,
            3 => Self::Sram,
            4 => Self::Wram0,
            5 => Self::Wramx,
            6 => Self::Oam,
            7 => Self::Hram,
            _ => return None,
        })
    }
}

/// How a section's same-named pieces relate to each other across
/// (potentially many) object files, per spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionModifier {
    /// An ordinary section: its name must be unique across the whole link.
    Normal,
    /// Same-named `UNION` sections share a starting address; the merged
    /// section's size is the max of all arms, and overlapping bytes must
    /// agree.
    Union,
    /// Same-named `FRAGMENT` sections are concatenated, in declaration
    /// order, at link time.
    Fragment,
}

impl SectionModifier {
    fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => Self::Normal,
            1 => Self::Union,
            2 => Self::Fragment,
            _ => return None,
        })
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Union => 1,
            Self::Fragment => 2,
        }
    }
}

/// A section's alignment constraint: `address & mask == offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alignment {
    /// `(1 << exponent) - 1`, stored pre-computed since that's what
    /// placement checks against.
    pub mask: u32,
    /// The required low bits of a valid address, once masked.
    pub offset: u16,
}

impl Alignment {
    /// Build an alignment from `ALIGN[n, ofs]`'s exponent `n`.
    pub fn from_exponent(exponent: u8, offset: u16) -> Self {
        Self { mask: (1u32 << exponent) - 1, offset }
    }

    /// Whether `address` satisfies this constraint.
    pub fn accepts(&self, address: u32) -> bool {
        (address & self.mask) == self.offset as u32
    }
}

/// A section: a named, typed run of bytes (or reserved space, for
/// non-data-bearing regions) with optional fixed placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// The section's name. Unique across a link unless `modifier` says
    /// otherwise.
    pub name: String,
    /// Which memory region this section targets.
    pub ty: SectionType,
    /// Union/fragment/normal.
    pub modifier: SectionModifier,
    /// The section's size in bytes.
    pub size: u32,
    /// A fixed starting address (`SECTION ... [$addr]`), if any.
    pub org: Option<u32>,
    /// A fixed bank (`SECTION ... BANK[n]`), if any.
    pub bank: Option<u32>,
    /// An `ALIGN` constraint, if any.
    pub align: Option<Alignment>,
    /// The section's bytes, present only for [`SectionType::region`]s with
    /// `has_data`. Regions without data may still exist (reserving space)
    /// but carry no byte contents.
    pub data: Option<Vec<u8>>,
    /// Deferred writes into `data`, resolved once this section has a final
    /// address (spec §4.12).
    pub patches: Vec<Patch>,
    /// The file-stack frame the `SECTION` directive appeared in.
    pub node: Option<FileStackNodeId>,
    /// The line number within `node`.
    pub line: u32,
}

impl Section {
    /// A fresh, empty section. `size` starts at zero and grows as bytes
    /// are emitted into it (spec §4.8).
    pub fn new(name: impl Into<String>, ty: SectionType, modifier: SectionModifier) -> Self {
        let data = ty.region().has_data.then(Vec::new);

        Self {
            name: name.into(),
            ty,
            modifier,
            size: 0,
            org: None,
            bank: None,
            align: None,
            data,
            patches: Vec::new(),
            node: None,
            line: 0,
        }
    }

    /// The number of bytes still free in this section relative to its
    /// region's size (spec §3 invariant: "never exceeds the region's
    /// size").
    pub fn remaining_capacity(&self) -> u32 {
        self.ty.region().size.saturating_sub(self.size)
    }
}

impl Read for Section {
    fn read(input: Input<'_>) -> Result<'_, Self> {
        let (input, name) = read_string(input)?;
        let (input, size) = u32::read(input)?;
        let (input, type_byte) = u8::read(input)?;

        let ty = SectionType::from_u8(type_byte & 0x3F).ok_or_else(|| {
            nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Alt))
        })?;
        let modifier = SectionModifier::from_u8(type_byte >> 6).ok_or_else(|| {
            nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Alt))
        })?;

        let (input, org) = u32::read(input)?;
        let (input, bank) = u32::read(input)?;
        let (input, align_exp) = u8::read(input)?;
        let (input, align_ofs) = u16::read(input)?;
        let (input, node_id) = u32::read(input)?;
        let (input, line) = u32::read(input)?;

        let (input, data) = if ty.region().has_data {
            let (input, bytes) = nom::bytes::complete::take(size)(input)?;
            (input, Some(bytes.to_vec()))
        } else {
            (input, None)
        };

        let (input, patches) = read_vec::<Patch>(input)?;

        Ok((
            input,
            Self {
                name,
                ty,
                modifier,
                size,
                org: (org != u32::MAX).then_some(org),
                bank: (bank != u32::MAX).then_some(bank),
                align: (align_exp != 0 || align_ofs != 0)
                    .then(|| Alignment::from_exponent(align_exp, align_ofs)),
                data,
                patches,
                node: (node_id != u32::MAX).then_some(FileStackNodeId(node_id)),
                line,
            },
        ))
    }
}

impl Write for Section {
    fn write(&self, output: &mut Vec<u8>) {
        write_string(&self.name, output);
        self.size.write(output);
        (self.ty as u8 | (self.modifier.as_u8() << 6)).write(output);
        self.org.unwrap_or(u32::MAX).write(output);
        self.bank.unwrap_or(u32::MAX).write(output);

        let (align_exp, align_ofs) = self
            .align
            .map(|alignment| ((32 - alignment.mask.leading_zeros()) as u8, alignment.offset))
            .unwrap_or((0, 0));
        align_exp.write(output);
        align_ofs.write(output);

        self.node.map(|id| id.0).unwrap_or(u32::MAX).write(output);
        self.line.write(output);

        if let Some(data) = &self.data {
            output.extend_from_slice(data);
        }

        write_vec(&self.patches, output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rom0_has_data_and_banks_0_only() {
        let region = SectionType::Rom0.region();
        assert!(region.has_data);
        assert_eq!(region.first_bank, 0);
        assert_eq!(region.last_bank, 0);
    }

    #[test]
    fn oam_has_no_data() {
        assert!(!SectionType::Oam.region().has_data);
    }

    #[test]
    fn section_round_trips_with_data() {
        let mut section = Section::new("main", SectionType::Rom0, SectionModifier::Normal);
        section.data = Some(vec![0x00, 0xC9]);
        section.size = 2;
        section.org = Some(0x100);

        let mut bytes = Vec::new();
        section.write(&mut bytes);

        let (rest, read_back) = Section::read(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(read_back, section);
    }

    #[test]
    fn section_without_data_round_trips() {
        let section = Section::new("wram_buf", SectionType::Wram0, SectionModifier::Normal);
        let mut bytes = Vec::new();
        section.write(&mut bytes);

        let (rest, read_back) = Section::read(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(read_back.data, None);
    }

    #[test]
    fn alignment_accepts_matching_addresses_only() {
        let alignment = Alignment::from_exponent(8, 0);
        assert!(alignment.accepts(0x4000));
        assert!(!alignment.accepts(0x4001));
    }
}
