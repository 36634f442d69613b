//! ROM, map and symbol file emission (spec §4.13). Grounded in
//! `original_source/src/link/output.c`: [`write_rom`] is `Write_WriteROM`'s
//! per-region concatenation loop, [`write_sym_file`] is `Write_SymFile`,
//! [`write_map_file`] is `Write_MapFile`.

use std::collections::BTreeMap;
use std::io::{self, Write as IoWrite};

use rgbds_object::section::{Section, SectionType, REGIONS};
use rgbds_object::symbol::{Symbol, SymbolFlag, SymbolType};

/// Bytes used to fill gaps between sections that carry no data of their
/// own (`-p`, default `0x00`).
#[derive(Debug, Clone, Copy)]
pub struct PadByte(pub u8);

impl Default for PadByte {
    fn default() -> Self {
        Self(0x00)
    }
}

/// Write the final ROM image: every data-bearing region (`ROM0`, `ROMX`)
/// in bank order, each section's bytes at its assigned offset, gaps filled
/// with `pad` or, if `overlay` is given, with the overlay's own bytes at
/// that same absolute offset (spec §4.13: "If an overlay file is
/// supplied, the gaps are read from it instead").
pub fn write_rom(
    out: &mut impl io::Write,
    sections: &[Section],
    pad: PadByte,
    overlay: Option<&[u8]>,
) -> io::Result<()> {
    let mut by_bank: BTreeMap<(SectionType, u32), Vec<&Section>> = BTreeMap::new();
    let mut max_bank: BTreeMap<SectionType, u32> = BTreeMap::new();

    for section in sections {
        if !section.ty.region().has_data {
            continue;
        }
        let bank = section.bank.expect("section was placed before output");
        by_bank.entry((section.ty, bank)).or_default().push(section);
        max_bank.entry(section.ty).and_modify(|m| *m = (*m).max(bank)).or_insert(bank);
    }

    for ty in [SectionType::Rom0, SectionType::Romx] {
        let region = ty.region();
        let Some(&last_bank) = max_bank.get(&ty) else { continue };

        for bank in region.first_bank..=last_bank {
            let mut image = vec![pad.0; region.size as usize];
            if let Some(overlay) = overlay {
                let bank_index = (bank - region.first_bank) as usize;
                let base = bank_index * region.size as usize;
                if base < overlay.len() {
                    let end = (base + region.size as usize).min(overlay.len());
                    image[..end - base].copy_from_slice(&overlay[base..end]);
                }
            }

            if let Some(pieces) = by_bank.get(&(ty, bank)) {
                for section in pieces {
                    let org = section.org.expect("section was placed before output");
                    let offset = (org - region.start) as usize;
                    let data = section.data.as_ref().expect("data-bearing region has no data");
                    image[offset..offset + data.len()].copy_from_slice(data);
                }
            }

            out.write_all(&image)?;
        }
    }

    Ok(())
}

/// Write a `BB:AAAA name` line per exported label (spec §4.13).
pub fn write_sym_file(out: &mut impl io::Write, sections: &[Section], symbols: &[Symbol]) -> io::Result<()> {
    writeln!(out, "; File generated by rgbds-link")?;

    let mut lines: Vec<(u32, u32, &str)> = Vec::new();
    for symbol in symbols {
        if symbol.ty != SymbolType::Label || !symbol.flags.contains(SymbolFlag::Exported) {
            continue;
        }
        let Some(section_index) = symbol.section else { continue };
        let section = &sections[section_index as usize];
        let bank = section.bank.expect("section was placed before output");
        let org = section.org.expect("section was placed before output");
        let offset = symbol.integer_value().unwrap_or(0);
        lines.push((bank, org.wrapping_add(offset as u32), &symbol.name));
    }

    lines.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(b.2)));

    for (bank, addr, name) in lines {
        writeln!(out, "{bank:02x}:{addr:04x} {name}")?;
    }

    Ok(())
}

/// Write a per-bank listing with section ranges, inter-section slack, and
/// intra-section exported symbols (spec §4.13).
pub fn write_map_file(out: &mut impl io::Write, sections: &[Section], symbols: &[Symbol]) -> io::Result<()> {
    let mut symbols_by_section: BTreeMap<u32, Vec<&Symbol>> = BTreeMap::new();
    for symbol in symbols {
        if symbol.ty != SymbolType::Label {
            continue;
        }
        if let Some(section_index) = symbol.section {
            symbols_by_section.entry(section_index).or_default().push(symbol);
        }
    }

    let mut by_bank: BTreeMap<(SectionType, u32), Vec<(usize, &Section)>> = BTreeMap::new();
    for (index, section) in sections.iter().enumerate() {
        let bank = section.bank.expect("section was placed before output");
        by_bank.entry((section.ty, bank)).or_default().push((index, section));
    }

    for region in REGIONS {
        let banks: Vec<_> =
            by_bank.keys().filter(|(ty, _)| ty.region().name == region.name).map(|(_, bank)| *bank).collect();
        if banks.is_empty() {
            continue;
        }

        let mut banks = banks;
        banks.sort_unstable();
        banks.dedup();

        for bank in banks {
            let ty = region_section_type(region.name);
            writeln!(out, "{} bank #{bank}:", region.name)?;

            let mut pieces = by_bank.get(&(ty, bank)).cloned().unwrap_or_default();
            pieces.sort_by_key(|(_, section)| section.org.unwrap());

            let mut cursor = region.start;
            for (index, section) in &pieces {
                let org = section.org.unwrap();
                if org > cursor {
                    writeln!(out, "  SLACK: ${:04x}-${:04x} (${:x} bytes)", cursor, org - 1, org - cursor)?;
                }

                writeln!(
                    out,
                    "  SECTION: ${:04x}-${:04x} (${:x} bytes) [\"{}\"]",
                    org,
                    org + section.size - 1,
                    section.size,
                    section.name
                )?;

                if let Some(mut syms) = symbols_by_section.get(&(*index as u32)).cloned() {
                    syms.sort_by_key(|symbol| symbol.integer_value().unwrap_or(0));
                    for symbol in syms {
                        let addr = org.wrapping_add(symbol.integer_value().unwrap_or(0) as u32);
                        writeln!(out, "              ${addr:04x} = {}", symbol.name)?;
                    }
                }

                cursor = org + section.size;
            }

            let region_end = region.start + region.size;
            if cursor < region_end {
                writeln!(
                    out,
                    "  SLACK: ${:04x}-${:04x} (${:x} bytes)",
                    cursor,
                    region_end - 1,
                    region_end - cursor
                )?;
            }
        }
    }

    Ok(())
}

fn region_section_type(name: &str) -> SectionType {
    match name {
        "ROM0" => SectionType::Rom0,
        "ROMX" => SectionType::Romx,
        "VRAM" => SectionType::Vram,
        "SRAM" => SectionType::Sram,
        "WRAM0" => SectionType::Wram0,
        "WRAMX" => SectionType::Wramx,
        "OAM" => SectionType::Oam,
        "HRAM" => SectionType::Hram,
        _ => unreachable!("not a region name"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rgbds_object::section::SectionModifier;

    fn placed(name: &str, ty: SectionType, org: u32, bank: u32, data: Vec<u8>) -> Section {
        let mut section = Section::new(name, ty, SectionModifier::Normal);
        section.size = data.len() as u32;
        section.org = Some(org);
        section.bank = Some(bank);
        section.data = Some(data);
        section
    }

    #[test]
    fn rom_image_pads_gaps_with_the_pad_byte() {
        let sections = vec![placed("main", SectionType::Rom0, 0x104, 0, vec![0xAA, 0xBB])];
        let mut out = Vec::new();
        write_rom(&mut out, &sections, PadByte(0xFF), None).unwrap();

        assert_eq!(out.len(), 0x4000);
        assert_eq!(out[0x103], 0xFF);
        assert_eq!(out[0x104], 0xAA);
        assert_eq!(out[0x105], 0xBB);
        assert_eq!(out[0x106], 0xFF);
    }

    #[test]
    fn rom_image_emits_every_bank_up_to_the_highest_used() {
        let sections = vec![placed("a", SectionType::Romx, 0x4000, 1, vec![0x11])];
        let mut out = Vec::new();
        write_rom(&mut out, &sections, PadByte::default(), None).unwrap();

        // bank 0 (ROM0, empty) + bank 1 (ROMX) = 2 * 0x4000.
        assert_eq!(out.len(), 0x8000);
        assert_eq!(out[0x4000], 0x11);
    }

    #[test]
    fn sym_file_lists_exported_labels_sorted_by_address() {
        let sections = vec![placed("main", SectionType::Rom0, 0x100, 0, vec![0, 0])];
        let symbols = vec![Symbol {
            name: "Start".to_owned(),
            ty: SymbolType::Label,
            scope: None,
            node: None,
            line: 1,
            section: Some(0),
            value: rgbds_object::symbol::SymbolValue::Integer(0),
            flags: SymbolFlag::Defined | SymbolFlag::Exported,
        }];

        let mut out = Vec::new();
        write_sym_file(&mut out, &sections, &symbols).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("00:0100 Start"));
    }
}
