//! The current-section stack and byte/expression emission operations
//! (spec §4.8): `SECTION`, `PUSHS`/`POPS`, `UNION`/`NEXTU`/`ENDU`,
//! `LOAD`/`ENDL`, and the actual `db`/`dw`/`dl`/`ds` writers that turn
//! parsed expressions into bytes or deferred [`Patch`]es.

use rgbds_object::filestack::FileStackNodeId;
use rgbds_object::patch::{Patch, PatchType};
use rgbds_object::rpn::Rpn;
use rgbds_object::section::{Section, SectionModifier, SectionType};

/// Errors raised by section-emission operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SectionError {
    /// An emission directive (`db`, `ds`, a label, …) appeared with no
    /// `SECTION` open.
    #[error("emission outside any section")]
    NoActiveSection,
    /// Writing would overflow the section's region size.
    #[error("section `{0}` would exceed its {1}-byte region")]
    Overflow(String, u32),
    /// A `SECTION` redeclared an existing non-`UNION`/`FRAGMENT` name with
    /// an incompatible modifier.
    #[error("section `{0}` already declared with an incompatible modifier")]
    IncompatibleModifier(String),
    /// `NEXTU`/`ENDU` outside an open `UNION` block.
    #[error("`{0}` outside any UNION block")]
    NoActiveUnion(&'static str),
    /// `ENDL` outside an open `LOAD` block.
    #[error("ENDL outside any LOAD block")]
    NoActiveLoad,
    /// `SECTION`/`LOAD` nested directly inside a `UNION` block (spec §3:
    /// "no section switch while a UNION is still open").
    #[error("cannot switch sections inside an open UNION block")]
    SectionSwitchInsideUnion,
    /// `LOAD` and `UNION` blocks nested in either direction (spec §9 Open
    /// Question: the reference leaves this untested; a defensive
    /// implementation forbids it outright).
    #[error("LOAD and UNION blocks must not nest")]
    LoadUnionNesting,
    /// A byte-emitting directive was used in a region with no data (spec
    /// §3: VRAM/SRAM/WRAM*/OAM/HRAM reserve space but carry no bytes).
    #[error("cannot emit data into a `{0}` section (it has no data)")]
    RegionHasNoData(&'static str),
}

/// One `UNION` block's state: every arm starts back at `union_start` and
/// the union's final size is the widest arm (spec §3).
#[derive(Debug, Clone, Copy)]
struct UnionState {
    /// Size of the section when `UNION` was opened.
    start_size: u32,
    /// The widest arm's end size seen by any `NEXTU`/`ENDU` so far.
    widest: u32,
}

/// A `LOAD` block's state: a named *virtual* section is current (so labels
/// defined inside the block bind to it, per spec §3), but the actual bytes
/// flow into `outer_section` — the real, data-bearing section that was
/// active when `LOAD` was opened (spec §4.8: "bytes go to the underlying
/// section").
#[derive(Debug, Clone, Copy)]
struct LoadState {
    /// Index into [`SectionEmitter::sections`] of the section bytes are
    /// actually written into.
    outer_section: usize,
    /// Index of the virtual section (always equal to `current` while a
    /// `LOAD` block is open), tracked separately so patches can record it
    /// as their `pc_section` even while writing into `outer_section`.
    virtual_section: usize,
    /// The apparent (virtual) starting address reported to `@`.
    virtual_org: u32,
}

/// Tracks every section produced during one assembly run, plus the
/// current-section/`PUSHS`/`UNION`/`LOAD` state machine that decides where
/// the next byte goes.
#[derive(Debug, Default)]
pub struct SectionEmitter {
    sections: Vec<Section>,
    current: Option<usize>,
    push_stack: Vec<Option<usize>>,
    union: Option<UnionState>,
    load: Option<LoadState>,
}

impl SectionEmitter {
    /// An emitter with no sections yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every section produced so far, in declaration order (spec §9:
    /// determinism).
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Take ownership of every section produced, for handing to
    /// [`rgbds_object::object_file::ObjectFile`].
    pub fn into_sections(self) -> Vec<Section> {
        self.sections
    }

    fn current_index(&self) -> Result<usize, SectionError> {
        self.current.ok_or(SectionError::NoActiveSection)
    }

    /// `SECTION name, TYPE[, options]`: switch to a section, creating it
    /// if this is the first declaration (or the first fragment/union arm)
    /// seen with this name.
    pub fn declare(
        &mut self,
        name: &str,
        ty: SectionType,
        modifier: SectionModifier,
        org: Option<u32>,
        bank: Option<u32>,
        node: Option<FileStackNodeId>,
        line: u32,
    ) -> Result<(), SectionError> {
        if self.union.is_some() {
            return Err(SectionError::SectionSwitchInsideUnion);
        }

        if let Some(index) = self.sections.iter().position(|section| section.name == name) {
            let existing = &self.sections[index];
            if existing.modifier != modifier || existing.ty != ty {
                return Err(SectionError::IncompatibleModifier(name.to_owned()));
            }
            self.current = Some(index);
            return Ok(());
        }

        let mut section = Section::new(name, ty, modifier);
        section.org = org;
        section.bank = bank;
        section.node = node;
        section.line = line;

        self.sections.push(section);
        self.current = Some(self.sections.len() - 1);
        Ok(())
    }

    /// `PUSHS`: remember the current section so a later `POPS` can
    /// restore it.
    pub fn push_section(&mut self) {
        self.push_stack.push(self.current);
    }

    /// `POPS`.
    pub fn pop_section(&mut self) -> Result<(), SectionError> {
        self.current = self.push_stack.pop().ok_or(SectionError::NoActiveSection)?;
        Ok(())
    }

    /// `UNION`: open a union block. All subsequent `NEXTU` arms restart at
    /// the section's current size.
    pub fn begin_union(&mut self) -> Result<(), SectionError> {
        if self.load.is_some() {
            return Err(SectionError::LoadUnionNesting);
        }
        let index = self.current_index()?;
        let size = self.sections[index].size;
        self.union = Some(UnionState { start_size: size, widest: size });
        Ok(())
    }

    /// `NEXTU`: close the current arm (remembering its size if it's the
    /// widest so far) and rewind to the union's starting size for the
    /// next arm.
    pub fn next_union_arm(&mut self) -> Result<(), SectionError> {
        let index = self.current_index()?;
        let union = self.union.as_mut().ok_or(SectionError::NoActiveUnion("NEXTU"))?;
        union.widest = union.widest.max(self.sections[index].size);
        self.sections[index].size = union.start_size;
        Ok(())
    }

    /// `ENDU`: close the union block, leaving the section's size at the
    /// widest arm.
    pub fn end_union(&mut self) -> Result<(), SectionError> {
        let index = self.current_index()?;
        let union = self.union.take().ok_or(SectionError::NoActiveUnion("ENDU"))?;
        let final_size = union.widest.max(self.sections[index].size);
        self.sections[index].size = final_size;
        Ok(())
    }

    /// `LOAD section, TYPE`: begin writing into a different section while
    /// reporting `@` as though still inside the section active when
    /// `LOAD` was issued.
    pub fn start_load(
        &mut self,
        name: &str,
        ty: SectionType,
        modifier: SectionModifier,
        org: Option<u32>,
        node: Option<FileStackNodeId>,
        line: u32,
    ) -> Result<(), SectionError> {
        if self.union.is_some() || self.load.is_some() {
            return Err(SectionError::LoadUnionNesting);
        }
        let outer_section = self.current_index()?;
        let virtual_org = org
            .unwrap_or_else(|| self.sections[outer_section].org.unwrap_or(0) + self.sections[outer_section].size);

        self.declare(name, ty, modifier, Some(virtual_org), None, node, line)?;
        let virtual_section = self.current_index()?;
        self.load = Some(LoadState { outer_section, virtual_section, virtual_org });
        Ok(())
    }

    /// `ENDL`: close the `LOAD` block, switching back to the outer
    /// section.
    pub fn end_load(&mut self) -> Result<(), SectionError> {
        let load = self.load.take().ok_or(SectionError::NoActiveLoad)?;
        self.current = Some(load.outer_section);
        Ok(())
    }

    /// The address `@` should report right now: the virtual `LOAD`
    /// address if inside a `LOAD` block, otherwise the current section's
    /// base plus its write cursor.
    pub fn program_counter(&self) -> Result<u32, SectionError> {
        let index = self.current_index()?;
        if let Some(load) = &self.load {
            Ok(load.virtual_org + self.sections[load.virtual_section].size)
        } else {
            Ok(self.sections[index].org.unwrap_or(0) + self.sections[index].size)
        }
    }

    /// The currently active section's index, for tagging new `LABEL`
    /// symbols.
    pub fn current_section_index(&self) -> Result<u32, SectionError> {
        Ok(self.current_index()? as u32)
    }

    /// The currently active section's size (the `LABEL` offset within
    /// it), independent of any `LOAD` virtual addressing.
    pub fn current_offset(&self) -> Result<u32, SectionError> {
        Ok(self.sections[self.current_index()?].size)
    }

    /// The section bytes actually land in: the `LOAD` block's outer
    /// section if one is open, otherwise whatever's current (spec §4.8:
    /// "bytes go to the underlying section").
    fn data_target_index(&self) -> Result<usize, SectionError> {
        match &self.load {
            Some(load) => Ok(load.outer_section),
            None => self.current_index(),
        }
    }

    fn require_data_region_at(&self, index: usize) -> Result<(), SectionError> {
        let section = &self.sections[index];
        if !section.ty.region().has_data {
            return Err(SectionError::RegionHasNoData(section.ty.region().name));
        }
        Ok(())
    }

    fn check_capacity_at(&self, index: usize, extra: u32) -> Result<(), SectionError> {
        let section = &self.sections[index];
        let region = section.ty.region();
        if section.size + extra > region.size {
            return Err(SectionError::Overflow(section.name.clone(), region.size));
        }
        Ok(())
    }

    /// Advance the virtual section's size in lockstep with a real write,
    /// while inside a `LOAD` block, so `@` and subsequent label offsets
    /// keep tracking the virtual address space.
    fn advance_virtual(&mut self, amount: u32) {
        if let Some(load) = &self.load {
            self.sections[load.virtual_section].size += amount;
        }
    }

    /// `db`/string literal emission: append already-known bytes directly.
    pub fn emit_bytes(&mut self, bytes: &[u8]) -> Result<(), SectionError> {
        let index = self.data_target_index()?;
        self.require_data_region_at(index)?;
        self.check_capacity_at(index, bytes.len() as u32)?;
        self.sections[index].data.as_mut().expect("checked above").extend_from_slice(bytes);
        self.sections[index].size += bytes.len() as u32;
        self.advance_virtual(bytes.len() as u32);
        Ok(())
    }

    /// `db`/`dw`/`dl` with a possibly-unresolved expression: emit either
    /// the known bytes immediately (little-endian, truncated to `width`
    /// bytes) or a zero-filled placeholder plus a deferred [`Patch`].
    ///
    /// Inside a `LOAD` block the patch is recorded on the *real* section
    /// (since that's where the bytes live) but carries the *virtual*
    /// section/offset as its `pc_section`/`pc_offset`, so `@`- and
    /// `jr`-relative expressions resolve against the address the source
    /// saw, not the physical one (spec §3/§4.12).
    pub fn emit_expr(
        &mut self,
        expr: Rpn,
        width: u8,
        ty: PatchType,
        node: Option<FileStackNodeId>,
        line: u32,
    ) -> Result<(), SectionError> {
        let index = self.data_target_index()?;
        self.require_data_region_at(index)?;
        self.check_capacity_at(index, width as u32)?;

        let offset = self.sections[index].size;
        let (pc_section, pc_offset) = match &self.load {
            Some(load) => (load.virtual_section as u32, self.sections[load.virtual_section].size),
            None => (index as u32, offset),
        };

        match &expr {
            Rpn::Known(value) => {
                let bytes = value.to_le_bytes();
                self.sections[index]
                    .data
                    .as_mut()
                    .expect("checked above")
                    .extend_from_slice(&bytes[..width as usize]);
            }
            Rpn::Deferred { .. } => {
                self.sections[index]
                    .data
                    .as_mut()
                    .expect("checked above")
                    .extend(std::iter::repeat(0u8).take(width as usize));
                self.sections[index].patches.push(Patch {
                    node,
                    line,
                    offset,
                    pc_section,
                    pc_offset,
                    ty,
                    expr,
                });
            }
        }

        self.sections[index].size += width as u32;
        self.advance_virtual(width as u32);
        Ok(())
    }

    /// `ds n[, fill]`: reserve `n` bytes, filling with `fill` (default 0)
    /// in data-bearing regions, or simply advancing the cursor in
    /// RAM-only regions.
    pub fn skip(&mut self, count: u32, fill: u8) -> Result<(), SectionError> {
        let index = self.data_target_index()?;
        self.check_capacity_at(index, count)?;
        if let Some(data) = self.sections[index].data.as_mut() {
            data.extend(std::iter::repeat(fill).take(count as usize));
        }
        self.sections[index].size += count;
        self.advance_virtual(count);
        Ok(())
    }

    /// `INCBIN "file"[, start[, length]]`: splice raw bytes in directly.
    pub fn emit_binary_file(&mut self, bytes: &[u8]) -> Result<(), SectionError> {
        self.emit_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emitter_with_rom0() -> SectionEmitter {
        let mut emitter = SectionEmitter::new();
        emitter
            .declare("main", SectionType::Rom0, SectionModifier::Normal, Some(0x100), None, None, 1)
            .unwrap();
        emitter
    }

    #[test]
    fn emitting_bytes_advances_size_and_pc() {
        let mut emitter = emitter_with_rom0();
        emitter.emit_bytes(&[0x00, 0xC9]).unwrap();
        assert_eq!(emitter.sections()[0].size, 2);
        assert_eq!(emitter.program_counter().unwrap(), 0x102);
    }

    #[test]
    fn ram_region_rejects_byte_emission() {
        let mut emitter = SectionEmitter::new();
        emitter
            .declare("buf", SectionType::Wram0, SectionModifier::Normal, None, None, None, 1)
            .unwrap();
        assert_eq!(
            emitter.emit_bytes(&[1]).unwrap_err(),
            SectionError::RegionHasNoData("WRAM0")
        );
    }

    #[test]
    fn ram_region_allows_ds_skip() {
        let mut emitter = SectionEmitter::new();
        emitter
            .declare("buf", SectionType::Wram0, SectionModifier::Normal, None, None, None, 1)
            .unwrap();
        emitter.skip(4, 0).unwrap();
        assert_eq!(emitter.sections()[0].size, 4);
        assert_eq!(emitter.sections()[0].data, None);
    }

    #[test]
    fn union_arms_restart_at_the_same_offset_and_keep_the_widest() {
        let mut emitter = emitter_with_rom0();
        emitter.begin_union().unwrap();
        emitter.skip(4, 0).unwrap();
        emitter.next_union_arm().unwrap();
        emitter.skip(2, 0).unwrap();
        emitter.end_union().unwrap();
        assert_eq!(emitter.sections()[0].size, 4);
    }

    #[test]
    fn unresolved_expr_emits_a_placeholder_and_a_patch() {
        let mut emitter = emitter_with_rom0();
        let expr = Rpn::unresolved_symbol("Later");
        emitter.emit_expr(expr, 2, PatchType::Word, None, 5).unwrap();
        assert_eq!(emitter.sections()[0].data, Some(vec![0, 0]));
        assert_eq!(emitter.sections()[0].patches.len(), 1);
    }

    #[test]
    fn section_switch_inside_union_is_rejected() {
        let mut emitter = emitter_with_rom0();
        emitter.begin_union().unwrap();
        let err = emitter
            .declare("other", SectionType::Rom0, SectionModifier::Normal, None, None, None, 1)
            .unwrap_err();
        assert_eq!(err, SectionError::SectionSwitchInsideUnion);
    }

    #[test]
    fn load_block_reports_virtual_pc_while_writing_into_another_section() {
        let mut emitter = emitter_with_rom0();
        emitter.emit_bytes(&[0; 4]).unwrap();
        emitter
            .start_load("vram_buf", SectionType::Vram, SectionModifier::Normal, None, None, 6)
            .unwrap();
        assert_eq!(emitter.program_counter().unwrap(), 0x104);
        emitter.end_load().unwrap();
        assert_eq!(emitter.current_section_index().unwrap(), 0);
    }

    #[test]
    fn load_block_writes_bytes_into_the_outer_section_not_the_virtual_one() {
        let mut emitter = emitter_with_rom0();
        emitter
            .start_load("vram_buf", SectionType::Vram, SectionModifier::Normal, None, None, 6)
            .unwrap();
        emitter.emit_bytes(&[0xAB, 0xCD]).unwrap();
        assert_eq!(emitter.program_counter().unwrap(), 0x102);
        emitter.end_load().unwrap();
        // The real ROM0 section got the bytes...
        assert_eq!(emitter.sections()[0].data, Some(vec![0xAB, 0xCD]));
        assert_eq!(emitter.sections()[0].size, 2);
        // ...while the virtual VRAM section (no data region) only tracked size.
        assert_eq!(emitter.sections()[1].data, None);
        assert_eq!(emitter.sections()[1].size, 2);
    }

    #[test]
    fn union_inside_load_is_rejected() {
        let mut emitter = emitter_with_rom0();
        emitter
            .start_load("vram_buf", SectionType::Vram, SectionModifier::Normal, None, None, 6)
            .unwrap();
        assert_eq!(emitter.begin_union().unwrap_err(), SectionError::LoadUnionNesting);
    }

    #[test]
    fn nested_load_is_rejected() {
        let mut emitter = emitter_with_rom0();
        emitter
            .start_load("vram_buf", SectionType::Vram, SectionModifier::Normal, None, None, 6)
            .unwrap();
        assert_eq!(
            emitter
                .start_load("vram_buf2", SectionType::Vram, SectionModifier::Normal, None, None, 7)
                .unwrap_err(),
            SectionError::LoadUnionNesting
        );
    }
}
