//! Section placement: merges same-named `FRAGMENT`/`UNION` sections
//! across every input object, then assigns each remaining section a
//! final address and bank using a free-interval list per `(SectionType,
//! bank)` pair.
//!
//! Grounded in `original_source/src/link/assign.c`: `sFreeArea`/`BankFree`
//! are this module's [`BankFreeList`], `area_Alloc`/`area_AllocAbs` are
//! [`Placement::allocate`]/[`Placement::reserve`], and
//! `FindLargestSection` is the sort key [`place_remaining`]'s four tiers
//! use.

use std::collections::HashMap;

use miette::Diagnostic;
use rgbds_object::section::{Alignment, RegionInfo, Section, SectionModifier};
use thiserror::Error;

pub use rgbds_object::section::SectionType;

/// Errors raised while merging or placing sections.
#[derive(Debug, Error, Diagnostic, PartialEq, Eq)]
pub enum AssignError {
    /// Two `FRAGMENT` sections sharing a name target different regions.
    #[error("fragment `{0}` is declared with incompatible types across object files")]
    #[diagnostic(code(rgbds_link::incompatible_fragment))]
    IncompatibleFragment(String),

    /// Two `UNION` sections sharing a name target different regions, or
    /// the name was already used by an ordinary section.
    #[error("union `{0}` is declared with incompatible types across object files")]
    #[diagnostic(code(rgbds_link::incompatible_union))]
    IncompatibleUnion(String),

    /// Overlapping bytes of two `UNION` arms disagree.
    #[error("union `{0}`'s overlapping bytes disagree between declarations")]
    #[diagnostic(code(rgbds_link::union_data_mismatch))]
    UnionDataMismatch(String),

    /// Two ordinary (non-`FRAGMENT`/`UNION`) sections share a name.
    #[error("section `{0}` is defined more than once")]
    #[diagnostic(code(rgbds_link::duplicate_section))]
    DuplicateSection(String),

    /// A fixed address falls outside its region's window.
    #[error("section `{name}` doesn't fit in {region} at ${address:04x}")]
    #[diagnostic(code(rgbds_link::out_of_region))]
    OutOfRegion {
        /// The section that doesn't fit.
        name: String,
        /// The region it was placed in.
        region: &'static str,
        /// The address that was requested.
        address: u32,
    },

    /// A fixed address conflicts with another already-placed section.
    #[error("section `{name}` overlaps another section at ${address:04x} in bank {bank}")]
    #[diagnostic(code(rgbds_link::overlap))]
    Overlap {
        /// The section that couldn't be placed.
        name: String,
        /// The address it was asked for.
        address: u32,
        /// The bank it was asked for.
        bank: u32,
    },

    /// A fixed address doesn't satisfy the section's `ALIGN` constraint.
    #[error("section `{0}`'s fixed address doesn't satisfy its `ALIGN` constraint")]
    #[diagnostic(code(rgbds_link::misaligned))]
    Misaligned(String),

    /// No bank of the right type had room for a bank-fixed section.
    #[error("section `{0}` doesn't fit in any bank of its fixed type")]
    #[diagnostic(code(rgbds_link::bank_overflow))]
    BankOverflow(String),

    /// No bank of the right type had room at a section's fixed address.
    #[error("no bank of section `{0}`'s type has room at its fixed address")]
    #[diagnostic(code(rgbds_link::no_bank_for_address))]
    NoBankForAddress(String),

    /// No bank of the right type had room anywhere, for a floating
    /// section.
    #[error("section `{0}` doesn't fit anywhere in its memory region")]
    #[diagnostic(code(rgbds_link::no_space))]
    NoSpace(String),
}

/// A contiguous run of unclaimed bytes, half-open (`[start, end)`).
#[derive(Debug, Clone, Copy)]
struct FreeArea {
    start: u32,
    end: u32,
}

/// The free space remaining in one bank, as a sorted list of disjoint
/// intervals.
#[derive(Debug, Clone)]
struct BankFreeList {
    areas: Vec<FreeArea>,
}

impl BankFreeList {
    fn whole(region: &RegionInfo) -> Self {
        Self { areas: vec![FreeArea { start: region.start, end: region.start + region.size }] }
    }

    /// Carve `[start, start+len)` out of the free list, failing if any
    /// byte in that range isn't free.
    fn reserve_at(&mut self, start: u32, len: u32) -> bool {
        let end = start + len;
        let Some(index) =
            self.areas.iter().position(|area| area.start <= start && end <= area.end)
        else {
            return false;
        };

        let area = self.areas.remove(index);
        if area.start < start {
            self.areas.push(FreeArea { start: area.start, end: start });
        }
        if end < area.end {
            self.areas.push(FreeArea { start: end, end: area.end });
        }
        self.areas.sort_by_key(|area| area.start);
        true
    }

    /// The lowest address with `len` free bytes satisfying `align`,
    /// carving it out of the free list if found.
    fn first_fit(&mut self, len: u32, align: Option<Alignment>) -> Option<u32> {
        for area in self.areas.clone() {
            let candidate = match align {
                Some(alignment) => align_up(area.start, alignment),
                None => area.start,
            };
            if candidate >= area.start && candidate + len <= area.end {
                self.reserve_at(candidate, len);
                return Some(candidate);
            }
        }
        None
    }
}

/// The smallest address `>= address` satisfying `alignment`.
pub(crate) fn align_up(address: u32, alignment: Alignment) -> u32 {
    let current = address & alignment.mask;
    let target = alignment.offset as u32;
    if current <= target {
        address - current + target
    } else {
        address - current + alignment.mask + 1 + target
    }
}

/// Which banks floating/bank-fixed-only sections try, and in what order,
/// for each region type. Defaults to `first_bank..=last_bank` in
/// ascending order; overridden by [`crate::configuration::MemoryModel`]'s
/// contracted regions and by `-S`'s bank scramble (spec §6, §4.10).
#[derive(Debug, Clone, Default)]
pub struct BankOrder {
    order: HashMap<SectionType, Vec<u32>>,
}

impl BankOrder {
    /// The default order for every region: ascending, full range.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the bank-try order for `ty`.
    pub fn set(&mut self, ty: SectionType, banks: Vec<u32>) {
        self.order.insert(ty, banks);
    }

    pub(crate) fn banks_for(&self, ty: SectionType) -> Vec<u32> {
        match self.order.get(&ty) {
            Some(banks) => banks.clone(),
            None => {
                let region = ty.region();
                (region.first_bank..=region.last_bank).collect()
            }
        }
    }
}

/// Tracks remaining free space across every `(type, bank)` pair touched
/// so far. Banks are initialized lazily, to their region's full size, the
/// first time they're referenced.
#[derive(Debug, Default)]
pub struct Placement {
    free: HashMap<(SectionType, u32), BankFreeList>,
    bank_order: BankOrder,
}

impl Placement {
    /// A placement tracker with nothing reserved yet, trying every
    /// region's banks in ascending order.
    pub fn new() -> Self {
        Self::default()
    }

    /// A placement tracker that tries banks in the order `bank_order`
    /// gives for each type, instead of the default ascending order.
    pub fn with_bank_order(bank_order: BankOrder) -> Self {
        Self { free: HashMap::new(), bank_order }
    }

    fn list_mut(&mut self, ty: SectionType, bank: u32) -> &mut BankFreeList {
        self.free.entry((ty, bank)).or_insert_with(|| BankFreeList::whole(ty.region()))
    }

    /// Reserve `[address, address+len)` of `(ty, bank)` directly, used by
    /// linker scripts for explicit placement and `DS` gaps. Returns
    /// whether the range was actually free.
    pub fn reserve(&mut self, ty: SectionType, bank: u32, address: u32, len: u32) -> bool {
        self.list_mut(ty, bank).reserve_at(address, len)
    }

    /// Find and reserve the lowest free address in `(ty, bank)` with
    /// `len` free bytes satisfying `align`.
    pub fn allocate(
        &mut self,
        ty: SectionType,
        bank: u32,
        len: u32,
        align: Option<Alignment>,
    ) -> Option<u32> {
        self.list_mut(ty, bank).first_fit(len, align)
    }
}

/// Merge `FRAGMENT` sections sharing a name (concatenating their data and
/// offsetting their patches), then verify and merge `UNION` sections
/// sharing a name (sizing to the largest arm, keeping every arm's
/// patches). Ordinary sections that share a name are a hard error (spec
/// §3: section names are unique across a link unless a modifier says
/// otherwise).
pub fn merge(sections: Vec<Section>) -> Result<Vec<Section>, AssignError> {
    Ok(merge_with_remap(sections)?.0)
}

/// Same as [`merge`], but also returns the map from each input section's
/// original index (what a [`rgbds_object::patch::Patch`]'s `pc_section`
/// or a [`rgbds_object::symbol::Symbol`]'s `section` points at before
/// merging) to its final index in the returned vector. Fragment pieces
/// map to the section they were concatenated into; union arms map to the
/// merged union. The linker driver uses this to rewrite every such index
/// after merging, before placement and patching run.
pub fn merge_with_remap(sections: Vec<Section>) -> Result<(Vec<Section>, Vec<u32>), AssignError> {
    let (after_fragments, fragment_map) = merge_fragments(sections)?;
    let (after_unions, union_map) = merge_unions(after_fragments)?;
    let remap = fragment_map.into_iter().map(|i| union_map[i as usize]).collect();
    Ok((after_unions, remap))
}

fn merge_fragments(sections: Vec<Section>) -> Result<(Vec<Section>, Vec<u32>), AssignError> {
    let mut merged: Vec<Section> = Vec::new();
    let mut index_of: HashMap<String, usize> = HashMap::new();
    let mut remap: Vec<u32> = Vec::with_capacity(sections.len());

    for section in sections {
        if section.modifier != SectionModifier::Fragment {
            remap.push(merged.len() as u32);
            merged.push(section);
            continue;
        }

        if let Some(&index) = index_of.get(&section.name) {
            if merged[index].ty != section.ty {
                return Err(AssignError::IncompatibleFragment(section.name));
            }

            remap.push(index as u32);
            let offset = merged[index].size;
            merged[index].size += section.size;

            if let Some(data) = &mut merged[index].data {
                if let Some(extra) = &section.data {
                    data.extend_from_slice(extra);
                }
            }

            for mut patch in section.patches {
                patch.offset += offset;
                merged[index].patches.push(patch);
            }
        } else {
            index_of.insert(section.name.clone(), merged.len());
            remap.push(merged.len() as u32);
            merged.push(section);
        }
    }

    Ok((merged, remap))
}

fn merge_unions(sections: Vec<Section>) -> Result<(Vec<Section>, Vec<u32>), AssignError> {
    let mut merged: Vec<Section> = Vec::new();
    let mut index_of: HashMap<String, usize> = HashMap::new();
    let mut normal_names: HashMap<String, ()> = HashMap::new();
    let mut remap: Vec<u32> = Vec::with_capacity(sections.len());

    for section in sections {
        match section.modifier {
            SectionModifier::Union => {
                if normal_names.contains_key(&section.name) {
                    return Err(AssignError::IncompatibleUnion(section.name));
                }

                if let Some(&index) = index_of.get(&section.name) {
                    if merged[index].ty != section.ty {
                        return Err(AssignError::IncompatibleUnion(section.name));
                    }

                    if let (Some(existing), Some(incoming)) = (&merged[index].data, &section.data) {
                        let overlap = existing.len().min(incoming.len());
                        if existing[..overlap] != incoming[..overlap] {
                            return Err(AssignError::UnionDataMismatch(section.name));
                        }
                    }

                    if section.size > merged[index].size {
                        merged[index].size = section.size;
                    }
                    let incoming_len = section.data.as_ref().map_or(0, Vec::len);
                    let existing_len = merged[index].data.as_ref().map_or(0, Vec::len);
                    if incoming_len > existing_len {
                        merged[index].data = section.data.clone();
                    }

                    remap.push(index as u32);
                    merged[index].patches.extend(section.patches);
                } else {
                    index_of.insert(section.name.clone(), merged.len());
                    remap.push(merged.len() as u32);
                    merged.push(section);
                }
            }
            SectionModifier::Normal => {
                if normal_names.contains_key(&section.name) || index_of.contains_key(&section.name) {
                    return Err(AssignError::DuplicateSection(section.name));
                }
                normal_names.insert(section.name.clone(), ());
                remap.push(merged.len() as u32);
                merged.push(section);
            }
            SectionModifier::Fragment => {
                unreachable!("fragments are merged away before this pass")
            }
        }
    }

    Ok((merged, remap))
}

/// Which of the four placement tiers a section falls into: fully fixed,
/// bank-fixed, address-fixed, floating, in that priority order (spec
/// §4.10).
fn tier(section: &Section) -> u8 {
    match (section.org, section.bank) {
        (Some(_), Some(_)) => 0,
        (None, Some(_)) => 1,
        (Some(_), None) => 2,
        (None, None) => 3,
    }
}

/// Place every section in `sections` that a linker script hasn't already
/// placed (named in `already_placed`), in four tiers, each tier ordered
/// by decreasing size then name for determinism (spec §4.10,
/// `FindLargestSection`).
pub fn place_remaining(
    sections: &mut [Section],
    placement: &mut Placement,
    already_placed: &std::collections::HashSet<String>,
) -> Result<(), AssignError> {
    let mut order: Vec<usize> =
        (0..sections.len()).filter(|&i| !already_placed.contains(&sections[i].name)).collect();

    order.sort_by(|&a, &b| {
        let (sa, sb) = (&sections[a], &sections[b]);
        tier(sa).cmp(&tier(sb)).then(sb.size.cmp(&sa.size)).then(sa.name.cmp(&sb.name))
    });

    for index in order {
        place_one(&mut sections[index], placement)?;
        log::debug!(
            "placed section {:?} at bank {:?} org {:?}",
            sections[index].name,
            sections[index].bank,
            sections[index].org
        );
    }

    Ok(())
}

fn place_one(section: &mut Section, placement: &mut Placement) -> Result<(), AssignError> {
    log::trace!("placing section {:?} (size {})", section.name, section.size);
    let region = section.ty.region();

    match (section.org, section.bank) {
        (Some(org), Some(bank)) => {
            if org < region.start || org + section.size > region.start + region.size {
                return Err(AssignError::OutOfRegion {
                    name: section.name.clone(),
                    region: region.name,
                    address: org,
                });
            }
            if let Some(alignment) = section.align {
                if !alignment.accepts(org) {
                    return Err(AssignError::Misaligned(section.name.clone()));
                }
            }
            if !placement.reserve(section.ty, bank, org, section.size) {
                return Err(AssignError::Overlap { name: section.name.clone(), address: org, bank });
            }
        }
        (None, Some(bank)) => {
            let addr = placement
                .allocate(section.ty, bank, section.size, section.align)
                .ok_or_else(|| AssignError::BankOverflow(section.name.clone()))?;
            section.org = Some(addr);
        }
        (Some(org), None) => {
            if let Some(alignment) = section.align {
                if !alignment.accepts(org) {
                    return Err(AssignError::Misaligned(section.name.clone()));
                }
            }

            let mut placed_bank = None;
            for bank in placement.bank_order.banks_for(section.ty) {
                if placement.reserve(section.ty, bank, org, section.size) {
                    placed_bank = Some(bank);
                    break;
                }
            }
            section.bank = Some(
                placed_bank.ok_or_else(|| AssignError::NoBankForAddress(section.name.clone()))?,
            );
        }
        (None, None) => {
            let mut placed = None;
            for bank in placement.bank_order.banks_for(section.ty) {
                if let Some(addr) = placement.allocate(section.ty, bank, section.size, section.align)
                {
                    placed = Some((addr, bank));
                    break;
                }
            }
            let (addr, bank) = placed.ok_or_else(|| AssignError::NoSpace(section.name.clone()))?;
            section.org = Some(addr);
            section.bank = Some(bank);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rgbds_object::section::SectionModifier;

    fn section(name: &str, ty: SectionType, size: u32) -> Section {
        let mut section = Section::new(name, ty, SectionModifier::Normal);
        section.size = size;
        if ty.region().has_data {
            section.data = Some(vec![0; size as usize]);
        }
        section
    }

    #[test]
    fn fragments_concatenate_and_offset_their_patches() {
        let mut a = section("buf", SectionType::Rom0, 2);
        a.modifier = SectionModifier::Fragment;
        a.data = Some(vec![1, 2]);
        let mut b = section("buf", SectionType::Rom0, 2);
        b.modifier = SectionModifier::Fragment;
        b.data = Some(vec![3, 4]);

        let merged = merge(vec![a, b]).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].size, 4);
        assert_eq!(merged[0].data, Some(vec![1, 2, 3, 4]));
    }

    #[test]
    fn unions_size_to_the_largest_arm() {
        let mut a = section("shared", SectionType::Wram0, 2);
        a.modifier = SectionModifier::Union;
        let mut b = section("shared", SectionType::Wram0, 5);
        b.modifier = SectionModifier::Union;

        let merged = merge(vec![a, b]).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].size, 5);
    }

    #[test]
    fn duplicate_normal_sections_are_rejected() {
        let a = section("main", SectionType::Rom0, 2);
        let b = section("main", SectionType::Rom0, 2);
        assert_eq!(merge(vec![a, b]).unwrap_err(), AssignError::DuplicateSection("main".to_owned()));
    }

    #[test]
    fn floating_sections_fill_the_lowest_bank_first() {
        let mut placement = Placement::new();
        let mut sections = vec![section("a", SectionType::Romx, 0x100)];
        place_remaining(&mut sections, &mut placement, &Default::default()).unwrap();
        assert_eq!(sections[0].bank, Some(1));
        assert_eq!(sections[0].org, Some(0x4000));
    }

    #[test]
    fn fixed_address_outside_the_region_is_rejected() {
        let mut placement = Placement::new();
        let mut section = section("a", SectionType::Rom0, 0x10);
        section.org = Some(0x5000);
        section.bank = Some(0);
        assert!(matches!(
            place_one(&mut section, &mut placement),
            Err(AssignError::OutOfRegion { .. })
        ));
    }

    #[test]
    fn two_fixed_sections_at_the_same_address_conflict() {
        let mut placement = Placement::new();
        let mut first = section("a", SectionType::Wram0, 0x10);
        first.org = Some(0xC000);
        first.bank = Some(0);
        place_one(&mut first, &mut placement).unwrap();

        let mut second = section("b", SectionType::Wram0, 0x10);
        second.org = Some(0xC000);
        second.bank = Some(0);
        assert!(matches!(place_one(&mut second, &mut placement), Err(AssignError::Overlap { .. })));
    }

    #[test]
    fn larger_sections_are_placed_before_smaller_ones_when_both_are_floating() {
        let mut placement = Placement::new();
        let mut sections = vec![section("small", SectionType::Wram0, 0x10), section("big", SectionType::Wram0, 0x20)];
        place_remaining(&mut sections, &mut placement, &Default::default()).unwrap();

        let big = sections.iter().find(|s| s.name == "big").unwrap();
        let small = sections.iter().find(|s| s.name == "small").unwrap();
        assert!(big.org < small.org);
    }
}
