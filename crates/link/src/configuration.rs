//! Every knob the linker CLI (spec §6 "Linker CLI") exposes, collected
//! into one struct the driver in [`crate::linker`] consumes.

use std::path::PathBuf;

use rgbds_object::section::SectionType;

use crate::assign::BankOrder;
use crate::output::PadByte;
use crate::Linker;

/// `-d`/`-t`/`-w`: contracted memory models that shrink a region's usable
/// bank range ahead of placement (spec §6). Each is a relaxation granted
/// by a hardware assumption the project makes, not a general-purpose
/// feature — so, unlike a linker script, they are global switches rather
/// than something a particular section can opt out of.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryModel {
    /// `-d`: DMG-only mode. `VRAM` is contracted to bank 0 (no bank 1,
    /// which exists for CGB's second tile/attribute plane).
    pub dmg: bool,
    /// `-t`: 32K ROM mode. `ROMX` is contracted to a single bank (bank 1),
    /// matching a cartridge with no MBC-driven bank switching.
    pub tiny_rom: bool,
    /// `-w`: WRAM0-only mode. `WRAMX` is contracted to a single bank
    /// (bank 1), matching DMG's unbanked work RAM.
    pub wram0_only: bool,
}

impl MemoryModel {
    /// The [`BankOrder`] these contractions imply: every region keeps its
    /// default ascending order, except the ones this model narrows to a
    /// single bank.
    pub fn bank_order(&self) -> BankOrder {
        let mut order = BankOrder::new();
        if self.dmg {
            order.set(SectionType::Vram, vec![SectionType::Vram.region().first_bank]);
        }
        if self.tiny_rom {
            order.set(SectionType::Romx, vec![SectionType::Romx.region().first_bank]);
        }
        if self.wram0_only {
            order.set(SectionType::Wramx, vec![SectionType::Wramx.region().first_bank]);
        }
        order
    }
}

/// A parsed `-S` bank-scramble spec: for one or more of `ROMX`/`WRAMX`/
/// `SRAM`, a seed that permutes the order automatic placement tries that
/// region's banks in, instead of the default ascending order (spec §6).
/// Exists to flush out code that silently assumes a particular bank
/// assignment instead of reading it back from a symbol/`BANK()`.
#[derive(Debug, Clone, Default)]
pub struct ScrambleSpec {
    seeds: Vec<(SectionType, u64)>,
}

impl ScrambleSpec {
    /// Parse `area1=seed1[,area2=seed2...]`, e.g. `romx=12,wramx=7`.
    pub fn parse(spec: &str) -> Option<Self> {
        let mut seeds = Vec::new();
        for part in spec.split(',') {
            let (area, seed) = part.split_once('=')?;
            let ty = match area.trim().to_ascii_uppercase().as_str() {
                "ROMX" => SectionType::Romx,
                "WRAMX" => SectionType::Wramx,
                "SRAM" => SectionType::Sram,
                _ => return None,
            };
            let seed: u64 = seed.trim().parse().ok()?;
            seeds.push((ty, seed));
        }
        Some(Self { seeds })
    }

    /// The [`BankOrder`] this scramble spec implies, layered on top of
    /// `base` (a [`MemoryModel`]'s contractions, applied first so a
    /// scrambled region that's also contracted still only tries its
    /// narrowed bank set).
    pub fn apply(&self, mut base: BankOrder) -> BankOrder {
        for &(ty, seed) in &self.seeds {
            let mut banks: Vec<u32> = {
                let region = ty.region();
                (region.first_bank..=region.last_bank).collect()
            };
            shuffle(&mut banks, seed);
            base.set(ty, banks);
        }
        base
    }
}

/// A minimal, dependency-free deterministic shuffle (splitmix64 driving a
/// Fisher-Yates pass): `-S`'s whole point is reproducible-but-scrambled
/// placement, not cryptographic randomness, so a tiny hand-rolled
/// generator is preferable to pulling in a `rand` dependency the rest of
/// the crate has no other use for.
fn shuffle(items: &mut [u32], seed: u64) {
    let mut state = seed;
    let mut next_u64 = || {
        state = state.wrapping_add(0x9E3779B97F4A7C15);
        let mut z = state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
        z ^ (z >> 31)
    };

    for i in (1..items.len()).rev() {
        let j = (next_u64() % (i as u64 + 1)) as usize;
        items.swap(i, j);
    }
}

/// Every CLI knob for one linker invocation.
#[derive(Debug, Default)]
pub struct Configuration {
    /// Positional object-file arguments, in link order.
    pub input_files: Vec<PathBuf>,
    /// `-o`: the ROM image to write. `None` skips writing one (useful
    /// with `-l`'s script validated but no image wanted).
    pub output_file: Option<PathBuf>,
    /// `-m`: the map file to write, if requested.
    pub map_file: Option<PathBuf>,
    /// `-n`: the symbol file to write, if requested.
    pub sym_file: Option<PathBuf>,
    /// `-l`: a linker script to run before automatic placement.
    pub linker_script: Option<PathBuf>,
    /// `-p`: the byte used to fill gaps in the ROM image.
    pub pad_byte: PadByte,
    /// `-O`: an overlay ROM whose bytes fill gaps instead of `pad_byte`.
    pub overlay_file: Option<PathBuf>,
    /// `-d`/`-t`/`-w`.
    pub memory_model: MemoryModel,
    /// `-S`.
    pub scramble: Option<ScrambleSpec>,
}

impl Configuration {
    /// A configuration with nothing but the required inputs and output
    /// set; every optional output and contraction is left off.
    pub fn new(input_files: Vec<PathBuf>, output_file: PathBuf) -> Self {
        Self { input_files, output_file: Some(output_file), ..Self::default() }
    }

    /// The [`BankOrder`] automatic placement should use: the memory
    /// model's contractions, with any `-S` scramble layered on top.
    pub fn bank_order(&self) -> BankOrder {
        let base = self.memory_model.bank_order();
        match &self.scramble {
            Some(scramble) => scramble.apply(base),
            None => base,
        }
    }

    /// Build the [`Linker`] that drives this configuration end to end.
    pub fn linker(self) -> Linker {
        Linker::with_configuration(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dmg_mode_contracts_vram_to_bank_zero() {
        let model = MemoryModel { dmg: true, ..Default::default() };
        let order = model.bank_order();
        assert_eq!(order.banks_for(SectionType::Vram), vec![0]);
    }

    #[test]
    fn scramble_spec_parses_multiple_areas() {
        let spec = ScrambleSpec::parse("romx=5,wramx=9").unwrap();
        assert_eq!(spec.seeds.len(), 2);
    }

    #[test]
    fn scramble_is_deterministic_for_a_given_seed() {
        let spec = ScrambleSpec::parse("romx=42").unwrap();
        let a = spec.apply(BankOrder::new()).banks_for(SectionType::Romx);
        let b = spec.apply(BankOrder::new()).banks_for(SectionType::Romx);
        assert_eq!(a, b);
    }
}
