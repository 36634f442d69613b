//! The thin layer connecting `CHARMAP`/`NEWCHARMAP`/`PUSHC`/`POPC` and
//! `db "..."` string emission to
//! [`rgbds_object::charmap::CharmapTable`] (spec §4.6).
//!
//! `rgbds_object::charmap` deliberately has no diagnostics dependency (it
//! would create a dependency cycle back into this workspace's own
//! diagnostics crate), so the warnings its `add`/`convert` leave implicit —
//! "you just shadowed an existing mapping", "this byte had no mapping and
//! was passed through verbatim" — are raised here instead, where a
//! [`rgbds_diagnostics::DiagnosticEngine`] is in scope.

use rgbds_object::charmap::{Charmap, CharmapError, CharmapTable};

/// Drives one assembly run's charmap table, translating the object
/// crate's plain booleans/offsets into the two warnings spec §4.6 calls
/// for.
#[derive(Debug, Default)]
pub struct CharmapDriver {
    table: CharmapTable,
}

/// What happened converting one `db "..."` string through the active
/// charmap, for the caller to turn into diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertOutcome {
    /// The mapped output values, flattened in input order.
    pub values: Vec<u8>,
    /// Byte offsets into the input where no mapping matched and the raw
    /// byte was passed through unchanged (spec §4.6: "unmapped bytes are
    /// warned about, not rejected").
    pub unmapped_at: Vec<usize>,
}

impl CharmapDriver {
    /// A driver with only the default `"main"` charmap defined.
    pub fn new() -> Self {
        Self::default()
    }

    /// `CHARMAP "in", out...`: add (or overwrite) a mapping in the
    /// current charmap. Returns whether this overwrote an existing
    /// mapping (caller raises a `charmap-redef` warning for that case).
    pub fn add(&mut self, input: &[u8], values: Vec<u8>) -> bool {
        self.table.current_mut().add(input, values)
    }

    /// `NEWCHARMAP name[, base]`.
    pub fn new_charmap(&mut self, name: &str, base: Option<&str>) -> Result<(), CharmapError> {
        self.table.new_charmap(name, base)
    }

    /// `SETCHARMAP name`.
    pub fn set_charmap(&mut self, name: &str) -> Result<(), CharmapError> {
        self.table.set(name)
    }

    /// `PUSHC`.
    pub fn push(&mut self) {
        self.table.push();
    }

    /// `POPC`.
    pub fn pop(&mut self) -> Result<(), CharmapError> {
        self.table.pop()
    }

    /// The active charmap's name, for diagnostics.
    pub fn current_name(&self) -> &str {
        self.table.current().name()
    }

    /// Every charmap defined during this run, each with its full set of
    /// `input -> values` mappings (`-s char:path`).
    pub fn all_entries(&self) -> Vec<(String, Vec<(Vec<u8>, Vec<u8>)>)> {
        self.table.all().iter().map(|charmap| (charmap.name().to_owned(), charmap.entries())).collect()
    }

    /// Convert a whole string through the active charmap, greedily
    /// matching the longest defined sequence at each position (spec
    /// §4.6). Bytes with no match pass through as a single-byte value,
    /// each such offset recorded for the caller to warn about.
    pub fn convert(&self, input: &[u8]) -> ConvertOutcome {
        let converted = self.table.current().convert(input);
        ConvertOutcome { values: converted.values, unmapped_at: converted.unmapped_at }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmapped_bytes_are_reported_but_still_produced() {
        let driver = CharmapDriver::new();
        let outcome = driver.convert(b"A");
        assert_eq!(outcome.unmapped_at, vec![0]);
        assert_eq!(outcome.values, vec![b'A']);
    }

    #[test]
    fn mapped_sequences_take_priority_over_raw_bytes() {
        let mut driver = CharmapDriver::new();
        driver.add(b"<A>", vec![0xFF]);
        let outcome = driver.convert(b"<A>B");
        assert_eq!(outcome.values, vec![0xFF, b'B']);
        assert_eq!(outcome.unmapped_at, vec![3]);
    }

    #[test]
    fn pushc_popc_round_trip_the_active_charmap() {
        let mut driver = CharmapDriver::new();
        driver.new_charmap("alt", None).unwrap();
        driver.push();
        driver.set_charmap("alt").unwrap();
        assert_eq!(driver.current_name(), "alt");
        driver.pop().unwrap();
        assert_eq!(driver.current_name(), Charmap::new("main").name());
    }

    #[test]
    fn all_entries_lists_every_charmap_with_its_mappings() {
        let mut driver = CharmapDriver::new();
        driver.add(b"A", vec![1, 2]);
        driver.new_charmap("alt", None).unwrap();

        let entries = driver.all_entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "main");
        assert_eq!(entries[0].1, vec![(b"A".to_vec(), vec![1, 2])]);
        assert_eq!(entries[1].0, "alt");
        assert!(entries[1].1.is_empty());
    }
}
