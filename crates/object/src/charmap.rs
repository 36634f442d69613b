//! Named tries mapping input byte sequences to output value sequences.
//!
//! Grounded in spec §4.6: `CHARMAP "AB", 9` inserts a 2-byte key into the
//! active charmap's trie; `db "AB"` later walks the trie greedily,
//! preferring the longest key that matches at each position. This is the
//! same shape as the reference implementation's `charmap.cpp`, just with an
//! arena of nodes addressed by index instead of `malloc`'d nodes linked by
//! pointer, for the same reasons the rest of this crate arena-allocates
//! (see `DESIGN.md`).

/// The charmap that exists even if the source defines no `CHARMAP`
/// directives at all (spec §4.6 / the expanded spec's grounding in
/// `DEFAULT_CHARMAP_NAME`).
pub const DEFAULT_CHARMAP_NAME: &str = "main";

/// One node of a charmap trie.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct TrieNode {
    /// The output value sequence, if a key ends here.
    value: Option<Vec<u8>>,
    /// Child node index per input byte.
    children: [Option<u32>; 256],
}

/// A single named trie: input byte sequences to output value sequences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Charmap {
    name: String,
    nodes: Vec<TrieNode>,
}

impl Charmap {
    /// A fresh, empty charmap named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), nodes: vec![TrieNode::default()] }
    }

    /// A copy of `base`'s trie, renamed to `name` — the `CHARMAP name,
    /// base` form.
    pub fn new_from(name: impl Into<String>, base: &Charmap) -> Self {
        Self { name: name.into(), nodes: base.nodes.clone() }
    }

    /// This charmap's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert `input -> values`. Returns `true` if this overwrote an
    /// existing mapping for the exact same `input` (the caller emits the
    /// parametric `charmap-redef` warning spec §4.6 documents; this crate
    /// has no diagnostics dependency of its own reason to fire one
    /// directly, since whether it fires depends on the `-W` configuration
    /// the caller owns).
    pub fn add(&mut self, input: &[u8], values: Vec<u8>) -> bool {
        let mut node_index = 0usize;

        for &byte in input {
            let child = self.nodes[node_index].children[byte as usize];
            node_index = match child {
                Some(index) => index as usize,
                None => {
                    let new_index = self.nodes.len() as u32;
                    self.nodes.push(TrieNode::default());
                    self.nodes[node_index].children[byte as usize] = Some(new_index);
                    new_index as usize
                }
            };
        }

        self.nodes[node_index].value.replace(values).is_some()
    }

    /// Greedy longest-match traversal: convert `input` into a value
    /// sequence, consuming one or more bytes of `input` per matched key.
    /// Bytes that don't start any key fall back to their raw byte value
    /// (UTF-8 codepoint passthrough at the caller, since this trie only
    /// ever sees bytes) and the caller is told which offsets required
    /// fallback so it can emit `unmapped-char`.
    pub fn convert(&self, input: &[u8]) -> ConvertedString {
        let mut values = Vec::new();
        let mut unmapped_at = Vec::new();
        let mut position = 0;

        'outer: while position < input.len() {
            let mut node_index = 0usize;
            let mut longest_match: Option<(usize, &[u8])> = None;

            let mut cursor = position;
            loop {
                let node = &self.nodes[node_index];
                if let Some(value) = &node.value {
                    longest_match = Some((cursor, value));
                }

                if cursor >= input.len() {
                    break;
                }

                match node.children[input[cursor] as usize] {
                    Some(next) => {
                        node_index = next as usize;
                        cursor += 1;
                    }
                    None => break,
                }
            }

            if let Some((end, value)) = longest_match {
                values.extend_from_slice(value);
                position = end;
                continue 'outer;
            }

            unmapped_at.push(position);
            values.push(input[position]);
            position += 1;
        }

        ConvertedString { values, unmapped_at }
    }

    /// Every `input -> values` mapping this charmap holds, in the order a
    /// depth-first walk of the trie visits them (used by `-s char:path`
    /// state dumps; no ordering guarantee beyond "stable for a given
    /// trie").
    pub fn entries(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut out = Vec::new();
        self.collect_entries(0, &mut Vec::new(), &mut out);
        out
    }

    fn collect_entries(&self, node_index: usize, prefix: &mut Vec<u8>, out: &mut Vec<(Vec<u8>, Vec<u8>)>) {
        let node = &self.nodes[node_index];
        if let Some(value) = &node.value {
            out.push((prefix.clone(), value.clone()));
        }
        for (byte, child) in node.children.iter().enumerate() {
            if let Some(child) = child {
                prefix.push(byte as u8);
                self.collect_entries(*child as usize, prefix, out);
                prefix.pop();
            }
        }
    }
}

/// The result of [`Charmap::convert`]: the emitted bytes, plus the input
/// offsets that had no matching key and so fell back to a raw byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedString {
    /// The output byte sequence.
    pub values: Vec<u8>,
    /// Input byte offsets where no charmap key matched.
    pub unmapped_at: Vec<usize>,
}

/// The registry of every charmap defined during assembly, with the
/// active-charmap push/pop stack spec §4.6 describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharmapTable {
    charmaps: Vec<Charmap>,
    current: usize,
    stack: Vec<usize>,
}

impl Default for CharmapTable {
    fn default() -> Self {
        Self { charmaps: vec![Charmap::new(DEFAULT_CHARMAP_NAME)], current: 0, stack: Vec::new() }
    }
}

impl CharmapTable {
    /// A table with only the always-present `main` charmap defined.
    pub fn new() -> Self {
        Self::default()
    }

    fn find(&self, name: &str) -> Option<usize> {
        self.charmaps.iter().position(|charmap| charmap.name() == name)
    }

    /// `CHARMAP NEW "name"` / `CHARMAP NEW "name", "base"`. Errors if
    /// `name` is already defined.
    pub fn new_charmap(&mut self, name: &str, base: Option<&str>) -> Result<(), CharmapError> {
        if self.find(name).is_some() {
            return Err(CharmapError::AlreadyDefined(name.to_owned()));
        }

        let charmap = match base {
            Some(base_name) => {
                let base = self
                    .find(base_name)
                    .ok_or_else(|| CharmapError::Undefined(base_name.to_owned()))?;
                Charmap::new_from(name, &self.charmaps[base])
            }
            None => Charmap::new(name),
        };

        self.charmaps.push(charmap);
        Ok(())
    }

    /// `CHARMAP "name"`: makes `name` the active charmap.
    pub fn set(&mut self, name: &str) -> Result<(), CharmapError> {
        self.current = self.find(name).ok_or_else(|| CharmapError::Undefined(name.to_owned()))?;
        Ok(())
    }

    /// `PUSHC`: save the current charmap on the stack.
    pub fn push(&mut self) {
        self.stack.push(self.current);
    }

    /// `POPC`: restore the most recently pushed charmap.
    pub fn pop(&mut self) -> Result<(), CharmapError> {
        self.current = self.stack.pop().ok_or(CharmapError::EmptyStack)?;
        Ok(())
    }

    /// The currently active charmap.
    pub fn current(&self) -> &Charmap {
        &self.charmaps[self.current]
    }

    /// The currently active charmap, mutably (used by `CHARMAP "key",
    /// values...` to insert into it).
    pub fn current_mut(&mut self) -> &mut Charmap {
        &mut self.charmaps[self.current]
    }

    /// Every charmap ever defined during this run, in definition order
    /// (used by `-s char:path` state dumps).
    pub fn all(&self) -> &[Charmap] {
        &self.charmaps
    }
}

/// Errors produced by [`CharmapTable`] operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CharmapError {
    /// `CHARMAP NEW` named an already-existing charmap.
    #[error("charmap `{0}` is already defined")]
    AlreadyDefined(String),
    /// `CHARMAP`/`CHARMAP NEW ..., base` named a charmap that doesn't
    /// exist.
    #[error("charmap `{0}` doesn't exist")]
    Undefined(String),
    /// `POPC` with nothing on the stack.
    #[error("POPC: charmap stack is empty")]
    EmptyStack,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_has_main() {
        let table = CharmapTable::new();
        assert_eq!(table.current().name(), DEFAULT_CHARMAP_NAME);
    }

    #[test]
    fn longest_match_wins() {
        let mut charmap = Charmap::new("main");
        charmap.add(b"A", vec![1, 2]);
        charmap.add(b"AB", vec![9]);

        assert_eq!(charmap.convert(b"AB").values, vec![9]);
        assert_eq!(charmap.convert(b"A").values, vec![1, 2]);
        assert_eq!(charmap.convert(b"ABA").values, vec![9, 1, 2]);
    }

    #[test]
    fn unmapped_bytes_pass_through_and_are_reported() {
        let charmap = Charmap::new("main");
        let converted = charmap.convert(b"hi");
        assert_eq!(converted.values, b"hi");
        assert_eq!(converted.unmapped_at, vec![0, 1]);
    }

    #[test]
    fn redefining_a_key_is_reported_but_allowed() {
        let mut charmap = Charmap::new("main");
        assert!(!charmap.add(b"A", vec![1]));
        assert!(charmap.add(b"A", vec![2]));
        assert_eq!(charmap.convert(b"A").values, vec![2]);
    }

    #[test]
    fn push_pop_restores_the_previous_charmap() {
        let mut table = CharmapTable::new();
        table.new_charmap("alt", None).unwrap();
        table.push();
        table.set("alt").unwrap();
        assert_eq!(table.current().name(), "alt");
        table.pop().unwrap();
        assert_eq!(table.current().name(), DEFAULT_CHARMAP_NAME);
    }

    #[test]
    fn entries_lists_every_mapping() {
        let mut charmap = Charmap::new("main");
        charmap.add(b"A", vec![1, 2]);
        charmap.add(b"AB", vec![9]);

        let mut entries = charmap.entries();
        entries.sort();
        assert_eq!(entries, vec![(b"A".to_vec(), vec![1, 2]), (b"AB".to_vec(), vec![9])]);
    }
}
