//! `rgbds-link` places sections from one or more assembled object files
//! into a multi-region, banked address space, resolves their patches
//! against the final addresses, and emits a ROM image plus optional map
//! and symbol files (spec §4.9-§4.13).
//!
//! [`program`] flattens every input object into one linking namespace
//! (spec §4.9's reader, generalized to N objects); [`assign`] merges
//! `UNION`/`FRAGMENT` sections and places everything into banks (§4.10);
//! [`script`] runs an optional linker script that fixes some of that
//! placement ahead of time (§4.11); [`patch`] re-evaluates every RPN
//! expression against the final addresses and writes the result into
//! section data (§4.3/§4.12); [`output`] serializes the result (§4.13).
//! [`configuration`] and [`linker`] tie a CLI's worth of knobs to that
//! pipeline.

#![deny(unused)]
#![deny(warnings)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::missing_crate_level_docs)]
#![deny(rustdoc::invalid_codeblock_attributes)]
#![deny(rustdoc::invalid_rust_codeblocks)]

pub mod assign;
pub mod configuration;
mod linker;
pub mod output;
pub mod patch;
pub mod program;
pub mod script;

pub use configuration::{Configuration, MemoryModel, ScrambleSpec};
pub use linker::{Linker, LinkerError};
