//! `rgbds-asm` is the two-phase translation pipeline from textual source to
//! a relocatable object: a file/macro/repeat stack feeding an interleaved
//! lexer, a recursive-descent parser driving symbol and section state, and
//! the object-file emitter that hands everything off to `rgbds-link`.
//!
//! The pieces map directly onto spec §4: [`lexer`] is §4.5, [`filestack`]
//! is §4.4, [`symtab`] is §4.7, [`section`] is §4.8, [`charmap`] wraps
//! `rgbds_object::charmap` with the push/pop stack of §4.6, [`parser`] is
//! the grammar that drives all of the above, and [`assembler`] is the
//! top-level entry point that ties a single run together and produces an
//! [`rgbds_object::object_file::ObjectFile`].

#![deny(unused)]
#![deny(warnings)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::missing_crate_level_docs)]
#![deny(rustdoc::invalid_codeblock_attributes)]
#![deny(rustdoc::invalid_rust_codeblocks)]

pub mod assembler;
pub mod charmap;
pub mod filestack;
pub mod instructions;
pub mod lexer;
pub mod numbers;
pub mod parser;
pub mod section;
pub mod symtab;
