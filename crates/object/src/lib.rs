//! `rgbds-object` is the shared data model and binary (de)serializer for the
//! object file format produced by the assembler and consumed by the linker:
//! file-stack nodes, symbols, charmaps, RPN expressions, sections and
//! patches.
//!
//! The wire format is always little-endian (see [`object_file`]), which is
//! why the `Read`/`Write` traits here are not generic over endianness or
//! integer width the way a format supporting both (like ELF) would need —
//! there is exactly one encoding, so the trait collapses to it directly.

#![deny(unused)]
#![deny(warnings)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::missing_crate_level_docs)]
#![deny(rustdoc::invalid_codeblock_attributes)]
#![deny(rustdoc::invalid_rust_codeblocks)]

pub mod charmap;
pub mod filestack;
pub mod object_file;
pub mod patch;
mod read_write;
pub mod rpn;
pub mod section;
pub mod symbol;

pub use read_write::{Read, Write};

/// Input type of every parser in this crate.
pub type Input<'a> = &'a [u8];

/// Result type of every parser in this crate.
pub type Result<'a, O> = nom::IResult<Input<'a>, O, nom::error::Error<Input<'a>>>;

/// Errors surfaced while reading a malformed object file.
pub mod errors {
    pub use nom::error::ErrorKind;
    pub use nom::Err as Error;

    /// The concrete error type used by this crate's parsers.
    pub type SingleError<'a> = nom::error::Error<super::Input<'a>>;
}
