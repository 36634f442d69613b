//! `rgblink-bin` is the executable front end of `rgbds-link`.
//!
//! This crate contains all the implementation to make `rgblink` an
//! executable that can be used by happy users.

mod error;

use std::{
    env,
    ffi::OsString,
    path::{Path, PathBuf},
    process,
};

use argh::FromArgs;
use error::Error;
use rgbds_diagnostics::DiagnosticEngine;
use rgbds_link::{Configuration, MemoryModel, ScrambleSpec};

/// `rgblink` places one or more assembled object files into a banked
/// address space and writes the resulting ROM image, plus optional map
/// and symbol files.
#[derive(Debug, FromArgs)]
struct Rgblink {
    /// ROM image output path.
    #[argh(option, short = 'o')]
    output: Option<PathBuf>,

    /// map file output path.
    #[argh(option, short = 'm')]
    map_file: Option<PathBuf>,

    /// symbol file output path.
    #[argh(option, short = 'n')]
    sym_file: Option<PathBuf>,

    /// linker script to run before automatic placement.
    #[argh(option, short = 'l')]
    linker_script: Option<PathBuf>,

    /// pad byte for gaps in the ROM image, decimal or `0x`-prefixed hex.
    #[argh(option, short = 'p')]
    pad_byte: Option<String>,

    /// overlay ROM whose bytes fill gaps instead of the pad byte.
    #[argh(option, short = 'O')]
    overlay: Option<PathBuf>,

    /// DMG mode: contract `VRAM` to bank 0.
    #[argh(switch, short = 'd')]
    dmg: bool,

    /// 32K ROM mode: contract `ROMX` to a single bank.
    #[argh(switch, short = 't')]
    tiny_rom: bool,

    /// WRAM0-only mode: contract `WRAMX` to a single bank.
    #[argh(switch, short = 'w')]
    wram0_only: bool,

    /// scramble bank placement order, e.g. `romx=12,wramx=7`.
    #[argh(option, short = 'S')]
    scramble: Option<String>,

    /// input object files, in link order.
    #[argh(positional)]
    input_files: Vec<PathBuf>,
}

impl Rgblink {
    /// Creates a new `Self` type based on [`std::env::args_os`].
    fn new() -> Result<Self, Error> {
        let arguments =
            env::args_os().map(OsString::into_string).collect::<Result<Vec<_>, _>>().map_err(
                |argument| Error::InvalidArgumentEncoding(argument.to_string_lossy().to_string()),
            )?;

        if arguments.is_empty() {
            return Err(Error::ProgramNameIsMissing);
        }

        let command = Path::new(&arguments[0])
            .file_name()
            .and_then(|file_name| file_name.to_str())
            .unwrap_or(&arguments[0]);

        let arguments =
            arguments.iter().skip(1).map(|argument| argument.as_str()).collect::<Vec<_>>();

        match Rgblink::from_args(&[command], &arguments) {
            Ok(rgblink) => Ok(rgblink),
            Err(early_exit) => match early_exit.status {
                Ok(()) => {
                    println!("{}", early_exit.output);
                    process::exit(0);
                }
                Err(()) => Err(Error::CommandLine(early_exit.output.trim().to_string())),
            },
        }
    }

    fn pad_byte(&self) -> Result<u8, Error> {
        let Some(raw) = &self.pad_byte else { return Ok(0) };
        match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
            Some(hex) => u8::from_str_radix(hex, 16),
            None => raw.parse(),
        }
        .map_err(|_| Error::CommandLine(format!("`-p` wants a byte, got `{raw}`")))
    }

    fn scramble_spec(&self) -> Result<Option<ScrambleSpec>, Error> {
        let Some(raw) = &self.scramble else { return Ok(None) };
        ScrambleSpec::parse(raw)
            .map(Some)
            .ok_or_else(|| Error::CommandLine(format!("`-S` couldn't parse `{raw}`")))
    }
}

fn main() -> Result<(), Error> {
    env_logger::init();
    Error::install_and_configure()?;

    let rgblink = Rgblink::new()?;

    let configuration = Configuration {
        input_files: rgblink.input_files.clone(),
        output_file: rgblink.output.clone(),
        map_file: rgblink.map_file.clone(),
        sym_file: rgblink.sym_file.clone(),
        linker_script: rgblink.linker_script.clone(),
        pad_byte: rgbds_link::output::PadByte(rgblink.pad_byte()?),
        overlay_file: rgblink.overlay.clone(),
        memory_model: MemoryModel {
            dmg: rgblink.dmg,
            tiny_rom: rgblink.tiny_rom,
            wram0_only: rgblink.wram0_only,
        },
        scramble: rgblink.scramble_spec()?,
    };

    let mut diagnostics = DiagnosticEngine::new(0);

    configuration.linker().link(&mut diagnostics)?;

    Ok(())
}
