//! `rgbasm-bin` is the executable front end of `rgbds-asm`.
//!
//! This crate contains all the implementation to make `rgbasm` an
//! executable that can be used by happy users.

mod error;

use std::{
    env,
    ffi::OsString,
    io::Read as _,
    path::{Path, PathBuf},
    process,
};

use argh::FromArgs;
use error::Error;
use rgbds_asm::assembler::{assemble, AssembleOptions, AssembleOutput};
use rgbds_diagnostics::DiagnosticEngine;
use rgbds_object::symbol::SymbolType;

/// `rgbasm` assembles one Game Boy source file into a relocatable object
/// file that `rgblink` can later place into a ROM image.
#[derive(Debug, FromArgs)]
struct Rgbasm {
    /// object output path.
    #[argh(option, short = 'o')]
    output: Option<PathBuf>,

    /// predefine `NAME[=value]` as an `EQUS`/`EQU`, may be given more than once.
    #[argh(option, short = 'D')]
    define: Vec<String>,

    /// add a directory `INCLUDE`/`INCBIN` searches when a path isn't found
    /// relative to the including file, may be given more than once.
    #[argh(option, short = 'I')]
    include: Vec<PathBuf>,

    /// read this file as though it were `INCLUDE`d before the main input.
    #[argh(option, short = 'P')]
    preinclude: Option<PathBuf>,

    /// write a Make-style dependency file listing every file this run read.
    #[argh(option, short = 'M')]
    depfile: Option<PathBuf>,

    /// target name(s) for the dependency file's rule, in place of the
    /// output file's name.
    #[argh(option)]
    mt: Vec<String>,

    /// like `-MT`, but quote characters Make treats specially.
    #[argh(option)]
    mq: Vec<String>,

    /// don't fail the dependency output when an included file is missing
    /// (assume it will be generated before Make next runs).
    #[argh(switch)]
    mg: bool,

    /// add a phony rule for each dependency, so deleting one doesn't break
    /// the build.
    #[argh(switch)]
    mp: bool,

    /// keep the dependency file even though assembly itself also ran.
    #[argh(switch)]
    mc: bool,

    /// pad byte for `DS` inside `UNION`, decimal or `0x`-prefixed hex.
    #[argh(option, short = 'p')]
    pad_byte: Option<String>,

    /// default fixed-point fraction width (1..=31) for literals with no
    /// explicit `qN` suffix.
    #[argh(option, short = 'Q')]
    fraction_width: Option<u8>,

    /// max `INCLUDE`/`MACRO`/`REPT` recursion depth.
    #[argh(option, short = 'r', default = "64")]
    max_depth: usize,

    /// alternate digit characters for binary (`%`) literals, e.g. `.#`.
    #[argh(option, short = 'b')]
    binary_digits: Option<String>,

    /// alternate digit characters for graphics (`` ` ``) literals, e.g. `0123`.
    #[argh(option, short = 'g')]
    gfx_digits: Option<String>,

    /// enable a warning flag, e.g. `shift`, `no-div`, `error=purge`, `all`.
    #[argh(option, short = 'W')]
    warn: Vec<String>,

    /// disable every warning.
    #[argh(switch, short = 'w')]
    no_warn: bool,

    /// promote every warning to an error (bare `--werror`), or a single
    /// flag (`--werror=flag`).
    #[argh(option)]
    werror: Vec<String>,

    /// abort after this many errors (0 means unlimited).
    #[argh(option, short = 'X', default = "0")]
    max_errors: usize,

    /// dump state: `<features>:<path>`, features is a comma-separated list
    /// of `equ`, `var`, `equs`, `macro`, `char`, or `all`.
    #[argh(option, short = 's')]
    state: Vec<String>,

    /// input path, or `-` for stdin.
    #[argh(positional)]
    input: PathBuf,
}

impl Rgbasm {
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

        match Rgbasm::from_args(&[command], &arguments) {
            Ok(rgbasm) => Ok(rgbasm),
            Err(early_exit) => match early_exit.status {
                Ok(()) => {
                    println!("{}", early_exit.output);
                    process::exit(0);
                }
                Err(()) => Err(Error::CommandLine(early_exit.output.trim().to_string())),
            },
        }
    }

    fn predefines(&self) -> Vec<(String, Option<String>)> {
        self.define
            .iter()
            .map(|raw| match raw.split_once('=') {
                Some((name, value)) => (name.to_owned(), Some(value.to_owned())),
                None => (raw.clone(), None),
            })
            .collect()
    }

    fn binary_digits(&self) -> Result<Option<[char; 2]>, Error> {
        self.binary_digits
            .as_ref()
            .map(|raw| {
                let chars: Vec<char> = raw.chars().collect();
                match chars.as_slice() {
                    [zero, one] => Ok([*zero, *one]),
                    _ => Err(Error::CommandLine(format!("`-b` wants exactly 2 characters, got `{raw}`"))),
                }
            })
            .transpose()
    }

    fn gfx_digits(&self) -> Result<Option<[char; 4]>, Error> {
        self.gfx_digits
            .as_ref()
            .map(|raw| {
                let chars: Vec<char> = raw.chars().collect();
                match chars.as_slice() {
                    [a, b, c, d] => Ok([*a, *b, *c, *d]),
                    _ => Err(Error::CommandLine(format!("`-g` wants exactly 4 characters, got `{raw}`"))),
                }
            })
            .transpose()
    }

    fn pad_byte(&self) -> Result<u8, Error> {
        let Some(raw) = &self.pad_byte else { return Ok(0) };
        match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
            Some(hex) => u8::from_str_radix(hex, 16),
            None => raw.parse(),
        }
        .map_err(|_| Error::CommandLine(format!("`-p` wants a byte, got `{raw}`")))
    }
}

/// Reads stdin into a temporary file so the rest of the pipeline, which
/// only ever opens a path, doesn't need a separate in-memory code path for
/// the `-` convention.
fn materialize_stdin() -> Result<PathBuf, Error> {
    let mut bytes = Vec::new();
    std::io::stdin()
        .read_to_end(&mut bytes)
        .map_err(|source| Error::Io { path: "<stdin>".to_owned(), source })?;

    let path = env::temp_dir().join(format!("rgbasm-stdin-{}.asm", process::id()));
    std::fs::write(&path, &bytes).map_err(|source| Error::Io { path: path.display().to_string(), source })?;
    Ok(path)
}

fn write_depfile(rgbasm: &Rgbasm, dependencies: &[String]) -> Result<(), Error> {
    let Some(depfile) = &rgbasm.depfile else { return Ok(()) };

    let targets: Vec<String> = if !rgbasm.mq.is_empty() {
        rgbasm.mq.iter().map(|target| target.replace('$', "$$").replace(' ', "\\ ")).collect()
    } else if !rgbasm.mt.is_empty() {
        rgbasm.mt.clone()
    } else if let Some(output) = &rgbasm.output {
        vec![output.display().to_string()]
    } else {
        vec![rgbasm.input.with_extension("o").display().to_string()]
    };

    let mut contents = String::new();
    contents.push_str(&targets.join(" "));
    contents.push(':');
    for dependency in dependencies {
        contents.push_str(" \\\n ");
        contents.push_str(dependency);
    }
    contents.push('\n');

    if rgbasm.mp || rgbasm.mg {
        for dependency in dependencies.iter().skip(1) {
            contents.push_str(&format!("\n{dependency}:\n"));
        }
    }

    if rgbasm.mc {
        contents.push_str(&format!("{}\n", depfile.display()));
    }

    std::fs::write(depfile, contents)
        .map_err(|source| Error::Io { path: depfile.display().to_string(), source })
}

fn write_state(rgbasm: &Rgbasm, output: &AssembleOutput) -> Result<(), Error> {
    for entry in &rgbasm.state {
        let Some((features, path)) = entry.split_once(':') else { continue };

        let wanted: Vec<&str> = features.split(',').collect();
        let want = |name: &str| wanted.iter().any(|feature| *feature == name || *feature == "all");

        let mut contents = String::new();
        for symbol in &output.object.symbols {
            let kind = match symbol.ty {
                SymbolType::Equ if want("equ") => Some("EQU"),
                SymbolType::Var if want("var") => Some("VAR"),
                SymbolType::Equs if want("equs") => Some("EQUS"),
                SymbolType::Macro if want("macro") => Some("MACRO"),
                _ => None,
            };
            if let Some(kind) = kind {
                contents.push_str(&format!("{kind} {}\n", symbol.name));
            }
        }

        if want("char") {
            for (name, mappings) in output.charmaps.all_entries() {
                contents.push_str(&format!("CHARMAP {name}\n"));
                for (input, values) in mappings {
                    let key = String::from_utf8_lossy(&input);
                    let values: Vec<String> = values.iter().map(|value| value.to_string()).collect();
                    contents.push_str(&format!("  \"{key}\" = {}\n", values.join(", ")));
                }
            }
        }

        std::fs::write(path, contents).map_err(|source| Error::Io { path: path.to_owned(), source })?;
    }

    Ok(())
}

fn main() -> Result<(), Error> {
    env_logger::init();
    Error::install_and_configure()?;

    let rgbasm = Rgbasm::new()?;

    let mut diagnostics = DiagnosticEngine::new(rgbasm.max_errors);

    if rgbasm.no_warn {
        diagnostics.warnings_mut().disable_all();
    }
    for flag in &rgbasm.warn {
        diagnostics.warnings_mut().process_flag(flag)?;
    }
    for flag in &rgbasm.werror {
        if flag.is_empty() {
            diagnostics.warnings_mut().promote_all_to_error();
        } else {
            diagnostics.warnings_mut().process_flag(&format!("error={flag}"))?;
        }
    }

    let input_path =
        if rgbasm.input == Path::new("-") { materialize_stdin()? } else { rgbasm.input.clone() };

    let options = AssembleOptions {
        max_depth: rgbasm.max_depth,
        predefines: rgbasm.predefines(),
        include_paths: rgbasm.include.clone(),
        preinclude: rgbasm.preinclude.clone(),
        binary_digits: rgbasm.binary_digits()?,
        gfx_digits: rgbasm.gfx_digits()?,
        default_fraction_bits: rgbasm.fraction_width.unwrap_or(16),
        pad_byte: rgbasm.pad_byte()?,
    };

    let assembled = assemble(&input_path, &options, &mut diagnostics)?;

    if let Some(output_path) = &rgbasm.output {
        std::fs::write(output_path, assembled.object.write_to_bytes())
            .map_err(|source| Error::Io { path: output_path.display().to_string(), source })?;
    }

    if rgbasm.depfile.is_some() {
        let dependencies: Vec<String> = assembled
            .object
            .file_stack
            .nodes()
            .iter()
            .filter_map(|node| match &node.kind {
                rgbds_object::filestack::FileStackNodeKind::File { name } => Some(name.clone()),
                _ => None,
            })
            .collect();
        write_depfile(&rgbasm, &dependencies)?;
    }

    write_state(&rgbasm, &assembled)?;

    if diagnostics.had_errors() {
        return Err(Error::HadErrors(diagnostics.error_count()));
    }

    Ok(())
}
