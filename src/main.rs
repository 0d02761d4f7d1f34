#[macro_use]
extern crate clap;

use clap::Arg;
use std::fs::File;
use std::io::prelude::*;
use std::path::{Path, PathBuf};

use xcomp::context::ContextManager;
use xcomp::error::Error as XcompError;

#[derive(Debug)]
enum IOErrorContext {
    ReadInput,
    WriteOutput,
}

#[derive(Debug)]
enum Error {
    Xcomp(String),
    Io(std::io::Error, IOErrorContext, PathBuf),
    BadFormat(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(err, context, path) => write!(
                f,
                "{} file \"{}\" failed: {}",
                match context {
                    IOErrorContext::ReadInput => "Reading input",
                    IOErrorContext::WriteOutput => "Writing output",
                },
                path.display(),
                err
            ),
            Error::Xcomp(message) => write!(f, "{}", message),
            Error::BadFormat(name) => write!(f, "unknown output format \"{}\" (expected raw or prg)", name),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Raw,
    Prg,
}

impl std::str::FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "raw" => Ok(OutputFormat::Raw),
            "prg" => Ok(OutputFormat::Prg),
            other => Err(Error::BadFormat(other.to_owned())),
        }
    }
}

fn main() {
    env_logger::init();

    let matches = app_from_crate!()
        .arg(
            Arg::with_name("INPUT")
                .help("Sets the input file to assemble")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("include")
                .short("I")
                .long("include")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .value_name("PATH")
                .help("Adds a search root for .include/.bin directives (repeatable)"),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .takes_value(true)
                .value_name("FORMAT")
                .possible_values(&["raw", "prg"])
                .default_value("raw")
                .help("Sets the output container format"),
        )
        .arg(
            Arg::with_name("output")
                .short("o")
                .long("output")
                .takes_value(true)
                .value_name("OUTPUT")
                .help("Sets the output file to write to"),
        )
        .arg(
            Arg::with_name("source_map")
                .short("m")
                .long("source-map")
                .takes_value(true)
                .value_name("SOURCE_MAP")
                .help("Sets the file to write the symbol map to"),
        )
        .get_matches();

    let input = matches.value_of("INPUT").unwrap();
    let includes: Vec<&str> = matches.values_of("include").map(|v| v.collect()).unwrap_or_default();
    let format: OutputFormat = matches.value_of("format").unwrap().parse().unwrap();
    let output = matches.value_of("output");
    let map = matches.value_of("source_map");

    if let Err(err) = run(input, &includes, format, output, map) {
        eprintln!("{}", err);
        std::process::exit(1);
    }
}

fn run(
    input: &str,
    includes: &[&str],
    format: OutputFormat,
    output: Option<&str>,
    map: Option<&str>,
) -> Result<(), Error> {
    let input_path = Path::new(input);
    let root_name = input_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Io(
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a valid file name"),
            IOErrorContext::ReadInput,
            input_path.to_owned(),
        ))?
        .to_owned();

    let mut search_paths: Vec<PathBuf> = includes.iter().map(PathBuf::from).collect();
    if let Some(parent) = input_path.parent() {
        search_paths.push(parent.to_owned());
    } else {
        search_paths.push(PathBuf::from("."));
    }

    let mut ctx = ContextManager::with_include_paths(search_paths);
    let gen = xcomp::assemble_with_context(&mut ctx, &root_name).map_err(|err| describe(err, &mut ctx))?;

    let (start, end) = gen.used_range();
    let bytes = &gen.memory[start as usize..end as usize];

    let output_path: PathBuf = output
        .map(PathBuf::from)
        .unwrap_or_else(|| input_path.with_extension(match format {
            OutputFormat::Raw => "bin",
            OutputFormat::Prg => "prg",
        }));

    let mut framed = Vec::with_capacity(bytes.len() + 2);
    if format == OutputFormat::Prg {
        let load_addr = gen
            .pragmas
            .get("c64_prg_start")
            .and_then(|values| values.first())
            .map(|&v| v as u16)
            .unwrap_or(0x0801);
        framed.extend_from_slice(&load_addr.to_le_bytes());
    }
    framed.extend_from_slice(bytes);

    write_file(&output_path, &framed)
        .map_err(|err| Error::Io(err, IOErrorContext::WriteOutput, output_path.clone()))?;

    if let Some(map_path_str) = map {
        let map_path = PathBuf::from(map_path_str);
        write_symbol_map(&gen, &map_path)
            .map_err(|err| Error::Io(err, IOErrorContext::WriteOutput, map_path))?;
    }

    Ok(())
}

fn describe(err: XcompError, ctx: &mut ContextManager) -> Error {
    Error::Xcomp(err.describe(ctx))
}

fn write_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    File::create(path)?.write_all(bytes)
}

fn write_symbol_map(gen: &xcomp::CodeGen, path: &Path) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    let mut names: Vec<&String> = gen.symbol_map.keys().collect();
    names.sort();
    for name in names {
        writeln!(file, "{}: {:04x}", name, gen.symbol_map[name])?;
    }
    Ok(())
}
