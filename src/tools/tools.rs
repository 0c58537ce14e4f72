mod dump_header;
use dump_header::dump_header;
mod dump_roots;
use dump_roots::dump_roots;
mod dump_sizes;
use dump_sizes::dump_sizes;
mod logger;

use std::fs;
use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use log::error;

/// Parse PMAT heap dumps and report on their contents
#[derive(Clone, Debug, Parser)]
struct Args {
    /// dump file to parse
    #[arg(default_value = "sample.pmat")]
    input: PathBuf,
    /// excessive debug tracing output
    #[arg(long)]
    trace: bool,
    /// operation to execute, the size table if not specified
    #[command(subcommand)]
    operation: Option<Operation>,
}

#[derive(Clone, Debug, Subcommand)]
enum Operation {
    /// Print the per-type size and count table
    DumpSizes,
    /// Print the dump header: build flags and versions
    DumpHeader,
    /// Print the roots with their descriptions
    DumpRoots,
}

fn main() -> Result<()> {
    let args = Args::try_parse().unwrap_or_else(|err| {
        let _ = err.print();
        match err.kind() {
            ErrorKind::DisplayHelp => process::exit(1),
            _ => process::exit(2),
        }
    });
    logger::init(args.trace);

    let data = match fs::read(&args.input) {
        Ok(data) => data,
        Err(err) => {
            error!("could not read {}: {err}", args.input.display());
            process::exit(-1);
        }
    };
    let dump = pmat::parse(&data)?;
    match args.operation.unwrap_or(Operation::DumpSizes) {
        Operation::DumpSizes => dump_sizes(&dump),
        Operation::DumpHeader => dump_header(&dump),
        Operation::DumpRoots => dump_roots(&dump),
    }
    Ok(())
}
