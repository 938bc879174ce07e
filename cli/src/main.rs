use anyhow::{anyhow, Result};
use basmi::{memory_units::Pages, Config, ExitStatus, Interpreter, Program, StdHost};
use clap::Parser;
use std::fs;

/// Runs a BBC BASIC program.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// The BASIC source file to run.
    #[clap(value_parser)]
    program: String,

    /// Libraries to install before the program runs.
    #[clap(long, value_parser)]
    library: Vec<String>,

    /// Byte window size in 64 KiB pages.
    #[clap(long, default_value_t = 8)]
    workspace_pages: usize,

    /// Close `IF ... THEN stmt` blocks at their ENDIF instead of at the
    /// end of the line.
    #[clap(long)]
    cascade_if: bool,
}

fn main() {
    let args = Args::parse();
    match run(&args) {
        Ok(status) => std::process::exit(status.code()),
        Err(error) => {
            eprintln!("basmi: {error}");
            std::process::exit(1);
        }
    }
}

fn run(args: &Args) -> Result<ExitStatus> {
    let source = fs::read_to_string(&args.program)
        .map_err(|error| anyhow!("failed to read {}: {error}", args.program))?;
    let program = Program::compile(&source)?;

    let config = Config {
        workspace_size: Pages(args.workspace_pages),
        cascade_if: args.cascade_if,
        ..Config::default()
    };
    let mut interp = Interpreter::new(program, config)?;
    for library in &args.library {
        let text = fs::read_to_string(library)
            .map_err(|error| anyhow!("failed to read library {library}: {error}"))?;
        interp.install_library(&text)?;
    }

    let mut host = StdHost::new();
    match interp.run(&mut host) {
        Ok(status) => {
            if let ExitStatus::Stopped(line) = status {
                eprintln!("STOP at line {line}");
            }
            Ok(status)
        }
        // The default handler: print the numbered message and fail.
        Err(basmi::Error::Basic(error)) => {
            eprintln!("Error {}: {}", error.code().number(), error);
            Ok(ExitStatus::Quit(1))
        }
        Err(other) => Err(other.into()),
    }
}
