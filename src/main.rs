use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::process::ExitCode;

use bbst::counter::{parse_dataset, EventCounter};
use bbst::CounterError;
use clap::Parser;

/// Count events by id and answer ordered queries over them.
///
/// Reads the dataset from FILE, then serves commands from stdin, one per
/// line. Set RUST_LOG to see diagnostics on stderr.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Dataset: a pair count followed by that many `id count` pairs.
    file: PathBuf,

    /// Insert the dataset one pair at a time instead of bulk-building it.
    #[arg(long)]
    incremental: bool,

    /// Check every tree invariant after loading and before exiting.
    #[arg(long)]
    validate: bool,
}

/// Read and load the dataset named on the command line.
fn load(args: &Args) -> Result<EventCounter, CounterError> {
    let file = File::open(&args.file)?;
    let pairs = parse_dataset(BufReader::new(file))?;
    if args.incremental {
        EventCounter::from_dataset_incremental(&pairs)
    } else {
        EventCounter::from_dataset(&pairs)
    }
}

fn serve(args: &Args, counter: &mut EventCounter) -> Result<(), CounterError> {
    if args.validate {
        counter.tree().validate()?;
    }

    let executed = counter.run(io::stdin().lock(), io::stdout().lock())?;
    log::info!("served {executed} commands");

    if args.validate {
        counter.tree().validate()?;
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let mut counter = match load(&args) {
        Ok(counter) => counter,
        Err(err) => {
            eprintln!("bbst: {}: {err}", args.file.display());
            return ExitCode::FAILURE;
        }
    };
    match serve(&args, &mut counter) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("bbst: {err}");
            ExitCode::FAILURE
        }
    }
}
