use std::{
    fs::File,
    io::{self, BufWriter, Write},
    process,
};

use clap::error::ErrorKind;
use tracing_subscriber::EnvFilter;
use zombie_finder::{
    ZombieError,
    cli::{Cli, Mode},
};

/// Exit code for usage and operational failures.
const EXIT_FAILURE: i32 = -1;

/// Exit code for a 32-bit build running on 64-bit Windows.
const EXIT_WRONG_ARCHITECTURE: i32 = -2;

fn main() {
    process::exit(run());
}

fn run() -> i32 {
    if is_wow64() {
        eprintln!("{}", ZombieError::WrongArchitecture);
        return EXIT_WRONG_ARCHITECTURE;
    }

    let cli = match Cli::try_parse_args(std::env::args_os()) {
        Ok(cli) => cli,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            err.exit()
        }
        Err(err) => {
            init_tracing(false);
            if let Err(print_err) = err.print() {
                tracing::warn!(%print_err, %err, "failed to print usage error");
            }
            return EXIT_FAILURE;
        }
    };

    init_tracing(cli.verbose);

    let mode = match cli.mode() {
        Ok(mode) => mode,
        Err(err) => {
            eprintln!("{err}");
            return EXIT_FAILURE;
        }
    };

    let mut output: Box<dyn Write> = match &cli.out {
        Some(path) => match File::create(path) {
            Ok(file) => Box::new(BufWriter::new(file)),
            Err(err) => {
                eprintln!("Cannot open output file {}: {err}", path.display());
                return EXIT_FAILURE;
            }
        },
        None => Box::new(io::stdout().lock()),
    };

    let result = execute(&mode, &mut output).and_then(|()| Ok(output.flush()?));

    match result {
        Ok(()) => 0,
        Err(err) => {
            tracing::debug!(?err, "failed");
            eprintln!("Error: {err}");
            EXIT_FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

#[cfg(windows)]
fn is_wow64() -> bool {
    zombie_finder::driver::windows::is_wow64().unwrap_or(false)
}

#[cfg(not(windows))]
fn is_wow64() -> bool {
    false
}

#[cfg(windows)]
fn execute(mode: &Mode, output: &mut dyn Write) -> Result<(), ZombieError> {
    use zombie_finder::{
        ServiceLookup, ThreadReport, ZombieDriver as _, ZombieOwners,
        driver::windows::{WindowsServices, ZombieWindowsDriver},
    };

    let driver = ZombieWindowsDriver::new()?;

    match mode {
        Mode::Threads => {
            let report = ThreadReport::collect(&driver);
            report.write_tsv(&mut *output)?;

            for error in &report.errors {
                eprintln!("{error}");
            }
        }
        Mode::Owners { report, options } => {
            let now = driver.system_time();
            let source = WindowsServices::default();
            let services = ServiceLookup::new(&source);

            let mut owners = ZombieOwners::new();
            owners.update(&driver, &services, options)?;
            report.write(&owners, now, &mut *output)?;

            for error in owners.diagnostic_errors() {
                eprintln!("Warning: {error}");
            }
        }
    }

    Ok(())
}

#[cfg(not(windows))]
fn execute(_mode: &Mode, _output: &mut dyn Write) -> Result<(), ZombieError> {
    eprintln!("zombie-finder only runs on Windows.");
    Err(ZombieError::NotSupported)
}
