use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use specfit::config::SessionConfig;
use specfit::estimator::{DEFAULT_BACKGROUND_DEGREE, DEFAULT_SEARCH_RADIUS};
use specfit::session::Session;

/// Interactive spectrum fitting shell
#[derive(Debug, Parser)]
#[command(name = "specfit", version, about)]
struct Cli {
    /// Calibration table with one `name: c0 c1 ...` entry per line
    #[arg(short = 'C', long)]
    calibrations: Option<PathBuf>,

    /// Command file to run at startup, may be repeated
    #[arg(short, long)]
    batch: Vec<PathBuf>,

    /// Command line to run after the batch files, may be repeated
    #[arg(short = 'e', long = "execute")]
    commands: Vec<String>,

    /// Degree of the background polynomial of the reference fitter
    #[arg(long, default_value_t = DEFAULT_BACKGROUND_DEGREE)]
    background_degree: usize,

    /// Distance around a peak hint searched for its apex
    #[arg(long, default_value_t = DEFAULT_SEARCH_RADIUS)]
    search_radius: f64,

    /// Exit after the startup commands instead of reading standard input
    #[arg(short = 'n', long)]
    no_interactive: bool,
}

impl From<Cli> for SessionConfig {
    fn from(cli: Cli) -> Self {
        SessionConfig {
            calibration_table: cli.calibrations,
            batch_files: cli.batch,
            commands: cli.commands,
            background_degree: cli.background_degree,
            search_radius: cli.search_radius,
            interactive: !cli.no_interactive,
        }
    }
}

fn main() -> ExitCode {
    pretty_env_logger::init();
    let config = SessionConfig::from(Cli::parse());
    log::debug!("Starting with {config:?}");

    let session = match Session::new(config, Box::new(io::stdout())) {
        Ok(session) => session,
        Err(err) => {
            eprintln!("specfit: {err}");
            return ExitCode::FAILURE;
        }
    };
    match session.run(io::stdin().lock()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("specfit: {err}");
            ExitCode::FAILURE
        }
    }
}
