mod commands;

use clap::Parser;
use twobeam_core::domain::SimError;

pub fn run_from_env() -> i32 {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match run(args) {
        Ok(code) => code,
        Err(error) => {
            let error = error.as_sim_error();
            eprintln!("{}", error.diagnostic_line());
            if let Some(summary_line) = error.fatal_exit_line() {
                eprintln!("{}", summary_line);
            }
            error.exit_code()
        }
    }
}

pub fn run<I, S>(args: I) -> Result<i32, CliError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let full_args = std::iter::once("twobeam".to_string())
        .chain(args.into_iter().map(Into::into))
        .collect::<Vec<_>>();
    parse_and_dispatch(full_args)
}

fn parse_and_dispatch(args: Vec<String>) -> Result<i32, CliError> {
    match Cli::try_parse_from(&args) {
        Ok(cli) => dispatch_parsed(cli.command),
        Err(err) => match err.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                print!("{}", err);
                Ok(0)
            }
            _ => Err(CliError::Usage(err.to_string())),
        },
    }
}

#[derive(Parser)]
#[command(
    name = "twobeam",
    version,
    about = "Two-beam dislocation contrast simulator"
)]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(clap::Subcommand)]
enum CliCommand {
    /// Simulate bright- and dark-field images and write them as JSON
    Simulate(commands::SimulateArgs),
    /// Resolve and print the simulation geometry without integrating
    Geometry(commands::GeometryArgs),
    /// Run the reference and accelerated backends and compare their images
    CheckBackends(commands::CheckBackendsArgs),
    /// Print the default simulation config as JSON
    DefaultConfig,
}

fn dispatch_parsed(command: CliCommand) -> Result<i32, CliError> {
    match command {
        CliCommand::Simulate(args) => commands::run_simulate_command(args),
        CliCommand::Geometry(args) => commands::run_geometry_command(args),
        CliCommand::CheckBackends(args) => commands::run_check_backends_command(args),
        CliCommand::DefaultConfig => commands::run_default_config_command(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Compute(SimError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CliError {
    fn as_sim_error(&self) -> SimError {
        match self {
            Self::Usage(message) => SimError::input_validation("INPUT.CLI_USAGE", message.clone()),
            Self::Compute(error) => error.clone(),
            Self::Internal(error) => SimError::io_system("IO.CLI", format!("{error:#}")),
        }
    }
}

impl From<SimError> for CliError {
    fn from(error: SimError) -> Self {
        Self::Compute(error)
    }
}
