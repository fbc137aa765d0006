use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod connect;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect to a server socket and run the session.
    Connect(ConnectArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Connect(args) => connect::run(args),
        Command::Version(args) => version::run(args, format),
    }
}

#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Unix domain socket path of the server endpoint.
    pub path: PathBuf,
    /// Shut down after this much link silence (e.g. 30s, 500ms).
    #[arg(long, value_name = "DURATION")]
    pub silence_timeout: Option<String>,
    /// Maximum accepted frame size in bytes.
    #[arg(long, value_name = "BYTES")]
    pub max_frame_size: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
