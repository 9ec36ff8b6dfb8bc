use crate::demo::{run_demo, run_headroom, DemoArgs, HeadroomArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use nationality_quota::error::AppError;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "Nationality Quota Service",
    about = "Run and demonstrate per-nationality work-permit quota allocation",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Walk through approval, blocking and queue scenarios on the demo roster
    Demo(DemoArgs),
    /// Print headroom and the tier cascade for one nationality
    Headroom(HeadroomArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// JSON roster to load instead of the built-in demo roster
    #[arg(long)]
    pub(crate) seed: Option<PathBuf>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Demo(args) => run_demo(args),
        Command::Headroom(args) => run_headroom(args),
    }
}
