use crate::demo::{run_demo, DemoArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use homebuy::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Homebuy Purchase Engine",
    about = "Run the buyer verification and purchase lifecycle service, or walk through a demo",
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
    /// Walk a buyer from registration to a fully paid property against in-memory storage
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Seconds between expiry sweeps and outbox retries (0 disables the background loop)
    #[arg(long, default_value_t = 60)]
    pub(crate) maintenance_interval: u64,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or_else(|| {
        Command::Serve(ServeArgs {
            maintenance_interval: 60,
            ..ServeArgs::default()
        })
    });

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Demo(args) => run_demo(args),
    }
}
