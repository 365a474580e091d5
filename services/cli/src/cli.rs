use crate::server;
use crate::terminal;
use clap::{Args, Parser, Subcommand};
use cv_tagger::error::AppError;
use cv_tagger::workflows::cv_pipeline::RunRequest;

#[derive(Parser, Debug)]
#[command(
    name = "CV Tagger",
    about = "Classify recent applicant CVs and tag them in the applicant-tracking service",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipeline once in the terminal (default command)
    Run(RunArgs),
    /// Start the HTTP control service
    Serve(ServeArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct RunArgs {
    /// Maximum number of candidates to process
    #[arg(long)]
    pub(crate) limit: Option<usize>,
    /// Push tags back after the report is confirmed
    #[arg(long)]
    pub(crate) upload: bool,
    /// Pause between consecutive items, in milliseconds
    #[arg(long)]
    pub(crate) delay_ms: Option<u64>,
    /// Approve the upload without prompting
    #[arg(long, requires = "upload")]
    pub(crate) yes: bool,
}

impl RunArgs {
    /// Flags left unset fall back to the loaded configuration.
    pub(crate) fn request(&self) -> RunRequest {
        RunRequest {
            limit: self.limit,
            upload: self.upload.then_some(true),
            delay_ms: self.delay_ms,
        }
    }
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Run(RunArgs::default()));

    match command {
        Command::Run(args) => terminal::run(args).await,
        Command::Serve(args) => server::run(args).await,
    }
}
