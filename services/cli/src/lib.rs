mod cli;
mod infra;
mod routes;
mod server;
mod terminal;

use cv_tagger::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
