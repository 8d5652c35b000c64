mod cli;
mod demo;
mod infra;

use freight_ops::error::AppError;

pub fn run() -> Result<(), AppError> {
    cli::run()
}
