use crate::demo::{
    run_demo, run_import_payments, run_stage, DemoArgs, ImportPaymentsArgs, StageArgs,
};
use clap::{Parser, Subcommand};
use freight_ops::config::AppConfig;
use freight_ops::error::AppError;
use freight_ops::telemetry;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "Freight Ops",
    about = "Walk freight jobs through clearance, payments and settlement from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one sea import from documentation to completion (default command)
    Demo(DemoArgs),
    /// Record payment requests from a CSV sheet against a cleared demo job
    ImportPayments(ImportPaymentsArgs),
    /// Print the derived view of a fixture job walked to a chosen step
    Stage(StageArgs),
}

pub(crate) fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;
    info!(
        environment = ?config.environment,
        clearance_signal = ?config.engine.clearance_signal,
        "freight ops cli starting"
    );

    match cli
        .command
        .unwrap_or_else(|| Command::Demo(DemoArgs::default()))
    {
        Command::Demo(args) => run_demo(args, config.engine),
        Command::ImportPayments(args) => run_import_payments(args, config.engine),
        Command::Stage(args) => run_stage(args, config.engine),
    }
}
