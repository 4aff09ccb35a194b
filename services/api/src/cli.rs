use crate::demo::{run_demo, DemoArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use school_erp::config::{AppConfig, DatabaseConfig};
use school_erp::db::{migrations::current_user_version, open_database};
use school_erp::error::AppError;
use school_erp::telemetry;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "School ERP",
    about = "Run the school administration backend and its academic-year tooling",
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
    /// Apply pending schema migrations and exit
    Migrate(MigrateArgs),
    /// Run an in-memory year-end rollover and print the outcome
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
}

#[derive(Args, Debug, Default)]
pub(crate) struct MigrateArgs {
    /// Database file to migrate (defaults to APP_DATABASE_PATH)
    #[arg(long)]
    pub(crate) database: Option<PathBuf>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Migrate(args) => run_migrate(args),
        Command::Demo(args) => run_demo(args),
    }
}

fn run_migrate(args: MigrateArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let database = args
        .database
        .map(DatabaseConfig::File)
        .unwrap_or(config.database);
    let conn = open_database(&database)?;
    let version = current_user_version(&conn)?;

    info!(?database, version, "schema up to date");
    println!("Schema version {version} ({database:?})");
    Ok(())
}
