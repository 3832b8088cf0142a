//! mocktrade CLI - script entry points for the data tier
//!
//! Every subcommand that touches the store runs under the lifecycle guard:
//! exit 0 on success (including "already applied" migrations), non-zero on
//! any fatal error, with the data tier shut down either way.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use mocktrade_core::{guard, DataTier, EnvSnapshot};

mod commands;
mod migrations;
mod tracing_setup;

#[derive(Parser, Debug)]
#[command(
    name = "mocktrade",
    author,
    version,
    about = "Data-tier bootstrap for mocktrade: migrations and bootstrap records",
    long_about = "Apply the declared schema migrations, create bootstrap records and check \
                  primary-store and cache connectivity. Connection settings come from DB_URL \
                  (jdbc:postgresql:// or postgresql://) or DB_HOST/DB_PORT/DB_NAME/DB_USER/\
                  DB_PASSWORD, and REDIS_HOST/REDIS_PORT."
)]
struct Cli {
    /// Enable debug logging (RUST_LOG still takes precedence)
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply every declared migration in order
    Migrate,
    /// Apply one declared migration by name (operator repair)
    MigrateOne(commands::migrate::MigrateOneArgs),
    /// List declared migrations in application order
    Migrations,
    /// Create the bootstrap trader and cash account
    SeedAccount(commands::seed::SeedAccountArgs),
    /// Show resolved configuration and store/cache health
    Status,
}

impl Commands {
    fn operation(&self) -> &'static str {
        match self {
            Self::Migrate => "migrate",
            Self::MigrateOne(_) => "migrate-one",
            Self::Migrations => "migrations",
            Self::SeedAccount(_) => "seed-account",
            Self::Status => "status",
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Ignore a missing .env
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let env = EnvSnapshot::from_process();
    let tracing_config = tracing_setup::TracingConfig::from_env(&env, cli.debug);
    tracing_setup::init(&tracing_config).ok();

    let tier = DataTier::from_env(&env);
    let operation = cli.command.operation();

    let outcome = match cli.command {
        // Pure listing; no store connection to guard or shut down
        Commands::Migrations => guard(operation, async { commands::run_list() }).await,
        Commands::Migrate => tier.run_guarded(operation, commands::run_migrate(&tier)).await,
        Commands::MigrateOne(args) => {
            tier.run_guarded(operation, commands::run_migrate_one(&tier, args)).await
        }
        Commands::SeedAccount(args) => {
            tier.run_guarded(operation, commands::run_seed_account(&tier, args)).await
        }
        Commands::Status => tier.run_guarded(operation, commands::run_status(&tier)).await,
    };

    outcome.exit_code()
}
