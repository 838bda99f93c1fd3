//! Canteen CLI - Database migrations and registration tooling.
//!
//! # Usage
//!
//! ```bash
//! # Run registration database migrations
//! canteen migrate
//!
//! # Show the admin slot and the shops that have a vendor
//! canteen allocation
//!
//! # Dry-run a vendor registration, verifying the email after 4 seconds
//! canteen register -e a@x.com -p secret1 -r vendor -s shop-1 --verify-after 4
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `allocation` - Print the current allocation snapshot
//! - `register` - Run a registration against in-memory collaborators

#![cfg_attr(not(test), forbid(unsafe_code))]

use canteen_registration::RegistrationConfig;
use clap::{Parser, Subcommand};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "canteen")]
#[command(author, version, about = "Canteen CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run registration database migrations
    Migrate,
    /// Show the admin slot and the shops that have a vendor
    Allocation,
    /// Dry-run a registration against in-memory collaborators
    Register {
        /// Email address to register
        #[arg(short, long)]
        email: String,

        /// Password for the new account
        #[arg(short, long)]
        password: String,

        /// Role (`customer`, `vendor`, `admin`)
        #[arg(short, long, default_value = "customer")]
        role: String,

        /// Shop to run (vendors only)
        #[arg(short, long)]
        shop: Option<String>,

        /// Verify the email after this many seconds (never, if omitted)
        #[arg(long)]
        verify_after: Option<u64>,
    },
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &RegistrationConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    Some(guard)
}

/// Forward warnings and errors to Sentry as events, lower levels as breadcrumbs.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    let config = match RegistrationConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            #[allow(clippy::print_stderr)]
            {
                eprintln!("Configuration error: {e}");
            }
            std::process::exit(2);
        }
    };

    let _sentry_guard = init_sentry(&config);

    // Defaults to info level for our crates if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "canteen_registration=info,canteen_cli=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli, &config).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: &RegistrationConfig) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run(config).await?,
        Commands::Allocation => commands::allocation::run(config).await?,
        Commands::Register {
            email,
            password,
            role,
            shop,
            verify_after,
        } => {
            let args = commands::register::RegisterArgs {
                email,
                password,
                role,
                shop,
                verify_after,
            };
            commands::register::run(config, args).await?;
        }
    }
    Ok(())
}
