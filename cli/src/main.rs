//! websettings CLI - inspect and edit settings stores

mod commands;

use clap::Parser;
use commands::{execute, Command};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;
use websettings_core::{Format, Scope, SettingsConfig, StaticProbe, Status};
use websettings_store::{create_sled_host, BackendSelector, EventLoop, HostEnvironment};

#[derive(Parser)]
#[command(name = "websettings")]
#[command(about = "Read and write namespaced application settings")]
#[command(version)]
struct Cli {
    /// Host database directory
    #[arg(long, default_value = "./websettings-db")]
    db: PathBuf,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Storage format
    #[arg(short, long, default_value = "native")]
    format: Format,

    /// User or system scope
    #[arg(short, long, default_value = "user")]
    scope: Scope,

    /// Organization name
    #[arg(short, long)]
    org: String,

    /// Application name (empty for organization-wide settings)
    #[arg(short, long, default_value = "")]
    app: String,

    /// Do not read through to the fallback tiers
    #[arg(long)]
    no_fallbacks: bool,

    /// Act as if the host cannot persist anything
    #[arg(long)]
    no_persist: bool,

    #[command(subcommand)]
    command: Command,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => SettingsConfig::load(path)?,
        None => SettingsConfig::default(),
    };
    config.validate()?;
    init_logging(&config.log_level);

    let events = EventLoop::new();
    let host = create_sled_host(&cli.db)?;
    let env = HostEnvironment::new(
        Arc::new(host.key_value_store(Some(config.local_quota_bytes))),
        Arc::new(host.durable_database(events.handle())),
        Arc::new(StaticProbe(!cli.no_persist)),
    );
    let selector = BackendSelector::new(env, config);

    let backend = match selector.create(cli.format, cli.scope, &cli.org, &cli.app) {
        Some(backend) => backend,
        None => {
            eprintln!("Error: no settings backend for format {}", cli.format);
            std::process::exit(1);
        }
    };
    backend.set_fallbacks_enabled(!cli.no_fallbacks);

    // Let the durable store finish loading before the command runs
    let drained = events.run_until_idle();
    debug!("Processed {} pending completions", drained);

    let result = execute(&cli.command, backend.as_ref());

    backend.sync();
    events.run_until_idle();
    if let Err(e) = host.flush() {
        warn!("Cannot flush host database: {}", e);
    }

    let status = backend.status();
    if status != Status::NoError {
        eprintln!("Status: {:?}", status);
    }
    drop(backend);

    match result {
        Ok(lines) => {
            for line in lines {
                println!("{}", line);
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}
