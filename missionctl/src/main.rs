//! missionctl: inspect and maintain a mission state store on disk
//!
//! Opens the SQLite substrate directly. Nothing runs implicitly: migration
//! and expiry purges only happen when asked for.

mod commands;

use std::path::PathBuf;

use clap::Parser;
use tracing::{debug, info};

use commands::MissionCommands;
use mission_store::{MissionStore, StoreConfig};

#[derive(Parser)]
#[command(name = "missionctl")]
#[command(about = "Inspect and maintain the drone-mission state store")]
struct Cli {
    /// Path to a YAML store configuration
    #[arg(short, long, env = "MISSIONCTL_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database (overrides the configuration)
    #[arg(long, env = "MISSION_STORE_DB")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: MissionCommands,
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mission_store=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            debug!("Loading config from {}", path.display());
            StoreConfig::load(path)?.with_env_overrides()
        }
        None => StoreConfig::from_env(),
    };
    if let Some(db) = cli.db {
        config.database_path = Some(db);
    }
    if config.database_path.is_none() {
        info!("No database configured, using ./missions.db");
        config.database_path = Some(PathBuf::from("missions.db"));
    }
    config.migrate_on_open = false;
    config.purge_expired_on_open = false;

    let (store, _) = MissionStore::open_sqlite(config)?;
    let output = commands::execute(&store, cli.command)?;
    println!("{}", output);

    Ok(())
}
