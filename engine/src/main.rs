use clap::Parser;
use engine::config::load_config;
use engine::store::{JsonFileStore, ZoneStore};
use engine::supervisor::ServerSupervisor;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;

/// Zone presence synchronization engine.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Path to the engine configuration file
    #[clap(short, long, default_value = "zorp.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let config = load_config(&args.config)?;
    let store: Arc<dyn ZoneStore> = Arc::new(JsonFileStore::open(&config.store_path)?);

    if config.servers.is_empty() {
        warn!("no servers configured, nothing to supervise");
    }

    let mut supervisors = Vec::new();
    for server in &config.servers {
        info!("starting supervisor for {}", server.id);
        supervisors.push(ServerSupervisor::spawn(
            server.clone(),
            config.tuning.clone(),
            Arc::clone(&store),
        ));
    }

    tokio::signal::ctrl_c().await?;
    info!("received Ctrl+C, shutting down");
    for supervisor in supervisors {
        supervisor.shutdown().await;
    }

    Ok(())
}
