//! Demo binary: run a small controller fleet against the in-memory store
//!
//! Each replica votes for the lowest replica index it has observed, the
//! way a controller owner typically would; the demo prints the snapshots
//! and the elected master.

use clap::{Parser, Subcommand};
use fleetcoord::{
    BincodeBundleCodec, Config, CoordinationListener, CoordinatorConfig, MemoryConnector,
    MetadataCoordinator, VoteSnapshot,
};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "fleetcoord-demo")]
#[command(about = "fleetcoord election demo over the embedded store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an election round-trip with a local fleet
    Run {
        /// Cluster name
        #[arg(long, default_value = "content")]
        cluster: String,

        /// Number of controller replicas
        #[arg(long, default_value = "3")]
        fleet: u16,

        /// Scheduling rounds to drive
        #[arg(long, default_value = "10")]
        rounds: u32,
    },
}

struct DemoListener {
    index: u16,
    last: Arc<Mutex<Option<VoteSnapshot>>>,
}

impl CoordinationListener for DemoListener {
    fn on_disconnected(&self) {
        tracing::warn!(index = self.index, "Replica lost coordination session");
    }

    fn on_vote_snapshot(&self, snapshot: &VoteSnapshot) {
        tracing::info!(
            index = self.index,
            votes = snapshot.len(),
            "Vote snapshot received"
        );
        *self.last.lock().unwrap() = Some(snapshot.clone());
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            cluster,
            fleet,
            rounds,
        } => {
            let connector = Arc::new(MemoryConnector::from_config(&CoordinatorConfig::default())?);
            let codec = Arc::new(BincodeBundleCodec);

            let mut replicas = Vec::new();
            for index in 0..fleet {
                let mut config = Config::new(cluster.clone(), index);
                config.fleet_size = fleet;
                config.validate()?;

                let last = Arc::new(Mutex::new(None));
                let listener = Arc::new(DemoListener {
                    index,
                    last: last.clone(),
                });
                let coordinator =
                    MetadataCoordinator::new(&config, connector.clone(), codec.clone(), listener);
                replicas.push((coordinator, last));
            }

            for round in 0..rounds {
                for (coordinator, last) in replicas.iter_mut() {
                    coordinator.tick();
                    // vote for the lowest replica index observed so far
                    let vote = last
                        .lock()
                        .unwrap()
                        .as_ref()
                        .and_then(|snapshot| snapshot.iter().map(|(index, _)| index).min());
                    if let Some(vote) = vote {
                        coordinator.set_master_vote(vote);
                    }
                }
                tracing::debug!(round, "Round complete");
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }

            for (index, (_, last)) in replicas.iter().enumerate() {
                if let Some(snapshot) = last.lock().unwrap().as_ref() {
                    match snapshot.winner(fleet) {
                        Some(master) => tracing::info!(
                            replica = index,
                            master,
                            "Replica sees an elected master"
                        ),
                        None => tracing::info!(replica = index, "No master elected yet"),
                    }
                }
            }
        }
    }

    Ok(())
}
