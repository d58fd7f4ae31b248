//! membership-sim: Run a cluster of in-process nodes and watch their views
//! converge.
//!
//! Node 0 founds the overlay, the rest join through it, then every node
//! refreshes once per round.

use anyhow::{Result, bail};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use membership_core::SystemClock;
use membership_sim::{Cluster, Config};

#[derive(Parser, Debug)]
#[command(name = "membership-sim")]
#[command(about = "Simulate peer membership convergence")]
struct Args {
    /// Number of nodes to start
    #[arg(short, long, default_value_t = 5)]
    nodes: usize,

    /// Refresh rounds to run before exiting
    #[arg(short, long, default_value_t = 3)]
    rounds: usize,

    /// Response bandwidth in bytes/sec (0 = unthrottled)
    #[arg(long)]
    bandwidth: Option<u64>,

    /// Concurrent requests an endpoint serves before rejecting
    #[arg(long)]
    max_in_flight: Option<usize>,

    /// Delay before announced nodes activate
    #[arg(long)]
    activation_delay_ms: Option<u64>,

    /// How long removed nodes are remembered
    #[arg(long)]
    grace_window_ms: Option<u64>,

    /// Time between refresh rounds (default: activation delay + 1s)
    #[arg(long)]
    refresh_interval_ms: Option<u64>,

    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

impl Args {
    /// File config (or defaults) with flags applied on top.
    fn resolve_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };

        if let Some(bandwidth) = self.bandwidth {
            config.sim.bandwidth_bytes_per_sec = bandwidth;
        }
        if let Some(max) = self.max_in_flight {
            config.sim.max_in_flight = max;
        }
        if let Some(ms) = self.activation_delay_ms {
            config.membership.activation_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.grace_window_ms {
            config.membership.grace_window = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Respects RUST_LOG, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,membership_sim=debug"
    } else {
        "info,membership_sim=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if args.nodes == 0 {
        bail!("--nodes must be at least 1");
    }

    let config = args.resolve_config()?;
    let refresh_interval = args
        .refresh_interval_ms
        .map(Duration::from_millis)
        .unwrap_or(config.membership.activation_delay + Duration::from_secs(1));

    info!("Starting membership-sim with {} node(s)", args.nodes);
    info!(
        "Activation delay {:?}, grace window {:?}, refresh every {:?}",
        config.membership.activation_delay, config.membership.grace_window, refresh_interval
    );

    let mut cluster = Cluster::new(config, Arc::new(SystemClock));
    for _ in 0..args.nodes {
        cluster.spawn_node();
    }
    cluster.start_dispatchers();

    cluster.found(0)?;
    for index in 1..args.nodes {
        if let Err(e) = cluster.join(index, 0).await {
            warn!("Node {} failed to join: {:#}", index, e);
        }
    }

    info!("Running {} round(s). Press Ctrl+C to stop.", args.rounds);

    for round in 1..=args.rounds {
        let scheduled = cluster.refresh_all().await;
        info!("Round {}: {} resync(s) scheduled", round, scheduled);

        tokio::select! {
            _ = tokio::time::sleep(refresh_interval) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }

        for summary in cluster.summary() {
            info!(
                "{}: {} active, {} pending, {} recently removed",
                summary.address, summary.active, summary.pending, summary.recently_removed
            );
        }
        info!("Round {}: converged = {}", round, cluster.converged());
    }

    info!("Shutting down");
    Ok(())
}
