use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use log::{info, warn};

use paxos_round::{logger::LogFacadeSink, Cluster, ClusterConfig};

/// Run one single-decree Paxos round on every node of an in-process cluster.
#[derive(Parser)]
struct Args {
    /// number of nodes in the cluster
    #[clap(long)]
    nodes: Option<usize>,

    /// path to a YAML config file
    #[clap(long)]
    config: Option<PathBuf>,

    /// give up on a round after this many attempts
    #[clap(long)]
    max_attempts: Option<u32>,

    /// give up on a round after this many milliseconds
    #[clap(long)]
    round_timeout_ms: Option<u64>,

    /// treat a peer as unreachable if it does not answer within this many milliseconds
    #[clap(long)]
    call_timeout_ms: Option<u64>,

    /// sleep up to this many milliseconds before retrying
    #[clap(long)]
    retry_backoff_ms: Option<u64>,

    /// delay each acceptor request by up to this many milliseconds
    #[clap(long)]
    network_delay_ms: Option<u64>,

    /// print the final report as JSON on stdout
    #[clap(long)]
    json: bool,
}

impl Args {
    fn apply(&self, config: &mut ClusterConfig) {
        let ms = |v: Option<u64>| v.map(Duration::from_millis).filter(|d| !d.is_zero());
        if let Some(nodes) = self.nodes {
            config.nodes = nodes;
        }
        if self.max_attempts.is_some() {
            config.max_attempts = self.max_attempts;
        }
        if self.round_timeout_ms.is_some() {
            config.round_timeout = self.round_timeout_ms.map(Duration::from_millis);
        }
        if self.call_timeout_ms.is_some() {
            config.call_timeout = self.call_timeout_ms.map(Duration::from_millis);
        }
        if self.retry_backoff_ms.is_some() {
            config.retry_backoff = ms(self.retry_backoff_ms);
        }
        if self.network_delay_ms.is_some() {
            config.network_delay = ms(self.network_delay_ms);
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ClusterConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ClusterConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;

    env_logger::Builder::from_env(Env::default().default_filter_or(config.log_level.as_str()))
        .init();

    let mut cluster = Cluster::new(&config, Arc::new(LogFacadeSink))?;
    let results = cluster.run_round_all();
    for (id, result) in &results {
        match result {
            Ok(outcome) => info!(
                "Node {} committed value {} after {} attempt(s)",
                id, outcome.value, outcome.attempts
            ),
            Err(err) => warn!("Node {} did not commit: {}", id, err),
        }
    }

    let report = cluster.shutdown(results);
    info!(
        "Values committed across the cluster: {:?}",
        report.committed_values()
    );
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}
