use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::RwLock;
use tracing::info;

use crate::lib::{
    config::AgentConfig,
    logging,
    tasks::docker::DockerClient,
    worker::{
        stats::{Stats, SysinfoSource, collect_stats},
        types::{TaskServer, Worker},
        worker::run_tasks,
    },
};

mod lib {
    pub mod config;
    pub mod logging;
    pub mod tasks {
        pub mod docker;
        pub mod state;
        pub mod types;
    }
    pub mod worker {
        pub mod api;
        pub mod stats;
        pub mod types;
        pub mod worker;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AgentConfig::parse();
    logging::init(config.log_format, &config.log_level)?;

    let runtime = DockerClient::new().context("connecting to the docker daemon")?;
    let worker = Arc::new(
        Worker::new(&config.name, Arc::new(runtime))
            .with_runtime_timeout(config.runtime_timeout()),
    );
    let stats = Arc::new(RwLock::new(Stats::default()));

    // Separate tasks so a stuck runtime call never stalls metrics and vice versa.
    tokio::spawn(run_tasks(worker.clone(), config.reconcile_interval()));
    tokio::spawn(collect_stats(
        SysinfoSource::new(),
        worker.clone(),
        stats.clone(),
        config.stats_interval(),
    ));

    info!(worker = %config.name, "worker started");
    TaskServer::new(worker, stats, &config.host, config.port)
        .start_server()
        .await
        .context("running the task server")?;

    Ok(())
}
