use std::time::Duration;

use clap::Parser;

use super::logging::LogFormat;

#[derive(Parser, Debug, Clone)]
#[command(name = "r_cube", about = "Node-local task agent")]
pub struct AgentConfig {
    /// Address the task API binds to.
    #[arg(long, env = "CUBE_HOST", default_value = "localhost")]
    pub host: String,

    #[arg(long, env = "CUBE_PORT", default_value_t = 7777)]
    pub port: u16,

    #[arg(long, env = "CUBE_WORKER_NAME", default_value = "default_worker")]
    pub name: String,

    /// Seconds between reconciliation passes; one queued task per pass.
    #[arg(long, env = "CUBE_RECONCILE_INTERVAL", default_value_t = 10)]
    pub reconcile_interval_secs: u64,

    /// Seconds between host metric samples.
    #[arg(long, env = "CUBE_STATS_INTERVAL", default_value_t = 15)]
    pub stats_interval_secs: u64,

    /// Upper bound for a single container operation. Unbounded when unset.
    #[arg(long, env = "CUBE_RUNTIME_TIMEOUT")]
    pub runtime_timeout_secs: Option<u64>,

    #[arg(long, env = "CUBE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, value_enum, env = "CUBE_LOG_FORMAT", default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl AgentConfig {
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    pub fn runtime_timeout(&self) -> Option<Duration> {
        self.runtime_timeout_secs.map(Duration::from_secs)
    }
}
