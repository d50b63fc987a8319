use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use sysinfo::{Disks, System};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::types::Worker;

/// Latest snapshot, replaced wholesale by [`collect_stats`].
pub type SharedStats = Arc<RwLock<Stats>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub total_memory: u64,
    pub available_memory: u64,
    pub used_memory: u64,
    pub total_disk: u64,
    pub free_disk: u64,
    pub used_disk: u64,
    /// Busy fraction in `[0, 1]` since the previous sample.
    pub cpu_usage: f64,
    pub load_average: LoadAverage,
    pub system_name: String,
    pub hostname: String,
    pub total_cpus: u64,
    pub task_count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MemoryInfo {
    pub total: u64,
    pub available: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DiskInfo {
    pub total: u64,
    pub free: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostInfo {
    pub system_name: String,
    pub hostname: String,
    pub total_cpus: u64,
}

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("{0} statistics are unavailable on this host")]
    Unavailable(&'static str),
}

/// Where samples come from. Every category can fail on its own.
pub trait StatsSource: Send {
    fn memory(&mut self) -> Result<MemoryInfo, StatsError>;
    fn disk(&mut self) -> Result<DiskInfo, StatsError>;
    fn cpu_usage(&mut self) -> Result<f64, StatsError>;
    fn load(&mut self) -> Result<LoadAverage, StatsError>;

    fn host(&self) -> HostInfo {
        HostInfo::default()
    }
}

pub struct SysinfoSource {
    sys: System,
}

impl SysinfoSource {
    pub fn new() -> Self {
        // Priming CPU usage makes the first real sample a delta, not zero.
        let mut sys = System::new_all();
        sys.refresh_cpu_usage();
        SysinfoSource { sys }
    }
}

impl StatsSource for SysinfoSource {
    fn memory(&mut self) -> Result<MemoryInfo, StatsError> {
        self.sys.refresh_memory();
        let total = self.sys.total_memory();
        if total == 0 {
            return Err(StatsError::Unavailable("memory"));
        }
        Ok(MemoryInfo {
            total,
            available: self.sys.available_memory(),
        })
    }

    fn disk(&mut self) -> Result<DiskInfo, StatsError> {
        let disks = Disks::new_with_refreshed_list();
        if disks.list().is_empty() {
            return Err(StatsError::Unavailable("disk"));
        }
        Ok(DiskInfo {
            total: disks.iter().map(|disk| disk.total_space()).sum(),
            free: disks.iter().map(|disk| disk.available_space()).sum(),
        })
    }

    fn cpu_usage(&mut self) -> Result<f64, StatsError> {
        self.sys.refresh_cpu_usage();
        if self.sys.cpus().is_empty() {
            return Err(StatsError::Unavailable("cpu"));
        }
        Ok(f64::from(self.sys.global_cpu_usage()) / 100.0)
    }

    fn load(&mut self) -> Result<LoadAverage, StatsError> {
        let load = System::load_average();
        Ok(LoadAverage {
            one: load.one,
            five: load.five,
            fifteen: load.fifteen,
        })
    }

    fn host(&self) -> HostInfo {
        HostInfo {
            system_name: System::name().unwrap_or_else(|| "Unknown".to_string()),
            hostname: System::host_name().unwrap_or_else(|| "Unknown".to_string()),
            total_cpus: self.sys.cpus().len() as u64,
        }
    }
}

fn or_zero<T: Default>(category: &str, sample: Result<T, StatsError>) -> T {
    sample.unwrap_or_else(|e| {
        warn!(category, error = %e, "could not read stats, reporting zero");
        T::default()
    })
}

/// Take one snapshot. A failing category is zeroed, never the whole snapshot.
pub fn get_stats(source: &mut impl StatsSource, task_count: usize) -> Stats {
    let memory = or_zero("memory", source.memory());
    let disk = or_zero("disk", source.disk());
    let cpu_usage = or_zero("cpu", source.cpu_usage()).clamp(0.0, 1.0);
    let load_average = or_zero("load", source.load());
    let host = source.host();

    Stats {
        total_memory: memory.total,
        available_memory: memory.available,
        used_memory: memory.total.saturating_sub(memory.available),
        total_disk: disk.total,
        free_disk: disk.free,
        used_disk: disk.total.saturating_sub(disk.free),
        cpu_usage,
        load_average,
        system_name: host.system_name,
        hostname: host.hostname,
        total_cpus: host.total_cpus,
        task_count,
    }
}

/// Replace the shared snapshot every `interval`.
pub async fn collect_stats<S>(
    mut source: S,
    worker: Arc<Worker>,
    stats: SharedStats,
    interval: Duration,
) where
    S: StatsSource + 'static,
{
    loop {
        let snapshot = get_stats(&mut source, worker.queue_depth());
        debug!(
            cpu_usage = snapshot.cpu_usage,
            used_memory = snapshot.used_memory,
            task_count = snapshot.task_count,
            "collected stats"
        );
        *stats.write().await = snapshot;

        tokio::time::sleep(interval).await;
    }
}
