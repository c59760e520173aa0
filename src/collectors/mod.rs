pub mod process;
pub mod system;

use async_trait::async_trait;
use thiserror::Error;

/// Raw output of one sampling pass, before rounding and unit conversion.
#[derive(Debug, Clone, Default)]
pub struct Reading {
    pub cpu_usage_percent: f64,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub disk_used_bytes: u64,
    pub disk_total_bytes: u64,
    pub processes: Option<Vec<ProcessReading>>,
}

#[derive(Debug, Clone)]
pub struct ProcessReading {
    pub pid: u32,
    pub name: String,
    /// `None` when the process has no usable measurement for the window.
    pub cpu_percent: Option<f64>,
}

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("no CPUs reported by the system")]
    NoCpus,
    #[error("total memory reported as zero")]
    NoMemory,
    #[error("mount point {0} not found")]
    MountNotFound(String),
}

#[async_trait]
pub trait MetricsSource: Send {
    /// Takes one reading. Implementations may wait for a measurement window.
    async fn read(&mut self, include_processes: bool) -> Result<Reading, CollectError>;
}
