use crate::collectors::{CollectError, MetricsSource, ProcessReading, Reading};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use sysinfo::{CpuExt, DiskExt, PidExt, ProcessExt, System, SystemExt};
use tracing::debug;

/// Reads host metrics through `sysinfo`.
///
/// CPU usage (host-wide and per process) is the delta between two refreshes
/// taken `cpu_window` apart, so every reading spends at least that long.
pub struct SysinfoSource {
    system: System,
    cpu_window: Duration,
    mount: PathBuf,
}

impl SysinfoSource {
    pub fn new(cpu_window: Duration, mount: impl Into<PathBuf>) -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_disks_list();
        Self {
            system,
            cpu_window,
            mount: mount.into(),
        }
    }

    fn disk_usage(&mut self) -> Result<(u64, u64), CollectError> {
        self.system.refresh_disks_list();
        self.system.refresh_disks();
        let disk = self
            .system
            .disks()
            .iter()
            .find(|d| d.mount_point() == self.mount.as_path())
            .ok_or_else(|| CollectError::MountNotFound(self.mount.display().to_string()))?;
        let total = disk.total_space();
        let used = total.saturating_sub(disk.available_space());
        Ok((used, total))
    }
}

#[async_trait]
impl MetricsSource for SysinfoSource {
    async fn read(&mut self, include_processes: bool) -> Result<Reading, CollectError> {
        self.system.refresh_cpu();
        let baseline: HashSet<u32> = if include_processes {
            self.system.refresh_processes();
            self.system
                .processes()
                .keys()
                .map(|pid| pid.as_u32())
                .collect()
        } else {
            HashSet::new()
        };

        tokio::time::sleep(self.cpu_window).await;

        self.system.refresh_cpu();
        let cpus = self.system.cpus();
        if cpus.is_empty() {
            return Err(CollectError::NoCpus);
        }
        let sum: f32 = cpus.iter().map(|c| c.cpu_usage()).sum();
        let cpu_usage_percent = (sum / cpus.len() as f32) as f64;

        self.system.refresh_memory();
        let memory_total_bytes = self.system.total_memory();
        if memory_total_bytes == 0 {
            return Err(CollectError::NoMemory);
        }
        let memory_used_bytes = self.system.used_memory();

        let (disk_used_bytes, disk_total_bytes) = self.disk_usage()?;

        let processes = if include_processes {
            self.system.refresh_processes();
            let list: Vec<ProcessReading> = self
                .system
                .processes()
                .iter()
                .map(|(pid, process)| {
                    let pid = pid.as_u32();
                    ProcessReading {
                        pid,
                        name: process.name().to_string(),
                        cpu_percent: baseline
                            .contains(&pid)
                            .then(|| process.cpu_usage() as f64),
                    }
                })
                .collect();
            debug!(count = list.len(), "processes enumerated");
            Some(list)
        } else {
            None
        };

        Ok(Reading {
            cpu_usage_percent,
            memory_used_bytes,
            memory_total_bytes,
            disk_used_bytes,
            disk_total_bytes,
            processes,
        })
    }
}
