use crate::collectors::ProcessReading;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessEntry {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f64,
}

/// Picks up to `limit` processes with the highest CPU usage.
///
/// Unreadable entries are dropped, percentages are rounded to two decimals,
/// the result is ordered by descending CPU and each pid appears once.
pub fn top_by_cpu(processes: Vec<ProcessReading>, limit: usize) -> Vec<ProcessEntry> {
    let mut entries: Vec<ProcessEntry> = processes
        .into_iter()
        .filter_map(|p| {
            let cpu = p.cpu_percent.filter(|v| v.is_finite())?;
            Some(ProcessEntry {
                pid: p.pid,
                name: p.name,
                cpu_percent: round_to(cpu.max(0.0), 2),
            })
        })
        .collect();

    entries.sort_by(|a, b| b.cpu_percent.total_cmp(&a.cpu_percent));

    let mut seen = HashSet::new();
    entries.retain(|e| seen.insert(e.pid));
    entries.truncate(limit);
    entries
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}
