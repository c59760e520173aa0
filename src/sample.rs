use crate::collectors::process::{round_to, top_by_cpu, ProcessEntry};
use crate::collectors::Reading;
use crate::config::Profile;
use chrono::{Local, SecondsFormat};
use serde::{Deserialize, Serialize};

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * 1024 * 1024;

/// Identifiers attached to every sample for the lifetime of the process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Identity {
    pub tenant_id: Option<String>,
    pub container_id: Option<String>,
    pub key: Option<String>,
}

/// One point-in-time snapshot. Parsing accepts both camelCase and snake_case
/// metric names, so any profile's payload reads back into this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    #[serde(
        rename = "tid",
        alias = "tenantId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub tenant_id: Option<String>,
    #[serde(rename = "cid", default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub timestamp: String,
    #[serde(alias = "cpu_usage_percent")]
    pub cpu_usage_percent: f64,
    #[serde(alias = "memory_used_mb")]
    pub memory_used_mb: u64,
    #[serde(alias = "memory_total_mb")]
    pub memory_total_mb: u64,
    #[serde(alias = "disk_used_gb")]
    pub disk_used_gb: u64,
    #[serde(alias = "disk_total_gb")]
    pub disk_total_gb: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_list: Option<Vec<ProcessEntry>>,
}

#[derive(Serialize)]
struct BasicRecord<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<&'a str>,
    timestamp: &'a str,
    cpu_usage_percent: f64,
    memory_used_mb: u64,
    memory_total_mb: u64,
    disk_used_gb: u64,
    disk_total_gb: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TenantRecord<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    tenant_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<&'a str>,
    timestamp: &'a str,
    cpu_usage_percent: f64,
    memory_used_mb: u64,
    memory_total_mb: u64,
    disk_used_gb: u64,
    disk_total_gb: u64,
}

impl Sample {
    /// Builds a sample from a single reading. Only the identifiers the
    /// profile carries are attached.
    pub fn capture(
        identity: &Identity,
        reading: Reading,
        timestamp: String,
        profile: Profile,
        top_processes: usize,
    ) -> Self {
        let cpu = if reading.cpu_usage_percent.is_finite() {
            reading.cpu_usage_percent.clamp(0.0, 100.0)
        } else {
            0.0
        };
        let process_list = if profile.includes_processes() {
            Some(top_by_cpu(
                reading.processes.unwrap_or_default(),
                top_processes,
            ))
        } else {
            None
        };

        Self {
            tenant_id: identity
                .tenant_id
                .clone()
                .filter(|_| profile.requires_tenant_id()),
            container_id: identity
                .container_id
                .clone()
                .filter(|_| profile.requires_container_id()),
            key: identity.key.clone(),
            timestamp,
            cpu_usage_percent: round_to(cpu, 1),
            memory_used_mb: reading.memory_used_bytes / MIB,
            memory_total_mb: reading.memory_total_bytes / MIB,
            disk_used_gb: reading.disk_used_bytes / GIB,
            disk_total_gb: reading.disk_total_bytes / GIB,
            process_list,
        }
    }

    pub fn to_json(&self, profile: Profile) -> Result<String, serde_json::Error> {
        match profile {
            Profile::Full => serde_json::to_string(self),
            Profile::Tenant => serde_json::to_string(&TenantRecord {
                tenant_id: self.tenant_id.as_deref(),
                key: self.key.as_deref(),
                timestamp: &self.timestamp,
                cpu_usage_percent: self.cpu_usage_percent,
                memory_used_mb: self.memory_used_mb,
                memory_total_mb: self.memory_total_mb,
                disk_used_gb: self.disk_used_gb,
                disk_total_gb: self.disk_total_gb,
            }),
            Profile::Basic => serde_json::to_string(&BasicRecord {
                key: self.key.as_deref(),
                timestamp: &self.timestamp,
                cpu_usage_percent: self.cpu_usage_percent,
                memory_used_mb: self.memory_used_mb,
                memory_total_mb: self.memory_total_mb,
                disk_used_gb: self.disk_used_gb,
                disk_total_gb: self.disk_total_gb,
            }),
        }
    }

    /// Copy with the credential removed, for anything exposed locally.
    pub fn redacted(&self) -> Self {
        Self {
            key: None,
            ..self.clone()
        }
    }
}

/// Local wall-clock time, e.g. `2024-01-01T00:00:00+09:00`.
pub fn timestamp_now() -> String {
    Local::now().to_rfc3339_opts(SecondsFormat::Secs, false)
}
