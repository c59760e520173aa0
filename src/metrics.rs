use crate::sample::Sample;
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, Registry, TextEncoder};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Prometheus view of the reporter itself.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    started_at_unix: i64,
    pub agent_cpu_usage_percent: Gauge,
    pub agent_memory_used_mb: Gauge,
    pub agent_memory_total_mb: Gauge,
    pub agent_disk_used_gb: Gauge,
    pub agent_disk_total_gb: Gauge,
    pub agent_process_list_len: Gauge,
    pub agent_samples_sent_total: Counter,
    pub agent_cycle_errors_total: CounterVec,
    pub agent_last_send_timestamp_seconds: Gauge,
    pub agent_uptime_seconds: Gauge,
    pub agent_scrape_count_total: Counter,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let agent_cpu_usage_percent = Gauge::with_opts(opts!(
            "agent_cpu_usage_percent",
            "CPU usage of the last sent sample in percent (0..100)"
        ))?;
        let agent_memory_used_mb = Gauge::with_opts(opts!(
            "agent_memory_used_mb",
            "Used memory of the last sent sample in MiB"
        ))?;
        let agent_memory_total_mb = Gauge::with_opts(opts!(
            "agent_memory_total_mb",
            "Total memory of the last sent sample in MiB"
        ))?;
        let agent_disk_used_gb = Gauge::with_opts(opts!(
            "agent_disk_used_gb",
            "Used disk space of the last sent sample in GiB"
        ))?;
        let agent_disk_total_gb = Gauge::with_opts(opts!(
            "agent_disk_total_gb",
            "Total disk space of the last sent sample in GiB"
        ))?;
        let agent_process_list_len = Gauge::with_opts(opts!(
            "agent_process_list_len",
            "Number of processes in the last sent sample"
        ))?;
        let agent_samples_sent_total = Counter::with_opts(opts!(
            "agent_samples_sent_total",
            "Samples delivered to the collector"
        ))?;
        let agent_cycle_errors_total = CounterVec::new(
            opts!(
                "agent_cycle_errors_total",
                "Failed report cycles by stage (collect, serialize, send)"
            ),
            &["stage"],
        )?;
        let agent_last_send_timestamp_seconds = Gauge::with_opts(opts!(
            "agent_last_send_timestamp_seconds",
            "Unix timestamp of the last delivered sample"
        ))?;
        let agent_uptime_seconds =
            Gauge::with_opts(opts!("agent_uptime_seconds", "Agent uptime in seconds"))?;
        let agent_scrape_count_total = Counter::with_opts(opts!(
            "agent_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;

        register(&registry, &agent_cpu_usage_percent)?;
        register(&registry, &agent_memory_used_mb)?;
        register(&registry, &agent_memory_total_mb)?;
        register(&registry, &agent_disk_used_gb)?;
        register(&registry, &agent_disk_total_gb)?;
        register(&registry, &agent_process_list_len)?;
        register(&registry, &agent_samples_sent_total)?;
        register(&registry, &agent_cycle_errors_total)?;
        register(&registry, &agent_last_send_timestamp_seconds)?;
        register(&registry, &agent_uptime_seconds)?;
        register(&registry, &agent_scrape_count_total)?;

        Ok(Arc::new(Self {
            registry,
            started_at_unix: now_unix(),
            agent_cpu_usage_percent,
            agent_memory_used_mb,
            agent_memory_total_mb,
            agent_disk_used_gb,
            agent_disk_total_gb,
            agent_process_list_len,
            agent_samples_sent_total,
            agent_cycle_errors_total,
            agent_last_send_timestamp_seconds,
            agent_uptime_seconds,
            agent_scrape_count_total,
        }))
    }

    pub fn record_sent(&self, sample: &Sample, now_unix: i64) {
        self.agent_cpu_usage_percent.set(sample.cpu_usage_percent);
        self.agent_memory_used_mb.set(sample.memory_used_mb as f64);
        self.agent_memory_total_mb.set(sample.memory_total_mb as f64);
        self.agent_disk_used_gb.set(sample.disk_used_gb as f64);
        self.agent_disk_total_gb.set(sample.disk_total_gb as f64);
        self.agent_process_list_len
            .set(sample.process_list.as_ref().map_or(0, Vec::len) as f64);
        self.agent_samples_sent_total.inc();
        self.agent_last_send_timestamp_seconds.set(now_unix as f64);
    }

    pub fn inc_cycle_error(&self, stage: &str) {
        self.agent_cycle_errors_total
            .with_label_values(&[stage])
            .inc();
    }

    pub fn inc_scrape_count(&self) {
        self.agent_scrape_count_total.inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let uptime = now_unix().saturating_sub(self.started_at_unix) as f64;
        self.agent_uptime_seconds.set(uptime);

        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
