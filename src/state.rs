use crate::config::Profile;
use crate::sample::Sample;

/// Reporter progress shared with the status endpoint.
#[derive(Debug, Clone)]
pub struct State {
    pub started_at_unix: i64,
    pub endpoint: String,
    pub profile: Profile,
    pub tenant_id: Option<String>,
    pub container_id: Option<String>,
    pub samples_sent: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub last_sent_unix: Option<i64>,
    pub last_error: Option<String>,
    pub last_sample: Option<Sample>,
}

impl State {
    pub fn new(now_unix: i64, endpoint: impl Into<String>, profile: Profile) -> Self {
        Self {
            started_at_unix: now_unix,
            endpoint: endpoint.into(),
            profile,
            tenant_id: None,
            container_id: None,
            samples_sent: 0,
            failures: 0,
            consecutive_failures: 0,
            last_sent_unix: None,
            last_error: None,
            last_sample: None,
        }
    }

    pub fn record_sent(&mut self, sample: Sample, now_unix: i64) {
        self.samples_sent += 1;
        self.consecutive_failures = 0;
        self.last_sent_unix = Some(now_unix);
        self.last_sample = Some(sample);
    }

    pub fn record_failure(&mut self, error: String) {
        self.failures += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Sample {
        Sample {
            tenant_id: Some("t".to_string()),
            container_id: None,
            key: None,
            timestamp: "2024-01-01T00:00:00+00:00".to_string(),
            cpu_usage_percent: 1.0,
            memory_used_mb: 1,
            memory_total_mb: 2,
            disk_used_gb: 3,
            disk_total_gb: 4,
            process_list: None,
        }
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let mut state = State::new(0, "ws://localhost/", Profile::Basic);
        state.record_failure("collect: boom".to_string());
        state.record_failure("send: closed".to_string());
        assert_eq!(state.consecutive_failures, 2);

        state.record_sent(sample(), 10);
        assert_eq!(state.samples_sent, 1);
        assert_eq!(state.failures, 2);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.last_sent_unix, Some(10));
        assert_eq!(state.last_error.as_deref(), Some("send: closed"));
    }
}
