use crate::collectors::{CollectError, MetricsSource};
use crate::config::{Config, Credentials, Profile};
use crate::metrics::{now_unix, Metrics};
use crate::sample::{timestamp_now, Identity, Sample};
use crate::state::State;
use crate::transport::{Handshake, Transport, TransportError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

#[derive(Debug, Error)]
#[error("handshake response carried no X-TENANT-ID header")]
pub struct MissingTenantId;

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("collect failed: {0}")]
    Collect(#[from] CollectError),
    #[error("serialize failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Send(#[from] TransportError),
}

impl CycleError {
    pub fn stage(&self) -> &'static str {
        match self {
            CycleError::Collect(_) => "collect",
            CycleError::Serialize(_) => "serialize",
            CycleError::Send(_) => "send",
        }
    }
}

/// Decides which identifiers go into every sample for this run.
pub fn resolve_identity(
    profile: Profile,
    credentials: &Credentials,
    handshake: &Handshake,
    include_key: bool,
) -> Result<Identity, MissingTenantId> {
    let tenant_id = if profile.requires_tenant_id() {
        Some(handshake.tenant_id.clone().ok_or(MissingTenantId)?)
    } else {
        None
    };
    let container_id = credentials
        .container_id
        .clone()
        .filter(|_| profile.requires_container_id());

    Ok(Identity {
        tenant_id,
        container_id,
        key: include_key.then(|| credentials.api_key.clone()),
    })
}

pub struct Reporter<S, T> {
    source: S,
    transport: T,
    identity: Identity,
    profile: Profile,
    interval: Duration,
    top_processes: usize,
    metrics: Arc<Metrics>,
    state: Arc<RwLock<State>>,
}

impl<S: MetricsSource, T: Transport> Reporter<S, T> {
    pub fn new(
        source: S,
        transport: T,
        identity: Identity,
        cfg: &Config,
        metrics: Arc<Metrics>,
        state: Arc<RwLock<State>>,
    ) -> Self {
        Self {
            source,
            transport,
            identity,
            profile: cfg.profile,
            interval: cfg.interval,
            top_processes: cfg.top_processes,
            metrics,
            state,
        }
    }

    /// Runs one report attempt per tick until shutdown, then closes the transport.
    ///
    /// Failed attempts consume their tick like successful ones, so a source or
    /// transport that keeps failing is retried at the configured interval and
    /// never faster.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            profile = self.profile.as_str(),
            interval = %humantime::format_duration(self.interval),
            "report loop started"
        );

        loop {
            tokio::select! {
                Ok(()) = shutdown.changed() => {
                    info!("shutdown signal received, stopping report loop");
                    break;
                }
                _ = ticker.tick() => {
                    self.report_once().await;
                }
            }
        }

        match self.transport.close().await {
            Ok(()) => info!("websocket closed"),
            Err(err) => warn!(error = %err, "failed to close websocket cleanly"),
        }
    }

    pub async fn report_once(&mut self) {
        match self.cycle().await {
            Ok((sample, payload)) => {
                if sample.key.is_some() {
                    let redacted = sample.redacted().to_json(self.profile).unwrap_or_default();
                    info!(payload = %redacted, "sample sent");
                } else {
                    info!(payload = %payload, "sample sent");
                }
                let now = now_unix();
                self.metrics.record_sent(&sample, now);
                self.state.write().await.record_sent(sample, now);
            }
            Err(err) => {
                warn!(stage = err.stage(), error = %err, "report cycle failed");
                self.metrics.inc_cycle_error(err.stage());
                self.state.write().await.record_failure(err.to_string());
            }
        }
    }

    async fn cycle(&mut self) -> Result<(Sample, String), CycleError> {
        let reading = self.source.read(self.profile.includes_processes()).await?;
        let sample = Sample::capture(
            &self.identity,
            reading,
            timestamp_now(),
            self.profile,
            self.top_processes,
        );
        let payload = sample.to_json(self.profile)?;
        self.transport.send_text(payload.clone()).await?;
        Ok((sample, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::{ProcessReading, Reading};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio_tungstenite::tungstenite;

    const MIB: u64 = 1024 * 1024;
    const GIB: u64 = 1024 * MIB;

    struct FakeSource {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl MetricsSource for FakeSource {
        async fn read(&mut self, include_processes: bool) -> Result<Reading, CollectError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CollectError::NoCpus);
            }
            Ok(Reading {
                cpu_usage_percent: 42.37,
                memory_used_bytes: 2048 * MIB,
                memory_total_bytes: 8192 * MIB,
                disk_used_bytes: 50 * GIB,
                disk_total_bytes: 500 * GIB,
                processes: include_processes.then(|| {
                    (1..=8)
                        .map(|pid| ProcessReading {
                            pid,
                            name: format!("p{pid}"),
                            cpu_percent: Some(pid as f64 * 1.5),
                        })
                        .collect()
                }),
            })
        }
    }

    #[derive(Default, Clone)]
    struct FakeTransport {
        sent: Arc<Mutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
        fail: bool,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn send_text(&mut self, payload: String) -> Result<(), TransportError> {
            if self.fail {
                return Err(TransportError::Send(tungstenite::Error::ConnectionClosed));
            }
            self.sent.lock().unwrap().push(payload);
            Ok(())
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Harness {
        calls: Arc<AtomicUsize>,
        transport: FakeTransport,
        metrics: Arc<Metrics>,
        state: Arc<RwLock<State>>,
    }

    async fn run_for(
        profile: Profile,
        source_fails: bool,
        transport_fails: bool,
        duration: Duration,
    ) -> Harness {
        let cfg = Config {
            profile,
            ..Config::default()
        };
        let calls = Arc::new(AtomicUsize::new(0));
        let source = FakeSource {
            calls: calls.clone(),
            fail: source_fails,
        };
        let transport = FakeTransport {
            fail: transport_fails,
            ..FakeTransport::default()
        };
        let identity = Identity {
            tenant_id: Some("tenant-1".to_string()),
            container_id: Some("container-9".to_string()),
            key: None,
        };
        let metrics = Metrics::new().unwrap();
        let state = Arc::new(RwLock::new(State::new(0, cfg.endpoint.clone(), profile)));

        let reporter = Reporter::new(
            source,
            transport.clone(),
            identity,
            &cfg,
            metrics.clone(),
            state.clone(),
        );
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(reporter.run(rx));
        tokio::time::sleep(duration).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        Harness {
            calls,
            transport,
            metrics,
            state,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sends_one_payload_per_tick() {
        let h = run_for(Profile::Full, false, false, Duration::from_secs(11)).await;

        let sent = h.transport.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 3);
        let sample: Sample = serde_json::from_str(&sent[0]).unwrap();
        assert_eq!(sample.tenant_id.as_deref(), Some("tenant-1"));
        assert_eq!(sample.container_id.as_deref(), Some("container-9"));
        assert_eq!(sample.cpu_usage_percent, 42.4);
        let processes = sample.process_list.unwrap();
        assert_eq!(processes.len(), 5);
        assert_eq!(processes[0].pid, 8);

        assert_eq!(h.metrics.agent_samples_sent_total.get(), 3.0);
        assert_eq!(h.state.read().await.samples_sent, 3);
        assert!(h.transport.closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn failing_source_is_retried_at_the_interval() {
        let h = run_for(Profile::Basic, true, false, Duration::from_secs(60)).await;

        let calls = h.calls.load(Ordering::SeqCst);
        assert!((12..=13).contains(&calls), "unexpected attempt count {calls}");
        assert!(h.transport.sent.lock().unwrap().is_empty());
        assert_eq!(
            h.metrics
                .agent_cycle_errors_total
                .with_label_values(&["collect"])
                .get(),
            calls as f64
        );
        let state = h.state.read().await;
        assert_eq!(state.consecutive_failures as usize, calls);
        assert!(h.transport.closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn send_failure_keeps_the_loop_going() {
        let h = run_for(Profile::Tenant, false, true, Duration::from_secs(11)).await;

        assert_eq!(h.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            h.metrics
                .agent_cycle_errors_total
                .with_label_values(&["send"])
                .get(),
            3.0
        );
        let state = h.state.read().await;
        assert_eq!(state.samples_sent, 0);
        assert!(state.last_error.as_deref().unwrap_or("").contains("send failed"));
    }

    fn credentials(container: Option<&str>) -> Credentials {
        Credentials {
            api_key: "abc123".to_string(),
            container_id: container.map(str::to_string),
        }
    }

    #[test]
    fn tenant_profiles_require_tenant_from_handshake() {
        let handshake = Handshake::default();
        for profile in [Profile::Tenant, Profile::Full] {
            assert!(resolve_identity(profile, &credentials(Some("c")), &handshake, false).is_err());
        }
        let identity =
            resolve_identity(Profile::Basic, &credentials(None), &handshake, false).unwrap();
        assert_eq!(identity, Identity::default());
    }

    #[test]
    fn identity_carries_only_what_the_profile_uses() {
        let handshake = Handshake {
            tenant_id: Some("tenant-1".to_string()),
        };
        let tenant =
            resolve_identity(Profile::Tenant, &credentials(Some("c-1")), &handshake, false)
                .unwrap();
        assert_eq!(tenant.tenant_id.as_deref(), Some("tenant-1"));
        assert!(tenant.container_id.is_none());
        assert!(tenant.key.is_none());

        let full =
            resolve_identity(Profile::Full, &credentials(Some("c-1")), &handshake, true).unwrap();
        assert_eq!(full.container_id.as_deref(), Some("c-1"));
        assert_eq!(full.key.as_deref(), Some("abc123"));
    }
}
