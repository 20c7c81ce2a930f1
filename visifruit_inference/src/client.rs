//! Inference client: backend selection, fallback, caching, health.
//!
//! Routing per frame:
//!
//! 1. Validate and normalize the frame (channel order).
//! 2. Serve from the result cache when an identical frame was seen recently.
//! 3. Ask the breaker for a permit and call the remote backend under the
//!    request budget. The outcome settles the permit.
//! 4. On a remote failure (or open breaker) run the local model, unless the
//!    fallback policy is `skip`.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::backend::{HealthProbe, HealthStatus, InferenceBackend};
use crate::breaker::{BreakerState, CircuitBreaker, PermitKind};
use crate::cache::ResultCache;
use crate::compress::{self, PreparedFrame};
use crate::error::{InferenceError, RemoteFailure};
use crate::local::LocalBackend;
use crate::registry::LocalModelRegistry;
use crate::remote::RemoteBackend;
use crate::stats::{ClientStats, ClientStatsSnapshot};
use visifruit::clock::{TimestampUs, now_us};
use visifruit::detection::{BackendKind, DetectionResult};
use visifruit::frame::Frame;
use visifruit::inference::{FallbackPolicy, InferenceConfig};

/// Result of the most recent health probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub status: Option<HealthStatus>,
    pub error: Option<String>,
    pub checked_at_us: TimestampUs,
}

#[derive(Debug)]
struct HealthCache {
    entry: Mutex<Option<(tokio::time::Instant, HealthReport)>>,
    ttl: Duration,
}

/// Inference entry point used by the engine.
#[derive(Debug)]
pub struct InferenceClient<R, L> {
    config: InferenceConfig,
    remote: Option<R>,
    local: Option<L>,
    breaker: CircuitBreaker,
    cache: Option<ResultCache>,
    health: HealthCache,
    stats: ClientStats,
}

/// Client wired to the HTTP backend and a registry model.
pub type DefaultInferenceClient = InferenceClient<RemoteBackend, LocalBackend>;

impl DefaultInferenceClient {
    /// Build backends from configuration.
    ///
    /// # Errors
    /// Fails if the HTTP client cannot be built or the configured local
    /// model cannot be created.
    pub fn from_config(
        config: InferenceConfig,
        registry: &LocalModelRegistry,
    ) -> Result<Self, InferenceError> {
        let remote = if config.remote_enabled {
            Some(RemoteBackend::new(config.clone())?)
        } else {
            None
        };
        let local = match &config.local_model {
            Some(name) => {
                let model = registry.create(name, &config)?;
                Some(LocalBackend::new(model, config.clone()))
            }
            None => None,
        };
        if config.fallback == FallbackPolicy::Local && local.is_none() {
            warn!("Fallback policy is 'local' but no inference.local_model is configured");
        }
        Ok(Self::new(config, remote, local))
    }
}

impl<R, L> InferenceClient<R, L>
where
    R: InferenceBackend + HealthProbe,
    L: InferenceBackend,
{
    pub fn new(config: InferenceConfig, remote: Option<R>, local: Option<L>) -> Self {
        let cache = config
            .cache
            .enabled
            .then(|| ResultCache::from_config(&config.cache));
        Self {
            breaker: CircuitBreaker::from_config(&config.circuit_breaker),
            health: HealthCache {
                entry: Mutex::new(None),
                ttl: Duration::from_millis(config.health.cache_ttl_ms),
            },
            stats: ClientStats::default(),
            cache,
            remote,
            local,
            config,
        }
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn stats(&self) -> ClientStatsSnapshot {
        self.stats.snapshot(self.breaker.snapshot())
    }

    /// Detect fruit in one frame.
    ///
    /// # Errors
    ///
    /// - `InvalidFrame` for empty or inconsistent frames.
    /// - `RemoteUnavailable` / `Timeout` when the remote path fails and the
    ///   fallback policy is `skip`.
    /// - `LocalModelUnavailable` / local `Timeout` when the fallback fails.
    pub async fn infer(&self, frame: &Frame) -> Result<DetectionResult, InferenceError> {
        self.stats.record_request();
        let started = Instant::now();
        let result = self.route(frame).await;
        match &result {
            Ok(_) => self
                .stats
                .record_latency_us(started.elapsed().as_micros() as u64),
            Err(e) => {
                self.stats.record_failed();
                debug!("Frame {} inference failed: {e}", frame.sequence);
            }
        }
        result
    }

    async fn route(&self, frame: &Frame) -> Result<DetectionResult, InferenceError> {
        let prepared = compress::prepare(frame, self.config.auto_correct_channels)?;

        let key = self
            .cache
            .as_ref()
            .map(|_| ResultCache::key(&prepared, &self.config));
        if let (Some(cache), Some(key)) = (&self.cache, key) {
            if let Some(hit) = cache.get(key) {
                self.stats.record_cache_hit();
                return Ok(hit.restamped(frame.captured_at_us, BackendKind::Cached));
            }
        }

        let remote_error = match self.infer_remote(&prepared).await {
            Ok(result) => {
                if let (Some(cache), Some(key)) = (&self.cache, key) {
                    cache.insert(key, result.clone());
                }
                return Ok(result);
            }
            Err(e) => e,
        };

        if !remote_error.allows_fallback() || self.config.fallback == FallbackPolicy::Skip {
            return Err(remote_error);
        }
        let Some(local) = &self.local else {
            return Err(InferenceError::LocalModelUnavailable(format!(
                "no local model configured ({remote_error})"
            )));
        };

        debug!(
            "Frame {} served by local fallback: {remote_error}",
            frame.sequence
        );
        match local.infer(&prepared).await {
            Ok(result) => {
                self.stats.record_local_fallback();
                Ok(result)
            }
            Err(e) => {
                self.stats.record_local_failure();
                warn!("Local fallback failed for frame {}: {e}", frame.sequence);
                Err(e)
            }
        }
    }

    async fn infer_remote(&self, frame: &PreparedFrame) -> Result<DetectionResult, InferenceError> {
        let Some(remote) = &self.remote else {
            return Err(InferenceError::RemoteUnavailable(RemoteFailure::Disabled));
        };
        let permit = match self.breaker.try_acquire() {
            Ok(p) => p,
            Err(e) => {
                self.stats.record_remote_rejected();
                return Err(e);
            }
        };
        if permit.kind() == PermitKind::Probe {
            info!("Sending HALF_OPEN probe with frame {}", frame.sequence);
        }

        let budget = self.config.timeouts.request_budget();
        match tokio::time::timeout(budget, remote.infer(frame)).await {
            Ok(Ok(result)) => {
                permit.succeed();
                self.stats.record_remote_success();
                Ok(result)
            }
            Ok(Err(e)) => {
                if e.is_breaker_failure() {
                    permit.fail();
                    self.stats.record_remote_failure();
                } else {
                    permit.release();
                }
                Err(e)
            }
            Err(_) => {
                permit.fail();
                self.stats.record_remote_failure();
                Err(InferenceError::Timeout {
                    backend: BackendKind::Remote,
                    after_ms: budget.as_millis() as u64,
                })
            }
        }
    }

    /// Remote health, served from cache while fresh.
    pub async fn health(&self) -> HealthReport {
        {
            let entry = self.health.entry.lock();
            if let Some((at, report)) = entry.as_ref() {
                if at.elapsed() < self.health.ttl {
                    return report.clone();
                }
            }
        }
        self.refresh_health().await
    }

    /// Probe the remote service now and cache the outcome.
    pub async fn refresh_health(&self) -> HealthReport {
        let report = match &self.remote {
            None => HealthReport {
                healthy: false,
                status: None,
                error: Some(RemoteFailure::Disabled.to_string()),
                checked_at_us: now_us(),
            },
            Some(remote) => {
                let budget = self.config.timeouts.connect() + self.config.timeouts.read();
                let outcome = match tokio::time::timeout(budget, remote.health()).await {
                    Ok(r) => r,
                    Err(_) => Err(InferenceError::Timeout {
                        backend: BackendKind::Remote,
                        after_ms: budget.as_millis() as u64,
                    }),
                };
                match outcome {
                    Ok(status) => HealthReport {
                        healthy: status.is_healthy(),
                        status: Some(status),
                        error: None,
                        checked_at_us: now_us(),
                    },
                    Err(e) => HealthReport {
                        healthy: false,
                        status: None,
                        error: Some(e.to_string()),
                        checked_at_us: now_us(),
                    },
                }
            }
        };

        let mut entry = self.health.entry.lock();
        let was_healthy = entry.as_ref().map(|(_, r)| r.healthy);
        if was_healthy != Some(report.healthy) {
            if report.healthy {
                info!("Remote inference service healthy");
            } else {
                warn!(
                    "Remote inference service unhealthy: {}",
                    report.error.as_deref().unwrap_or("status not ok")
                );
            }
        }
        *entry = Some((tokio::time::Instant::now(), report.clone()));
        report
    }

    /// Background health loop; returns when `shutdown` flips to true.
    pub async fn run_health_monitor(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.refresh_health().await;
                    debug!(
                        "Health probe: healthy={} breaker={:?}",
                        report.healthy,
                        self.breaker.state()
                    );
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Health monitor stopped");
    }

    /// True if the next call would go straight to the fallback.
    pub fn remote_blocked(&self) -> bool {
        self.remote.is_none() || self.breaker.state() != BreakerState::Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use visifruit::frame::ChannelOrder;

    #[derive(Default)]
    struct Scripted {
        calls: AtomicUsize,
        fail: std::sync::atomic::AtomicBool,
    }

    #[derive(Clone, Default)]
    struct MockRemote(Arc<Scripted>);

    impl InferenceBackend for MockRemote {
        fn kind(&self) -> BackendKind {
            BackendKind::Remote
        }

        async fn infer(&self, frame: &PreparedFrame) -> Result<DetectionResult, InferenceError> {
            self.0.calls.fetch_add(1, Ordering::SeqCst);
            if self.0.fail.load(Ordering::SeqCst) {
                return Err(InferenceError::RemoteUnavailable(RemoteFailure::Status(503)));
            }
            Ok(DetectionResult::empty(
                BackendKind::Remote,
                frame.captured_at_us,
                frame.width(),
                frame.height(),
            ))
        }
    }

    impl HealthProbe for MockRemote {
        async fn health(&self) -> Result<HealthStatus, InferenceError> {
            self.0.calls.fetch_add(1, Ordering::SeqCst);
            Ok(HealthStatus {
                status: "ok".into(),
                device: Some("cuda:0".into()),
                model_loaded: Some(true),
                cpu_percent: None,
                memory_percent: None,
                requests_served: None,
            })
        }
    }

    struct MockLocal;

    impl InferenceBackend for MockLocal {
        fn kind(&self) -> BackendKind {
            BackendKind::Local
        }

        async fn infer(&self, frame: &PreparedFrame) -> Result<DetectionResult, InferenceError> {
            Ok(DetectionResult::empty(
                BackendKind::Local,
                frame.captured_at_us,
                frame.width(),
                frame.height(),
            ))
        }
    }

    fn frame(seq: u64, fill: u8) -> Frame {
        let img = RgbImage::from_pixel(32, 32, image::Rgb([fill, fill / 2, 10]));
        Frame::new(seq, seq * 100, 32, 32, ChannelOrder::Rgb, img.into_raw()).unwrap()
    }

    fn client(
        remote: MockRemote,
        fallback: FallbackPolicy,
        cache: bool,
    ) -> InferenceClient<MockRemote, MockLocal> {
        let mut cfg = InferenceConfig {
            fallback,
            ..Default::default()
        };
        cfg.cache.enabled = cache;
        InferenceClient::new(cfg, Some(remote), Some(MockLocal))
    }

    #[tokio::test]
    async fn remote_success_is_used() {
        let remote = MockRemote::default();
        let c = client(remote.clone(), FallbackPolicy::Local, false);
        let r = c.infer(&frame(1, 100)).await.unwrap();
        assert_eq!(r.backend, BackendKind::Remote);
        assert_eq!(c.stats().remote_success, 1);
    }

    #[tokio::test]
    async fn failure_falls_back_to_local() {
        let remote = MockRemote::default();
        remote.0.fail.store(true, Ordering::SeqCst);
        let c = client(remote, FallbackPolicy::Local, false);
        let r = c.infer(&frame(1, 100)).await.unwrap();
        assert_eq!(r.backend, BackendKind::Local);
        let s = c.stats();
        assert_eq!(s.remote_failures, 1);
        assert_eq!(s.local_fallbacks, 1);
    }

    #[tokio::test]
    async fn skip_policy_surfaces_remote_error() {
        let remote = MockRemote::default();
        remote.0.fail.store(true, Ordering::SeqCst);
        let c = client(remote, FallbackPolicy::Skip, false);
        let err = c.infer(&frame(1, 100)).await.unwrap_err();
        assert_eq!(
            err,
            InferenceError::RemoteUnavailable(RemoteFailure::Status(503))
        );
        assert_eq!(c.stats().failed, 1);
    }

    #[tokio::test]
    async fn repeated_frame_served_from_cache() {
        let remote = MockRemote::default();
        let c = client(remote.clone(), FallbackPolicy::Local, true);
        c.infer(&frame(1, 100)).await.unwrap();
        let r = c.infer(&frame(2, 100)).await.unwrap();
        assert_eq!(r.backend, BackendKind::Cached);
        assert_eq!(r.frame_timestamp_us, 200);
        assert_eq!(remote.0.calls.load(Ordering::SeqCst), 1);
        assert_eq!(c.stats().cache_hits, 1);
    }

    #[tokio::test]
    async fn empty_frame_rejected_before_network() {
        let remote = MockRemote::default();
        let c = client(remote.clone(), FallbackPolicy::Local, false);
        let bad = Frame {
            sequence: 1,
            captured_at_us: 0,
            width: 0,
            height: 0,
            channel_order: ChannelOrder::Rgb,
            data: Arc::from(Vec::<u8>::new()),
        };
        assert!(matches!(
            c.infer(&bad).await,
            Err(InferenceError::InvalidFrame(_))
        ));
        assert_eq!(remote.0.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn health_is_cached_for_ttl() {
        let remote = MockRemote::default();
        let c = client(remote.clone(), FallbackPolicy::Local, false);
        assert!(c.health().await.healthy);
        assert!(c.health().await.healthy);
        assert_eq!(remote.0.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        c.health().await;
        assert_eq!(remote.0.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn disabled_remote_goes_straight_to_local() {
        let c: InferenceClient<MockRemote, MockLocal> =
            InferenceClient::new(InferenceConfig::default(), None, Some(MockLocal));
        assert!(c.remote_blocked());
        let r = c.infer(&frame(1, 100)).await.unwrap();
        assert_eq!(r.backend, BackendKind::Local);
        assert!(!c.health().await.healthy);
    }
}
