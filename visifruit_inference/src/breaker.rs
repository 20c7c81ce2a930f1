//! Circuit breaker guarding the remote backend.
//!
//! Closed → Open after `failure_threshold` consecutive failures. Open →
//! HalfOpen once the cool-down has elapsed, evaluated lazily on the next
//! admission. HalfOpen admits exactly one probe: success closes the breaker,
//! failure reopens it and restarts the cool-down.
//!
//! The routing read (`state()`) is a single atomic load. Outcome recording
//! is serialized through one mutex.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{InferenceError, RemoteFailure};
use visifruit::inference::BreakerConfig;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum BreakerState {
    /// All requests attempted.
    Closed = 0,
    /// Requests rejected without a network call.
    Open = 1,
    /// One trial request in flight.
    HalfOpen = 2,
}

impl BreakerState {
    const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Open,
            2 => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

/// Outcome fed into the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerEvent {
    Success,
    Failure,
    CooldownElapsed,
}

/// How a request was admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermitKind {
    /// Regular request while Closed.
    Normal,
    /// The single HalfOpen trial.
    Probe,
}

#[derive(Debug)]
struct Inner {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    last_failure_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Process-wide breaker, shared by reference between all callers.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: AtomicU8,
    transitions: AtomicU64,
    inner: Mutex<Inner>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    /// New breaker in the Closed state.
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: AtomicU8::new(BreakerState::Closed as u8),
            transitions: AtomicU64::new(0),
            inner: Mutex::new(Inner {
                consecutive_failures: 0,
                opened_at: None,
                last_failure_at: None,
                probe_in_flight: false,
            }),
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }

    pub fn from_config(config: &BreakerConfig) -> Self {
        Self::new(config.failure_threshold, config.cooldown())
    }

    /// Current state, lock-free. An Open breaker whose cool-down has
    /// elapsed still reads Open until the next admission.
    #[inline]
    pub fn state(&self) -> BreakerState {
        BreakerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Number of state transitions since startup.
    #[inline]
    pub fn transitions(&self) -> u64 {
        self.transitions.load(Ordering::Relaxed)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Ask to send one remote request.
    ///
    /// # Errors
    ///
    /// `RemoteUnavailable(CircuitOpen)` while Open within the cool-down, or
    /// while a HalfOpen probe is already in flight.
    pub fn try_acquire(&self) -> Result<Permit<'_>, InferenceError> {
        if self.state() == BreakerState::Closed {
            return Ok(Permit::new(self, PermitKind::Normal));
        }

        let mut inner = self.inner.lock();
        match self.state() {
            BreakerState::Closed => Ok(Permit::new(self, PermitKind::Normal)),
            BreakerState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or(Duration::MAX);
                if elapsed < self.cooldown {
                    return Err(InferenceError::RemoteUnavailable(RemoteFailure::CircuitOpen));
                }
                self.apply(&mut inner, BreakerEvent::CooldownElapsed);
                inner.probe_in_flight = true;
                Ok(Permit::new(self, PermitKind::Probe))
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    return Err(InferenceError::RemoteUnavailable(RemoteFailure::CircuitOpen));
                }
                inner.probe_in_flight = true;
                Ok(Permit::new(self, PermitKind::Probe))
            }
        }
    }

    fn record(&self, kind: PermitKind, event: BreakerEvent) {
        let mut inner = self.inner.lock();
        if kind == PermitKind::Probe {
            inner.probe_in_flight = false;
        }
        match event {
            BreakerEvent::Success => inner.consecutive_failures = 0,
            BreakerEvent::Failure => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                inner.last_failure_at = Some(Instant::now());
            }
            BreakerEvent::CooldownElapsed => {}
        }
        self.apply(&mut inner, event);
    }

    /// Transition table. Caller holds the lock.
    fn apply(&self, inner: &mut Inner, event: BreakerEvent) {
        use BreakerEvent::*;
        use BreakerState::*;

        let current = self.state();
        let next = match (current, event) {
            (Closed, Failure) if inner.consecutive_failures >= self.failure_threshold => Open,
            (Closed, _) => Closed,
            (Open, CooldownElapsed) => HalfOpen,
            // A request admitted before the breaker opened came back healthy.
            (Open, Success) => Closed,
            (Open, Failure) => Open,
            (HalfOpen, Success) => Closed,
            (HalfOpen, Failure) => Open,
            (HalfOpen, CooldownElapsed) => HalfOpen,
        };

        if next == Open && current != Open {
            inner.opened_at = Some(Instant::now());
        }
        if next == current {
            return;
        }

        self.state.store(next as u8, Ordering::Release);
        self.transitions.fetch_add(1, Ordering::Relaxed);
        match next {
            Open => warn!(
                "Circuit breaker {current:?} -> OPEN after {} consecutive failures (cool-down {} ms)",
                inner.consecutive_failures,
                self.cooldown.as_millis()
            ),
            HalfOpen => info!("Circuit breaker OPEN -> HALF_OPEN, admitting one probe"),
            Closed => info!("Circuit breaker {current:?} -> CLOSED"),
        }
    }

    /// Serializable view for telemetry.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            state: self.state(),
            consecutive_failures: inner.consecutive_failures,
            last_failure_age_ms: inner
                .last_failure_at
                .map(|t| t.elapsed().as_millis() as u64),
            transitions: self.transitions(),
            failure_threshold: self.failure_threshold,
            cooldown_ms: self.cooldown.as_millis() as u64,
        }
    }
}

/// Breaker telemetry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub last_failure_age_ms: Option<u64>,
    pub transitions: u64,
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
}

/// Admission for one remote request.
///
/// Settle with [`Permit::succeed`] or [`Permit::fail`]. A permit dropped
/// unsettled (cancelled request) counts as a failure; [`Permit::release`]
/// discards it without affecting the failure count.
#[must_use = "an unsettled permit counts as a failure"]
#[derive(Debug)]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    kind: PermitKind,
    settled: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, kind: PermitKind) -> Self {
        Self {
            breaker,
            kind,
            settled: false,
        }
    }

    #[inline]
    pub fn kind(&self) -> PermitKind {
        self.kind
    }

    pub fn succeed(mut self) {
        self.settled = true;
        self.breaker.record(self.kind, BreakerEvent::Success);
    }

    pub fn fail(mut self) {
        self.settled = true;
        self.breaker.record(self.kind, BreakerEvent::Failure);
    }

    /// Outcome says nothing about remote health (e.g. local encoding error).
    pub fn release(mut self) {
        self.settled = true;
        if self.kind == PermitKind::Probe {
            self.breaker.inner.lock().probe_in_flight = false;
        }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.record(self.kind, BreakerEvent::Failure);
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(3, Duration::from_secs(20))
    }

    fn fail_n(b: &CircuitBreaker, n: u32) {
        for _ in 0..n {
            b.try_acquire().unwrap().fail();
        }
    }

    #[test]
    fn starts_closed() {
        let b = breaker();
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.try_acquire().unwrap().kind(), PermitKind::Normal);
    }

    #[test]
    fn opens_after_threshold() {
        let b = breaker();
        fail_n(&b, 2);
        assert_eq!(b.state(), BreakerState::Closed);
        fail_n(&b, 1);
        assert_eq!(b.state(), BreakerState::Open);
        assert_eq!(b.transitions(), 1);
        assert!(matches!(
            b.try_acquire(),
            Err(InferenceError::RemoteUnavailable(RemoteFailure::CircuitOpen))
        ));
    }

    #[test]
    fn success_resets_failure_count() {
        let b = breaker();
        fail_n(&b, 2);
        b.try_acquire().unwrap().succeed();
        fail_n(&b, 2);
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.consecutive_failures(), 2);
    }

    #[test]
    fn dropped_permit_counts_as_failure() {
        let b = CircuitBreaker::new(1, Duration::from_secs(1));
        {
            let _permit = b.try_acquire().unwrap();
        }
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[test]
    fn released_permit_is_neutral() {
        let b = CircuitBreaker::new(1, Duration::from_secs(1));
        b.try_acquire().unwrap().release();
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_exactly_one_probe() {
        let b = breaker();
        fail_n(&b, 3);

        tokio::time::advance(Duration::from_secs(19)).await;
        assert!(b.try_acquire().is_err());

        tokio::time::advance(Duration::from_secs(1)).await;
        let probe = b.try_acquire().unwrap();
        assert_eq!(probe.kind(), PermitKind::Probe);
        assert_eq!(b.state(), BreakerState::HalfOpen);
        assert!(b.try_acquire().is_err());

        probe.succeed();
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.transitions(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_restarts_cooldown() {
        let b = breaker();
        fail_n(&b, 3);
        tokio::time::advance(Duration::from_secs(20)).await;

        b.try_acquire().unwrap().fail();
        assert_eq!(b.state(), BreakerState::Open);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(b.try_acquire().is_err());
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(b.try_acquire().unwrap().kind(), PermitKind::Probe);
    }

    #[test]
    fn snapshot_reports_state() {
        let b = breaker();
        fail_n(&b, 3);
        let snap = b.snapshot();
        assert_eq!(snap.state, BreakerState::Open);
        assert_eq!(snap.consecutive_failures, 3);
        assert_eq!(snap.cooldown_ms, 20_000);
        assert!(snap.last_failure_age_ms.is_some());
    }
}
