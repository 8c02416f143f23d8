//! Telemetry for admission decisions.
//!
//! The engine emits an [`AdmissionEvent`] for every decision, release, store
//! fault and sweep. Events flow through a [`TelemetrySink`], which is just a
//! `tower::Service<AdmissionEvent>`, so sinks compose with ordinary tower
//! combinators.
//!
//! ```rust
//! use quotagate::telemetry::{AdmissionEvent, MemorySink};
//! use quotagate::DenyReason;
//! use tower::Service;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut sink = MemorySink::new();
//! sink.call(AdmissionEvent::Denied {
//!     key: "wallet-A".into(),
//!     reason: DenyReason::BurstLimitExceeded,
//!     violations: 1,
//! })
//! .await
//! .unwrap();
//! assert_eq!(sink.events().len(), 1);
//! # }
//! ```

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tower::Service;

use crate::config::FailurePolicy;
use crate::decision::DenyReason;
use crate::tier::Tier;

/// A telemetry sink that consumes admission events.
pub trait TelemetrySink:
    tower::Service<AdmissionEvent, Response = (), Error = Self::SinkError> + Clone + Send + 'static
{
    /// The error type for this sink.
    type SinkError: std::error::Error + Send + 'static;
}

/// Best-effort emit helper that honors `poll_ready` and swallows errors.
///
/// Telemetry sits on the admission hot path: if a sink is not ready or
/// fails, the event is dropped.
pub async fn emit_best_effort<S>(sink: S, event: AdmissionEvent)
where
    S: tower::Service<AdmissionEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    use tower::ServiceExt;

    if let Ok(mut ready_sink) = sink.ready_oneshot().await {
        let _ = ready_sink.call(event).await;
    }
}

/// Events emitted by the quota engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionEvent {
    /// A request was admitted and holds a concurrency slot.
    Admitted {
        /// Identity key.
        key: String,
        /// Tier the request was evaluated under.
        tier: Tier,
        /// Primary-window requests left.
        remaining: u64,
    },
    /// A quota check refused a request.
    Denied {
        /// Identity key.
        key: String,
        /// Refusing check.
        reason: DenyReason,
        /// Violation count after this denial.
        violations: u32,
    },
    /// A denial started or extended a block.
    BlockStarted {
        /// Identity key.
        key: String,
        /// Block end, epoch millis.
        until_millis: u64,
        /// Violation count that triggered it.
        violations: u32,
    },
    /// A request arrived while its identity was blocked.
    BlockedRejected {
        /// Identity key.
        key: String,
    },
    /// A concurrency slot was returned.
    Released {
        /// Identity key.
        key: String,
        /// In-flight requests left.
        active: u32,
    },
    /// Concurrent updates to the same record outlasted the store timeout; the
    /// request was asked to retry.
    Contended {
        /// Identity key.
        key: String,
        /// Compare-and-swap attempts made.
        attempts: u32,
    },
    /// The store failed; the configured policy decided the request.
    StoreFault {
        /// Identity key.
        key: String,
        /// Policy applied.
        policy: FailurePolicy,
    },
    /// The reaper removed idle records.
    Reaped {
        /// Records removed.
        removed: usize,
    },
    /// An operator reset a key.
    KeyReset {
        /// Identity key.
        key: String,
    },
    /// An operator changed a tier's limits.
    TierLimitsAdjusted {
        /// Tier changed.
        tier: Tier,
    },
}

impl fmt::Display for AdmissionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionEvent::Admitted { key, tier, remaining } => {
                write!(f, "Admitted({}, tier={}, remaining={})", key, tier, remaining)
            }
            AdmissionEvent::Denied { key, reason, violations } => {
                write!(f, "Denied({}, {}, violations={})", key, reason, violations)
            }
            AdmissionEvent::BlockStarted { key, until_millis, violations } => {
                write!(f, "BlockStarted({}, until={}, violations={})", key, until_millis, violations)
            }
            AdmissionEvent::BlockedRejected { key } => write!(f, "BlockedRejected({})", key),
            AdmissionEvent::Released { key, active } => {
                write!(f, "Released({}, active={})", key, active)
            }
            AdmissionEvent::Contended { key, attempts } => {
                write!(f, "Contended({}, attempts={})", key, attempts)
            }
            AdmissionEvent::StoreFault { key, policy } => {
                write!(f, "StoreFault({}, {:?})", key, policy)
            }
            AdmissionEvent::Reaped { removed } => write!(f, "Reaped({})", removed),
            AdmissionEvent::KeyReset { key } => write!(f, "KeyReset({})", key),
            AdmissionEvent::TierLimitsAdjusted { tier } => write!(f, "TierLimitsAdjusted({})", tier),
        }
    }
}

/// A no-op telemetry sink that discards all events.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<AdmissionEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: AdmissionEvent) -> Self::Future {
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
}

/// Logs events through `tracing` under the `quotagate::events` target.
///
/// Store faults and contention are logged at WARN, blocks and operator
/// actions at INFO, everything else at DEBUG.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<AdmissionEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: AdmissionEvent) -> Self::Future {
        match &event {
            AdmissionEvent::StoreFault { .. } | AdmissionEvent::Contended { .. } => {
                tracing::warn!(target: "quotagate::events", event = %event)
            }
            AdmissionEvent::BlockStarted { .. }
            | AdmissionEvent::Reaped { .. }
            | AdmissionEvent::KeyReset { .. }
            | AdmissionEvent::TierLimitsAdjusted { .. } => {
                tracing::info!(target: "quotagate::events", event = %event)
            }
            _ => tracing::debug!(target: "quotagate::events", event = %event),
        }
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
}

/// A bounded in-memory sink, for tests and debugging.
/// Oldest events are evicted once `capacity` is reached.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<AdmissionEvent>>>,
    capacity: usize,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySink {
    /// Creates a bounded memory sink (default cap: 10,000).
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    /// Creates a bounded memory sink with explicit capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
        }
    }

    /// Snapshot of the stored events, oldest first.
    pub fn events(&self) -> Vec<AdmissionEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Service<AdmissionEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: AdmissionEvent) -> Self::Future {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if events.len() >= self.capacity {
            events.remove(0);
        }
        events.push(event);
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
}
