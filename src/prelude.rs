//! Convenient re-exports for common quotagate types.
pub use crate::{
    config::{FailurePolicy, LimiterConfig},
    decision::{Decision, DenyReason},
    engine::{Admission, AdmissionPermit, QuotaEngine, Subject},
    error::{AdmissionError, StoreError},
    middleware::{IdentityExtractor, QuotaLayer},
    store::{InMemoryQuotaStore, QuotaStore},
    telemetry::{LogSink, MemorySink, NullSink, TelemetrySink},
    tier::{Tier, TierLimits},
};
