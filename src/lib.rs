#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # quotagate
//!
//! Tiered admission control for async Rust services: burst, window and daily
//! quotas, a per-identity concurrency cap, and escalating blocks for
//! identities that keep hitting their limits.
//!
//! ## Features
//!
//! - **Per-tier limits** (free, basic, premium, enterprise, admin), adjustable at runtime
//! - **Fixed windows** for burst (default 10s) and primary (default 60s) traffic,
//!   plus a daily cap that resets at UTC midnight
//! - **Concurrency cap** with permits that release on every exit path
//! - **Escalating blocks** after repeated violations
//! - **Shared store** with optimistic compare-and-swap, so many processes
//!   enforce one set of counters
//! - **Tower middleware**, telemetry sinks, an admin command service and a
//!   background reaper
//!
//! ## Quick Start
//!
//! ```rust
//! use quotagate::{Admission, InMemoryQuotaStore, LimiterConfig, QuotaEngine, Subject, Tier};
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = QuotaEngine::new(InMemoryQuotaStore::new(), LimiterConfig::default());
//!     let subject = Subject::new("wallet-A", Tier::Free, "/v1/quote");
//!
//!     match engine.admit(&subject).await {
//!         Admission::Admitted(permit) => {
//!             // Serve the request, then give the slot back.
//!             permit.release().await;
//!         }
//!         Admission::Rejected(decision) => {
//!             println!("{} {}", decision.http_status(), decision.reason_code());
//!         }
//!     }
//! }
//! ```

pub mod adaptive;
pub mod admin;
mod backoff;
pub mod clock;
pub mod config;
pub mod decision;
pub mod engine;
pub mod error;
pub mod middleware;
pub mod prelude;
pub mod quota;
pub mod reaper;
pub mod record;
pub mod store;
pub mod telemetry;
pub mod tier;

// Re-exports
pub use admin::{AdminCommand, AdminError, AdminResponse, AdminService};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{FailurePolicy, LimiterConfig, LimiterConfigBuilder};
pub use decision::{Decision, DenyReason, RateLimitHeaders};
pub use engine::{Admission, AdmissionPermit, QuotaEngine, Subject};
pub use error::{AdmissionError, ConfigError, StoreError};
pub use middleware::{IdentityExtractor, QuotaLayer, QuotaService};
pub use quota::escalation::{EscalationPolicy, EscalationStep};
pub use reaper::{QuotaStats, ReaperHandle};
pub use record::{BlockState, QuotaRecord, Versioned};
pub use store::{atomic_apply, Apply, InMemoryQuotaStore, QuotaStore};
pub use tier::{Tier, TierLimits, TierTable, UnknownTier};
