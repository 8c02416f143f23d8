//! Tower middleware that puts a [`QuotaEngine`] in front of a service.
//!
//! The layer doesn't know how identities are derived, only that it should
//! ask an [`IdentityExtractor`] for the [`Subject`] of each request. Rejected
//! requests surface as [`AdmissionError::Rejected`]; the decision inside
//! carries the status code and rate-limit headers for the response.
//!
//! ```rust
//! use quotagate::{InMemoryQuotaStore, LimiterConfig, QuotaEngine, QuotaLayer, Subject, Tier};
//! use tower::{service_fn, Layer, ServiceExt};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let engine = QuotaEngine::new(InMemoryQuotaStore::new(), LimiterConfig::default());
//! let layer = QuotaLayer::new(engine, |req: &String| Subject::new(req.clone(), Tier::Free, "/echo"));
//! let svc = layer.layer(service_fn(|req: String| async move { Ok::<_, std::io::Error>(req) }));
//! let out = svc.oneshot("wallet-A".to_string()).await.unwrap();
//! assert_eq!(out, "wallet-A");
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

use crate::engine::{QuotaEngine, Subject};
use crate::error::AdmissionError;
use crate::store::QuotaStore;
use crate::telemetry::TelemetrySink;

/// Derives the identity, tier and endpoint of a request.
pub trait IdentityExtractor<Req>: Send + Sync + 'static {
    /// Subject to admit `req` as.
    fn subject(&self, req: &Req) -> Subject;
}

impl<Req, F> IdentityExtractor<Req> for F
where
    F: Fn(&Req) -> Subject + Send + Sync + 'static,
{
    fn subject(&self, req: &Req) -> Subject {
        self(req)
    }
}

/// A layer that enforces quotas using a [`QuotaEngine`].
pub struct QuotaLayer<St, T, X> {
    engine: QuotaEngine<St, T>,
    extractor: Arc<X>,
}

impl<St, T, X> QuotaLayer<St, T, X> {
    /// Create a new quota layer.
    pub fn new(engine: QuotaEngine<St, T>, extractor: X) -> Self {
        Self { engine, extractor: Arc::new(extractor) }
    }
}

impl<St, T, X> Clone for QuotaLayer<St, T, X> {
    fn clone(&self) -> Self {
        Self { engine: self.engine.clone(), extractor: self.extractor.clone() }
    }
}

impl<S, St, T, X> Layer<S> for QuotaLayer<St, T, X> {
    type Service = QuotaService<S, St, T, X>;

    fn layer(&self, service: S) -> Self::Service {
        QuotaService {
            inner: service,
            engine: self.engine.clone(),
            extractor: self.extractor.clone(),
        }
    }
}

/// Middleware service that enforces quotas.
pub struct QuotaService<S, St, T, X> {
    inner: S,
    engine: QuotaEngine<St, T>,
    extractor: Arc<X>,
}

impl<S: Clone, St, T, X> Clone for QuotaService<S, St, T, X> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            engine: self.engine.clone(),
            extractor: self.extractor.clone(),
        }
    }
}

impl<S, St, T, X, Req> Service<Req> for QuotaService<S, St, T, X>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    S::Error: Send + 'static,
    St: QuotaStore + 'static,
    T: TelemetrySink + Sync,
    T::Future: Send,
    X: IdentityExtractor<Req>,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = AdmissionError<S::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(AdmissionError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let subject = self.extractor.subject(&req);
        let engine = self.engine.clone();
        // Keep the instance that was driven to readiness.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move { engine.execute(&subject, move || inner.call(req)).await })
    }
}
