use std::future::Future;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;

use http::Request;
use tower::BoxError;
use tower::Service;
use tracing::debug;
use ttl_count::RequestCounter;

use crate::layer::AdmissionPolicy;

/// Request extension carrying the live count observed at admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admitted {
    pub count: usize,
}

/// Admits a request into the counter, then forwards it with an [`Admitted`]
/// extension attached.
///
/// Admission failures are returned as a [`BoxError`] wrapping
/// [`ttl_count::CountError`]; the inner service is not called.
#[derive(Debug)]
pub struct AdmissionService<S> {
    inner: S,
    counter: RequestCounter,
    policy: AdmissionPolicy,
}

impl<S: Clone> Clone for AdmissionService<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            counter: self.counter.clone(),
            policy: self.policy,
        }
    }
}

impl<S, B> Service<Request<B>> for AdmissionService<S>
where
    S: Service<Request<B>> + Clone + Send + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<S::Response, BoxError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        // Keep the instance that was driven to readiness
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let counter = self.counter.clone();
        let policy = self.policy;

        Box::pin(async move {
            let count = policy.admit(&counter).await?;
            debug!(count, method = %req.method(), uri = %req.uri(), "admitted");
            req.extensions_mut().insert(Admitted { count });
            inner.call(req).await.map_err(Into::into)
        })
    }
}

impl<S> AdmissionService<S> {
    pub fn new(inner: S, counter: RequestCounter) -> Self {
        Self {
            inner,
            counter,
            policy: AdmissionPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: AdmissionPolicy) -> Self {
        self.policy = policy;
        self
    }
}
