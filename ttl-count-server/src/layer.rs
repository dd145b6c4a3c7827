use std::time::Duration;

use tower::Layer;
use ttl_count::CountError;
use ttl_count::RequestCounter;

use crate::service::AdmissionService;

/// What to do with a request that arrives while every slot is live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AdmissionPolicy {
    /// Wait for the sweeper to free a slot, however long that takes.
    #[default]
    Block,
    /// Fail immediately with [`CountError::Saturated`].
    Reject,
    /// Wait up to the given duration, then fail with [`CountError::Timeout`].
    Timeout(Duration),
}

impl AdmissionPolicy {
    /// Admit one request into `counter` under this policy.
    pub async fn admit(self, counter: &RequestCounter) -> Result<usize, CountError> {
        match self {
            Self::Block => Ok(counter.admit_and_count().await),
            Self::Reject => counter.try_admit_and_count(),
            Self::Timeout(max_wait) => counter.admit_and_count_timeout(max_wait).await,
        }
    }
}

/// Admits every request into a shared [`RequestCounter`] before it reaches
/// the inner service.
#[derive(Clone, Debug)]
pub struct AdmissionLayer {
    counter: RequestCounter,
    policy: AdmissionPolicy,
}

impl AdmissionLayer {
    /// Create an AdmissionLayer that blocks while the counter is saturated.
    pub fn new(counter: RequestCounter) -> Self {
        AdmissionLayer {
            counter,
            policy: AdmissionPolicy::default(),
        }
    }

    /// Set how saturation is handled.
    pub fn with_policy(mut self, policy: AdmissionPolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, service: S) -> Self::Service {
        AdmissionService::new(service, self.counter.clone()).with_policy(self.policy)
    }
}
