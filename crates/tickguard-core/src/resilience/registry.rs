use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::metrics::{MetricsRecorder, NoopMetrics};
use crate::resilience::{
    CircuitBreaker, CircuitBreakerConfig, RateLimitConfig, RateLimitGate, RetryConfig,
};

/// Breaker, limiter and retry policy shared by every call to one resource.
#[derive(Debug)]
pub struct ResiliencePolicies {
    pub circuit_breaker: CircuitBreaker,
    pub rate_limiter: RateLimitGate,
    pub retry: RetryConfig,
}

/// Process-wide policy instances keyed by logical resource name.
///
/// Instances are created on first lookup and reused afterwards. Lookup and
/// creation happen under one lock, so concurrent first callers share a
/// single instance.
pub struct ResilienceRegistry {
    circuit_breaker: CircuitBreakerConfig,
    rate_limit: RateLimitConfig,
    retry: RetryConfig,
    recorder: Arc<dyn MetricsRecorder>,
    entries: Mutex<HashMap<String, Arc<ResiliencePolicies>>>,
}

impl std::fmt::Debug for ResilienceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceRegistry")
            .field("resources", &self.entries.lock().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Default for ResilienceRegistry {
    fn default() -> Self {
        Self::new(
            CircuitBreakerConfig::default(),
            RateLimitConfig::default(),
            RetryConfig::default(),
            Arc::new(NoopMetrics),
        )
    }
}

impl ResilienceRegistry {
    pub fn new(
        circuit_breaker: CircuitBreakerConfig,
        rate_limit: RateLimitConfig,
        retry: RetryConfig,
        recorder: Arc<dyn MetricsRecorder>,
    ) -> Self {
        Self {
            circuit_breaker,
            rate_limit,
            retry,
            recorder,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn recorder(&self) -> &Arc<dyn MetricsRecorder> {
        &self.recorder
    }

    pub fn policies(&self, resource: &str) -> Arc<ResiliencePolicies> {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(resource) {
            return Arc::clone(existing);
        }

        debug!(resource, "creating resilience policies");
        let created = Arc::new(ResiliencePolicies {
            circuit_breaker: CircuitBreaker::new(
                resource,
                self.circuit_breaker.clone(),
                Arc::clone(&self.recorder),
            ),
            rate_limiter: RateLimitGate::new(&self.rate_limit),
            retry: self.retry.clone(),
        });
        entries.insert(resource.to_owned(), Arc::clone(&created));
        created
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
