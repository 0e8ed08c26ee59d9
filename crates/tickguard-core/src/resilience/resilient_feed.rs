use std::collections::BTreeSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};

use futures_util::FutureExt;
use tracing::{debug, error, warn};

use crate::error::panic_message;

use crate::feed::{FeedError, FeedFuture, MarketDataFeed, PriceMap};
use crate::resilience::{CircuitState, ResiliencePolicies, ResilienceRegistry};
use crate::InstrumentId;

/// Fault-tolerant front for a [`MarketDataFeed`].
///
/// Every call passes the rate limiter, then the circuit breaker, then the
/// retry policy before reaching the delegate. Reads that fail at any layer
/// return an empty result; writes that fail are logged and dropped.
pub struct ResilientFeed {
    resource: String,
    delegate: Arc<dyn MarketDataFeed>,
    registry: Arc<ResilienceRegistry>,
    policies: OnceLock<Arc<ResiliencePolicies>>,
}

impl std::fmt::Debug for ResilientFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientFeed")
            .field("resource", &self.resource)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl ResilientFeed {
    pub fn new(
        resource: impl Into<String>,
        delegate: Arc<dyn MarketDataFeed>,
        registry: Arc<ResilienceRegistry>,
    ) -> Self {
        Self {
            resource: resource.into(),
            delegate,
            registry,
            policies: OnceLock::new(),
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    fn policies(&self) -> &ResiliencePolicies {
        self.policies
            .get_or_init(|| self.registry.policies(&self.resource))
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.policies().circuit_breaker.state()
    }

    pub async fn latest_prices(&self, instruments: Vec<InstrumentId>) -> PriceMap {
        match self.try_latest_prices(instruments).await {
            Ok(prices) => prices,
            Err(err) => {
                self.log_degraded("latest_prices", &err);
                PriceMap::new()
            }
        }
    }

    pub async fn subscribed_symbols(&self) -> BTreeSet<InstrumentId> {
        match self.try_subscribed_symbols().await {
            Ok(symbols) => symbols,
            Err(err) => {
                self.log_degraded("subscribed_symbols", &err);
                BTreeSet::new()
            }
        }
    }

    pub async fn subscribe(&self, instruments: Vec<InstrumentId>) {
        if let Err(err) = self.try_subscribe(instruments).await {
            self.log_degraded("subscribe", &err);
        }
    }

    pub async fn unsubscribe(&self, instruments: Vec<InstrumentId>) {
        if let Err(err) = self.try_unsubscribe(instruments).await {
            self.log_degraded("unsubscribe", &err);
        }
    }

    /// Same as [`Self::latest_prices`] but reports the failure.
    pub async fn try_latest_prices(
        &self,
        instruments: Vec<InstrumentId>,
    ) -> Result<PriceMap, FeedError> {
        self.guarded("latest_prices", || {
            self.delegate.latest_prices(instruments.clone())
        })
        .await
    }

    pub async fn try_subscribed_symbols(&self) -> Result<BTreeSet<InstrumentId>, FeedError> {
        self.guarded("subscribed_symbols", || self.delegate.subscribed_symbols())
            .await
    }

    pub async fn try_subscribe(&self, instruments: Vec<InstrumentId>) -> Result<(), FeedError> {
        self.guarded("subscribe", || self.delegate.subscribe(instruments.clone()))
            .await
    }

    pub async fn try_unsubscribe(&self, instruments: Vec<InstrumentId>) -> Result<(), FeedError> {
        self.guarded("unsubscribe", || {
            self.delegate.unsubscribe(instruments.clone())
        })
        .await
    }

    async fn guarded<T, F, Fut>(
        &self,
        operation: &'static str,
        mut call: F,
    ) -> Result<T, FeedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FeedError>>,
    {
        let policies = self.policies();
        let recorder = self.registry.recorder();

        if !policies.rate_limiter.acquire().await {
            recorder.record_rate_limited(&self.resource);
            return Err(FeedError::rate_limited(&self.resource));
        }

        let Some(permit) = policies.circuit_breaker.try_acquire() else {
            return Err(FeedError::circuit_open(&self.resource));
        };

        let result = policies
            .retry
            .execute(
                || {
                    let started = std::panic::catch_unwind(AssertUnwindSafe(&mut call));
                    async move {
                        let outcome = match started {
                            Ok(future) => AssertUnwindSafe(future).catch_unwind().await,
                            Err(payload) => Err(payload),
                        };
                        match outcome {
                            Ok(result) => result,
                            Err(payload) => {
                                let message = panic_message(payload.as_ref());
                                error!(
                                    resource = %self.resource,
                                    operation,
                                    panic = %message,
                                    "feed call panicked"
                                );
                                Err(FeedError::panicked(message))
                            }
                        }
                    }
                },
                |attempt, err| {
                    recorder.record_retry(&self.resource, attempt);
                    debug!(
                        resource = %self.resource,
                        operation,
                        attempt,
                        error = %err,
                        "retrying feed call"
                    );
                },
            )
            .await;

        match &result {
            Ok(_) => permit.success(),
            Err(_) => permit.failure(),
        }
        result
    }

    fn log_degraded(&self, operation: &'static str, err: &FeedError) {
        warn!(
            resource = %self.resource,
            operation,
            code = err.code(),
            error = %err.message(),
            "feed call failed, continuing degraded"
        );
    }
}

/// The resilient layer is itself a feed; its calls never fail.
impl MarketDataFeed for ResilientFeed {
    fn latest_prices<'a>(&'a self, instruments: Vec<InstrumentId>) -> FeedFuture<'a, PriceMap> {
        Box::pin(async move { Ok(ResilientFeed::latest_prices(self, instruments).await) })
    }

    fn subscribe<'a>(&'a self, instruments: Vec<InstrumentId>) -> FeedFuture<'a, ()> {
        Box::pin(async move {
            ResilientFeed::subscribe(self, instruments).await;
            Ok(())
        })
    }

    fn unsubscribe<'a>(&'a self, instruments: Vec<InstrumentId>) -> FeedFuture<'a, ()> {
        Box::pin(async move {
            ResilientFeed::unsubscribe(self, instruments).await;
            Ok(())
        })
    }

    fn subscribed_symbols<'a>(&'a self) -> FeedFuture<'a, BTreeSet<InstrumentId>> {
        Box::pin(async move { Ok(ResilientFeed::subscribed_symbols(self).await) })
    }
}
