use std::collections::{BTreeSet, HashMap};
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::metrics::{MetricsRecorder, NoopMetrics};
use crate::store::SnapshotStore;
use crate::{InstrumentId, PriceSnapshot};

/// Latest snapshot per requested instrument. Instruments without a snapshot
/// are absent.
pub type PriceMap = HashMap<InstrumentId, Arc<PriceSnapshot>>;

pub type FeedFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, FeedError>> + Send + 'a>>;

/// Upstream error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedErrorKind {
    Unavailable,
    InvalidRequest,
    RateLimited,
    CircuitOpen,
    Internal,
}

/// Structured feed error used by the resilience policies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedError {
    kind: FeedErrorKind,
    message: String,
    retryable: bool,
}

impl FeedError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: FeedErrorKind::Unavailable,
            message: message.into(),
            retryable: true,
        }
    }

    /// Caller error. Never retried.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            kind: FeedErrorKind::InvalidRequest,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn rate_limited(resource: &str) -> Self {
        Self {
            kind: FeedErrorKind::RateLimited,
            message: format!("no rate limit permit available for '{resource}'"),
            retryable: false,
        }
    }

    pub fn circuit_open(resource: &str) -> Self {
        Self {
            kind: FeedErrorKind::CircuitOpen,
            message: format!("circuit breaker for '{resource}' is open"),
            retryable: false,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: FeedErrorKind::Internal,
            message: message.into(),
            retryable: true,
        }
    }

    /// The feed implementation panicked. Not retried.
    pub fn panicked(message: impl Into<String>) -> Self {
        Self {
            kind: FeedErrorKind::Internal,
            message: format!("feed call panicked: {}", message.into()),
            retryable: false,
        }
    }

    pub const fn kind(&self) -> FeedErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            FeedErrorKind::Unavailable => "feed.unavailable",
            FeedErrorKind::InvalidRequest => "feed.invalid_request",
            FeedErrorKind::RateLimited => "feed.rate_limited",
            FeedErrorKind::CircuitOpen => "feed.circuit_open",
            FeedErrorKind::Internal => "feed.internal",
        }
    }
}

impl Display for FeedError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for FeedError {}

/// Upstream market data feed contract.
///
/// Implementations must be `Send + Sync`; the resilient layer shares one
/// instance across every caller.
pub trait MarketDataFeed: Send + Sync {
    /// Latest known snapshot for each requested instrument that has one.
    fn latest_prices<'a>(&'a self, instruments: Vec<InstrumentId>) -> FeedFuture<'a, PriceMap>;

    fn subscribe<'a>(&'a self, instruments: Vec<InstrumentId>) -> FeedFuture<'a, ()>;

    fn unsubscribe<'a>(&'a self, instruments: Vec<InstrumentId>) -> FeedFuture<'a, ()>;

    fn subscribed_symbols<'a>(&'a self) -> FeedFuture<'a, BTreeSet<InstrumentId>>;
}

/// In-process feed serving reads from the [`SnapshotStore`] and tracking
/// the subscription set.
pub struct SnapshotFeed {
    store: SnapshotStore,
    subscriptions: RwLock<BTreeSet<InstrumentId>>,
    recorder: Arc<dyn MetricsRecorder>,
}

impl std::fmt::Debug for SnapshotFeed {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotFeed")
            .field("store", &self.store)
            .field("subscriptions", &*self.subscriptions.read())
            .finish_non_exhaustive()
    }
}

impl SnapshotFeed {
    pub fn new(store: SnapshotStore, recorder: Arc<dyn MetricsRecorder>) -> Self {
        Self {
            store,
            subscriptions: RwLock::new(BTreeSet::new()),
            recorder,
        }
    }

    pub fn with_store(store: SnapshotStore) -> Self {
        Self::new(store, Arc::new(NoopMetrics))
    }
}

impl MarketDataFeed for SnapshotFeed {
    fn latest_prices<'a>(&'a self, instruments: Vec<InstrumentId>) -> FeedFuture<'a, PriceMap> {
        Box::pin(async move { Ok(self.store.get_many(&instruments)) })
    }

    fn subscribe<'a>(&'a self, instruments: Vec<InstrumentId>) -> FeedFuture<'a, ()> {
        Box::pin(async move {
            if instruments.is_empty() {
                return Err(FeedError::invalid_request(
                    "subscribe request must include at least one instrument",
                ));
            }
            let active = {
                let mut subscriptions = self.subscriptions.write();
                subscriptions.extend(instruments.iter().cloned());
                subscriptions.len()
            };
            self.recorder.record_active_subscriptions(active);
            info!(count = instruments.len(), active, "subscribed instruments");
            Ok(())
        })
    }

    fn unsubscribe<'a>(&'a self, instruments: Vec<InstrumentId>) -> FeedFuture<'a, ()> {
        Box::pin(async move {
            if instruments.is_empty() {
                return Err(FeedError::invalid_request(
                    "unsubscribe request must include at least one instrument",
                ));
            }
            let active = {
                let mut subscriptions = self.subscriptions.write();
                for instrument in &instruments {
                    subscriptions.remove(instrument);
                }
                subscriptions.len()
            };
            self.recorder.record_active_subscriptions(active);
            info!(count = instruments.len(), active, "unsubscribed instruments");
            Ok(())
        })
    }

    fn subscribed_symbols<'a>(&'a self) -> FeedFuture<'a, BTreeSet<InstrumentId>> {
        Box::pin(async move { Ok(self.subscriptions.read().clone()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PriceTick;

    fn id(raw: &str) -> InstrumentId {
        InstrumentId::parse(raw).expect("valid")
    }

    #[test]
    fn only_invalid_requests_are_excluded_from_retry() {
        assert!(FeedError::unavailable("down").retryable());
        assert!(FeedError::internal("boom").retryable());
        assert!(!FeedError::invalid_request("bad").retryable());
        assert_eq!(FeedError::circuit_open("feed").code(), "feed.circuit_open");
        assert_eq!(
            FeedError::unavailable("down").to_string(),
            "down (feed.unavailable)"
        );
    }

    #[tokio::test]
    async fn reads_copy_only_known_instruments() {
        let store = SnapshotStore::new();
        store.upsert(PriceTick::new(id("IBM.N")).with_bid(150.0));
        let feed = SnapshotFeed::with_store(store);

        let prices = feed
            .latest_prices(vec![id("IBM.N"), id("MSFT.O")])
            .await
            .expect("read succeeds");

        assert_eq!(prices.len(), 1);
        assert_eq!(prices[&id("IBM.N")].bid, Some(150.0));
    }

    #[tokio::test]
    async fn subscriptions_track_the_active_set() {
        let feed = SnapshotFeed::with_store(SnapshotStore::new());

        feed.subscribe(vec![id("IBM.N"), id("EUR=")])
            .await
            .expect("subscribe");
        feed.unsubscribe(vec![id("IBM.N")]).await.expect("unsubscribe");

        let active = feed.subscribed_symbols().await.expect("list");
        assert_eq!(active, BTreeSet::from([id("EUR=")]));

        let err = feed.subscribe(Vec::new()).await.expect_err("empty request");
        assert_eq!(err.kind(), FeedErrorKind::InvalidRequest);
    }
}
