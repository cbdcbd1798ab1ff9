//! Exactly-once adapter for data that does not change while the host is up
//! (hardware inventory). The wrapped point collector runs at most once per
//! adapter lifetime; every start re-publishes the memoised result.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{
    Capabilities, Collector, CollectorStatus, ContinuousCollector, ContinuousState, MetricKind,
    PointCollector,
};
use crate::error::{AgentError, Result};
use crate::payload::MetricPayload;

pub struct OnceAdapter<C> {
    inner: Arc<C>,
    state: Arc<ContinuousState>,
    cache: Arc<tokio::sync::OnceCell<std::result::Result<MetricPayload, AgentError>>>,
}

impl<C: PointCollector + 'static> OnceAdapter<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner: Arc::new(inner),
            state: ContinuousState::new(),
            cache: Arc::new(tokio::sync::OnceCell::new()),
        }
    }
}

impl<C: PointCollector> Collector for OnceAdapter<C> {
    fn kind(&self) -> MetricKind {
        self.inner.kind()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_one_shot: false,
            supports_continuous: true,
            ..self.inner.capabilities()
        }
    }
}

impl<C: PointCollector + 'static> ContinuousCollector for OnceAdapter<C> {
    /// Transition to Active, run the wrapped collector if it has never run,
    /// and return a capacity-1 channel that carries the cached value (if
    /// any) and then closes. Unlike the periodic adapter, `start` never
    /// rejects: each call re-enters Active and re-publishes the cache, even
    /// while a previous channel is still live.
    fn start(&mut self, cancel: CancellationToken) -> Result<mpsc::Receiver<MetricPayload>> {
        self.state.set_status(CollectorStatus::Active);

        let (tx, rx) = mpsc::channel(1);
        let inner = Arc::clone(&self.inner);
        let state = Arc::clone(&self.state);
        let cache = Arc::clone(&self.cache);

        tokio::spawn(async move {
            let result = cache
                .get_or_init(|| async { inner.collect(&cancel).await })
                .await;
            match result {
                Ok(payload) => {
                    state.clear_error();
                    let _ = tx.send(payload.clone()).await;
                }
                Err(err) => {
                    state.fail(err.clone());
                }
            }
            // tx drops here, closing the channel after at most one payload.
        });

        Ok(rx)
    }

    /// Returns to Disabled. The cache is intentionally retained: a stop/start
    /// cycle re-publishes the same result without re-running the collector.
    fn stop(&mut self) -> Result<()> {
        self.state.set_status(CollectorStatus::Disabled);
        Ok(())
    }

    fn status(&self) -> CollectorStatus {
        self.state.status()
    }

    fn last_error(&self) -> Option<AgentError> {
        self.state.last_error()
    }
}
