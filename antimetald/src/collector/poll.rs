//! Periodic-poll adapter: promotes a point collector to a continuous one by
//! invoking it on a timer and streaming the results into a bounded channel.

use log::debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{
    check_startable, Capabilities, Collector, CollectorStatus, ContinuousCollector,
    ContinuousState, MetricKind, PointCollector,
};
use crate::error::Result;
use crate::payload::MetricPayload;

/// Sized so a stalled consumer buffers minutes of samples before the
/// producer blocks. A full channel blocks the producer (back-pressure); it
/// never drops.
pub const CHANNEL_CAPACITY: usize = 10_000;

pub struct PeriodicAdapter<C> {
    inner: Arc<C>,
    state: Arc<ContinuousState>,
    interval: Duration,
    channel_capacity: usize,
    stop: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl<C: PointCollector + 'static> PeriodicAdapter<C> {
    pub fn new(inner: C, interval: Duration) -> Self {
        Self {
            inner: Arc::new(inner),
            state: ContinuousState::new(),
            interval,
            channel_capacity: CHANNEL_CAPACITY,
            stop: None,
            task: None,
        }
    }

    #[cfg(test)]
    fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }
}

impl<C: PointCollector> Collector for PeriodicAdapter<C> {
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

impl<C: PointCollector + 'static> ContinuousCollector for PeriodicAdapter<C> {
    fn start(&mut self, cancel: CancellationToken) -> Result<mpsc::Receiver<MetricPayload>> {
        check_startable(self.state.status())?;

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let stop = CancellationToken::new();
        self.state.clear_error();

        let inner = Arc::clone(&self.inner);
        let state = Arc::clone(&self.state);
        let stop_signal = stop.clone();
        let interval = self.interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = stop_signal.cancelled() => break,
                    _ = ticker.tick() => {
                        match inner.collect(&cancel).await {
                            Ok(payload) => {
                                // Blocks when the channel is full; a lagging
                                // consumer pushes back on the producer.
                                if tx.send(payload).await.is_err() {
                                    break;
                                }
                                state.clear_error();
                            }
                            Err(err) => {
                                debug!("{} collection cycle failed: {err}", inner.name());
                                state.degrade(err);
                            }
                        }
                    }
                }
            }
            state.set_status(CollectorStatus::Disabled);
        });

        self.stop = Some(stop);
        self.task = Some(task);
        Ok(rx)
    }

    fn stop(&mut self) -> Result<()> {
        if self.state.status() == CollectorStatus::Disabled {
            return Ok(());
        }
        if let Some(stop) = self.stop.take() {
            stop.cancel();
        }
        self.task.take();
        self.state.set_status(CollectorStatus::Disabled);
        Ok(())
    }

    fn status(&self) -> CollectorStatus {
        self.state.status()
    }

    fn last_error(&self) -> Option<crate::error::AgentError> {
        self.state.last_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::CollectorBase;
    use crate::collectors::load::LoadStats;
    use crate::error::AgentError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakePoint {
        base: CollectorBase,
        calls: AtomicUsize,
        failing: AtomicBool,
    }

    impl FakePoint {
        fn new() -> Self {
            Self {
                base: CollectorBase::new(MetricKind::Load, "fake-load", Capabilities::point()),
                calls: AtomicUsize::new(0),
                failing: AtomicBool::new(false),
            }
        }
    }

    impl Collector for FakePoint {
        fn kind(&self) -> MetricKind {
            self.base.kind
        }
        fn name(&self) -> &str {
            self.base.name
        }
        fn capabilities(&self) -> Capabilities {
            self.base.capabilities
        }
    }

    #[async_trait]
    impl PointCollector for FakePoint {
        async fn collect(&self, _cancel: &CancellationToken) -> Result<MetricPayload> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                Err(AgentError::parse("synthetic failure"))
            } else {
                Ok(MetricPayload::Load(LoadStats::default()))
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn polls_on_interval_and_reports_active() {
        let mut adapter = PeriodicAdapter::new(FakePoint::new(), Duration::from_secs(1));
        let cancel = CancellationToken::new();
        let mut rx = adapter.start(cancel.clone()).unwrap();

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
        assert_eq!(adapter.status(), CollectorStatus::Active);
        assert!(adapter.last_error().is_none());

        adapter.stop().unwrap();
        assert_eq!(adapter.status(), CollectorStatus::Disabled);
    }

    #[tokio::test(start_paused = true)]
    async fn double_start_is_rejected() {
        let mut adapter = PeriodicAdapter::new(FakePoint::new(), Duration::from_secs(1));
        let cancel = CancellationToken::new();
        let _rx = adapter.start(cancel.clone()).unwrap();
        // Let the producer run a cycle so the status is Active.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(matches!(
            adapter.start(cancel),
            Err(AgentError::AlreadyRunning)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cycle_failure_degrades_but_continues() {
        let inner = FakePoint::new();
        inner.failing.store(true, Ordering::SeqCst);
        let mut adapter = PeriodicAdapter::new(inner, Duration::from_secs(1));
        let cancel = CancellationToken::new();
        let _rx = adapter.start(cancel).unwrap();

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(adapter.status(), CollectorStatus::Degraded);
        assert!(matches!(adapter.last_error(), Some(AgentError::Parse(_))));

        // Recovery flips back to Active.
        adapter.inner.failing.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(adapter.status(), CollectorStatus::Active);
        assert!(adapter.inner.calls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_production() {
        let mut adapter = PeriodicAdapter::new(FakePoint::new(), Duration::from_secs(1));
        let cancel = CancellationToken::new();
        let mut rx = adapter.start(cancel.clone()).unwrap();
        assert!(rx.recv().await.is_some());

        cancel.cancel();
        // Drain until the producer observes the token and closes the channel.
        while rx.recv().await.is_some() {}
        assert_eq!(adapter.state.status(), CollectorStatus::Disabled);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_of_disabled_collector_is_a_noop() {
        let mut adapter = PeriodicAdapter::new(FakePoint::new(), Duration::from_secs(1));
        assert!(adapter.stop().is_ok());
        assert_eq!(adapter.status(), CollectorStatus::Disabled);
    }

    #[tokio::test(start_paused = true)]
    async fn wrapper_advertises_continuous_only() {
        let adapter = PeriodicAdapter::new(FakePoint::new(), Duration::from_secs(1));
        let caps = adapter.capabilities();
        assert!(caps.supports_continuous);
        assert!(!caps.supports_one_shot);
    }

    #[tokio::test(start_paused = true)]
    async fn full_channel_blocks_producer_without_dropping() {
        let mut adapter = PeriodicAdapter::new(FakePoint::new(), Duration::from_secs(1))
            .with_channel_capacity(2);
        let cancel = CancellationToken::new();
        let mut rx = adapter.start(cancel).unwrap();

        // Producer fills the channel and then parks on send.
        tokio::time::sleep(Duration::from_secs(10)).await;
        let buffered = adapter.inner.calls.load(Ordering::SeqCst);
        assert!(buffered <= 3, "producer kept collecting into a full channel");

        // Draining unblocks it; everything collected is delivered in order.
        let mut received = 0;
        while received < 4 {
            assert!(rx.recv().await.is_some());
            received += 1;
        }
    }
}
