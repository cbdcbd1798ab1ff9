//! The Manager wires everything together: it resolves node identity,
//! instantiates enabled collectors from the global registry, starts them,
//! and forwards their output channels into the metrics store.

use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::collector::registry::{self, LiveRegistry};
use crate::collector::{CollectorStatus, MetricKind};
use crate::config::CollectionConfig;
use crate::error::{AgentError, Result};
use crate::payload::MetricPayload;
use crate::store::{CollectorRun, MetricsStore};

const ENV_NODE_NAME: &str = "NODE_NAME";

pub struct Manager {
    config: CollectionConfig,
    node_name: String,
    store: Arc<MetricsStore>,
    live: LiveRegistry,
    consumers: Vec<JoinHandle<()>>,
}

impl Manager {
    /// Applies environment overrides and defaults to the configuration and
    /// resolves the node identity: explicit name, then `NODE_NAME`, then the
    /// host name.
    pub fn new(
        mut config: CollectionConfig,
        node_name: Option<String>,
        cluster_name: Option<String>,
    ) -> Result<Self> {
        config.apply_env_overrides();
        config.apply_defaults();
        config.validate()?;

        let node_name = resolve_node_name(node_name);
        let store = Arc::new(MetricsStore::new(node_name.clone(), cluster_name));

        Ok(Self {
            config,
            node_name,
            store,
            live: LiveRegistry::new(),
            consumers: Vec::new(),
        })
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<MetricsStore> {
        Arc::clone(&self.store)
    }

    /// Instantiate every enabled kind from the global factory registry. A
    /// factory failure disables that kind and never takes down the agent.
    pub fn init_collectors(&mut self) {
        for kind in registry::registered_kinds() {
            if !self.config.is_enabled(kind) {
                continue;
            }
            match registry::build(kind, &self.config) {
                Ok(collector) => {
                    if let Err(err) = self.live.add_continuous(collector) {
                        warn!("[manager] cannot register {kind}: {err}");
                    }
                }
                Err(err) => warn!("[manager] cannot build {kind} collector: {err}"),
            }
        }
    }

    /// Start every live collector and spawn a consumer per output channel
    /// that write-throughs payloads into the store.
    pub fn start(&mut self, cancel: &CancellationToken) {
        for (kind, collector) in self.live.continuous_iter_mut() {
            let kind = *kind;
            match collector.start(cancel.child_token()) {
                Ok(mut rx) => {
                    info!("[manager] started {kind} collector");
                    let store = Arc::clone(&self.store);
                    self.consumers.push(tokio::spawn(async move {
                        let mut last = Instant::now();
                        while let Some(payload) = rx.recv().await {
                            let now = Instant::now();
                            store.record_run(
                                kind,
                                CollectorRun {
                                    status: CollectorStatus::Active,
                                    duration_ms: now.duration_since(last).as_millis() as u64,
                                    error: None,
                                    timestamp: chrono::Utc::now(),
                                },
                            );
                            last = now;
                            store.set_payload(kind, payload);
                        }
                    }));
                }
                Err(err) => {
                    warn!("[manager] failed to start {kind}: {err}");
                    self.store.record_run(
                        kind,
                        CollectorRun {
                            status: CollectorStatus::Failed,
                            duration_ms: 0,
                            error: Some(err.to_string()),
                            timestamp: chrono::Utc::now(),
                        },
                    );
                }
            }
        }
    }

    /// Stop every collector. Consumers drain and exit on their own once the
    /// producer channels close.
    pub fn stop(&mut self) {
        for (kind, collector) in self.live.continuous_iter_mut() {
            if let Err(err) = collector.stop() {
                warn!("[manager] failed to stop {kind}: {err}");
            }
        }
        self.consumers.clear();
    }

    pub fn statuses(&self) -> Vec<(MetricKind, CollectorStatus, Option<AgentError>)> {
        self.live
            .continuous_iter()
            .map(|(kind, collector)| (*kind, collector.status(), collector.last_error()))
            .collect()
    }

    /// Collect one payload of the given kind with a fresh collector
    /// instance. A timeout abandons the pending collection and surfaces the
    /// cancellation failure kind.
    pub async fn collect_once(&self, kind: MetricKind, timeout: Duration) -> Result<MetricPayload> {
        let mut collector = registry::build(kind, &self.config)?;
        let cancel = CancellationToken::new();
        let mut rx = collector.start(cancel.clone())?;

        let outcome = match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(payload)) => Ok(payload),
            Ok(None) => Err(collector
                .last_error()
                .unwrap_or(AgentError::ChannelClosed)),
            Err(_elapsed) => {
                cancel.cancel();
                Err(AgentError::Cancelled)
            }
        };

        let _ = collector.stop();
        outcome
    }
}

fn resolve_node_name(explicit: Option<String>) -> String {
    explicit
        .filter(|name| !name.is_empty())
        .or_else(|| std::env::var(ENV_NODE_NAME).ok().filter(|v| !v.is_empty()))
        .or_else(|| hostname::get().ok().and_then(|h| h.into_string().ok()))
        .unwrap_or_else(|| "unknown".to_string())
}
