//! In-memory metrics store: a write-through cache of the latest payload and
//! run metadata per collector kind. Nothing is versioned or persisted.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::collector::{CollectorStatus, MetricKind};
use crate::payload::MetricPayload;

/// Metadata about a collector's most recent delivery.
#[derive(Debug, Clone, Serialize)]
pub struct CollectorRun {
    pub status: CollectorStatus,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// The latest aggregate view of the host.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub node_name: String,
    pub cluster_name: Option<String>,
    pub runs: BTreeMap<MetricKind, CollectorRun>,
    pub metrics: BTreeMap<MetricKind, MetricPayload>,
}

pub struct MetricsStore {
    node_name: String,
    cluster_name: Option<String>,
    payloads: DashMap<MetricKind, MetricPayload>,
    runs: DashMap<MetricKind, CollectorRun>,
}

impl MetricsStore {
    pub fn new(node_name: String, cluster_name: Option<String>) -> Self {
        Self {
            node_name,
            cluster_name,
            payloads: DashMap::new(),
            runs: DashMap::new(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Last-writer-wins per kind.
    pub fn set_payload(&self, kind: MetricKind, payload: MetricPayload) {
        self.payloads.insert(kind, payload);
    }

    pub fn payload(&self, kind: MetricKind) -> Option<MetricPayload> {
        self.payloads.get(&kind).map(|entry| entry.clone())
    }

    pub fn record_run(&self, kind: MetricKind, run: CollectorRun) {
        self.runs.insert(kind, run);
    }

    pub fn run(&self, kind: MetricKind) -> Option<CollectorRun> {
        self.runs.get(&kind).map(|entry| entry.clone())
    }

    /// Assemble the current view. The snapshot is a copy; it does not track
    /// later writes.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            timestamp: Utc::now(),
            node_name: self.node_name.clone(),
            cluster_name: self.cluster_name.clone(),
            runs: self
                .runs
                .iter()
                .map(|entry| (*entry.key(), entry.value().clone()))
                .collect(),
            metrics: self
                .payloads
                .iter()
                .map(|entry| (*entry.key(), entry.value().clone()))
                .collect(),
        }
    }

    /// Whole-snapshot swap: replace every per-kind entry with the given
    /// snapshot's contents.
    pub fn swap(&self, snapshot: Snapshot) {
        self.payloads.clear();
        self.runs.clear();
        for (kind, payload) in snapshot.metrics {
            self.payloads.insert(kind, payload);
        }
        for (kind, run) in snapshot.runs {
            self.runs.insert(kind, run);
        }
    }
}
