//! Load-average collector: proc/loadavg plus uptime.

use async_trait::async_trait;
use serde::Serialize;
use std::fs;
use tokio_util::sync::CancellationToken;

use crate::collector::poll::PeriodicAdapter;
use crate::collector::{
    Capabilities, Collector, CollectorBase, ContinuousCollector, MetricKind, PointCollector,
};
use crate::config::CollectionConfig;
use crate::error::{AgentError, Result};
use crate::payload::MetricPayload;

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadStats {
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
    pub running_procs: u64,
    pub total_procs: u64,
    pub last_pid: i64,
    /// Seconds since boot, zero when proc/uptime is unreadable.
    pub uptime_secs: f64,
}

pub struct LoadCollector {
    base: CollectorBase,
    config: CollectionConfig,
}

impl LoadCollector {
    pub fn new(config: &CollectionConfig) -> Self {
        Self {
            base: CollectorBase::new(MetricKind::Load, "load", Capabilities::point()),
            config: config.clone(),
        }
    }
}

pub fn factory(config: &CollectionConfig) -> Result<Box<dyn ContinuousCollector>> {
    Ok(Box::new(PeriodicAdapter::new(
        LoadCollector::new(config),
        config.interval(),
    )))
}

impl Collector for LoadCollector {
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
impl PointCollector for LoadCollector {
    async fn collect(&self, cancel: &CancellationToken) -> Result<MetricPayload> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        let path = self.config.proc_path("loadavg");
        let content = fs::read_to_string(&path).map_err(|e| AgentError::from_open(&path, &e))?;
        let mut stats = parse_loadavg(&content)?;
        stats.uptime_secs = read_uptime(&self.config);
        Ok(MetricPayload::Load(stats))
    }
}

/// loadavg has exactly five whitespace-delimited fields: three averages, a
/// running/total pair, and the most recently assigned PID. Anything else is
/// a fatal parse error for this collector.
fn parse_loadavg(content: &str) -> Result<LoadStats> {
    let fields: Vec<&str> = content.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(AgentError::parse(format!(
            "loadavg: expected 5 fields, got {}",
            fields.len()
        )));
    }

    let avg = |s: &str| -> Result<f64> {
        s.parse()
            .map_err(|_| AgentError::parse(format!("loadavg: bad average {s:?}")))
    };

    let (running, total) = fields[3]
        .split_once('/')
        .ok_or_else(|| AgentError::parse(format!("loadavg: bad proc counts {:?}", fields[3])))?;

    Ok(LoadStats {
        load1: avg(fields[0])?,
        load5: avg(fields[1])?,
        load15: avg(fields[2])?,
        running_procs: running
            .parse()
            .map_err(|_| AgentError::parse(format!("loadavg: bad running count {running:?}")))?,
        total_procs: total
            .parse()
            .map_err(|_| AgentError::parse(format!("loadavg: bad total count {total:?}")))?,
        last_pid: fields[4]
            .parse()
            .map_err(|_| AgentError::parse(format!("loadavg: bad pid {:?}", fields[4])))?,
        uptime_secs: 0.0,
    })
}

/// Uptime is best-effort: unreadable or malformed yields zero.
fn read_uptime(config: &CollectionConfig) -> f64 {
    fs::read_to_string(config.proc_path("uptime"))
        .ok()
        .and_then(|content| {
            content
                .split_whitespace()
                .next()
                .and_then(|t| t.parse().ok())
        })
        .unwrap_or(0.0)
}
