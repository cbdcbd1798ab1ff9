//! Per-CPU time counters from proc/stat, in USER_HZ ticks. Consumers
//! difference successive samples themselves; nothing here computes rates.

use async_trait::async_trait;
use log::warn;
use serde::Serialize;
use std::fs;
use tokio_util::sync::CancellationToken;

use crate::collector::poll::PeriodicAdapter;
use crate::collector::{
    Capabilities, Collector, CollectorBase, ContinuousCollector, MetricKind, PointCollector,
};
use crate::collectors::field_u64;
use crate::config::CollectionConfig;
use crate::error::{AgentError, Result};
use crate::payload::MetricPayload;

/// Index −1 is the aggregate `cpu` line; 0..N are the per-core lines. The
/// last three counters only exist on newer kernels and stay zero elsewhere.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CpuStats {
    pub index: i32,
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
    pub guest: u64,
    pub guest_nice: u64,
}

pub struct CpuCollector {
    base: CollectorBase,
    config: CollectionConfig,
}

impl CpuCollector {
    pub fn new(config: &CollectionConfig) -> Self {
        Self {
            base: CollectorBase::new(MetricKind::Cpu, "cpu", Capabilities::point()),
            config: config.clone(),
        }
    }
}

pub fn factory(config: &CollectionConfig) -> Result<Box<dyn ContinuousCollector>> {
    Ok(Box::new(PeriodicAdapter::new(
        CpuCollector::new(config),
        config.interval(),
    )))
}

impl Collector for CpuCollector {
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
impl PointCollector for CpuCollector {
    async fn collect(&self, cancel: &CancellationToken) -> Result<MetricPayload> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        let path = self.config.proc_path("stat");
        let content = fs::read_to_string(&path).map_err(|e| AgentError::from_open(&path, &e))?;
        let stats = parse_stat(&content)?;
        check_contiguity(&stats);
        Ok(MetricPayload::Cpu(stats))
    }
}

fn parse_stat(content: &str) -> Result<Vec<CpuStats>> {
    let mut stats = Vec::new();
    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(&label) = fields.first() else {
            continue;
        };
        if !label.starts_with("cpu") {
            continue;
        }

        let index = if label == "cpu" {
            -1
        } else {
            match label[3..].parse::<i32>() {
                Ok(n) if n >= 0 => n,
                _ => continue,
            }
        };

        // user through softirq must be present; anything shorter is a
        // malformed record and is skipped.
        if fields.len() < 8 {
            continue;
        }

        stats.push(CpuStats {
            index,
            user: field_u64(fields.get(1).copied()),
            nice: field_u64(fields.get(2).copied()),
            system: field_u64(fields.get(3).copied()),
            idle: field_u64(fields.get(4).copied()),
            iowait: field_u64(fields.get(5).copied()),
            irq: field_u64(fields.get(6).copied()),
            softirq: field_u64(fields.get(7).copied()),
            steal: field_u64(fields.get(8).copied()),
            guest: field_u64(fields.get(9).copied()),
            guest_nice: field_u64(fields.get(10).copied()),
        });
    }

    if stats.is_empty() {
        return Err(AgentError::parse("stat: no cpu lines"));
    }
    Ok(stats)
}

/// Offline cores leave holes in the index sequence; worth a note in the log
/// since per-core consumers often assume 0..N.
fn check_contiguity(stats: &[CpuStats]) {
    let mut cores: Vec<i32> = stats.iter().map(|s| s.index).filter(|&i| i >= 0).collect();
    cores.sort_unstable();
    for (expected, &index) in cores.iter().enumerate() {
        if index != expected as i32 {
            warn!("cpu: non-contiguous core indices: {cores:?}");
            return;
        }
    }
}
