//! Memory usage from proc/meminfo. Everything is normalized to bytes: kB
//! fields are scaled by 1024, huge-page counts by the reported huge-page
//! size.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use tokio_util::sync::CancellationToken;

use crate::collector::poll::PeriodicAdapter;
use crate::collector::{
    Capabilities, Collector, CollectorBase, ContinuousCollector, MetricKind, PointCollector,
};
use crate::config::CollectionConfig;
use crate::error::{AgentError, Result};
use crate::payload::MetricPayload;

/// The named counters we track, all in bytes. Fields absent from the host's
/// meminfo stay zero.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryStats {
    pub mem_total: u64,
    pub mem_free: u64,
    pub mem_available: u64,
    pub buffers: u64,
    pub cached: u64,
    pub swap_cached: u64,
    pub active: u64,
    pub inactive: u64,
    pub active_anon: u64,
    pub inactive_anon: u64,
    pub active_file: u64,
    pub inactive_file: u64,
    pub unevictable: u64,
    pub mlocked: u64,
    pub swap_total: u64,
    pub swap_free: u64,
    pub dirty: u64,
    pub writeback: u64,
    pub anon_pages: u64,
    pub mapped: u64,
    pub shmem: u64,
    pub slab: u64,
    pub s_reclaimable: u64,
    pub s_unreclaim: u64,
    pub kernel_stack: u64,
    pub page_tables: u64,
    pub commit_limit: u64,
    pub committed_as: u64,
    /// Bytes covered by allocated huge pages (count x huge-page size).
    pub huge_pages_total: u64,
    /// Bytes covered by free huge pages.
    pub huge_pages_free: u64,
    /// Size of one huge page, in bytes.
    pub hugepagesize: u64,
}

pub struct MemoryCollector {
    base: CollectorBase,
    config: CollectionConfig,
}

impl MemoryCollector {
    pub fn new(config: &CollectionConfig) -> Self {
        Self {
            base: CollectorBase::new(MetricKind::Memory, "memory", Capabilities::point()),
            config: config.clone(),
        }
    }
}

pub fn factory(config: &CollectionConfig) -> Result<Box<dyn ContinuousCollector>> {
    Ok(Box::new(PeriodicAdapter::new(
        MemoryCollector::new(config),
        config.interval(),
    )))
}

impl Collector for MemoryCollector {
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
impl PointCollector for MemoryCollector {
    async fn collect(&self, cancel: &CancellationToken) -> Result<MetricPayload> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        let path = self.config.proc_path("meminfo");
        let content = fs::read_to_string(&path).map_err(|e| AgentError::from_open(&path, &e))?;
        Ok(MetricPayload::Memory(parse_meminfo(&content)))
    }
}

/// Raw values keyed by field name. Lines are `Name: value [unit]`; a field
/// that fails to parse is skipped, never fatal.
fn raw_values(content: &str) -> HashMap<&str, (u64, bool)> {
    let mut values = HashMap::new();
    for line in content.lines() {
        let Some((name, rest)) = line.split_once(':') else {
            continue;
        };
        let mut tokens = rest.split_whitespace();
        let Some(value) = tokens.next().and_then(|t| t.parse::<u64>().ok()) else {
            continue;
        };
        let is_kb = tokens.next() == Some("kB");
        values.insert(name.trim(), (value, is_kb));
    }
    values
}

pub fn parse_meminfo(content: &str) -> MemoryStats {
    let raw = raw_values(content);
    let bytes = |name: &str| -> u64 {
        match raw.get(name) {
            Some(&(value, true)) => value.saturating_mul(1024),
            Some(&(value, false)) => value,
            None => 0,
        }
    };

    let hugepagesize = bytes("Hugepagesize");
    // Huge-page lines are bare counts; scale them by the page size to get
    // bytes like every other field.
    let huge_pages = |name: &str| -> u64 {
        raw.get(name)
            .map(|&(count, _)| count.saturating_mul(hugepagesize))
            .unwrap_or(0)
    };

    MemoryStats {
        mem_total: bytes("MemTotal"),
        mem_free: bytes("MemFree"),
        mem_available: bytes("MemAvailable"),
        buffers: bytes("Buffers"),
        cached: bytes("Cached"),
        swap_cached: bytes("SwapCached"),
        active: bytes("Active"),
        inactive: bytes("Inactive"),
        active_anon: bytes("Active(anon)"),
        inactive_anon: bytes("Inactive(anon)"),
        active_file: bytes("Active(file)"),
        inactive_file: bytes("Inactive(file)"),
        unevictable: bytes("Unevictable"),
        mlocked: bytes("Mlocked"),
        swap_total: bytes("SwapTotal"),
        swap_free: bytes("SwapFree"),
        dirty: bytes("Dirty"),
        writeback: bytes("Writeback"),
        anon_pages: bytes("AnonPages"),
        mapped: bytes("Mapped"),
        shmem: bytes("Shmem"),
        slab: bytes("Slab"),
        s_reclaimable: bytes("SReclaimable"),
        s_unreclaim: bytes("SUnreclaim"),
        kernel_stack: bytes("KernelStack"),
        page_tables: bytes("PageTables"),
        commit_limit: bytes("CommitLimit"),
        committed_as: bytes("Committed_AS"),
        huge_pages_total: huge_pages("HugePages_Total"),
        huge_pages_free: huge_pages("HugePages_Free"),
        hugepagesize,
    }
}
