//! Static memory topology: total memory plus the NUMA layout, with a
//! synthesized single node for hosts without NUMA directories.

use async_trait::async_trait;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::collector::once::OnceAdapter;
use crate::collector::{
    Capabilities, Collector, CollectorBase, ContinuousCollector, MetricKind, PointCollector,
};
use crate::collectors::read_trim;
use crate::config::CollectionConfig;
use crate::error::{AgentError, Result};
use crate::payload::MetricPayload;

#[derive(Debug, Clone, Default, Serialize)]
pub struct NumaNodeInfo {
    pub id: u32,
    pub total_bytes: u64,
    pub cpus: Vec<u32>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryInfo {
    pub total_bytes: u64,
    pub numa_nodes: Vec<NumaNodeInfo>,
}

pub struct MemoryInfoCollector {
    base: CollectorBase,
    config: CollectionConfig,
}

impl MemoryInfoCollector {
    pub fn new(config: &CollectionConfig) -> Self {
        Self {
            base: CollectorBase::new(MetricKind::MemoryInfo, "memory_info", Capabilities::point()),
            config: config.clone(),
        }
    }
}

pub fn factory(config: &CollectionConfig) -> Result<Box<dyn ContinuousCollector>> {
    Ok(Box::new(OnceAdapter::new(MemoryInfoCollector::new(config))))
}

impl Collector for MemoryInfoCollector {
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
impl PointCollector for MemoryInfoCollector {
    async fn collect(&self, cancel: &CancellationToken) -> Result<MetricPayload> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        let path = self.config.proc_path("meminfo");
        let content = fs::read_to_string(&path).map_err(|e| AgentError::from_open(&path, &e))?;
        let total_bytes = parse_mem_total(&content);

        let mut numa_nodes = read_numa_nodes(&self.config);
        if numa_nodes.is_empty() {
            // Non-NUMA host: one synthetic node owning everything.
            numa_nodes.push(NumaNodeInfo {
                id: 0,
                total_bytes,
                cpus: discover_cpu_ids(&self.config),
            });
        }

        Ok(MetricPayload::MemoryInfo(MemoryInfo {
            total_bytes,
            numa_nodes,
        }))
    }
}

fn parse_mem_total(meminfo: &str) -> u64 {
    meminfo
        .lines()
        .find_map(|line| {
            let (name, rest) = line.split_once(':')?;
            if name.trim() != "MemTotal" {
                return None;
            }
            rest.split_whitespace().next()?.parse::<u64>().ok()
        })
        .map(|kb| kb.saturating_mul(1024))
        .unwrap_or(0)
}

fn read_numa_nodes(config: &CollectionConfig) -> Vec<NumaNodeInfo> {
    let node_root = config.sys_path("devices/system/node");
    let Ok(entries) = fs::read_dir(&node_root) else {
        return Vec::new();
    };

    let mut nodes = Vec::new();
    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let Some(id) = name
            .strip_prefix("node")
            .and_then(|rest| rest.parse::<u32>().ok())
        else {
            continue;
        };

        let dir = entry.path();
        nodes.push(NumaNodeInfo {
            id,
            total_bytes: node_mem_total(&dir),
            cpus: read_trim(&dir.join("cpulist"))
                .map(|list| parse_cpulist(&list))
                .unwrap_or_default(),
        });
    }
    nodes.sort_by_key(|n| n.id);
    nodes
}

/// Node meminfo rows look like `Node 0 MemTotal: 32768 kB`; only MemTotal
/// matters here.
fn node_mem_total(node_dir: &Path) -> u64 {
    let Some(content) = read_trim(&node_dir.join("meminfo")) else {
        return 0;
    };
    content
        .lines()
        .find_map(|line| {
            let (label, rest) = line.split_once(':')?;
            if !label.trim().ends_with("MemTotal") {
                return None;
            }
            rest.split_whitespace().next()?.parse::<u64>().ok()
        })
        .map(|kb| kb.saturating_mul(1024))
        .unwrap_or(0)
}

/// A cpulist is comma-separated single IDs and inclusive `a-b` ranges.
/// Malformed entries are skipped.
pub fn parse_cpulist(list: &str) -> Vec<u32> {
    let mut cpus = Vec::new();
    for part in list.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((start, end)) = part.split_once('-') {
            if let (Ok(start), Ok(end)) = (start.parse::<u32>(), end.parse::<u32>()) {
                if start <= end {
                    cpus.extend(start..=end);
                }
            }
        } else if let Ok(id) = part.parse::<u32>() {
            cpus.push(id);
        }
    }
    cpus
}

/// IDs of the `cpu[0-9]+` directories under devices/system/cpu.
fn discover_cpu_ids(config: &CollectionConfig) -> Vec<u32> {
    let cpu_root = config.sys_path("devices/system/cpu");
    let Ok(entries) = fs::read_dir(cpu_root) else {
        return Vec::new();
    };
    let mut ids: Vec<u32> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            e.file_name()
                .to_string_lossy()
                .strip_prefix("cpu")
                .and_then(|rest| rest.parse().ok())
        })
        .collect();
    ids.sort_unstable();
    ids
}
