//! Static CPU topology: proc/cpuinfo blocks, cpufreq bounds, NUMA node
//! count. Collected once per agent lifetime via the exactly-once adapter.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use tokio_util::sync::CancellationToken;

use crate::collector::once::OnceAdapter;
use crate::collector::{
    Capabilities, Collector, CollectorBase, ContinuousCollector, MetricKind, PointCollector,
};
use crate::collectors::read_parse;
use crate::config::CollectionConfig;
use crate::error::{AgentError, Result};
use crate::payload::MetricPayload;

#[derive(Debug, Clone, Default, Serialize)]
pub struct CpuInfo {
    pub logical_cores: u32,
    pub physical_cores: u32,
    pub vendor: String,
    pub model_name: String,
    pub flags: Vec<String>,
    pub bogomips: f64,
    /// Frequency bounds in MHz from cpufreq, zero when unavailable.
    pub min_freq_mhz: f64,
    pub max_freq_mhz: f64,
    pub numa_nodes: u32,
}

pub struct CpuInfoCollector {
    base: CollectorBase,
    config: CollectionConfig,
}

impl CpuInfoCollector {
    pub fn new(config: &CollectionConfig) -> Self {
        Self {
            base: CollectorBase::new(MetricKind::CpuInfo, "cpu_info", Capabilities::point()),
            config: config.clone(),
        }
    }
}

pub fn factory(config: &CollectionConfig) -> Result<Box<dyn ContinuousCollector>> {
    Ok(Box::new(OnceAdapter::new(CpuInfoCollector::new(config))))
}

impl Collector for CpuInfoCollector {
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
impl PointCollector for CpuInfoCollector {
    async fn collect(&self, cancel: &CancellationToken) -> Result<MetricPayload> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        let path = self.config.proc_path("cpuinfo");
        let content = fs::read_to_string(&path).map_err(|e| AgentError::from_open(&path, &e))?;
        let mut info = parse_cpuinfo(&content);

        let cpufreq = self.config.sys_path("devices/system/cpu/cpu0/cpufreq");
        info.min_freq_mhz = read_parse::<f64>(&cpufreq.join("cpuinfo_min_freq"))
            .map(|khz| khz / 1000.0)
            .unwrap_or(0.0);
        info.max_freq_mhz = read_parse::<f64>(&cpufreq.join("cpuinfo_max_freq"))
            .map(|khz| khz / 1000.0)
            .unwrap_or(0.0);
        info.numa_nodes = count_numa_nodes(&self.config);

        Ok(MetricPayload::CpuInfo(info))
    }
}

/// Processor blocks are delimited by blank lines; keys within a block are
/// canonicalized so x86 and ARM spellings accumulate into the same fields
/// (`flags`/`Features`, `bogomips`/`BogoMIPS`).
fn canonical_key(key: &str) -> &str {
    match key {
        "Features" => "flags",
        "BogoMIPS" => "bogomips",
        other => other,
    }
}

pub fn parse_cpuinfo(content: &str) -> CpuInfo {
    let mut blocks: Vec<HashMap<&str, &str>> = Vec::new();
    let mut current: HashMap<&str, &str> = HashMap::new();

    for line in content.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            current.insert(canonical_key(key.trim()), value.trim());
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }

    let logical = blocks
        .iter()
        .filter(|b| b.contains_key("processor"))
        .count() as u32;

    // Physical cores = distinct (physical id, core id) pairs. A topology
    // where every block collapses onto (0, 0) is degenerate (common in VMs
    // and on ARM), in which case the logical count is the best answer.
    let pairs: HashSet<(&str, &str)> = blocks
        .iter()
        .filter_map(|b| Some((*b.get("physical id")?, *b.get("core id")?)))
        .collect();
    let physical = if pairs.is_empty() || (pairs.len() == 1 && pairs.contains(&("0", "0")) && logical > 1)
    {
        logical
    } else {
        pairs.len() as u32
    };

    let first = blocks.first();
    let get = |key: &str| -> String {
        first
            .and_then(|b| b.get(key))
            .map(|v| v.to_string())
            .unwrap_or_default()
    };

    CpuInfo {
        logical_cores: logical,
        physical_cores: physical,
        vendor: get("vendor_id"),
        model_name: get("model name"),
        flags: first
            .and_then(|b| b.get("flags"))
            .map(|f| f.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default(),
        bogomips: first
            .and_then(|b| b.get("bogomips"))
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0),
        min_freq_mhz: 0.0,
        max_freq_mhz: 0.0,
        numa_nodes: 1,
    }
}

/// `node[0-9]*` directories under devices/system/node; a host without the
/// directory tree counts as one node.
fn count_numa_nodes(config: &CollectionConfig) -> u32 {
    let node_root = config.sys_path("devices/system/node");
    let count = fs::read_dir(node_root)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| {
                    let name = e.file_name();
                    let name = name.to_string_lossy();
                    name.strip_prefix("node")
                        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
                })
                .count() as u32
        })
        .unwrap_or(0);
    count.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const X86: &str = "\
processor\t: 0
vendor_id\t: GenuineIntel
model name\t: Intel(R) Xeon(R) CPU E5-2680 v4 @ 2.40GHz
physical id\t: 0
core id\t: 0
flags\t\t: fpu vme de pse tsc msr sse sse2
bogomips\t: 4800.00

processor\t: 1
vendor_id\t: GenuineIntel
model name\t: Intel(R) Xeon(R) CPU E5-2680 v4 @ 2.40GHz
physical id\t: 0
core id\t: 1
flags\t\t: fpu vme de pse tsc msr sse sse2
bogomips\t: 4800.00

processor\t: 2
vendor_id\t: GenuineIntel
model name\t: Intel(R) Xeon(R) CPU E5-2680 v4 @ 2.40GHz
physical id\t: 1
core id\t: 0
flags\t\t: fpu vme de pse tsc msr sse sse2
bogomips\t: 4800.00

processor\t: 3
vendor_id\t: GenuineIntel
model name\t: Intel(R) Xeon(R) CPU E5-2680 v4 @ 2.40GHz
physical id\t: 1
core id\t: 1
flags\t\t: fpu vme de pse tsc msr sse sse2
bogomips\t: 4800.00
";

    #[test]
    fn counts_logical_and_physical_cores() {
        let info = parse_cpuinfo(X86);
        assert_eq!(info.logical_cores, 4);
        // Two sockets x two cores = four distinct (physical id, core id).
        assert_eq!(info.physical_cores, 4);
        assert_eq!(info.vendor, "GenuineIntel");
        assert!(info.model_name.contains("E5-2680"));
        assert!(info.flags.contains(&"sse2".to_string()));
        assert_eq!(info.bogomips, 4800.0);
    }

    #[test]
    fn hyperthreads_share_physical_cores() {
        // Four logical CPUs, two distinct cores.
        let content = "\
processor: 0\nphysical id: 0\ncore id: 0\n\n\
processor: 1\nphysical id: 0\ncore id: 0\n\n\
processor: 2\nphysical id: 0\ncore id: 1\n\n\
processor: 3\nphysical id: 0\ncore id: 1\n";
        let info = parse_cpuinfo(content);
        assert_eq!(info.logical_cores, 4);
        assert_eq!(info.physical_cores, 2);
    }

    #[test]
    fn degenerate_topology_falls_back_to_logical() {
        let content = "\
processor: 0\nphysical id: 0\ncore id: 0\n\n\
processor: 1\nphysical id: 0\ncore id: 0\n";
        let info = parse_cpuinfo(content);
        assert_eq!(info.physical_cores, 2);
    }

    #[test]
    fn missing_topology_falls_back_to_logical() {
        let content = "processor: 0\n\nprocessor: 1\n\nprocessor: 2\n";
        let info = parse_cpuinfo(content);
        assert_eq!(info.logical_cores, 3);
        assert_eq!(info.physical_cores, 3);
    }

    #[test]
    fn arm_spellings_are_aliases() {
        let content = "\
processor: 0
Features: fp asimd evtstrm aes
BogoMIPS: 108.00
";
        let info = parse_cpuinfo(content);
        assert!(info.flags.contains(&"asimd".to_string()));
        assert_eq!(info.bogomips, 108.0);
    }

    fn config_at(root: &std::path::Path) -> CollectionConfig {
        let mut config = CollectionConfig {
            host_proc: root.join("proc"),
            host_sys: root.join("sys"),
            host_dev: PathBuf::from("/dev"),
            ..Default::default()
        };
        config.apply_defaults();
        config
    }

    #[tokio::test]
    async fn cpufreq_and_numa_come_from_sysfs() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_at(dir.path());

        std::fs::create_dir_all(config.host_proc.clone()).unwrap();
        std::fs::write(config.proc_path("cpuinfo"), X86).unwrap();

        let cpufreq = config.sys_path("devices/system/cpu/cpu0/cpufreq");
        std::fs::create_dir_all(&cpufreq).unwrap();
        std::fs::write(cpufreq.join("cpuinfo_min_freq"), "1200000\n").unwrap();
        std::fs::write(cpufreq.join("cpuinfo_max_freq"), "3300000\n").unwrap();

        for node in ["node0", "node1", "has_cpu"] {
            std::fs::create_dir_all(config.sys_path("devices/system/node").join(node)).unwrap();
        }

        let collector = CpuInfoCollector::new(&config);
        let payload = collector.collect(&CancellationToken::new()).await.unwrap();
        match payload {
            MetricPayload::CpuInfo(info) => {
                assert_eq!(info.min_freq_mhz, 1200.0);
                assert_eq!(info.max_freq_mhz, 3300.0);
                assert_eq!(info.numa_nodes, 2);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_sysfs_leaves_zero_frequencies() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_at(dir.path());
        std::fs::create_dir_all(config.host_proc.clone()).unwrap();
        std::fs::write(config.proc_path("cpuinfo"), "processor: 0\n").unwrap();

        let collector = CpuInfoCollector::new(&config);
        let payload = collector.collect(&CancellationToken::new()).await.unwrap();
        match payload {
            MetricPayload::CpuInfo(info) => {
                assert_eq!(info.min_freq_mhz, 0.0);
                assert_eq!(info.max_freq_mhz, 0.0);
                assert_eq!(info.numa_nodes, 1);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
