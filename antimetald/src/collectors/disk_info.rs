//! Block device inventory from /sys/block: geometry, queue attributes, and
//! the partition layout of every whole device.

use async_trait::async_trait;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::blockdev::is_partition_in_sysfs;
use crate::collector::once::OnceAdapter;
use crate::collector::{
    Capabilities, Collector, CollectorBase, ContinuousCollector, MetricKind, PointCollector,
};
use crate::collectors::{read_parse, read_trim};
use crate::config::CollectionConfig;
use crate::error::{AgentError, Result};
use crate::payload::MetricPayload;

const SECTOR_SIZE: u64 = 512;

#[derive(Debug, Clone, Default, Serialize)]
pub struct PartitionInfo {
    pub name: String,
    pub size_bytes: u64,
    pub start_sector: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DiskInfo {
    pub device: String,
    pub model: String,
    pub vendor: String,
    pub size_bytes: u64,
    pub logical_block_size: u32,
    pub physical_block_size: u32,
    pub rotational: bool,
    pub queue_depth: u32,
    /// Active I/O scheduler, the bracketed token in queue/scheduler.
    pub scheduler: String,
    pub partitions: Vec<PartitionInfo>,
}

pub struct DiskInfoCollector {
    base: CollectorBase,
    config: CollectionConfig,
}

impl DiskInfoCollector {
    pub fn new(config: &CollectionConfig) -> Self {
        Self {
            base: CollectorBase::new(MetricKind::DiskInfo, "disk_info", Capabilities::point()),
            config: config.clone(),
        }
    }
}

pub fn factory(config: &CollectionConfig) -> Result<Box<dyn ContinuousCollector>> {
    Ok(Box::new(OnceAdapter::new(DiskInfoCollector::new(config))))
}

impl Collector for DiskInfoCollector {
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
impl PointCollector for DiskInfoCollector {
    async fn collect(&self, cancel: &CancellationToken) -> Result<MetricPayload> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        let block_root = self.config.sys_path("block");
        let entries =
            fs::read_dir(&block_root).map_err(|e| AgentError::from_open(&block_root, &e))?;

        let mut disks = Vec::new();
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("loop") || name.starts_with("ram") {
                continue;
            }
            if is_partition_in_sysfs(&self.config.host_sys, &name) {
                continue;
            }
            disks.push(read_disk(&entry.path(), &name));
        }
        disks.sort_by(|a, b| a.device.cmp(&b.device));
        Ok(MetricPayload::DiskInfo(disks))
    }
}

/// Every attribute read is best-effort; a missing file leaves the zero
/// value. `size` and partition `start` are in 512-byte sectors.
fn read_disk(dir: &Path, name: &str) -> DiskInfo {
    let queue = dir.join("queue");
    DiskInfo {
        device: name.to_string(),
        model: read_trim(&dir.join("device/model")).unwrap_or_default(),
        vendor: read_trim(&dir.join("device/vendor")).unwrap_or_default(),
        size_bytes: read_parse::<u64>(&dir.join("size"))
            .map(|sectors| sectors.saturating_mul(SECTOR_SIZE))
            .unwrap_or(0),
        logical_block_size: read_parse(&queue.join("logical_block_size")).unwrap_or(0),
        physical_block_size: read_parse(&queue.join("physical_block_size")).unwrap_or(0),
        rotational: read_parse::<u8>(&queue.join("rotational")).unwrap_or(0) != 0,
        queue_depth: read_parse(&queue.join("nr_requests")).unwrap_or(0),
        scheduler: read_trim(&queue.join("scheduler"))
            .map(|s| active_scheduler(&s))
            .unwrap_or_default(),
        partitions: read_partitions(dir, name),
    }
}

/// The scheduler file lists every option with the active one in brackets:
/// `noop deadline [cfq]`.
pub fn active_scheduler(content: &str) -> String {
    if let (Some(open), Some(close)) = (content.find('['), content.find(']')) {
        if open < close {
            return content[open + 1..close].to_string();
        }
    }
    content.trim().to_string()
}

/// Partition subdirectories carry the disk name as a prefix (`sda/sda1`,
/// `nvme0n1/nvme0n1p1`).
fn read_partitions(dir: &Path, disk: &str) -> Vec<PartitionInfo> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut partitions: Vec<PartitionInfo> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            if !name.starts_with(disk) || name == disk {
                return None;
            }
            let path = e.path();
            Some(PartitionInfo {
                size_bytes: read_parse::<u64>(&path.join("size"))
                    .map(|sectors| sectors.saturating_mul(SECTOR_SIZE))
                    .unwrap_or(0),
                start_sector: read_parse(&path.join("start")).unwrap_or(0),
                name,
            })
        })
        .collect();
    partitions.sort_by(|a, b| a.name.cmp(&b.name));
    partitions
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn scheduler_brackets() {
        assert_eq!(active_scheduler("noop deadline [cfq]"), "cfq");
        assert_eq!(active_scheduler("[mq-deadline] kyber none"), "mq-deadline");
        assert_eq!(active_scheduler("none"), "none");
        assert_eq!(active_scheduler(""), "");
    }

    fn config_at(root: &std::path::Path) -> CollectionConfig {
        let mut config = CollectionConfig {
            host_proc: PathBuf::from("/proc"),
            host_sys: root.to_path_buf(),
            host_dev: PathBuf::from("/dev"),
            ..Default::default()
        };
        config.apply_defaults();
        config
    }

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn inventories_whole_devices_with_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let sda = dir.path().join("block/sda");
        write(&sda.join("size"), "1953525168\n");
        write(&sda.join("device/model"), "Samsung SSD 870\n");
        write(&sda.join("device/vendor"), "ATA     \n");
        write(&sda.join("queue/logical_block_size"), "512\n");
        write(&sda.join("queue/physical_block_size"), "4096\n");
        write(&sda.join("queue/rotational"), "0\n");
        write(&sda.join("queue/nr_requests"), "64\n");
        write(&sda.join("queue/scheduler"), "noop deadline [cfq]\n");
        write(&sda.join("sda1/size"), "2048000\n");
        write(&sda.join("sda1/start"), "2048\n");
        write(&sda.join("sda2/size"), "4096000\n");
        write(&sda.join("sda2/start"), "2050048\n");
        // Non-partition subdirectories must not be picked up.
        fs::create_dir_all(sda.join("queue")).unwrap();

        write(&dir.path().join("block/loop0/size"), "8\n");
        write(&dir.path().join("block/ram0/size"), "8\n");

        let collector = DiskInfoCollector::new(&config_at(dir.path()));
        let payload = collector.collect(&CancellationToken::new()).await.unwrap();
        let disks = match payload {
            MetricPayload::DiskInfo(disks) => disks,
            other => panic!("unexpected payload {other:?}"),
        };

        assert_eq!(disks.len(), 1);
        let disk = &disks[0];
        assert_eq!(disk.device, "sda");
        assert_eq!(disk.size_bytes, 1_953_525_168 * 512);
        assert_eq!(disk.model, "Samsung SSD 870");
        assert_eq!(disk.vendor, "ATA");
        assert_eq!(disk.logical_block_size, 512);
        assert_eq!(disk.physical_block_size, 4096);
        assert!(!disk.rotational);
        assert_eq!(disk.queue_depth, 64);
        assert_eq!(disk.scheduler, "cfq");

        assert_eq!(disk.partitions.len(), 2);
        assert_eq!(disk.partitions[0].name, "sda1");
        assert_eq!(disk.partitions[0].size_bytes, 2_048_000 * 512);
        assert_eq!(disk.partitions[0].start_sector, 2048);
        assert_eq!(disk.partitions[1].name, "sda2");
    }

    #[tokio::test]
    async fn md_devices_stay_whole() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("block/md0/size"), "1024000\n");

        let collector = DiskInfoCollector::new(&config_at(dir.path()));
        let payload = collector.collect(&CancellationToken::new()).await.unwrap();
        let disks = match payload {
            MetricPayload::DiskInfo(disks) => disks,
            other => panic!("unexpected payload {other:?}"),
        };
        assert_eq!(disks.len(), 1);
        assert_eq!(disks[0].device, "md0");
        assert_eq!(disks[0].size_bytes, 1_024_000 * 512);
    }

    #[tokio::test]
    async fn missing_attributes_stay_zero() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("block/vda")).unwrap();

        let collector = DiskInfoCollector::new(&config_at(dir.path()));
        let payload = collector.collect(&CancellationToken::new()).await.unwrap();
        let disks = match payload {
            MetricPayload::DiskInfo(disks) => disks,
            other => panic!("unexpected payload {other:?}"),
        };
        let vda = &disks[0];
        assert_eq!(vda.size_bytes, 0);
        assert_eq!(vda.model, "");
        assert_eq!(vda.scheduler, "");
        assert!(vda.partitions.is_empty());
    }

    #[tokio::test]
    async fn missing_block_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let collector = DiskInfoCollector::new(&config_at(&dir.path().join("nope")));
        assert!(matches!(
            collector.collect(&CancellationToken::new()).await,
            Err(AgentError::NotFound(_))
        ));
    }
}
