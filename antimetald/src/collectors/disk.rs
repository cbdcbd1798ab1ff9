//! Disk I/O counters from proc/diskstats, whole devices only.

use async_trait::async_trait;
use log::debug;
use serde::Serialize;
use std::fs;
use tokio_util::sync::CancellationToken;

use crate::blockdev::is_partition;
use crate::collector::poll::PeriodicAdapter;
use crate::collector::{
    Capabilities, Collector, CollectorBase, ContinuousCollector, MetricKind, PointCollector,
};
use crate::collectors::field_u64;
use crate::config::CollectionConfig;
use crate::error::{AgentError, Result};
use crate::payload::MetricPayload;

/// The classic 11 cumulative counters per whole block device. Sector counts
/// are in 512-byte units regardless of the device's block size.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiskStats {
    pub major: u32,
    pub minor: u32,
    pub device: String,
    pub reads_completed: u64,
    pub reads_merged: u64,
    pub sectors_read: u64,
    pub read_time_ms: u64,
    pub writes_completed: u64,
    pub writes_merged: u64,
    pub sectors_written: u64,
    pub write_time_ms: u64,
    pub io_in_progress: u64,
    pub io_time_ms: u64,
    pub weighted_io_time_ms: u64,
}

pub struct DiskCollector {
    base: CollectorBase,
    config: CollectionConfig,
}

impl DiskCollector {
    pub fn new(config: &CollectionConfig) -> Self {
        Self {
            base: CollectorBase::new(MetricKind::Disk, "disk", Capabilities::point()),
            config: config.clone(),
        }
    }
}

pub fn factory(config: &CollectionConfig) -> Result<Box<dyn ContinuousCollector>> {
    Ok(Box::new(PeriodicAdapter::new(
        DiskCollector::new(config),
        config.interval(),
    )))
}

impl Collector for DiskCollector {
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
impl PointCollector for DiskCollector {
    async fn collect(&self, cancel: &CancellationToken) -> Result<MetricPayload> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        let path = self.config.proc_path("diskstats");
        let content = fs::read_to_string(&path).map_err(|e| AgentError::from_open(&path, &e))?;
        Ok(MetricPayload::Disk(parse_diskstats(&content)))
    }
}

pub fn parse_diskstats(content: &str) -> Vec<DiskStats> {
    let mut stats = Vec::new();
    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        // Newer kernels append discard/flush counters; we need the first 14.
        if fields.len() < 14 {
            continue;
        }

        let device = fields[2];
        if is_partition(device) {
            continue;
        }

        let (major, minor) = match (fields[0].parse(), fields[1].parse()) {
            (Ok(major), Ok(minor)) => (major, minor),
            _ => {
                debug!("diskstats: bad device numbers in line {line:?}");
                continue;
            }
        };

        stats.push(DiskStats {
            major,
            minor,
            device: device.to_string(),
            reads_completed: field_u64(fields.get(3).copied()),
            reads_merged: field_u64(fields.get(4).copied()),
            sectors_read: field_u64(fields.get(5).copied()),
            read_time_ms: field_u64(fields.get(6).copied()),
            writes_completed: field_u64(fields.get(7).copied()),
            writes_merged: field_u64(fields.get(8).copied()),
            sectors_written: field_u64(fields.get(9).copied()),
            write_time_ms: field_u64(fields.get(10).copied()),
            io_in_progress: field_u64(fields.get(11).copied()),
            io_time_ms: field_u64(fields.get(12).copied()),
            weighted_io_time_ms: field_u64(fields.get(13).copied()),
        });
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
   8       0 sda 100 10 2000 300 50 5 1000 200 0 400 500
   8       1 sda1 90 9 1800 280 45 4 900 190 0 380 470
 259       0 nvme0n1 7 0 224 1 0 0 0 0 0 4 1
 259       1 nvme0n1p1 5 0 160 1 0 0 0 0 0 3 1
   7       0 loop0 20 0 44 1 0 0 0 0 0 2 1
 253       0 dm-0 30 0 88 2 10 0 80 5 0 6 7
";

    #[test]
    fn partitions_are_filtered() {
        let stats = parse_diskstats(SAMPLE);
        let names: Vec<&str> = stats.iter().map(|s| s.device.as_str()).collect();
        assert_eq!(names, vec!["sda", "nvme0n1", "loop0", "dm-0"]);
    }

    #[test]
    fn counters_land_in_order() {
        let stats = parse_diskstats(SAMPLE);
        let sda = &stats[0];
        assert_eq!((sda.major, sda.minor), (8, 0));
        assert_eq!(sda.reads_completed, 100);
        assert_eq!(sda.sectors_read, 2000);
        assert_eq!(sda.writes_completed, 50);
        assert_eq!(sda.weighted_io_time_ms, 500);
    }

    #[test]
    fn short_lines_are_skipped() {
        let stats = parse_diskstats("8 0 sda 1 2 3\n8 16 sdb 1 2 3 4 5 6 7 8 9 10 11\n");
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].device, "sdb");
    }

    #[test]
    fn bad_counter_fields_zero_out() {
        let stats = parse_diskstats("8 0 sda 1 2 x 4 5 6 7 8 9 10 11\n");
        assert_eq!(stats[0].reads_merged, 2);
        assert_eq!(stats[0].sectors_read, 0);
        assert_eq!(stats[0].read_time_ms, 4);
    }

    #[test]
    fn extra_trailing_fields_are_tolerated() {
        // 4.18+ kernels have 18 fields; the first 14 still parse.
        let stats =
            parse_diskstats("8 0 sda 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15\n");
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].weighted_io_time_ms, 11);
    }
}
