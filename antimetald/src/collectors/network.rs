//! Per-interface traffic counters from proc/net/dev plus link metadata from
//! sysfs.

use async_trait::async_trait;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::collector::poll::PeriodicAdapter;
use crate::collector::{
    Capabilities, Collector, CollectorBase, ContinuousCollector, MetricKind, PointCollector,
};
use crate::collectors::{field_u64, read_parse, read_trim};
use crate::config::CollectionConfig;
use crate::error::{AgentError, Result};
use crate::payload::MetricPayload;

/// The sixteen receive/transmit counters of one net/dev row, plus whatever
/// link metadata sysfs offers for the interface. Counter fields are
/// cumulative since boot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InterfaceStats {
    pub interface: String,
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub rx_errors: u64,
    pub rx_dropped: u64,
    pub rx_fifo: u64,
    pub rx_frame: u64,
    pub rx_compressed: u64,
    pub rx_multicast: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
    pub tx_errors: u64,
    pub tx_dropped: u64,
    pub tx_fifo: u64,
    pub tx_collisions: u64,
    pub tx_carrier: u64,
    pub tx_compressed: u64,
    /// Link speed in Mb/s; None when the driver reports it as unavailable.
    pub speed_mbps: Option<u64>,
    pub mtu: u32,
    pub oper_state: String,
    pub carrier: Option<bool>,
}

pub struct NetworkCollector {
    base: CollectorBase,
    config: CollectionConfig,
}

impl NetworkCollector {
    pub fn new(config: &CollectionConfig) -> Self {
        Self {
            base: CollectorBase::new(MetricKind::Network, "network", Capabilities::point()),
            config: config.clone(),
        }
    }
}

pub fn factory(config: &CollectionConfig) -> Result<Box<dyn ContinuousCollector>> {
    Ok(Box::new(PeriodicAdapter::new(
        NetworkCollector::new(config),
        config.interval(),
    )))
}

impl Collector for NetworkCollector {
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
impl PointCollector for NetworkCollector {
    async fn collect(&self, cancel: &CancellationToken) -> Result<MetricPayload> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        let path = self.config.proc_path("net/dev");
        let content = fs::read_to_string(&path).map_err(|e| AgentError::from_open(&path, &e))?;
        let mut stats = parse_net_dev(&content);
        for iface in &mut stats {
            let sysfs = self.config.sys_path("class/net").join(&iface.interface);
            enrich_from_sysfs(iface, &sysfs);
        }
        Ok(MetricPayload::Network(stats))
    }
}

/// net/dev carries two header lines, then one row per interface:
/// `eth0: <8 rx counters> <8 tx counters>`.
pub fn parse_net_dev(content: &str) -> Vec<InterfaceStats> {
    let mut stats = Vec::new();
    for line in content.lines().skip(2) {
        let Some((name, counters)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let fields: Vec<&str> = counters.split_whitespace().collect();
        if fields.len() < 16 {
            continue;
        }
        stats.push(InterfaceStats {
            interface: name.to_string(),
            rx_bytes: field_u64(fields.first().copied()),
            rx_packets: field_u64(fields.get(1).copied()),
            rx_errors: field_u64(fields.get(2).copied()),
            rx_dropped: field_u64(fields.get(3).copied()),
            rx_fifo: field_u64(fields.get(4).copied()),
            rx_frame: field_u64(fields.get(5).copied()),
            rx_compressed: field_u64(fields.get(6).copied()),
            rx_multicast: field_u64(fields.get(7).copied()),
            tx_bytes: field_u64(fields.get(8).copied()),
            tx_packets: field_u64(fields.get(9).copied()),
            tx_errors: field_u64(fields.get(10).copied()),
            tx_dropped: field_u64(fields.get(11).copied()),
            tx_fifo: field_u64(fields.get(12).copied()),
            tx_collisions: field_u64(fields.get(13).copied()),
            tx_carrier: field_u64(fields.get(14).copied()),
            tx_compressed: field_u64(fields.get(15).copied()),
            ..Default::default()
        });
    }
    stats
}

/// Every sysfs attribute is optional; missing files leave the zero value.
/// Drivers report an unknown speed as -1, which maps to None.
fn enrich_from_sysfs(iface: &mut InterfaceStats, sysfs: &Path) {
    iface.speed_mbps = read_parse::<i64>(&sysfs.join("speed"))
        .filter(|&speed| speed >= 0)
        .map(|speed| speed as u64);
    iface.mtu = read_parse(&sysfs.join("mtu")).unwrap_or(0);
    iface.oper_state = read_trim(&sysfs.join("operstate")).unwrap_or_default();
    iface.carrier = read_parse::<u8>(&sysfs.join("carrier")).map(|c| c != 0);
}
