//! Network interface inventory from /sys/class/net, with a priority cascade
//! for classifying each interface.

use async_trait::async_trait;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::collector::once::OnceAdapter;
use crate::collector::{
    Capabilities, Collector, CollectorBase, ContinuousCollector, MetricKind, PointCollector,
};
use crate::collectors::{read_parse, read_trim};
use crate::config::CollectionConfig;
use crate::error::{AgentError, Result};
use crate::payload::MetricPayload;

/// ARPHRD constants from the `type` attribute, per <linux/if_arp.h>.
const ARPHRD_ETHER: u32 = 1;
const ARPHRD_LOOPBACK: u32 = 772;
const ARPHRD_TUNNEL: u32 = 776;
const ARPHRD_TUNNEL6: u32 = 778;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceType {
    Ethernet,
    Wireless,
    Loopback,
    Tunnel,
    Virtual,
}

impl Default for InterfaceType {
    fn default() -> Self {
        InterfaceType::Virtual
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InterfaceInfo {
    pub name: String,
    pub interface_type: InterfaceType,
    pub mac_address: String,
    /// None when the driver reports the speed as unavailable (negative).
    pub speed_mbps: Option<u64>,
    pub duplex: String,
    pub mtu: u32,
    pub oper_state: String,
    pub carrier: Option<bool>,
    /// Kernel driver name, the basename of the device/driver symlink.
    pub driver: String,
}

pub struct NetworkInfoCollector {
    base: CollectorBase,
    config: CollectionConfig,
}

impl NetworkInfoCollector {
    pub fn new(config: &CollectionConfig) -> Self {
        Self {
            base: CollectorBase::new(
                MetricKind::NetworkInfo,
                "network_info",
                Capabilities::point(),
            ),
            config: config.clone(),
        }
    }
}

pub fn factory(config: &CollectionConfig) -> Result<Box<dyn ContinuousCollector>> {
    Ok(Box::new(OnceAdapter::new(NetworkInfoCollector::new(config))))
}

impl Collector for NetworkInfoCollector {
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
impl PointCollector for NetworkInfoCollector {
    async fn collect(&self, cancel: &CancellationToken) -> Result<MetricPayload> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        let net_root = self.config.sys_path("class/net");
        let entries = fs::read_dir(&net_root).map_err(|e| AgentError::from_open(&net_root, &e))?;

        let mut interfaces: Vec<InterfaceInfo> = entries
            .filter_map(|e| e.ok())
            .map(|e| read_interface(&e.path(), &e.file_name().to_string_lossy()))
            .collect();
        interfaces.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(MetricPayload::NetworkInfo(interfaces))
    }
}

fn read_interface(dir: &Path, name: &str) -> InterfaceInfo {
    InterfaceInfo {
        name: name.to_string(),
        interface_type: classify(dir, name),
        mac_address: read_trim(&dir.join("address")).unwrap_or_default(),
        speed_mbps: read_parse::<i64>(&dir.join("speed"))
            .filter(|&speed| speed >= 0)
            .map(|speed| speed as u64),
        duplex: read_trim(&dir.join("duplex")).unwrap_or_default(),
        mtu: read_parse(&dir.join("mtu")).unwrap_or(0),
        oper_state: read_trim(&dir.join("operstate")).unwrap_or_default(),
        carrier: read_parse::<u8>(&dir.join("carrier")).map(|c| c != 0),
        driver: driver_name(dir).unwrap_or_default(),
    }
}

/// Classification cascade, most reliable signal first: the wireless
/// subdirectory, the loopback name, the kernel ARPHRD constant, naming
/// conventions, and finally the presence of a physical device link.
fn classify(dir: &Path, name: &str) -> InterfaceType {
    if dir.join("wireless").is_dir() {
        return InterfaceType::Wireless;
    }
    if name == "lo" {
        return InterfaceType::Loopback;
    }

    if let Some(arphrd) = read_parse::<u32>(&dir.join("type")) {
        match arphrd {
            ARPHRD_ETHER => {
                // Ethernet ARPHRD covers veth/bridge/tap too; let the naming
                // heuristics refine before trusting it.
                if let Some(by_name) = classify_by_name(name) {
                    return by_name;
                }
                return InterfaceType::Ethernet;
            }
            ARPHRD_LOOPBACK => return InterfaceType::Loopback,
            ARPHRD_TUNNEL | ARPHRD_TUNNEL6 => return InterfaceType::Tunnel,
            _ => {}
        }
    }

    if let Some(by_name) = classify_by_name(name) {
        return by_name;
    }
    if dir.join("device").exists() {
        return InterfaceType::Ethernet;
    }
    InterfaceType::Virtual
}

fn classify_by_name(name: &str) -> Option<InterfaceType> {
    // veth before the eth check is irrelevant (no shared prefix) but the
    // virtual families must win over the physical ones.
    if name.starts_with("veth")
        || name.starts_with("docker")
        || name.starts_with("br-")
        || name.starts_with("virbr")
    {
        return Some(InterfaceType::Virtual);
    }
    if name.starts_with("eth") {
        return Some(InterfaceType::Ethernet);
    }
    if name.starts_with("wlan") {
        return Some(InterfaceType::Wireless);
    }
    if name.starts_with("tun") || name.starts_with("tap") {
        return Some(InterfaceType::Tunnel);
    }
    None
}

fn driver_name(dir: &Path) -> Option<String> {
    let target = fs::read_link(dir.join("device/driver")).ok()?;
    Some(target.file_name()?.to_string_lossy().into_owned())
}
