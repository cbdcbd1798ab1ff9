use serde::Serialize;

use crate::collector::MetricKind;
use crate::collectors::cpu::CpuStats;
use crate::collectors::cpu_info::CpuInfo;
use crate::collectors::disk::DiskStats;
use crate::collectors::disk_info::DiskInfo;
use crate::collectors::exec::ExecEvent;
use crate::collectors::kmsg::KernelMessage;
use crate::collectors::load::LoadStats;
use crate::collectors::memory::MemoryStats;
use crate::collectors::memory_info::MemoryInfo;
use crate::collectors::network::InterfaceStats;
use crate::collectors::network_info::InterfaceInfo;
use crate::collectors::tcp::TcpStats;

/// One typed record produced by a collector. The variant always matches the
/// producing collector's kind; consumers dispatch on it or serialize it
/// whole.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum MetricPayload {
    Load(LoadStats),
    Memory(MemoryStats),
    Cpu(Vec<CpuStats>),
    Process(ExecEvent),
    Disk(Vec<DiskStats>),
    Network(Vec<InterfaceStats>),
    Tcp(TcpStats),
    Kernel(Vec<KernelMessage>),
    CpuInfo(CpuInfo),
    MemoryInfo(MemoryInfo),
    DiskInfo(Vec<DiskInfo>),
    NetworkInfo(Vec<InterfaceInfo>),
}

impl MetricPayload {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricPayload::Load(_) => MetricKind::Load,
            MetricPayload::Memory(_) => MetricKind::Memory,
            MetricPayload::Cpu(_) => MetricKind::Cpu,
            MetricPayload::Process(_) => MetricKind::Process,
            MetricPayload::Disk(_) => MetricKind::Disk,
            MetricPayload::Network(_) => MetricKind::Network,
            MetricPayload::Tcp(_) => MetricKind::Tcp,
            MetricPayload::Kernel(_) => MetricKind::Kernel,
            MetricPayload::CpuInfo(_) => MetricKind::CpuInfo,
            MetricPayload::MemoryInfo(_) => MetricKind::MemoryInfo,
            MetricPayload::DiskInfo(_) => MetricKind::DiskInfo,
            MetricPayload::NetworkInfo(_) => MetricKind::NetworkInfo,
        }
    }
}
