//! The observation engines: one module per metric kind, each registering a
//! factory that promotes it to a continuous collector.

pub mod cpu;
pub mod cpu_info;
pub mod disk;
pub mod disk_info;
pub mod exec;
pub mod kmsg;
pub mod load;
pub mod memory;
pub mod memory_info;
pub mod network;
pub mod network_info;
pub mod tcp;

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::collector::registry::{register_into, CollectorFactory};
use crate::collector::MetricKind;

/// Insert every built-in factory. Called once by the global registry's
/// initialiser; panics if a kind appears twice.
pub fn register_builtins(map: &mut HashMap<MetricKind, CollectorFactory>) {
    register_into(map, MetricKind::Load, load::factory);
    register_into(map, MetricKind::Memory, memory::factory);
    register_into(map, MetricKind::Cpu, cpu::factory);
    register_into(map, MetricKind::Process, exec::factory);
    register_into(map, MetricKind::Disk, disk::factory);
    register_into(map, MetricKind::Network, network::factory);
    register_into(map, MetricKind::Tcp, tcp::factory);
    register_into(map, MetricKind::Kernel, kmsg::factory);
    register_into(map, MetricKind::CpuInfo, cpu_info::factory);
    register_into(map, MetricKind::MemoryInfo, memory_info::factory);
    register_into(map, MetricKind::DiskInfo, disk_info::factory);
    register_into(map, MetricKind::NetworkInfo, network_info::factory);
}

/// Read a small sysfs/proc text file, trimmed. Missing or unreadable files
/// yield None; callers leave the corresponding field at its zero value.
pub(crate) fn read_trim(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

/// Read and parse a small text file; any failure yields None.
pub(crate) fn read_parse<T: FromStr>(path: &Path) -> Option<T> {
    read_trim(path)?.parse().ok()
}

/// Parse a counter field, defaulting to zero. Parse failures never abort a
/// collection; they only zero the field.
pub(crate) fn field_u64(token: Option<&str>) -> u64 {
    token.and_then(|t| t.parse().ok()).unwrap_or(0)
}
