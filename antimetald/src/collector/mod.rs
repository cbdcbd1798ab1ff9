//! The collector contract: metric kinds, capabilities, lifecycle status, and
//! the point/continuous collector traits every observation engine implements.

pub mod once;
pub mod poll;
pub mod registry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{AgentError, Result};
use crate::payload::MetricPayload;

/// Category of records a collector produces. Primary key of the factory
/// registry; exactly one factory may register per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Load,
    Memory,
    Cpu,
    Process,
    Disk,
    Network,
    Tcp,
    Kernel,
    CpuInfo,
    MemoryInfo,
    DiskInfo,
    NetworkInfo,
}

impl MetricKind {
    pub const ALL: [MetricKind; 12] = [
        MetricKind::Load,
        MetricKind::Memory,
        MetricKind::Cpu,
        MetricKind::Process,
        MetricKind::Disk,
        MetricKind::Network,
        MetricKind::Tcp,
        MetricKind::Kernel,
        MetricKind::CpuInfo,
        MetricKind::MemoryInfo,
        MetricKind::DiskInfo,
        MetricKind::NetworkInfo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Load => "load",
            MetricKind::Memory => "memory",
            MetricKind::Cpu => "cpu",
            MetricKind::Process => "process",
            MetricKind::Disk => "disk",
            MetricKind::Network => "network",
            MetricKind::Tcp => "tcp",
            MetricKind::Kernel => "kernel",
            MetricKind::CpuInfo => "cpu_info",
            MetricKind::MemoryInfo => "memory_info",
            MetricKind::DiskInfo => "disk_info",
            MetricKind::NetworkInfo => "network_info",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        MetricKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| AgentError::not_found(format!("metric kind {s:?}")))
    }
}

/// Immutable descriptor of what a collector can do and what it needs from
/// the environment. Orchestrators consult this before starting anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub supports_one_shot: bool,
    pub supports_continuous: bool,
    pub requires_root: bool,
    pub requires_ebpf: bool,
    /// Minimum kernel version, as a semantic-version string.
    pub min_kernel_version: Option<&'static str>,
}

impl Capabilities {
    /// A plain pseudo-file reader: single-shot, no privileges.
    pub const fn point() -> Self {
        Self {
            supports_one_shot: true,
            supports_continuous: false,
            requires_root: false,
            requires_ebpf: false,
            min_kernel_version: None,
        }
    }
}

/// Lifecycle state of a continuous collector. Transitions are monotonic per
/// start/stop cycle: Disabled -> Active -> {Degraded <-> Active | Failed}
/// -> Disabled.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectorStatus {
    Disabled = 0,
    Active = 1,
    Degraded = 2,
    Failed = 3,
}

impl CollectorStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => CollectorStatus::Active,
            2 => CollectorStatus::Degraded,
            3 => CollectorStatus::Failed,
            _ => CollectorStatus::Disabled,
        }
    }
}

impl fmt::Display for CollectorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CollectorStatus::Disabled => "disabled",
            CollectorStatus::Active => "active",
            CollectorStatus::Degraded => "degraded",
            CollectorStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Identity shared by every collector.
#[derive(Debug, Clone)]
pub struct CollectorBase {
    pub kind: MetricKind,
    pub name: &'static str,
    pub capabilities: Capabilities,
}

impl CollectorBase {
    pub fn new(kind: MetricKind, name: &'static str, capabilities: Capabilities) -> Self {
        Self {
            kind,
            name,
            capabilities,
        }
    }
}

/// Status and last-error cell shared between a continuous collector and its
/// producer task. Updated from the hot path, so the status is an atomic.
#[derive(Debug, Default)]
pub struct ContinuousState {
    status: AtomicU8,
    last_error: Mutex<Option<AgentError>>,
}

impl ContinuousState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            status: AtomicU8::new(CollectorStatus::Disabled as u8),
            last_error: Mutex::new(None),
        })
    }

    pub fn status(&self) -> CollectorStatus {
        CollectorStatus::from_u8(self.status.load(Ordering::Relaxed))
    }

    pub fn set_status(&self, status: CollectorStatus) {
        self.status.store(status as u8, Ordering::Relaxed);
    }

    pub fn last_error(&self) -> Option<AgentError> {
        self.last_error.lock().unwrap().clone()
    }

    /// A non-null error is fatal: record it and transition to Failed.
    pub fn fail(&self, err: AgentError) {
        *self.last_error.lock().unwrap() = Some(err);
        self.set_status(CollectorStatus::Failed);
    }

    /// A cycle failure: record the error but keep producing.
    pub fn degrade(&self, err: AgentError) {
        *self.last_error.lock().unwrap() = Some(err);
        self.set_status(CollectorStatus::Degraded);
    }

    /// Clearing the error restores Active.
    pub fn clear_error(&self) {
        *self.last_error.lock().unwrap() = None;
        self.set_status(CollectorStatus::Active);
    }
}

/// Common identity surface of both collector variants.
pub trait Collector: Send + Sync {
    fn kind(&self) -> MetricKind;
    fn name(&self) -> &str;
    fn capabilities(&self) -> Capabilities;
}

/// A single-shot collector: one `collect` call yields one payload. May block
/// on pseudo-file I/O; observes the cancellation token between steps.
#[async_trait]
pub trait PointCollector: Collector {
    async fn collect(&self, cancel: &CancellationToken) -> Result<MetricPayload>;
}

/// A long-running collector streaming payloads into a bounded channel until
/// stopped. Implementations hold their producer task, open descriptors, and
/// the sending half of the channel; the caller owns the receiving half.
pub trait ContinuousCollector: Collector {
    /// Begin producing. Long-running producers fail with
    /// [`AgentError::AlreadyRunning`] unless currently Disabled or Failed (a
    /// failed collector may be explicitly restarted); the exactly-once
    /// adapter instead accepts every start and re-publishes its cache.
    fn start(&mut self, cancel: CancellationToken) -> Result<mpsc::Receiver<MetricPayload>>;

    /// Halt production. Stopping a Disabled collector is a no-op success.
    fn stop(&mut self) -> Result<()>;

    fn status(&self) -> CollectorStatus;

    fn last_error(&self) -> Option<AgentError>;
}

/// Guard for `start`: only Disabled and Failed collectors may (re)start.
pub(crate) fn check_startable(status: CollectorStatus) -> Result<()> {
    match status {
        CollectorStatus::Disabled | CollectorStatus::Failed => Ok(()),
        _ => Err(AgentError::AlreadyRunning),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_string_roundtrip() {
        for kind in MetricKind::ALL {
            assert_eq!(kind.as_str().parse::<MetricKind>().unwrap(), kind);
        }
        assert!("bogus".parse::<MetricKind>().is_err());
    }

    #[test]
    fn kind_serde_uses_snake_case() {
        let json = serde_json::to_string(&MetricKind::CpuInfo).unwrap();
        assert_eq!(json, "\"cpu_info\"");
        let back: MetricKind = serde_json::from_str("\"network_info\"").unwrap();
        assert_eq!(back, MetricKind::NetworkInfo);
    }

    #[test]
    fn state_transitions() {
        let state = ContinuousState::new();
        assert_eq!(state.status(), CollectorStatus::Disabled);

        state.set_status(CollectorStatus::Active);
        state.degrade(AgentError::parse("cycle failed"));
        assert_eq!(state.status(), CollectorStatus::Degraded);
        assert!(state.last_error().is_some());

        state.clear_error();
        assert_eq!(state.status(), CollectorStatus::Active);
        assert!(state.last_error().is_none());

        state.fail(AgentError::ChannelClosed);
        assert_eq!(state.status(), CollectorStatus::Failed);
        assert_eq!(state.last_error(), Some(AgentError::ChannelClosed));
    }

    #[test]
    fn startable_only_from_disabled_or_failed() {
        assert!(check_startable(CollectorStatus::Disabled).is_ok());
        assert!(check_startable(CollectorStatus::Failed).is_ok());
        assert_eq!(
            check_startable(CollectorStatus::Active),
            Err(AgentError::AlreadyRunning)
        );
        assert_eq!(
            check_startable(CollectorStatus::Degraded),
            Err(AgentError::AlreadyRunning)
        );
    }
}
