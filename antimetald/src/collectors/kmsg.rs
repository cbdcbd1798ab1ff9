//! Kernel log collector: reads the dev/kmsg record stream, keeps a bounded
//! window of raw records, and decodes them into structured messages with
//! wall-clock timestamps reconstructed from the cached boot time.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use log::debug;
use serde::Serialize;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::os::unix::fs::OpenOptionsExt;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::collector::poll::PeriodicAdapter;
use crate::collector::{
    Capabilities, Collector, CollectorBase, ContinuousCollector, MetricKind, PointCollector,
};
use crate::config::CollectionConfig;
use crate::error::{AgentError, Result};
use crate::hostinfo;
use crate::payload::MetricPayload;
use crate::ringbuf::RingBuffer;

/// How many raw records the collector retains between reads.
pub const DEFAULT_MESSAGE_LIMIT: usize = 1000;

/// One read returns one record; the kernel caps records well under this.
const MAX_RECORD_BYTES: usize = 8192;

#[derive(Debug, Clone, Serialize)]
pub struct KernelMessage {
    /// Boot time plus the record's microseconds-since-boot.
    pub timestamp: DateTime<Utc>,
    pub facility: u8,
    pub severity: u8,
    pub sequence: u64,
    pub message: String,
    pub subsystem: Option<String>,
    pub device: Option<String>,
}

pub struct KmsgCollector {
    base: CollectorBase,
    config: CollectionConfig,
    ring: Mutex<RingBuffer<String>>,
    /// Kept open across cycles so each sweep only sees new records.
    file: Mutex<Option<File>>,
}

impl KmsgCollector {
    pub fn new(config: &CollectionConfig) -> Self {
        Self::with_limit(config, DEFAULT_MESSAGE_LIMIT)
    }

    pub fn with_limit(config: &CollectionConfig, limit: usize) -> Self {
        Self {
            base: CollectorBase::new(
                MetricKind::Kernel,
                "kernel",
                Capabilities {
                    requires_root: true,
                    ..Capabilities::point()
                },
            ),
            config: config.clone(),
            ring: Mutex::new(RingBuffer::new(limit)),
            file: Mutex::new(None),
        }
    }
}

pub fn factory(config: &CollectionConfig) -> Result<Box<dyn ContinuousCollector>> {
    Ok(Box::new(PeriodicAdapter::new(
        KmsgCollector::new(config),
        config.interval(),
    )))
}

impl Collector for KmsgCollector {
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
impl PointCollector for KmsgCollector {
    async fn collect(&self, cancel: &CancellationToken) -> Result<MetricPayload> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        let boot_time = hostinfo::boot_time_secs(&self.config.host_proc)?;

        {
            let mut file = self.file.lock().unwrap();
            if file.is_none() {
                let path = self.config.dev_path("kmsg");
                match std::fs::OpenOptions::new()
                    .read(true)
                    .custom_flags(libc::O_NONBLOCK)
                    .open(&path)
                {
                    Ok(f) => *file = Some(f),
                    // An inaccessible device yields an empty set, not a
                    // failure; unprivileged agents simply see no kernel log.
                    Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                        debug!("kmsg: {} not readable, returning empty set", path.display());
                        return Ok(MetricPayload::Kernel(Vec::new()));
                    }
                    Err(e) => return Err(AgentError::from_open(&path, &e)),
                }
            }

            let mut ring = self.ring.lock().unwrap();
            sweep(file.as_mut().unwrap(), &mut ring);
        }

        let ring = self.ring.lock().unwrap();
        let messages = ring
            .get_all()
            .iter()
            .filter_map(|raw| match parse_record(raw, boot_time) {
                Ok(msg) => Some(msg),
                Err(err) => {
                    debug!("kmsg: skipping record: {err}");
                    None
                }
            })
            .collect();
        Ok(MetricPayload::Kernel(messages))
    }
}

/// Drain every available record into the ring. The device returns exactly
/// one record per read; EAGAIN is the no-data condition that ends the sweep,
/// and EPIPE means the kernel overwrote part of its buffer while we were
/// away — some messages were lost but the stream remains valid.
fn sweep<R: Read>(reader: &mut R, ring: &mut RingBuffer<String>) {
    let mut buf = vec![0u8; MAX_RECORD_BYTES];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => ring.push(String::from_utf8_lossy(&buf[..n]).into_owned()),
            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if e.raw_os_error() == Some(libc::EPIPE) => {
                debug!("kmsg: kernel ring buffer overrun, continuing");
            }
            Err(e) => {
                debug!("kmsg: read failed: {e}");
                break;
            }
        }
    }
}

/// Decode one `<priority>,<sequence>,<usec>,<flags>;<text>` record.
pub fn parse_record(raw: &str, boot_time_secs: i64) -> Result<KernelMessage> {
    let raw = raw.trim_end_matches('\n');
    let (header, message) = raw
        .split_once(';')
        .ok_or_else(|| AgentError::parse(format!("kmsg record has no ';': {raw:?}")))?;

    let fields: Vec<&str> = header.split(',').collect();
    if fields.len() < 3 {
        return Err(AgentError::parse(format!(
            "kmsg header has {} fields, need at least 3",
            fields.len()
        )));
    }

    let priority: u8 = fields[0]
        .parse()
        .map_err(|_| AgentError::parse(format!("kmsg priority {:?}", fields[0])))?;
    let sequence: u64 = fields[1]
        .parse()
        .map_err(|_| AgentError::parse(format!("kmsg sequence {:?}", fields[1])))?;
    let micros: i64 = fields[2]
        .parse()
        .map_err(|_| AgentError::parse(format!("kmsg timestamp {:?}", fields[2])))?;

    let timestamp = DateTime::from_timestamp(boot_time_secs, 0)
        .ok_or_else(|| AgentError::parse(format!("boot time {boot_time_secs} out of range")))?
        + TimeDelta::microseconds(micros);

    let (subsystem, device) = split_subsystem(message);

    Ok(KernelMessage {
        timestamp,
        facility: priority >> 3,
        severity: priority & 7,
        sequence,
        message: message.to_string(),
        subsystem,
        device,
    })
}

/// Best-effort subsystem/device extraction from the message text.
///
/// A leading bracket group names the subsystem; the *last* closing bracket
/// bounds it so nested groups like `[drm:intel_dp_detect [i915]]` survive
/// intact. Otherwise an early `prefix:` of one or two tokens names the
/// subsystem and optionally a device.
fn split_subsystem(message: &str) -> (Option<String>, Option<String>) {
    if let Some(rest) = message.strip_prefix('[') {
        if let Some(end) = rest.rfind(']') {
            return (Some(rest[..end].to_string()), None);
        }
    }

    if let Some(colon) = message.find(':') {
        if colon < 50 {
            let tokens: Vec<&str> = message[..colon].split_whitespace().collect();
            match tokens.as_slice() {
                [subsystem] => return (Some(subsystem.to_string()), None),
                [subsystem, device] => {
                    return (Some(subsystem.to_string()), Some(device.to_string()))
                }
                _ => {}
            }
        }
    }

    (None, None)
}
