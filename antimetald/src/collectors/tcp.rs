//! TCP counters from three pseudo-files: MIB-II from net/snmp, Linux
//! extensions from net/netstat, and per-state connection counts from
//! net/tcp and net/tcp6.

use async_trait::async_trait;
use log::debug;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use tokio_util::sync::CancellationToken;

use crate::collector::poll::PeriodicAdapter;
use crate::collector::{
    Capabilities, Collector, CollectorBase, ContinuousCollector, MetricKind, PointCollector,
};
use crate::config::CollectionConfig;
use crate::error::{AgentError, Result};
use crate::payload::MetricPayload;

/// MIB-II TCP counters. Signed because MaxConn is defined as -1 when the
/// limit is dynamic.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TcpMib {
    pub rto_algorithm: i64,
    pub rto_min: i64,
    pub rto_max: i64,
    pub max_conn: i64,
    pub active_opens: i64,
    pub passive_opens: i64,
    pub attempt_fails: i64,
    pub estab_resets: i64,
    pub curr_estab: i64,
    pub in_segs: i64,
    pub out_segs: i64,
    pub retrans_segs: i64,
    pub in_errs: i64,
    pub out_rsts: i64,
    pub in_csum_errors: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TcpStats {
    pub mib: TcpMib,
    /// TcpExt counters from net/netstat; the set varies per kernel, so they
    /// stay keyed by name. Empty when the file is missing or malformed.
    pub ext: BTreeMap<String, i64>,
    /// Connection-state name -> count across tcp and tcp6.
    pub states: BTreeMap<String, u64>,
}

pub struct TcpCollector {
    base: CollectorBase,
    config: CollectionConfig,
}

impl TcpCollector {
    pub fn new(config: &CollectionConfig) -> Self {
        Self {
            base: CollectorBase::new(MetricKind::Tcp, "tcp", Capabilities::point()),
            config: config.clone(),
        }
    }
}

pub fn factory(config: &CollectionConfig) -> Result<Box<dyn ContinuousCollector>> {
    Ok(Box::new(PeriodicAdapter::new(
        TcpCollector::new(config),
        config.interval(),
    )))
}

impl Collector for TcpCollector {
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
impl PointCollector for TcpCollector {
    async fn collect(&self, cancel: &CancellationToken) -> Result<MetricPayload> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        let snmp_path = self.config.proc_path("net/snmp");
        let snmp =
            fs::read_to_string(&snmp_path).map_err(|e| AgentError::from_open(&snmp_path, &e))?;
        let mib = TcpMib::from_map(&parse_stanza(&snmp, "Tcp:")?);

        // The extension and per-connection files are optional; anything
        // wrong with them leaves the related fields empty.
        let ext = fs::read_to_string(self.config.proc_path("net/netstat"))
            .ok()
            .and_then(|content| match parse_stanza(&content, "TcpExt:") {
                Ok(map) => Some(map),
                Err(err) => {
                    debug!("tcp: netstat unusable: {err}");
                    None
                }
            })
            .unwrap_or_default();

        let mut states = BTreeMap::new();
        for file in ["net/tcp", "net/tcp6"] {
            if let Ok(content) = fs::read_to_string(self.config.proc_path(file)) {
                count_states(&content, &mut states);
            }
        }

        Ok(MetricPayload::Tcp(TcpStats { mib, ext, states }))
    }
}

/// snmp/netstat stanzas come as a header line and a value line sharing a
/// prefix; zip them by position. A length mismatch means the two lines are
/// out of sync and nothing in the stanza can be trusted.
pub fn parse_stanza(content: &str, prefix: &str) -> Result<BTreeMap<String, i64>> {
    let mut lines = content.lines().filter(|l| l.starts_with(prefix));
    let header = lines
        .next()
        .ok_or_else(|| AgentError::not_found(format!("{prefix} stanza")))?;
    let values = lines
        .next()
        .ok_or_else(|| AgentError::parse(format!("{prefix} stanza has no value line")))?;

    let names: Vec<&str> = header.split_whitespace().skip(1).collect();
    let numbers: Vec<&str> = values.split_whitespace().skip(1).collect();
    if names.len() != numbers.len() {
        return Err(AgentError::parse(format!(
            "{prefix} header has {} fields but values line has {}",
            names.len(),
            numbers.len()
        )));
    }

    Ok(names
        .into_iter()
        .zip(numbers)
        .filter_map(|(name, value)| value.parse().ok().map(|v| (name.to_string(), v)))
        .collect())
}

impl TcpMib {
    pub fn from_map(map: &BTreeMap<String, i64>) -> Self {
        let get = |name: &str| map.get(name).copied().unwrap_or(0);
        Self {
            rto_algorithm: get("RtoAlgorithm"),
            rto_min: get("RtoMin"),
            rto_max: get("RtoMax"),
            max_conn: get("MaxConn"),
            active_opens: get("ActiveOpens"),
            passive_opens: get("PassiveOpens"),
            attempt_fails: get("AttemptFails"),
            estab_resets: get("EstabResets"),
            curr_estab: get("CurrEstab"),
            in_segs: get("InSegs"),
            out_segs: get("OutSegs"),
            retrans_segs: get("RetransSegs"),
            in_errs: get("InErrs"),
            out_rsts: get("OutRsts"),
            in_csum_errors: get("InCsumErrors"),
        }
    }
}

/// The kernel's socket states as they appear in the `st` column of
/// net/tcp[6], two hex digits per connection line.
fn state_name(code: u8) -> Option<&'static str> {
    Some(match code {
        0x01 => "ESTABLISHED",
        0x02 => "SYN_SENT",
        0x03 => "SYN_RECV",
        0x04 => "FIN_WAIT1",
        0x05 => "FIN_WAIT2",
        0x06 => "TIME_WAIT",
        0x07 => "CLOSE",
        0x08 => "CLOSE_WAIT",
        0x09 => "LAST_ACK",
        0x0A => "LISTEN",
        0x0B => "CLOSING",
        _ => return None,
    })
}

/// Count connection states; the fourth whitespace token of each line after
/// the header is the state byte. Unknown codes are ignored.
pub fn count_states(content: &str, states: &mut BTreeMap<String, u64>) {
    for line in content.lines().skip(1) {
        let Some(token) = line.split_whitespace().nth(3) else {
            continue;
        };
        let Ok(code) = u8::from_str_radix(token, 16) else {
            continue;
        };
        if let Some(name) = state_name(code) {
            *states.entry(name.to_string()).or_insert(0) += 1;
        }
    }
}
